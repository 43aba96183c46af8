//! Library exports for reuse in the command line tool, benchmarks and tests.
/// Application directory helpers.
pub mod app_dirs;
/// Classifier backend capabilities and the reference softmax model.
pub mod backend;
/// Cooperative cancellation flag.
pub mod cancel;
/// File-backed gesture image datasets.
pub mod dataset;
/// Persisted per-epoch training log.
pub mod history;
/// Prediction and evaluation passes.
pub mod inference;
/// User labels and internal slot mapping.
pub mod labels;
/// Batching, shuffling and augmentation.
pub mod loader;
/// Logging setup.
pub mod logging;
/// Durable model artifacts.
pub mod model_store;
/// Atomic record persistence.
pub mod persist;
/// Persisted training settings.
pub mod settings;
/// Cancellable training runs.
pub mod training;
/// Startup wiring of the shared state.
pub mod workspace;
