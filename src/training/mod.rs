//! Cancellable incremental training runs.
//!
//! A run trains a working copy of the committed backend for a number of
//! epochs, validating after each one and appending the result to the
//! [`TrainingHistory`]. The committed backend (and the model artifact on disk)
//! only change once the whole run succeeded.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc::Sender},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    backend::{BackendError, TrainableClassifier, TrainingExample},
    cancel::CancelToken,
    dataset::DatasetSnapshot,
    history::{HistoryEvent, TrainingHistory},
    inference::InferenceEngine,
    labels::LabelMapping,
    loader::{BatchLoader, LoaderOptions},
    model_store::{self, ModelStoreError},
    settings::SettingsHandle,
};

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("A training run is already in progress")]
    AlreadyRunning,
    #[error("The training set is empty")]
    EmptyTrainingSet,
    #[error("Backend failed during training: {0}")]
    Backend(#[from] BackendError),
    #[error("Failed to save the trained model: {0}")]
    Save(#[from] ModelStoreError),
}

/// Whether a run is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingState {
    Idle,
    Running,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Ordered progress of one run; exactly one terminal variant is emitted.
#[derive(Debug)]
pub enum TrainingEvent<B> {
    Begin {
        epochs: usize,
        examples: usize,
        batches_per_epoch: usize,
    },
    /// Mean loss of the batches seen so far in `epoch`.
    BatchProgress {
        epoch: usize,
        batch: usize,
        running_loss: f64,
    },
    EpochEnd {
        /// Zero-based epoch of this run.
        epoch: usize,
        record: HistoryEvent,
        duration: Duration,
    },
    Completed {
        model: B,
    },
    Failed {
        error: TrainingError,
    },
    Cancelled,
}

/// Datasets and label translation a run trains against.
#[derive(Debug, Clone)]
pub struct TrainingSources {
    pub train: DatasetSnapshot,
    pub validation: DatasetSnapshot,
    /// Slot mapping of the trainable backend.
    pub mapping: LabelMapping,
}

#[derive(Debug)]
struct RunState {
    state: TrainingState,
    last_outcome: Option<TrainingOutcome>,
}

pub struct TrainingOrchestrator<B> {
    model: Mutex<B>,
    sources: Mutex<TrainingSources>,
    history: Arc<Mutex<TrainingHistory>>,
    settings: SettingsHandle,
    model_path: Option<PathBuf>,
    seed: Option<u64>,
    run: Mutex<RunState>,
    cancel: CancelToken,
}

struct RunLoaders {
    /// Shuffled, optionally augmented.
    train: BatchLoader,
    validation: BatchLoader,
}

enum EpochsEnd {
    Finished,
    Cancelled,
}

impl<B: TrainableClassifier> TrainingOrchestrator<B> {
    pub fn new(
        model: B,
        sources: TrainingSources,
        settings: SettingsHandle,
        history: Arc<Mutex<TrainingHistory>>,
    ) -> Self {
        Self {
            model: Mutex::new(model),
            sources: Mutex::new(sources),
            history,
            settings,
            model_path: None,
            seed: None,
            run: Mutex::new(RunState {
                state: TrainingState::Idle,
                last_outcome: None,
            }),
            cancel: CancelToken::new(),
        }
    }

    /// Persist the trained model at `path` after every successful run.
    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    /// Fix the loader RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Replace the datasets used by the next run.
    pub fn set_sources(&self, sources: TrainingSources) {
        *lock(&self.sources) = sources;
    }

    pub fn state(&self) -> TrainingState {
        lock(&self.run).state
    }

    pub fn last_outcome(&self) -> Option<TrainingOutcome> {
        lock(&self.run).last_outcome
    }

    /// Copy of the committed backend.
    pub fn model(&self) -> B {
        lock(&self.model).clone()
    }

    /// Swap the committed backend, e.g. after a model reset.
    pub fn set_model(&self, model: B) {
        *lock(&self.model) = model;
    }

    pub fn history(&self) -> &Arc<Mutex<TrainingHistory>> {
        &self.history
    }

    /// Ask the running run to stop at the next epoch boundary.
    ///
    /// A request made at any point before the run ends suppresses its
    /// completion event and its model commit.
    pub fn cancel(&self) {
        let run = lock(&self.run);
        if run.state == TrainingState::Running {
            info!("Training cancellation requested");
            self.cancel.cancel();
        }
    }

    /// Train for `epochs` epochs, reporting progress through `on_event`.
    ///
    /// Precondition failures are returned before any event is emitted.
    /// Everything else ends in exactly one terminal event.
    pub fn train(
        &self,
        epochs: usize,
        learning_rate: f64,
        mut on_event: impl FnMut(TrainingEvent<B>),
    ) -> Result<TrainingOutcome, TrainingError> {
        let sources = lock(&self.sources).clone();
        {
            let mut run = lock(&self.run);
            if run.state == TrainingState::Running {
                return Err(TrainingError::AlreadyRunning);
            }
            if sources.train.is_empty() {
                return Err(TrainingError::EmptyTrainingSet);
            }
            self.cancel.reset();
            run.state = TrainingState::Running;
        }

        let outcome = self.run_to_end(&sources, epochs, learning_rate, &mut on_event);

        let mut run = lock(&self.run);
        run.state = TrainingState::Idle;
        run.last_outcome = Some(outcome);
        Ok(outcome)
    }

    /// Run [`train`](Self::train) on a worker thread, forwarding events to `sender`.
    pub fn spawn(
        self: Arc<Self>,
        epochs: usize,
        learning_rate: f64,
        sender: Sender<TrainingEvent<B>>,
    ) -> JoinHandle<Result<TrainingOutcome, TrainingError>>
    where
        B: 'static,
    {
        thread::spawn(move || {
            self.train(epochs, learning_rate, |event| {
                let _ = sender.send(event);
            })
        })
    }

    fn run_to_end(
        &self,
        sources: &TrainingSources,
        epochs: usize,
        learning_rate: f64,
        on_event: &mut impl FnMut(TrainingEvent<B>),
    ) -> TrainingOutcome {
        let settings = self.settings.snapshot();
        let geometry = settings.feature_geometry();
        let mut loaders = RunLoaders {
            train: BatchLoader::new(
                sources.train.clone(),
                LoaderOptions {
                    batch_size: settings.training_batch_size,
                    shuffle: true,
                    augment: settings.augmentation,
                    geometry,
                    seed: self.seed,
                },
            ),
            validation: BatchLoader::new(
                sources.validation.clone(),
                LoaderOptions {
                    batch_size: settings.validation_batch_size,
                    shuffle: false,
                    augment: false,
                    geometry,
                    seed: self.seed,
                },
            ),
        };
        let mut working = self.model();

        info!(
            "Training {epochs} epochs on {} examples (lr {learning_rate}, augmentation {})",
            loaders.train.len(),
            settings.augmentation
        );
        on_event(TrainingEvent::Begin {
            epochs,
            examples: loaders.train.len(),
            batches_per_epoch: loaders.train.batch_count(),
        });

        let result = self.run_epochs(
            &mut working,
            &mut loaders,
            &sources.mapping,
            epochs,
            learning_rate,
            &mut *on_event,
        );
        let result = match result {
            Ok(EpochsEnd::Finished) if self.cancel.is_cancelled() => Ok(EpochsEnd::Cancelled),
            other => other,
        };
        match result {
            Ok(EpochsEnd::Cancelled) => {
                info!("Training cancelled");
                on_event(TrainingEvent::Cancelled);
                TrainingOutcome::Cancelled
            }
            Ok(EpochsEnd::Finished) => match self.commit(&working) {
                Ok(()) => {
                    info!("Training completed");
                    on_event(TrainingEvent::Completed { model: working });
                    TrainingOutcome::Completed
                }
                Err(err) => self.fail(err, on_event),
            },
            Err(err) => self.fail(err, on_event),
        }
    }

    fn run_epochs(
        &self,
        working: &mut B,
        loaders: &mut RunLoaders,
        mapping: &LabelMapping,
        epochs: usize,
        learning_rate: f64,
        on_event: &mut impl FnMut(TrainingEvent<B>),
    ) -> Result<EpochsEnd, TrainingError> {
        for epoch in 0..epochs {
            if self.cancel.is_cancelled() {
                return Ok(EpochsEnd::Cancelled);
            }
            let started = Instant::now();
            let training_loss = train_one_epoch(
                working,
                &mut loaders.train,
                mapping,
                epoch,
                learning_rate,
                &mut *on_event,
            )?;
            if self.cancel.is_cancelled() {
                return Ok(EpochsEnd::Cancelled);
            }

            let evaluation =
                InferenceEngine::new(&*working, mapping.clone()).evaluate(&mut loaders.validation);
            let record = lock(&self.history).append(
                training_loss,
                evaluation.loss,
                evaluation.accuracy,
            );
            info!("Epoch {record}");
            on_event(TrainingEvent::EpochEnd {
                epoch,
                record,
                duration: started.elapsed(),
            });
        }
        Ok(EpochsEnd::Finished)
    }

    /// Swap in the new artifact, then the in-memory backend.
    fn commit(&self, working: &B) -> Result<(), TrainingError> {
        if let Some(path) = self.model_path.as_deref() {
            model_store::replace_atomic(path, working)?;
        }
        self.set_model(working.clone());
        Ok(())
    }

    fn fail(
        &self,
        error: TrainingError,
        on_event: &mut impl FnMut(TrainingEvent<B>),
    ) -> TrainingOutcome {
        error!("Training failed: {error}");
        on_event(TrainingEvent::Failed { error });
        TrainingOutcome::Failed
    }
}

/// One optimization pass; returns the epoch's training loss.
fn train_one_epoch<B: TrainableClassifier>(
    working: &mut B,
    loader: &mut BatchLoader,
    mapping: &LabelMapping,
    epoch: usize,
    learning_rate: f64,
    on_event: &mut impl FnMut(TrainingEvent<B>),
) -> Result<f64, TrainingError> {
    loader.start_epoch();
    let mut loss_sum = 0.0f64;
    let mut seen = 0usize;
    while let Some(batch) = loader.next_batch() {
        let examples: Vec<TrainingExample<'_>> = batch
            .items
            .iter()
            .filter_map(|item| {
                let user_label = loader.label(item.index)?;
                match mapping.to_backend(user_label) {
                    Some(label) => Some(TrainingExample {
                        feature: &item.feature,
                        label,
                    }),
                    None => {
                        warn!(
                            "Skipping example {} with unmapped label {user_label:?}",
                            item.index
                        );
                        None
                    }
                }
            })
            .collect();
        if examples.is_empty() {
            continue;
        }
        let loss = working.train_step(&examples, learning_rate)?;
        loss_sum += loss * examples.len() as f64;
        seen += examples.len();
        on_event(TrainingEvent::BatchProgress {
            epoch,
            batch: batch.position,
            running_loss: loss_sum / seen as f64,
        });
    }
    let fallback = if seen == 0 { 0.0 } else { loss_sum / seen as f64 };
    Ok(working.end_epoch().unwrap_or(fallback))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
