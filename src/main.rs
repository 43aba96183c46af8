//! Command line front end for capturing, training and evaluating gestures.

use std::{
    path::PathBuf,
    sync::{Arc, mpsc},
};

use gestures::{
    dataset::Split,
    inference::InferenceEngine,
    labels::LabelSpace,
    logging, model_store,
    training::{TrainingEvent, TrainingOrchestrator},
    workspace::{LabelAddition, Workspace},
};

const DEFAULT_EPOCHS: usize = 10;

fn main() {
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }
    if let Err(err) = run(std::env::args().skip(1).collect()) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    LabelsList,
    LabelsAdd(String),
    DataList(Split),
    DataAdd {
        split: Split,
        label: String,
        image: PathBuf,
    },
    DataRemove {
        split: Split,
        label: String,
        position: usize,
    },
    DataImport(PathBuf),
    Train {
        epochs: usize,
        learning_rate: Option<f64>,
        augment: Option<bool>,
    },
    Evaluate {
        split: Split,
        batch: Option<usize>,
    },
    HistoryShow,
    HistoryClear,
    ModelInstall(PathBuf),
    ModelReset,
}

fn run(args: Vec<String>) -> Result<(), String> {
    let command = parse_args(&args)?;
    let mut workspace = Workspace::open_default().map_err(|err| err.to_string())?;
    match command {
        Command::LabelsList => {
            let labels = workspace.labels();
            for (idx, name) in labels.label_names().iter().enumerate() {
                let slot = labels.internal_slot_name(idx).unwrap_or("-");
                println!("{idx:>2}  {name:<12}  {slot}");
            }
            println!("{}/{} labels used", labels.len(), labels.max_labels());
        }
        Command::LabelsAdd(name) => match workspace.add_label(&name) {
            LabelAddition::Added => println!("Added label {name}"),
            LabelAddition::Duplicate => return Err(format!("Label {name} already exists")),
            LabelAddition::Full => return Err("Label limit reached".to_string()),
            LabelAddition::InvalidName => {
                return Err(format!("Label {name:?} contains characters that are not allowed"));
            }
        },
        Command::DataList(split) => {
            let view = workspace.view(split);
            for group in 0..view.label_count() {
                let Some(label) = view.label_name(group) else {
                    continue;
                };
                println!("{label:<12}  {:>5} images", view.image_count(label));
            }
            println!("{} images in the {split} split", view.store().len());
        }
        Command::DataAdd { split, label, image } => {
            let decoded = image::open(&image)
                .map_err(|err| format!("Failed to open {}: {err}", image.display()))?;
            let index = workspace
                .add_image(split, &decoded, &label)
                .ok_or_else(|| format!("Failed to add {} to {label}", image.display()))?;
            println!("Stored image #{index} in the {split} split");
        }
        Command::DataRemove {
            split,
            label,
            position,
        } => {
            let removed = workspace
                .remove_image(split, &label, position)
                .ok_or_else(|| format!("No image {position} for label {label}"))?;
            println!("Removed {}/{}", removed.label, removed.id);
        }
        Command::DataImport(seed_root) => {
            let imported = workspace.import_builtins(&seed_root);
            println!("Imported {imported} images");
        }
        Command::Train {
            epochs,
            learning_rate,
            augment,
        } => train(&workspace, epochs, learning_rate, augment)?,
        Command::Evaluate { split, batch } => {
            let batch =
                batch.unwrap_or_else(|| workspace.settings().snapshot().evaluation_batch_size);
            let engine = InferenceEngine::new(
                workspace.load_model(),
                workspace.labels().mapping(LabelSpace::Slots),
            );
            let mut loader = workspace.evaluation_loader(split, batch);
            let evaluation = engine.evaluate(&mut loader);
            println!(
                "{split}: loss {:.4}, accuracy {:.2}% ({}/{})",
                evaluation.loss,
                evaluation.accuracy * 100.0,
                evaluation.correct,
                evaluation.evaluated
            );
        }
        Command::HistoryShow => {
            let history = workspace
                .history()
                .lock()
                .map_err(|_| "History lock poisoned".to_string())?;
            if history.is_empty() {
                println!("No training history");
            } else {
                println!("epoch  train loss    val loss  val acc");
                for event in history.events() {
                    println!("{event}");
                }
            }
        }
        Command::HistoryClear => {
            workspace
                .history()
                .lock()
                .map_err(|_| "History lock poisoned".to_string())?
                .clear();
            println!("Training history cleared");
        }
        Command::ModelInstall(seed) => {
            let installed = model_store::install_if_missing(&seed, workspace.model_path())
                .map_err(|err| err.to_string())?;
            if installed {
                println!("Installed {}", workspace.model_path().display());
            } else {
                println!("A model is already installed; run `model reset` first");
            }
        }
        Command::ModelReset => {
            workspace.reset_model().map_err(|err| err.to_string())?;
            println!("Model reset");
        }
    }
    Ok(())
}

fn train(
    workspace: &Workspace,
    epochs: usize,
    learning_rate: Option<f64>,
    augment: Option<bool>,
) -> Result<(), String> {
    let settings = workspace.settings();
    if let Some(rate) = learning_rate {
        settings.set_learning_rate(rate);
    }
    if let Some(enabled) = augment {
        settings.set_augmentation(enabled);
    }
    let orchestrator = Arc::new(
        TrainingOrchestrator::new(
            workspace.load_model(),
            workspace.training_sources(),
            settings.clone(),
            workspace.history().clone(),
        )
        .with_model_path(workspace.model_path()),
    );
    let (tx, rx) = mpsc::channel();
    let handle = orchestrator.spawn(epochs, settings.learning_rate(), tx);
    for event in rx {
        match event {
            TrainingEvent::Begin {
                epochs,
                examples,
                batches_per_epoch,
            } => {
                println!(
                    "Training {epochs} epochs on {examples} images \
                     ({batches_per_epoch} batches each)"
                );
                println!("epoch  train loss    val loss  val acc");
            }
            TrainingEvent::BatchProgress { .. } => {}
            TrainingEvent::EpochEnd {
                record, duration, ..
            } => println!("{record}  ({:.1}s)", duration.as_secs_f64()),
            TrainingEvent::Completed { .. } => {
                println!("Model saved to {}", workspace.model_path().display());
            }
            TrainingEvent::Failed { error } => eprintln!("Training failed: {error}"),
            TrainingEvent::Cancelled => println!("Training cancelled"),
        }
    }
    handle
        .join()
        .map_err(|_| "Training worker panicked".to_string())?
        .map_err(|err| err.to_string())?;
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let words: Vec<&str> = args.iter().map(String::as_str).collect();
    match words.as_slice() {
        [] | ["-h"] | ["--help"] | ["help"] => Err(help_text()),
        ["labels", "list"] => Ok(Command::LabelsList),
        ["labels", "add", name] => Ok(Command::LabelsAdd(name.to_string())),
        ["data", "list", split] => Ok(Command::DataList(parse_split(split)?)),
        ["data", "add", split, label, image] => Ok(Command::DataAdd {
            split: parse_split(split)?,
            label: label.to_string(),
            image: PathBuf::from(image),
        }),
        ["data", "remove", split, label, position] => Ok(Command::DataRemove {
            split: parse_split(split)?,
            label: label.to_string(),
            position: position
                .parse::<usize>()
                .map_err(|_| format!("Invalid position: {position}"))?,
        }),
        ["data", "import", seed] => Ok(Command::DataImport(PathBuf::from(seed))),
        ["train", rest @ ..] => parse_train(rest),
        ["evaluate", split, rest @ ..] => parse_evaluate(parse_split(split)?, rest),
        ["history", "show"] => Ok(Command::HistoryShow),
        ["history", "clear"] => Ok(Command::HistoryClear),
        ["model", "install", seed] => Ok(Command::ModelInstall(PathBuf::from(seed))),
        ["model", "reset"] => Ok(Command::ModelReset),
        _ => Err(format!("Unknown command: {}\n\n{}", words.join(" "), help_text())),
    }
}

fn parse_train(args: &[&str]) -> Result<Command, String> {
    let mut epochs = DEFAULT_EPOCHS;
    let mut learning_rate = None;
    let mut augment = None;
    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx] {
            "--epochs" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--epochs requires a value".to_string())?;
                epochs = value
                    .parse::<usize>()
                    .map_err(|_| format!("Invalid --epochs value: {value}"))?;
            }
            "--learning-rate" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--learning-rate requires a value".to_string())?;
                let rate = value
                    .parse::<f64>()
                    .map_err(|_| format!("Invalid --learning-rate value: {value}"))?;
                if !(rate.is_finite() && rate > 0.0) {
                    return Err("--learning-rate must be > 0".to_string());
                }
                learning_rate = Some(rate);
            }
            "--augment" => augment = Some(true),
            "--no-augment" => augment = Some(false),
            other => return Err(format!("Unknown train option: {other}")),
        }
        idx += 1;
    }
    Ok(Command::Train {
        epochs,
        learning_rate,
        augment,
    })
}

fn parse_evaluate(split: Split, args: &[&str]) -> Result<Command, String> {
    match args {
        [] => Ok(Command::Evaluate { split, batch: None }),
        ["--batch", value] => {
            let batch = value
                .parse::<usize>()
                .ok()
                .filter(|batch| *batch > 0)
                .ok_or_else(|| format!("Invalid --batch value: {value}"))?;
            Ok(Command::Evaluate {
                split,
                batch: Some(batch),
            })
        }
        _ => Err(format!("Unknown evaluate options: {}", args.join(" "))),
    }
}

fn parse_split(value: &str) -> Result<Split, String> {
    Split::parse(value).ok_or_else(|| format!("Unknown split {value:?} (expected train or test)"))
}

fn help_text() -> String {
    [
        "gestures <command>",
        "",
        "Commands:",
        "  labels list",
        "  labels add <name>",
        "  data list <train|test>",
        "  data add <train|test> <label> <image>",
        "  data remove <train|test> <label> <position>",
        "  data import <seed-dir>",
        "  train [--epochs N] [--learning-rate F] [--augment|--no-augment]",
        "  evaluate <train|test> [--batch N]",
        "  history show",
        "  history clear",
        "  model install <model-file>",
        "  model reset",
    ]
    .join("\n")
}
