//! Sentinel Learn - Replay CLI
//!
//! Replay telemetry (JSON lines) qua detection pipeline:
//! warmup fit → stream events/sequences → feedback từ label → lưu state.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ndarray::ArrayView2;
use serde_json::json;

use sentinel_learn::constants::{self, APP_VERSION};
use sentinel_learn::logic::config::EngineConfig;
use sentinel_learn::logic::detection::{sliding_windows, DetectionOrchestrator};
use sentinel_learn::logic::features::{EventPreprocessor, EventType, Preprocessor, TelemetryEvent};
use sentinel_learn::logic::learning::{self, storage, ContinualLearningManager, FeedbackAggregator, FeedbackOutcome};
use sentinel_learn::logic::model::{
    evaluate_detector, AutoencoderConfig, FitParams, LinearAutoencoder, ModelError, TrainableModel, TrainingTarget,
};

const ANOMALY_DIR: &str = "anomaly";
const SEQUENCE_DIR: &str = "sequence";

#[derive(Debug, Parser)]
#[command(name = "sentinel-learn", version = APP_VERSION, about = "Continual learning detection engine")]
struct Cli {
    /// Engine config (JSON). Defaults when omitted.
    #[arg(long, global = true, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// State directory
    #[arg(long, global = true, env = "SENTINEL_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fit on the first events of a JSONL file, then score the rest
    Replay(ReplayArgs),
    /// Print persisted learning state
    Status,
}

#[derive(Debug, Args)]
struct ReplayArgs {
    /// Telemetry events, one JSON object per line
    #[arg(long)]
    events: PathBuf,

    #[arg(long, default_value = "syscall")]
    event_type: String,

    /// Events used to fit the preprocessor and the base model
    #[arg(long, default_value_t = 200)]
    warmup: usize,

    /// Score sliding windows instead of single events
    #[arg(long)]
    sequences: bool,

    /// Window length in sequence mode (config `default_sequence_length` when omitted)
    #[arg(long)]
    sequence_length: Option<usize>,

    /// Events per sequence batch (sequence mode)
    #[arg(long, default_value_t = 50)]
    batch: usize,

    /// Do not write state after the replay
    #[arg(long)]
    no_save: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let state_dir = cli.state_dir.clone().unwrap_or_else(constants::state_dir);

    log::info!("Starting Sentinel Learn v{}", APP_VERSION);

    match &cli.command {
        Command::Replay(args) => replay(&config, &state_dir, args),
        Command::Status => status(&state_dir),
    }
}

// ============================================================================
// REPLAY
// ============================================================================

fn replay(config: &EngineConfig, state_dir: &Path, args: &ReplayArgs) -> Result<()> {
    let event_type: EventType = args.event_type.parse()?;
    let events = read_events(&args.events)?;
    if events.len() <= args.warmup {
        bail!("{} events, need more than the {} warmup events", events.len(), args.warmup);
    }
    let (warmup, stream) = events.split_at(args.warmup);

    let preprocessor = Arc::new(EventPreprocessor::new());
    preprocessor.fit(warmup, event_type.as_str())?;
    let x = preprocessor
        .transform(warmup, event_type.as_str())?
        .context("warmup produced no features")?;

    let anomaly = Arc::new(ContinualLearningManager::new(config.learning.clone())?);
    anomaly.set_base_model(train_base(config, x.view())?)?;

    let feedback = Arc::new(FeedbackAggregator::new(config.feedback.clone()));
    feedback.set_manager(anomaly.clone());

    let mut orchestrator = DetectionOrchestrator::new(config.detection.clone(), preprocessor.clone(), anomaly.clone())
        .with_feedback(feedback.clone());

    let sequence_length = match (args.sequences, args.sequence_length) {
        (_, Some(len)) => Some(len),
        (true, None) => Some(config.detection.default_sequence_length),
        (false, None) => None,
    };
    let sequence = match sequence_length {
        Some(len) => {
            let manager = Arc::new(ContinualLearningManager::new(config.learning.clone())?);
            manager.set_base_model(train_base(config, sliding_windows(x.view(), len)?.view())?)?;
            orchestrator = orchestrator.with_sequence_model(manager.clone());
            Some((manager, len))
        }
        None => None,
    };

    let evaluation = match &sequence {
        Some((_, len)) => {
            replay_sequences(&orchestrator, stream, event_type, *len, args.batch)?;
            None
        }
        None => replay_events(&orchestrator, &anomaly, &feedback, &preprocessor, stream, event_type, config)?,
    };

    println!(
        "{}",
        json!({
            "stats": orchestrator.stats(),
            "anomaly_versions": anomaly.versions(),
            "evaluation": evaluation,
        })
    );

    if !args.no_save {
        learning::save_state(&anomaly, &state_dir.join(ANOMALY_DIR))?;
        if let Some((manager, _)) = &sequence {
            learning::save_state(manager, &state_dir.join(SEQUENCE_DIR))?;
        }
        learning::save_feedback(&feedback, state_dir)?;
    }
    Ok(())
}

fn replay_events(
    orchestrator: &DetectionOrchestrator,
    anomaly: &ContinualLearningManager,
    feedback: &FeedbackAggregator,
    preprocessor: &EventPreprocessor,
    stream: &[TelemetryEvent],
    event_type: EventType,
    config: &EngineConfig,
) -> Result<Option<serde_json::Value>> {
    let mut labelled = Vec::new();

    for event in stream {
        let result = orchestrator.process_event(event, event_type.as_str())?;
        println!("{}", serde_json::to_string(&result)?);

        let Some(label) = event.label() else {
            continue;
        };
        labelled.push((event.clone(), label));

        if !config.detection.use_continual_learning {
            continue;
        }
        if result.is_anomaly && !label {
            orchestrator.record_feedback(&result.event_id, true, None)?;
        } else if !result.is_anomaly && label {
            orchestrator.record_missed_detection(event, event_type.as_str())?;
        }

        match feedback.process()? {
            FeedbackOutcome::Update(outcome) => log::info!("Feedback-driven update: {:?}", outcome),
            FeedbackOutcome::Buffered | FeedbackOutcome::NoAction => {}
        }
    }

    if labelled.is_empty() {
        return Ok(None);
    }

    let (events, truth): (Vec<TelemetryEvent>, Vec<bool>) = labelled.into_iter().unzip();
    let x = preprocessor
        .transform(&events, event_type.as_str())?
        .context("labelled events produced no features")?;
    let model = anomaly.active_model()?;
    let report = evaluate_detector(model.as_ref(), x.view(), &truth)?;
    log::info!(
        "Evaluation: precision={:.3} recall={:.3} f1={:.3}",
        report.metrics.precision,
        report.metrics.recall,
        report.metrics.f1
    );
    Ok(Some(serde_json::to_value(report)?))
}

fn replay_sequences(
    orchestrator: &DetectionOrchestrator,
    stream: &[TelemetryEvent],
    event_type: EventType,
    sequence_length: usize,
    batch: usize,
) -> Result<()> {
    for chunk in stream.chunks(batch.max(sequence_length)) {
        if chunk.len() < sequence_length {
            log::debug!("Skipping trailing {} events", chunk.len());
            continue;
        }
        let result = orchestrator.process_sequence(chunk, event_type.as_str(), sequence_length)?;
        println!("{}", serde_json::to_string(&result)?);
    }
    Ok(())
}

fn train_base(config: &EngineConfig, x: ArrayView2<'_, f32>) -> Result<Box<dyn TrainableModel>> {
    let mut model = LinearAutoencoder::new(AutoencoderConfig::default(), x.ncols());
    let params = FitParams {
        epochs: config.learning.epochs,
        batch_size: config.learning.batch_size,
    };
    let history = model.fit(x, &TrainingTarget::Reconstruction, params, None)?;
    log::info!(
        "Base model trained on {} rows (final loss {:?}, threshold {:.6})",
        x.nrows(),
        history.final_loss(),
        model.threshold()
    );
    Ok(Box::new(model))
}

fn read_events(path: &Path) -> Result<Vec<TelemetryEvent>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut events = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line).with_context(|| format!("{}:{}", path.display(), i + 1))?;
        events.push(event);
    }
    log::info!("Read {} events from {}", events.len(), path.display());
    Ok(events)
}

// ============================================================================
// STATUS
// ============================================================================

fn load_autoencoder(bytes: &[u8]) -> Result<Box<dyn TrainableModel>, ModelError> {
    Ok(Box::new(LinearAutoencoder::from_bytes(bytes)?))
}

fn status(state_dir: &Path) -> Result<()> {
    let mut report = serde_json::Map::new();

    for name in [ANOMALY_DIR, SEQUENCE_DIR] {
        let dir = state_dir.join(name);
        if !dir.join(storage::METADATA_FILE).exists() {
            continue;
        }
        let manager = learning::load_state(&dir, load_autoencoder)?;
        report.insert(
            name.to_string(),
            json!({
                "active_version": manager.active_version(),
                "versions": manager.versions(),
                "trend": manager.performance_trend(),
                "last_update_time": manager.last_update_time(),
                "buffer": storage::load_buffer_stats(&dir)?,
            }),
        );
    }

    if state_dir.join(storage::FEEDBACK_FILE).exists() {
        let feedback = learning::load_feedback(state_dir)?;
        report.insert("feedback".to_string(), json!(feedback.counts()));
    }

    if report.is_empty() {
        bail!("no learning state in {}", state_dir.display());
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
