//! Application entry point: headless respiratory monitor.
//!
//! # Startup sequence
//!
//! 1. Parse the command line and initialise logging.
//! 2. Load [`AppConfig`] from disk (default on first run), apply overrides.
//! 3. Load the model and labels; a failure here is fatal.
//! 4. Check the feature extractor against the model input shape.
//! 5. Build the capture loop and the detection scheduler.
//! 6. Print detections until Ctrl-C or a fatal detection error, then stop
//!    and drain.  A fatal error exits non-zero.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use edgesense::{
    audio::{CaptureLoop, CpalSource, RingAudioBuffer},
    classifier::{Classifier, InferenceResult, ModelStore, RiskLevel},
    config::AppConfig,
    features::{FeatureExtractor, MelFeatureExtractor},
    pipeline::{DetectionEvent, DetectionScheduler, SchedulerSettings},
};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "edgesense", version, about = "On-device respiratory sound classifier")]
struct Args {
    /// Settings file (defaults to the platform config dir).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory containing `model.onnx` and `labels.json`.
    #[arg(long = "model-dir", value_name = "DIR")]
    model_dir: Option<PathBuf>,

    /// Analysis window length in seconds.
    #[arg(long = "window-secs")]
    window_secs: Option<f32>,

    /// Input device name (defaults to the system default).
    #[arg(long)]
    device: Option<String>,

    /// Print detections as JSON lines.
    #[arg(long)]
    json: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.model_dir {
            config.model.dir = Some(dir.clone());
        }
        if let Some(secs) = self.window_secs {
            config.audio.window_secs = secs;
        }
        if let Some(device) = &self.device {
            config.audio.device = Some(device.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Event printer
// ---------------------------------------------------------------------------

/// One detection as printed with `--json`.
#[derive(Serialize)]
struct DetectionLine<'a> {
    tick: u64,
    #[serde(flatten)]
    result: &'a InferenceResult,
    risk: RiskLevel,
    latency_ms: u128,
}

/// Prints events until the channel closes.  The first fatal error message
/// is forwarded on `fatal`.
async fn print_events(
    mut events: mpsc::Receiver<DetectionEvent>,
    alert_threshold: f32,
    json: bool,
    fatal: oneshot::Sender<String>,
) {
    let mut fatal = Some(fatal);
    while let Some(event) = events.recv().await {
        match event {
            DetectionEvent::Started => log::info!("detection started"),
            DetectionEvent::Detection(d) => {
                let r = &d.result;
                if json {
                    let line = DetectionLine {
                        tick: d.tick,
                        result: r,
                        risk: r.risk_level(),
                        latency_ms: d.latency.as_millis(),
                    };
                    match serde_json::to_string(&line) {
                        Ok(text) => println!("{text}"),
                        Err(e) => log::error!("failed to encode detection: {e}"),
                    }
                } else {
                    println!(
                        "[{:>5}] {:<12} {:>5.1}%  risk={:<6} ({} ms)",
                        d.tick,
                        r.label,
                        r.confidence * 100.0,
                        r.risk_level(),
                        d.latency.as_millis()
                    );
                }
                if r.is_alert(alert_threshold) {
                    log::warn!(
                        "ALERT: {} detected with {:.1}% confidence",
                        r.label,
                        r.confidence * 100.0
                    );
                }
            }
            DetectionEvent::Error { message } => {
                log::error!("detection failed: {message}");
                if let Some(tx) = fatal.take() {
                    let _ = tx.send(message);
                }
            }
            DetectionEvent::Stopped => log::info!("detection stopped"),
        }
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("edgesense {} starting up", env!("CARGO_PKG_VERSION"));

    // 2. Configuration
    let mut config = match &args.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => AppConfig::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config ({e}); using defaults");
            AppConfig::default()
        }),
    };
    args.apply(&mut config);

    let sample_rate = config.audio.sample_rate;
    let horizon = config.horizon();
    if horizon == 0 {
        bail!("window of {} s holds no samples", config.audio.window_secs);
    }

    // 3. Model
    let store = ModelStore::from_config(&config.model);
    let assets = store
        .load()
        .with_context(|| format!("no usable model in {}", store.models_dir.display()))?;
    let classifier = Arc::new(Classifier::load(&assets, config.model.input_shape)?);

    // 4. Features
    let extractor = MelFeatureExtractor::new(&config.features, sample_rate)?;
    let produced = extractor.output_shape(horizon);
    let expected = classifier.input_shape().as_tuple();
    if produced != expected {
        bail!(
            "a {} s window yields {produced:?} features but the model expects {expected:?}",
            config.audio.window_secs
        );
    }

    // 5. Runtime + pipeline
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(async move {
        let buffer = Arc::new(RingAudioBuffer::new(horizon));
        let capture = CaptureLoop::new(
            buffer,
            CpalSource::factory(config.audio.device.clone(), sample_rate),
            config.audio.read_chunk,
        );

        let (mut scheduler, events) = DetectionScheduler::new(
            capture,
            Arc::new(extractor),
            Arc::clone(&classifier),
            SchedulerSettings::from_config(&config),
        );
        let (fatal_tx, fatal_rx) = oneshot::channel();
        let printer = tokio::spawn(print_events(
            events,
            config.detection.alert_threshold,
            args.json,
            fatal_tx,
        ));

        scheduler.start()?;
        log::info!(
            "scheduler {}; press Ctrl-C to stop",
            scheduler.state().label()
        );

        // 6. Shutdown
        let failure = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                None
            }
            Ok(message) = fatal_rx => Some(message),
        };
        scheduler.stop();
        scheduler.wait().await;
        classifier.close();

        drop(scheduler);
        if let Err(e) = printer.await {
            log::warn!("event printer ended abnormally: {e}");
        }
        if let Some(message) = failure {
            bail!("detection stopped: {message}");
        }
        Ok::<(), anyhow::Error>(())
    })
}
