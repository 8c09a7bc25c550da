//! Detection scheduler: drives snapshot → features → inference on a fixed
//! cadence, independent of capture.
//!
//! # Tick flow
//!
//! ```text
//! RingAudioBuffer::snapshot_if_full
//!   ├─ None  → not ready, wait
//!   └─ Some  → spawn_blocking(normalize → extract → predict)
//!                ├─ Ok            → DetectionEvent::Detection (try_send)
//!                ├─ Inference err → warn, skip tick
//!                └─ fatal err     → stop capture, DetectionEvent::Error, exit
//! wait tick_interval, or wake early on stop()
//! ```
//!
//! The loop runs as a tokio task; feature extraction and inference run on the
//! blocking pool so the runtime never stalls.  Each `start` creates a fresh
//! `watch` channel, so a loop left over from a previous run only ever sees
//! its own stop signal.  A new loop waits for the previous one to finish
//! before it reports `Started`, so each run's `Stopped` precedes the next
//! run's `Started`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio::{CaptureLoop, NormalizedWindow, RingAudioBuffer};
use crate::classifier::{Classifier, ClassifierError};
use crate::config::AppConfig;
use crate::features::FeatureExtractor;

use super::state::{Detection, DetectionEvent, PipelineError, SchedulerState};

// ---------------------------------------------------------------------------
// SchedulerSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    /// Ticks whose inference takes longer are dropped.
    pub max_inference: Option<Duration>,
    /// Reset the buffer at every `start`.
    pub clear_on_start: bool,
    pub event_capacity: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl SchedulerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            tick_interval: config.detection.tick_interval(),
            max_inference: config.detection.max_inference(),
            clear_on_start: config.audio.clear_on_start,
            event_capacity: config.detection.event_capacity,
        }
    }
}

// ---------------------------------------------------------------------------
// DetectionScheduler
// ---------------------------------------------------------------------------

/// Owns the capture loop and the tick loop.
///
/// Holds an already loaded [`Classifier`], so a scheduler never exists for a
/// model that failed to load.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use edgesense::audio::{CaptureLoop, CpalSource, RingAudioBuffer};
/// use edgesense::classifier::{Classifier, ModelStore};
/// use edgesense::config::AppConfig;
/// use edgesense::features::MelFeatureExtractor;
/// use edgesense::pipeline::{DetectionScheduler, SchedulerSettings};
///
/// # async fn example() {
/// let config = AppConfig::default();
/// let assets = ModelStore::from_config(&config.model).load().unwrap();
/// let classifier = Arc::new(Classifier::load(&assets, None).unwrap());
/// let extractor = Arc::new(MelFeatureExtractor::new(&config.features, 16_000).unwrap());
///
/// let buffer = Arc::new(RingAudioBuffer::new(config.horizon()));
/// let capture = CaptureLoop::new(buffer, CpalSource::factory(None, 16_000), 1024);
///
/// let (mut scheduler, mut events) = DetectionScheduler::new(
///     capture,
///     extractor,
///     classifier,
///     SchedulerSettings::from_config(&config),
/// );
/// scheduler.start().unwrap();
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # }
/// ```
pub struct DetectionScheduler {
    capture: Arc<Mutex<CaptureLoop>>,
    buffer: Arc<RingAudioBuffer>,
    extractor: Arc<dyn FeatureExtractor>,
    classifier: Arc<Classifier>,
    settings: SchedulerSettings,
    events: mpsc::Sender<DetectionEvent>,
    /// Running flag of the current run; `None` before the first `start`.
    running: Option<Arc<watch::Sender<bool>>>,
    task: Option<JoinHandle<()>>,
}

impl DetectionScheduler {
    /// Build a stopped scheduler and the receiving end of its event channel.
    pub fn new(
        capture: CaptureLoop,
        extractor: Arc<dyn FeatureExtractor>,
        classifier: Arc<Classifier>,
        settings: SchedulerSettings,
    ) -> (Self, mpsc::Receiver<DetectionEvent>) {
        let (events, events_rx) = mpsc::channel(settings.event_capacity.max(1));
        let buffer = Arc::clone(capture.buffer());

        let scheduler = Self {
            capture: Arc::new(Mutex::new(capture)),
            buffer,
            extractor,
            classifier,
            settings,
            events,
            running: None,
            task: None,
        };
        (scheduler, events_rx)
    }

    /// Start capture and the tick loop.  No-op while running.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Capture`] when the audio source cannot be opened,
    /// [`PipelineError::Internal`] when there is no tokio runtime.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.state().is_running() {
            log::debug!("scheduler: start ignored, already running");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PipelineError::Internal(format!("no tokio runtime: {e}")))?;

        if self.settings.clear_on_start {
            self.buffer.reset();
        }
        lock(&self.capture).start()?;
        let previous = self.task.take();

        let (running_tx, running_rx) = watch::channel(true);
        let running_tx = Arc::new(running_tx);

        let ticker = Ticker {
            buffer: Arc::clone(&self.buffer),
            extractor: Arc::clone(&self.extractor),
            classifier: Arc::clone(&self.classifier),
            capture: Arc::clone(&self.capture),
            events: self.events.clone(),
            running: Arc::clone(&running_tx),
            tick_interval: self.settings.tick_interval,
            max_inference: self.settings.max_inference,
        };

        self.task = Some(runtime.spawn(ticker.run(previous, running_rx)));
        self.running = Some(running_tx);

        log::info!(
            "scheduler: running, tick every {:?}",
            self.settings.tick_interval
        );
        Ok(())
    }

    /// Stop the tick loop and capture.  Safe before `start` and when called
    /// repeatedly.
    pub fn stop(&mut self) {
        if let Some(running) = &self.running {
            if running.send_replace(false) {
                log::info!("scheduler: stopping");
            }
        }
        lock(&self.capture).stop();
    }

    /// Wait for the current loop to exit.  Returns immediately if none was
    /// started.
    pub async fn wait(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("scheduler: tick loop panicked: {e}");
            }
        }
    }

    pub fn state(&self) -> SchedulerState {
        match &self.running {
            Some(running) if *running.borrow() => SchedulerState::Running,
            _ => SchedulerState::Stopped,
        }
    }

    pub fn buffer(&self) -> &Arc<RingAudioBuffer> {
        &self.buffer
    }

    pub fn classifier(&self) -> &Arc<Classifier> {
        &self.classifier
    }
}

impl Drop for DetectionScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Ticker  (the spawned loop)
// ---------------------------------------------------------------------------

enum TickOutcome {
    NotReady,
    Detected(Detection),
    Skipped,
    Fatal(ClassifierError),
}

struct Ticker {
    buffer: Arc<RingAudioBuffer>,
    extractor: Arc<dyn FeatureExtractor>,
    classifier: Arc<Classifier>,
    capture: Arc<Mutex<CaptureLoop>>,
    events: mpsc::Sender<DetectionEvent>,
    running: Arc<watch::Sender<bool>>,
    tick_interval: Duration,
    max_inference: Option<Duration>,
}

impl Ticker {
    async fn run(self, previous: Option<JoinHandle<()>>, mut running_rx: watch::Receiver<bool>) {
        if let Some(previous) = previous {
            if let Err(e) = previous.await {
                log::error!("scheduler: previous tick loop panicked: {e}");
            }
        }
        emit(&self.events, DetectionEvent::Started);

        let mut tick: u64 = 0;

        while *running_rx.borrow() {
            let outcome = self.tick(tick).await;
            tick += 1;

            // stop() may have landed while inference was running.
            if !*running_rx.borrow() {
                break;
            }

            match outcome {
                TickOutcome::NotReady => log::trace!("scheduler: tick {tick}, window not full"),
                TickOutcome::Skipped => {}
                TickOutcome::Detected(detection) => {
                    log::debug!(
                        "scheduler: tick {} → {} ({:.2}) in {:?}",
                        detection.tick,
                        detection.result.label,
                        detection.result.confidence,
                        detection.latency
                    );
                    emit(&self.events, DetectionEvent::Detection(detection));
                }
                TickOutcome::Fatal(e) => {
                    log::error!("scheduler: {e}, detection stopped");
                    self.end_run().await;
                    emit(
                        &self.events,
                        DetectionEvent::Error {
                            message: e.to_string(),
                        },
                    );
                    break;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.tick_interval) => {}
                changed = running_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        emit(&self.events, DetectionEvent::Stopped);
        log::info!("scheduler: stopped after {tick} ticks");
    }

    async fn tick(&self, tick: u64) -> TickOutcome {
        let Some(samples) = self.buffer.snapshot_if_full() else {
            return TickOutcome::NotReady;
        };

        let extractor = Arc::clone(&self.extractor);
        let classifier = Arc::clone(&self.classifier);
        let started = Instant::now();

        let joined = tokio::task::spawn_blocking(move || {
            let window = NormalizedWindow::from_samples(&samples);
            if window.is_silent() {
                log::debug!("scheduler: tick {tick} window is silent");
            }
            let features = extractor.extract(&window);
            classifier.predict(&features)
        })
        .await;
        let latency = started.elapsed();

        match joined {
            Ok(Ok(result)) => match self.max_inference {
                Some(limit) if latency > limit => {
                    log::warn!("scheduler: tick {tick} took {latency:?} (limit {limit:?}), dropped");
                    TickOutcome::Skipped
                }
                _ => TickOutcome::Detected(Detection {
                    tick,
                    result,
                    latency,
                }),
            },
            Ok(Err(e)) if e.is_fatal() => TickOutcome::Fatal(e),
            Ok(Err(e)) => {
                log::warn!("scheduler: tick {tick} skipped: {e}");
                TickOutcome::Skipped
            }
            Err(e) => {
                log::error!("scheduler: inference task failed: {e}");
                TickOutcome::Skipped
            }
        }
    }

    /// Ends the run from inside the loop.  The flag flips while the capture
    /// lock is held, so a `start()` that observes `Stopped` finds capture
    /// idle.  If `stop()` already ended this run, capture belongs to the
    /// caller and is left alone.
    ///
    /// `CaptureLoop::stop` joins a thread, so this runs on the blocking pool.
    async fn end_run(&self) {
        let capture = Arc::clone(&self.capture);
        let running = Arc::clone(&self.running);
        let joined = tokio::task::spawn_blocking(move || {
            let mut capture = lock(&capture);
            if running.send_replace(false) {
                capture.stop();
            }
        })
        .await;

        if let Err(e) = joined {
            log::error!("scheduler: failed to stop capture: {e}");
            self.running.send_replace(false);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Non-blocking delivery; a full channel drops the event.
fn emit(events: &mpsc::Sender<DetectionEvent>, event: DetectionEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            log::warn!("scheduler: event channel full, dropped {event:?}");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            log::debug!("scheduler: event receiver gone");
        }
    }
}

fn lock(capture: &Mutex<CaptureLoop>) -> MutexGuard<'_, CaptureLoop> {
    capture.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioSource, CaptureError, Sample, SourceFactory};
    use crate::classifier::{InferenceBackend, InputTensor};
    use crate::features::FeatureMatrix;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::timeout;

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    /// Emits a constant value, one small chunk per read.
    struct ConstSource(Sample);

    impl AudioSource for ConstSource {
        fn read(&mut self, buf: &mut [Sample]) -> Result<usize, CaptureError> {
            let n = buf.len().min(16);
            buf[..n].fill(self.0);
            std::thread::sleep(Duration::from_millis(1));
            Ok(n)
        }
    }

    /// Never produces audio.
    struct MuteSource;

    impl AudioSource for MuteSource {
        fn read(&mut self, _buf: &mut [Sample]) -> Result<usize, CaptureError> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(0)
        }
    }

    fn const_factory(value: Sample) -> SourceFactory {
        Arc::new(move || Ok(Box::new(ConstSource(value)) as Box<dyn AudioSource>))
    }

    fn mute_factory() -> SourceFactory {
        Arc::new(|| Ok(Box::new(MuteSource) as Box<dyn AudioSource>))
    }

    /// `(1, 2)` matrix of `[peak, mean]`.
    struct PeakMean;

    impl FeatureExtractor for PeakMean {
        fn extract(&self, window: &NormalizedWindow) -> FeatureMatrix {
            let s = window.samples();
            let peak = s.iter().fold(0.0_f32, |m, v| m.max(v.abs()));
            let mean = s.iter().sum::<f32>() / s.len().max(1) as f32;
            FeatureMatrix::new(1, 2, vec![peak, mean]).unwrap()
        }

        fn output_shape(&self, _window_len: usize) -> (usize, usize) {
            (1, 2)
        }
    }

    struct FixedBackend {
        dims: Vec<usize>,
        scores: Vec<f32>,
    }

    impl InferenceBackend for FixedBackend {
        fn input_dims(&self) -> &[usize] {
            &self.dims
        }

        fn output_classes(&self) -> usize {
            self.scores.len()
        }

        fn run(&self, _input: &InputTensor) -> Result<Vec<f32>, ClassifierError> {
            Ok(self.scores.clone())
        }
    }

    /// Reports a closed model on its first call, then scores like
    /// `FixedBackend`.
    struct FailsOnce {
        failed: AtomicBool,
    }

    impl InferenceBackend for FailsOnce {
        fn input_dims(&self) -> &[usize] {
            &[1, 1, 2]
        }

        fn output_classes(&self) -> usize {
            3
        }

        fn run(&self, _input: &InputTensor) -> Result<Vec<f32>, ClassifierError> {
            if self.failed.swap(true, Ordering::SeqCst) {
                Ok(vec![0.1, 0.7, 0.2])
            } else {
                Err(ClassifierError::Closed)
            }
        }
    }

    fn classifier(cols: usize) -> Arc<Classifier> {
        let backend = Box::new(FixedBackend {
            dims: vec![1, 1, cols],
            scores: vec![0.1, 0.7, 0.2],
        });
        let labels = ["Normal", "Asthma", "COPD"].map(String::from).to_vec();
        Arc::new(Classifier::new(backend, labels).unwrap())
    }

    fn flaky_classifier() -> Arc<Classifier> {
        let backend = Box::new(FailsOnce {
            failed: AtomicBool::new(false),
        });
        let labels = ["Normal", "Asthma", "COPD"].map(String::from).to_vec();
        Arc::new(Classifier::new(backend, labels).unwrap())
    }

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            tick_interval: Duration::from_millis(10),
            max_inference: None,
            clear_on_start: false,
            event_capacity: 64,
        }
    }

    fn scheduler(
        factory: SourceFactory,
        classifier: Arc<Classifier>,
        settings: SchedulerSettings,
    ) -> (DetectionScheduler, mpsc::Receiver<DetectionEvent>) {
        let buffer = Arc::new(RingAudioBuffer::new(64));
        let capture = CaptureLoop::new(buffer, factory, 16);
        DetectionScheduler::new(capture, Arc::new(PeakMean), classifier, settings)
    }

    async fn next_event(rx: &mut mpsc::Receiver<DetectionEvent>) -> DetectionEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn stop_before_start_and_twice_is_safe() {
        let (mut sched, _rx) = scheduler(const_factory(1), classifier(2), settings());

        sched.stop();
        assert_eq!(sched.state(), SchedulerState::Stopped);

        sched.start().unwrap();
        assert_eq!(sched.state(), SchedulerState::Running);
        sched.stop();
        sched.stop();
        sched.wait().await;
        assert_eq!(sched.state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn emits_detection_once_window_is_full() {
        let (mut sched, mut rx) = scheduler(const_factory(1_000), classifier(2), settings());
        sched.start().unwrap();

        assert_eq!(next_event(&mut rx).await, DetectionEvent::Started);
        match next_event(&mut rx).await {
            DetectionEvent::Detection(d) => {
                assert_eq!(d.result.label, "Asthma");
                assert_eq!(d.result.confidence, 0.7);
                assert_eq!(d.result.distribution, vec![0.1, 0.7, 0.2]);
            }
            other => panic!("expected detection, got {other:?}"),
        }

        sched.stop();
        sched.wait().await;
    }

    #[tokio::test]
    async fn nothing_is_emitted_after_stopped() {
        let (mut sched, mut rx) = scheduler(const_factory(5), classifier(2), settings());
        sched.start().unwrap();

        loop {
            if let DetectionEvent::Detection(_) = next_event(&mut rx).await {
                break;
            }
        }
        sched.stop();
        sched.wait().await;

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert_eq!(last, Some(DetectionEvent::Stopped));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "event after Stopped");
    }

    #[tokio::test]
    async fn shape_mismatch_ends_loop_with_error() {
        // Extractor yields 1×2, model expects 1×3.
        let (mut sched, mut rx) = scheduler(const_factory(1), classifier(3), settings());
        sched.start().unwrap();

        assert_eq!(next_event(&mut rx).await, DetectionEvent::Started);
        match next_event(&mut rx).await {
            DetectionEvent::Error { message } => assert!(message.contains("does not match")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(next_event(&mut rx).await, DetectionEvent::Stopped);

        sched.wait().await;
        assert_eq!(sched.state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn underfilled_window_emits_nothing() {
        let (mut sched, mut rx) = scheduler(mute_factory(), classifier(2), settings());
        sched.start().unwrap();
        assert_eq!(next_event(&mut rx).await, DetectionEvent::Started);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());

        sched.stop();
        sched.wait().await;
        assert_eq!(next_event(&mut rx).await, DetectionEvent::Stopped);
    }

    #[tokio::test]
    async fn clear_on_start_discards_history() {
        let mut cfg = settings();
        cfg.clear_on_start = true;
        let (mut sched, _rx) = scheduler(mute_factory(), classifier(2), cfg);

        sched.buffer().append(&[7; 64]);
        assert!(sched.buffer().is_ready());

        sched.start().unwrap();
        assert!(sched.buffer().is_empty());
        sched.stop();
        sched.wait().await;
    }

    #[tokio::test]
    async fn history_is_kept_by_default() {
        let (mut sched, _rx) = scheduler(mute_factory(), classifier(2), settings());
        sched.buffer().append(&[7; 64]);

        sched.start().unwrap();
        assert!(sched.buffer().is_ready());
        sched.stop();
        sched.wait().await;
    }

    #[tokio::test]
    async fn over_budget_ticks_are_dropped() {
        let mut cfg = settings();
        cfg.max_inference = Some(Duration::ZERO);
        let (mut sched, mut rx) = scheduler(const_factory(1), classifier(2), cfg);
        sched.start().unwrap();
        assert_eq!(next_event(&mut rx).await, DetectionEvent::Started);

        tokio::time::sleep(Duration::from_millis(80)).await;
        sched.stop();
        sched.wait().await;

        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, DetectionEvent::Detection(_)), "{event:?}");
        }
    }

    #[tokio::test]
    async fn slow_observer_never_blocks_the_loop() {
        let mut cfg = settings();
        cfg.event_capacity = 1;
        let (mut sched, _rx) = scheduler(const_factory(1), classifier(2), cfg);
        sched.start().unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        sched.stop();
        timeout(Duration::from_secs(5), sched.wait())
            .await
            .expect("loop did not exit");
    }

    #[tokio::test]
    async fn capture_failure_keeps_scheduler_stopped() {
        let factory: SourceFactory = Arc::new(|| Err(CaptureError::NoDevice));
        let (mut sched, _rx) = scheduler(factory, classifier(2), settings());

        let err = sched.start().unwrap_err();
        assert!(matches!(err, PipelineError::Capture(CaptureError::NoDevice)));
        assert_eq!(sched.state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn restart_after_stop_runs_again() {
        let (mut sched, mut rx) = scheduler(const_factory(9), classifier(2), settings());

        for _ in 0..2 {
            sched.start().unwrap();
            loop {
                if let DetectionEvent::Detection(_) = next_event(&mut rx).await {
                    break;
                }
            }
            sched.stop();
            sched.wait().await;
        }
    }

    #[tokio::test]
    async fn restart_right_after_fatal_error_records_again() {
        let (mut sched, mut rx) = scheduler(const_factory(3), flaky_classifier(), settings());
        sched.start().unwrap();

        assert_eq!(next_event(&mut rx).await, DetectionEvent::Started);
        assert!(matches!(next_event(&mut rx).await, DetectionEvent::Error { .. }));
        // Capture is already down by the time the error is delivered.
        assert_eq!(sched.state(), SchedulerState::Stopped);
        assert!(!lock(&sched.capture).is_recording());

        sched.start().unwrap();
        assert_eq!(next_event(&mut rx).await, DetectionEvent::Stopped);
        assert_eq!(next_event(&mut rx).await, DetectionEvent::Started);
        assert!(matches!(next_event(&mut rx).await, DetectionEvent::Detection(_)));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(sched.state(), SchedulerState::Running);
        assert!(lock(&sched.capture).is_recording());

        sched.stop();
        sched.wait().await;
    }

    #[tokio::test]
    async fn restart_without_wait_orders_stopped_before_started() {
        let (mut sched, mut rx) = scheduler(const_factory(4), classifier(2), settings());
        sched.start().unwrap();
        assert_eq!(next_event(&mut rx).await, DetectionEvent::Started);

        sched.stop();
        sched.start().unwrap();

        let mut lifecycle = Vec::new();
        while lifecycle.len() < 2 {
            match next_event(&mut rx).await {
                DetectionEvent::Detection(_) => {}
                other => lifecycle.push(other),
            }
        }
        assert_eq!(lifecycle, vec![DetectionEvent::Stopped, DetectionEvent::Started]);
        assert!(lock(&sched.capture).is_recording());

        sched.stop();
        sched.wait().await;
    }
}
