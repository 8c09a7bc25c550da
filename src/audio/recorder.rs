//! Background capture loop: audio source → [`RingAudioBuffer`].
//!
//! [`CaptureLoop`] owns a dedicated OS thread while recording.  The thread
//! opens the source through the [`SourceFactory`], reports the outcome back
//! to `start()`, then reads frames until the running flag is cleared.
//!
//! ```text
//! Idle ──start()──▶ Recording ──stop()──▶ Idle
//! ```
//!
//! `stop()` joins the thread, and the thread drops its source on the way
//! out, so the device is released and no buffer write happens after `stop()`
//! returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::buffer::RingAudioBuffer;
use super::capture::{CaptureError, SourceFactory};
use super::Sample;

/// Pause after an empty or failed read so a non-blocking source cannot spin
/// the CPU.
const IDLE_BACKOFF: Duration = Duration::from_millis(5);

// ---------------------------------------------------------------------------
// CaptureState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Recording,
}

// ---------------------------------------------------------------------------
// CaptureLoop
// ---------------------------------------------------------------------------

/// Continuously appends source frames to a shared [`RingAudioBuffer`].
pub struct CaptureLoop {
    buffer: Arc<RingAudioBuffer>,
    factory: SourceFactory,
    /// Samples requested per `AudioSource::read` call.
    read_chunk: usize,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureLoop {
    pub fn new(buffer: Arc<RingAudioBuffer>, factory: SourceFactory, read_chunk: usize) -> Self {
        Self {
            buffer,
            factory,
            read_chunk: read_chunk.max(1),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Open the source and begin capturing.  No-op while already recording.
    ///
    /// # Errors
    ///
    /// Whatever the source factory returned, or [`CaptureError::Spawn`] if the
    /// thread could not be created.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            log::debug!("capture: start ignored, already recording");
            return Ok(());
        }

        self.running.store(true, Ordering::SeqCst);

        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();
        let buffer = Arc::clone(&self.buffer);
        let factory = Arc::clone(&self.factory);
        let running = Arc::clone(&self.running);
        let read_chunk = self.read_chunk;

        let spawned = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let mut source = match factory() {
                    Ok(source) => {
                        let _ = ready_tx.send(Ok(()));
                        source
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let mut frame: Vec<Sample> = vec![0; read_chunk];
                while running.load(Ordering::SeqCst) {
                    match source.read(&mut frame) {
                        Ok(0) => thread::sleep(IDLE_BACKOFF),
                        Ok(n) => buffer.append(&frame[..n.min(frame.len())]),
                        Err(e) => {
                            log::warn!("capture: read failed, retrying: {e}");
                            thread::sleep(IDLE_BACKOFF);
                        }
                    }
                }

                drop(source);
                log::debug!("capture: source released");
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(CaptureError::Spawn(e.to_string()));
            }
        };

        let outcome = ready_rx.recv().unwrap_or(Err(CaptureError::ThreadExited));
        match outcome {
            Ok(()) => {
                self.worker = Some(handle);
                log::info!("capture: recording");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                log::error!("capture: failed to open audio source: {e}");
                Err(e)
            }
        }
    }

    /// Stop capturing and release the source.  No-op when idle.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("capture: thread panicked");
            }
            log::info!("capture: stopped");
        }
    }

    pub fn state(&self) -> CaptureState {
        if self.worker.is_some() {
            CaptureState::Recording
        } else {
            CaptureState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state() == CaptureState::Recording
    }

    /// The buffer this loop writes into.
    pub fn buffer(&self) -> &Arc<RingAudioBuffer> {
        &self.buffer
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
