//! Audio sources and the cpal-backed microphone implementation.
//!
//! The capture loop only knows the [`AudioSource`] trait: a blocking read of
//! up to `buf.len()` samples.  [`CpalSource`] adapts cpal's push-style
//! callback to that pull interface: the callback forwards each hardware
//! buffer as an [`AudioChunk`] over an mpsc channel and
//! [`CpalSource::read`] converts chunks to mono PCM at the target rate.
//!
//! Sources are opened *on* the capture thread through a [`SourceFactory`],
//! because `cpal::Stream` is not `Send` on every platform.

use std::collections::VecDeque;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use super::resample::StreamResampler;
use super::Sample;

/// Longest a single [`CpalSource::read`] blocks waiting for the device.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while opening or reading an audio source.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("input device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("unsupported input sample format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("failed to set up resampler: {0}")]
    Resampler(String),

    #[error("audio stream closed")]
    StreamClosed,

    #[error("audio source read failed: {0}")]
    Read(String),

    #[error("failed to spawn capture thread: {0}")]
    Spawn(String),

    #[error("capture thread exited before reporting readiness")]
    ThreadExited,
}

// ---------------------------------------------------------------------------
// AudioSource
// ---------------------------------------------------------------------------

/// Pull-style mono PCM source at a fixed sample rate.
///
/// `read` blocks for a bounded time and returns how many samples were
/// written to the front of `buf`.  `Ok(0)` means "nothing this time" and is
/// not an error.  Dropping the source releases the underlying device.
pub trait AudioSource {
    fn read(&mut self, buf: &mut [Sample]) -> Result<usize, CaptureError>;
}

/// Opens a fresh [`AudioSource`]; called on the capture thread at every
/// `CaptureLoop::start`.
pub type SourceFactory =
    Arc<dyn Fn() -> Result<Box<dyn AudioSource>, CaptureError> + Send + Sync>;

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// A single buffer of raw audio as delivered by the cpal callback.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Interleaved samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

// ---------------------------------------------------------------------------
// CpalSource
// ---------------------------------------------------------------------------

/// Microphone source built on cpal.
///
/// ```rust,no_run
/// use edgesense::audio::{AudioSource, CpalSource};
///
/// let mut mic = CpalSource::open(None, 16_000).unwrap();
/// let mut frame = vec![0_i16; 1024];
/// let n = mic.read(&mut frame).unwrap();
/// println!("read {n} samples");
/// ```
pub struct CpalSource {
    /// Keeps the hardware stream alive; dropping it stops capture.
    _stream: cpal::Stream,
    rx: mpsc::Receiver<AudioChunk>,
    /// Converted samples not yet handed out.
    pending: VecDeque<Sample>,
    /// Device rate → pipeline rate; holds filter state between callbacks.
    resampler: StreamResampler,
}

impl CpalSource {
    /// Open `device_name` (or the default input device) and start streaming.
    ///
    /// Samples are downmixed and resampled to `target_rate` Hz.
    pub fn open(device_name: Option<&str>, target_rate: u32) -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .input_devices()?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| CaptureError::DeviceNotFound(name.to_string()))?,
            None => host.default_input_device().ok_or(CaptureError::NoDevice)?,
        };

        let supported = device.default_input_config()?;
        let format = supported.sample_format();
        let channels = supported.channels();
        let device_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();
        let resampler = StreamResampler::new(device_rate, target_rate)?;

        let (tx, rx) = mpsc::channel::<AudioChunk>();
        let stream = match format {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&device, &config, tx, device_rate, channels)?
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &config, tx, device_rate, channels)?
            }
            cpal::SampleFormat::U16 => {
                build_stream::<u16>(&device, &config, tx, device_rate, channels)?
            }
            other => return Err(CaptureError::UnsupportedFormat(format!("{other:?}"))),
        };
        stream.play()?;

        log::info!(
            "capture: opened input device ({device_rate} Hz, {channels} ch) → {target_rate} Hz mono"
        );

        Ok(Self {
            _stream: stream,
            rx,
            pending: VecDeque::new(),
            resampler,
        })
    }

    /// A [`SourceFactory`] that opens a `CpalSource` with these settings.
    pub fn factory(device_name: Option<String>, target_rate: u32) -> SourceFactory {
        Arc::new(move || {
            let source = CpalSource::open(device_name.as_deref(), target_rate)?;
            Ok(Box::new(source) as Box<dyn AudioSource>)
        })
    }
}

impl AudioSource for CpalSource {
    fn read(&mut self, buf: &mut [Sample]) -> Result<usize, CaptureError> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(READ_TIMEOUT) {
                Ok(chunk) => self
                    .pending
                    .extend(self.resampler.convert(&chunk.samples, chunk.channels)),
                Err(mpsc::RecvTimeoutError::Timeout) => return Ok(0),
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(CaptureError::StreamClosed)
                }
            }
        }

        let n = buf.len().min(self.pending.len());
        for (slot, sample) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = sample;
        }
        Ok(n)
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tx: mpsc::Sender<AudioChunk>,
    sample_rate: u32,
    channels: u16,
) -> Result<cpal::Stream, CaptureError>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    use cpal::Sample as _;

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let chunk = AudioChunk {
                samples: data.iter().map(|&s| s.to_sample::<f32>()).collect(),
                sample_rate,
                channels,
            };
            // The reader may already be gone during shutdown.
            let _ = tx.send(chunk);
        },
        |err: cpal::StreamError| {
            log::error!("cpal stream error: {err}");
        },
        None,
    )?;
    Ok(stream)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_chunk_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<AudioChunk>();
    }

    #[test]
    fn source_factory_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SourceFactory>();
    }

    #[test]
    fn audio_source_is_object_safe() {
        struct Silence;
        impl AudioSource for Silence {
            fn read(&mut self, buf: &mut [Sample]) -> Result<usize, CaptureError> {
                buf.fill(0);
                Ok(buf.len())
            }
        }

        let mut source: Box<dyn AudioSource> = Box::new(Silence);
        let mut frame = [1_i16; 8];
        assert_eq!(source.read(&mut frame).unwrap(), 8);
        assert_eq!(frame, [0; 8]);
    }

    #[test]
    fn capture_error_messages_are_descriptive() {
        let e = CaptureError::DeviceNotFound("USB Mic".into());
        assert!(e.to_string().contains("USB Mic"));
        assert!(CaptureError::StreamClosed.to_string().contains("closed"));
    }
}
