//! Conversion of raw device buffers into the pipeline's sample format.
//!
//! Input devices deliver interleaved `f32` at whatever rate they prefer.  The
//! classifier was trained on mono PCM at a fixed rate, so every chunk goes
//! through:
//!
//! 1. [`downmix_to_mono`]: average interleaved channels.
//! 2. [`StreamResampler`]: band-limited FFT resampling to the target rate,
//!    with filter state carried from one device buffer to the next.
//! 3. [`f32_to_sample`]: clamp and scale to `i16`.

use rubato::{FftFixedIn, Resampler};

use super::{CaptureError, Sample};

/// Requested input block for the FFT resampler.  The resampler rounds this
/// up to a multiple of the rate ratio's denominator.
const RESAMPLE_CHUNK: usize = 1024;

/// Mix interleaved multi-channel audio down to mono by averaging channels.
///
/// `channels == 0` yields an empty vector; `channels == 1` is a plain copy.
///
/// ```rust
/// use edgesense::audio::downmix_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Convert a float sample in `[-1.0, 1.0]` to PCM, clamping out-of-range
/// input.
pub fn f32_to_sample(value: f32) -> Sample {
    (value.clamp(-1.0, 1.0) * Sample::MAX as f32).round() as Sample
}

// ---------------------------------------------------------------------------
// StreamResampler
// ---------------------------------------------------------------------------

/// Mono resampler for a continuous stream of arbitrarily sized buffers.
///
/// Input is staged until a full resampler block is available, so the output
/// rate is exactly `target / source` over time and the anti-aliasing filter
/// sees one uninterrupted signal.  Equal rates pass samples straight through.
pub struct StreamResampler {
    /// `None` when source and target rates match.
    inner: Option<FftFixedIn<f32>>,
    /// Samples waiting for a full input block.
    staged: Vec<f32>,
    source_rate: u32,
    target_rate: u32,
}

impl StreamResampler {
    /// # Errors
    ///
    /// [`CaptureError::Resampler`] for a zero rate or when rubato rejects the
    /// ratio.
    pub fn new(source_rate: u32, target_rate: u32) -> Result<Self, CaptureError> {
        if source_rate == 0 || target_rate == 0 {
            return Err(CaptureError::Resampler(format!(
                "invalid rates {source_rate} Hz → {target_rate} Hz"
            )));
        }

        let inner = if source_rate == target_rate {
            None
        } else {
            let resampler = FftFixedIn::<f32>::new(
                source_rate as usize,
                target_rate as usize,
                RESAMPLE_CHUNK,
                1, // sub_chunks
                1, // mono
            )
            .map_err(|e| CaptureError::Resampler(e.to_string()))?;
            log::debug!(
                "resample: {source_rate} Hz → {target_rate} Hz, {} in / {} out per block",
                resampler.input_frames_next(),
                resampler.output_frames_next()
            );
            Some(resampler)
        };

        Ok(Self {
            inner,
            staged: Vec::new(),
            source_rate,
            target_rate,
        })
    }

    /// Feed mono samples at the source rate; returns whatever full blocks
    /// produced at the target rate.  Leftover input is kept for the next
    /// call.
    pub fn process(&mut self, mono: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.inner.as_mut() else {
            return mono.to_vec();
        };

        self.staged.extend_from_slice(mono);

        let mut out = Vec::new();
        let mut consumed = 0;
        loop {
            let block = resampler.input_frames_next();
            if self.staged.len() - consumed < block {
                break;
            }
            let input = &self.staged[consumed..consumed + block];
            match resampler.process(&[input], None) {
                Ok(frames) => {
                    if let Some(channel) = frames.first() {
                        out.extend_from_slice(channel);
                    }
                }
                Err(e) => log::error!(
                    "resample: {} → {} Hz block dropped: {e}",
                    self.source_rate,
                    self.target_rate
                ),
            }
            consumed += block;
        }
        self.staged.drain(..consumed);
        out
    }

    /// Full device-buffer conversion: downmix, resample, quantize.
    pub fn convert(&mut self, interleaved: &[f32], channels: u16) -> Vec<Sample> {
        let mono = downmix_to_mono(interleaved, channels);
        self.process(&mono).into_iter().map(f32_to_sample).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len().max(1) as f32).sqrt()
    }

    /// Push `input` through `rs` in device-sized pieces.
    fn feed(rs: &mut StreamResampler, input: &[f32], piece: usize) -> Vec<f32> {
        input.chunks(piece).flat_map(|c| rs.process(c)).collect()
    }

    #[test]
    fn downmix_already_mono() {
        let input = vec![0.1_f32, 0.2, 0.3];
        assert_eq!(downmix_to_mono(&input, 1), input);
    }

    #[test]
    fn downmix_four_channel() {
        let out = downmix_to_mono(&[0.4_f32; 4], 4);
        assert_eq!(out.len(), 1);
        assert!((out[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn downmix_zero_channels() {
        assert!(downmix_to_mono(&[1.0_f32, 2.0], 0).is_empty());
    }

    #[test]
    fn f32_to_sample_clamps_and_scales() {
        assert_eq!(f32_to_sample(0.0), 0);
        assert_eq!(f32_to_sample(1.0), i16::MAX);
        assert_eq!(f32_to_sample(2.5), i16::MAX);
        assert_eq!(f32_to_sample(-3.0), -i16::MAX);
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(matches!(
            StreamResampler::new(0, 16_000),
            Err(CaptureError::Resampler(_))
        ));
        assert!(StreamResampler::new(48_000, 0).is_err());
    }

    #[test]
    fn same_rate_passes_through() {
        let mut rs = StreamResampler::new(16_000, 16_000).unwrap();
        let input: Vec<f32> = (0..160).map(|i| i as f32 / 160.0).collect();
        assert_eq!(rs.process(&input), input);
        assert!(rs.staged.is_empty());
    }

    #[test]
    fn small_device_buffers_keep_the_exact_rate() {
        // 86 callbacks of 512 frames at 44.1 kHz.
        let mut rs = StreamResampler::new(44_100, 16_000).unwrap();
        let input = vec![0.0_f32; 86 * 512];
        let out = feed(&mut rs, &input, 512);

        let consumed = input.len() - rs.staged.len();
        let inner = rs.inner.as_ref().unwrap();
        let blocks = consumed / inner.input_frames_next();
        assert_eq!(consumed % inner.input_frames_next(), 0);
        assert_eq!(out.len(), blocks * inner.output_frames_next());
        assert_eq!(out.len() * 44_100, consumed * 16_000);
        assert!(rs.staged.len() < inner.input_frames_next());
    }

    #[test]
    fn staged_input_is_carried_across_calls() {
        let mut rs = StreamResampler::new(48_000, 16_000).unwrap();
        let block = rs.inner.as_ref().unwrap().input_frames_next();

        assert!(rs.process(&vec![0.1; block - 1]).is_empty());
        assert_eq!(rs.staged.len(), block - 1);
        assert!(!rs.process(&[0.1]).is_empty());
        assert!(rs.staged.is_empty());
    }

    #[test]
    fn out_of_band_tone_is_filtered() {
        // 10 kHz is above the 8 kHz Nyquist of the target rate.
        let mut rs = StreamResampler::new(48_000, 16_000).unwrap();
        let out = feed(&mut rs, &tone(10_000.0, 48_000, 48_000), 480);
        let settled = &out[out.len() / 4..];
        assert!(rms(settled) < 0.05, "aliased rms = {}", rms(settled));
    }

    #[test]
    fn in_band_tone_is_preserved() {
        let mut rs = StreamResampler::new(48_000, 16_000).unwrap();
        let out = feed(&mut rs, &tone(1_000.0, 48_000, 48_000), 480);
        let settled = &out[out.len() / 4..];
        let level = rms(settled);
        assert!((level - 0.707).abs() < 0.05, "rms = {level}");
    }

    #[test]
    fn convert_runs_all_steps() {
        // 16 kHz stereo, full-scale left / silent right.
        let mut rs = StreamResampler::new(16_000, 16_000).unwrap();
        let interleaved: Vec<f32> = (0..60).map(|i| if i % 2 == 0 { 1.0 } else { 0.0 }).collect();
        let out = rs.convert(&interleaved, 2);
        assert_eq!(out.len(), 30);
        assert!(out.iter().all(|&s| s == f32_to_sample(0.5)));
    }
}
