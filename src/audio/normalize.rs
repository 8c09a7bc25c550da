//! Peak normalization of a captured window.
//!
//! Every sample is divided by the window's maximum absolute value so the
//! loudest sample lands on ±1.0.  A silent window stays all-zero; there is no
//! division in that case, so no `NaN` can appear.

use super::Sample;

/// A peak-normalized audio window, samples in `[-1.0, 1.0]`.
///
/// Only produced by [`NormalizedWindow::from_samples`] or
/// [`NormalizedWindow::from_f32`]; consumers get read-only access.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedWindow {
    samples: Vec<f32>,
}

impl NormalizedWindow {
    /// Normalize a snapshot of PCM samples.
    pub fn from_samples(samples: &[Sample]) -> Self {
        let floats: Vec<f32> = samples.iter().map(|&s| s as f32).collect();
        Self::from_f32(floats)
    }

    /// Normalize a buffer of floating-point samples in place.
    pub fn from_f32(mut samples: Vec<f32>) -> Self {
        let peak = peak_amplitude(&samples);
        if peak > 0.0 {
            for s in &mut samples {
                *s /= peak;
            }
        }
        Self { samples }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// `true` when every sample is exactly zero.
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0.0)
    }
}

/// Maximum absolute sample value; `0.0` for an empty slice.
pub fn peak_amplitude(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0_f32, |peak, &s| peak.max(s.abs()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_window_normalizes_to_ones() {
        let window = NormalizedWindow::from_samples(&vec![1000; 48_000]);
        assert_eq!(window.len(), 48_000);
        assert!(window.samples().iter().all(|&s| s == 1.0));
    }

    #[test]
    fn silent_window_stays_zero_without_nan() {
        let window = NormalizedWindow::from_samples(&[0; 256]);
        assert!(window.is_silent());
        assert!(window.samples().iter().all(|s| !s.is_nan()));
    }

    #[test]
    fn negative_peak_maps_to_minus_one() {
        let window = NormalizedWindow::from_samples(&[100, -400, 200]);
        assert_eq!(window.samples(), &[0.25, -1.0, 0.5]);
    }

    #[test]
    fn full_scale_negative_sample_is_handled() {
        let window = NormalizedWindow::from_samples(&[i16::MIN, 0, 16_384]);
        assert_eq!(window.samples()[0], -1.0);
        assert!((window.samples()[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn renormalizing_is_idempotent() {
        let once = NormalizedWindow::from_samples(&[3, -7, 11, 2, -5]);
        let twice = NormalizedWindow::from_f32(once.samples().to_vec());
        for (a, b) in once.samples().iter().zip(twice.samples()) {
            assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        }
    }

    #[test]
    fn all_samples_within_unit_range() {
        let raw: Vec<Sample> = (0..1_000).map(|i| ((i * 37) % 2_001 - 1_000) as Sample).collect();
        let window = NormalizedWindow::from_samples(&raw);
        assert!(window.samples().iter().all(|&s| (-1.0..=1.0).contains(&s)));
    }

    #[test]
    fn peak_amplitude_of_empty_is_zero() {
        assert_eq!(peak_amplitude(&[]), 0.0);
    }
}
