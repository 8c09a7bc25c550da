//! MFCC + log-mel feature extractor.
//!
//! Reproduces the representation the respiratory models were trained on:
//!
//! 1. Zero-padded ("centred") STFT, periodic Hann window, `n_fft` / `hop_length`.
//! 2. Slaney-style mel filterbank with area normalization.
//! 3. `mfcc`: DCT-II (orthonormal) of the power-to-dB mel spectrum
//!    (reference 1.0, 80 dB floor), first `n_mfcc` coefficients.
//! 4. `Δ`, `ΔΔ`: first and second time derivatives of the MFCCs from a
//!    9-frame Savitzky-Golay fit, with edge frames taken from the nearest
//!    full window.  Disabled with `FeatureConfig::deltas = false`.
//! 5. `mel_db`: power-to-dB mel spectrum referenced to its own maximum.
//!
//! Each output row is one STFT frame laid out as
//! `[mfcc.. | Δ.. | ΔΔ.. | mel_db..]`.  For a 3 s window at 16 kHz with the
//! default settings that is 301 × 248 (301 × 168 without deltas).

use std::f32::consts::PI;
use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};

use crate::audio::NormalizedWindow;
use crate::config::FeatureConfig;

use super::{FeatureError, FeatureExtractor, FeatureMatrix};

/// Power floor before taking logarithms.
const AMIN: f32 = 1e-10;
/// Dynamic range kept below the loudest value, in dB.
const TOP_DB: f32 = 80.0;
/// Frames in the Savitzky-Golay window used for deltas.
const DELTA_WIDTH: usize = 9;

/// Non-zero span of one triangular mel filter.
struct MelFilter {
    start_bin: usize,
    weights: Vec<f32>,
}

pub struct MelFeatureExtractor {
    n_fft: usize,
    hop_length: usize,
    n_mels: usize,
    n_mfcc: usize,
    deltas: bool,
    window: Vec<f32>,
    filters: Vec<MelFilter>,
    /// `n_mfcc × n_mels`, row-major.
    dct: Vec<f32>,
    fft: Arc<dyn RealToComplex<f32>>,
}

impl MelFeatureExtractor {
    /// Plan the FFT and precompute the filterbank and DCT basis.
    ///
    /// # Errors
    ///
    /// [`FeatureError::InvalidConfig`] for an odd or zero `n_fft`, a zero hop,
    /// more MFCCs than mel bands, or an empty / out-of-range frequency span.
    pub fn new(config: &FeatureConfig, sample_rate: u32) -> Result<Self, FeatureError> {
        let invalid = |msg: String| Err(FeatureError::InvalidConfig(msg));

        if config.n_fft < 2 || config.n_fft % 2 != 0 {
            return invalid(format!("n_fft must be even and ≥ 2, got {}", config.n_fft));
        }
        if config.hop_length == 0 {
            return invalid("hop_length must be > 0".into());
        }
        if config.n_mels == 0 || config.n_mfcc > config.n_mels {
            return invalid(format!(
                "need 0 < n_mfcc ≤ n_mels, got n_mfcc={} n_mels={}",
                config.n_mfcc, config.n_mels
            ));
        }
        let nyquist = sample_rate as f32 / 2.0;
        if !(config.fmin >= 0.0 && config.fmin < config.fmax && config.fmax <= nyquist) {
            return invalid(format!(
                "need 0 ≤ fmin < fmax ≤ {nyquist}, got {}..{}",
                config.fmin, config.fmax
            ));
        }

        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(config.n_fft);

        Ok(Self {
            n_fft: config.n_fft,
            hop_length: config.hop_length,
            n_mels: config.n_mels,
            n_mfcc: config.n_mfcc,
            deltas: config.deltas,
            window: hann_window(config.n_fft),
            filters: mel_filterbank(
                sample_rate,
                config.n_fft,
                config.n_mels,
                config.fmin,
                config.fmax,
            ),
            dct: dct_basis(config.n_mfcc, config.n_mels),
            fft,
        })
    }

    fn frame_count(&self, window_len: usize) -> usize {
        1 + window_len / self.hop_length
    }

    /// Columns before `mel_db` in each row.
    fn cepstral_cols(&self) -> usize {
        if self.deltas {
            3 * self.n_mfcc
        } else {
            self.n_mfcc
        }
    }

    /// Mel power spectrogram, `frames × n_mels` row-major.
    fn mel_power(&self, samples: &[f32]) -> Vec<f32> {
        let pad = self.n_fft / 2;
        let n_frames = self.frame_count(samples.len());
        let mut input = self.fft.make_input_vec();
        let mut spectrum = self.fft.make_output_vec();
        let mut mel = vec![0.0_f32; n_frames * self.n_mels];

        for frame in 0..n_frames {
            let start = frame * self.hop_length;
            for (i, slot) in input.iter_mut().enumerate() {
                let sample = (start + i)
                    .checked_sub(pad)
                    .and_then(|j| samples.get(j))
                    .copied()
                    .unwrap_or(0.0);
                *slot = sample * self.window[i];
            }

            if let Err(e) = self.fft.process(&mut input, &mut spectrum) {
                log::error!("features: fft failed on frame {frame}: {e}");
                continue;
            }

            let row = &mut mel[frame * self.n_mels..(frame + 1) * self.n_mels];
            for (value, filter) in row.iter_mut().zip(&self.filters) {
                *value = filter
                    .weights
                    .iter()
                    .zip(&spectrum[filter.start_bin..])
                    .map(|(w, c)| w * c.norm_sqr())
                    .sum();
            }
        }
        mel
    }
}

impl FeatureExtractor for MelFeatureExtractor {
    fn extract(&self, window: &NormalizedWindow) -> FeatureMatrix {
        let (rows, cols) = self.output_shape(window.len());
        let mel = self.mel_power(window.samples());

        let reference = mel.iter().copied().fold(0.0_f32, f32::max);
        let mel_db = power_to_db(&mel, reference);
        let mel_db_unit = power_to_db(&mel, 1.0);

        let mut mfcc = Vec::<f32>::with_capacity(rows * self.n_mfcc);
        for frame in 0..rows {
            let log_mel = &mel_db_unit[frame * self.n_mels..(frame + 1) * self.n_mels];
            for k in 0..self.n_mfcc {
                let basis = &self.dct[k * self.n_mels..(k + 1) * self.n_mels];
                mfcc.push(basis.iter().zip(log_mel).map(|(b, m)| b * m).sum());
            }
        }

        let deltas = self.deltas.then(|| {
            if rows < DELTA_WIDTH {
                log::debug!("features: {rows} frames is too short for deltas, using zeros");
            }
            (
                delta(&mfcc, rows, self.n_mfcc, 1),
                delta(&mfcc, rows, self.n_mfcc, 2),
            )
        });

        let mut data = Vec::<f32>::with_capacity(rows * cols);
        for frame in 0..rows {
            let coeffs = frame * self.n_mfcc..(frame + 1) * self.n_mfcc;
            data.extend_from_slice(&mfcc[coeffs.clone()]);
            if let Some((d1, d2)) = &deltas {
                data.extend_from_slice(&d1[coeffs.clone()]);
                data.extend_from_slice(&d2[coeffs]);
            }
            data.extend_from_slice(&mel_db[frame * self.n_mels..(frame + 1) * self.n_mels]);
        }

        FeatureMatrix::new(rows, cols, data).unwrap_or_else(|e| {
            log::error!("features: {e}");
            FeatureMatrix::zeros(rows, cols)
        })
    }

    fn output_shape(&self, window_len: usize) -> (usize, usize) {
        (self.frame_count(window_len), self.cepstral_cols() + self.n_mels)
    }
}

impl std::fmt::Debug for MelFeatureExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MelFeatureExtractor")
            .field("n_fft", &self.n_fft)
            .field("hop_length", &self.hop_length)
            .field("n_mels", &self.n_mels)
            .field("n_mfcc", &self.n_mfcc)
            .field("deltas", &self.deltas)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// DSP helpers
// ---------------------------------------------------------------------------

/// Periodic Hann window.
fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}

/// `10·log10(S / ref)` with an `AMIN` floor, clipped to `TOP_DB` below the
/// maximum.
fn power_to_db(power: &[f32], reference: f32) -> Vec<f32> {
    let offset = 10.0 * reference.max(AMIN).log10();
    let mut db: Vec<f32> = power
        .iter()
        .map(|&p| 10.0 * p.max(AMIN).log10() - offset)
        .collect();

    let peak = db.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let floor = peak - TOP_DB;
    for v in &mut db {
        *v = v.max(floor);
    }
    db
}

// Slaney mel scale: linear below 1 kHz, logarithmic above.
const F_SP: f32 = 200.0 / 3.0;
const MIN_LOG_HZ: f32 = 1000.0;
const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;

fn log_step() -> f32 {
    6.4_f32.ln() / 27.0
}

fn hz_to_mel(hz: f32) -> f32 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// `n` frequencies evenly spaced on the mel scale from `fmin` to `fmax`.
fn mel_frequencies(n: usize, fmin: f32, fmax: f32) -> Vec<f32> {
    let lo = hz_to_mel(fmin);
    let hi = hz_to_mel(fmax);
    let step = if n > 1 { (hi - lo) / (n - 1) as f32 } else { 0.0 };
    (0..n).map(|i| mel_to_hz(lo + step * i as f32)).collect()
}

fn mel_filterbank(
    sample_rate: u32,
    n_fft: usize,
    n_mels: usize,
    fmin: f32,
    fmax: f32,
) -> Vec<MelFilter> {
    let n_bins = n_fft / 2 + 1;
    let bin_hz = sample_rate as f32 / n_fft as f32;
    let edges = mel_frequencies(n_mels + 2, fmin, fmax);

    (0..n_mels)
        .map(|m| {
            let (left, center, right) = (edges[m], edges[m + 1], edges[m + 2]);
            let norm = 2.0 / (right - left);
            let dense: Vec<f32> = (0..n_bins)
                .map(|bin| {
                    let f = bin as f32 * bin_hz;
                    let rising = (f - left) / (center - left);
                    let falling = (right - f) / (right - center);
                    rising.min(falling).max(0.0) * norm
                })
                .collect();

            let start_bin = dense.iter().position(|&w| w > 0.0).unwrap_or(0);
            let end_bin = dense.iter().rposition(|&w| w > 0.0).map_or(start_bin, |i| i + 1);
            MelFilter {
                start_bin,
                weights: dense[start_bin..end_bin].to_vec(),
            }
        })
        .collect()
}

/// Orthonormal DCT-II basis, `n_out × n_in` row-major.
fn dct_basis(n_out: usize, n_in: usize) -> Vec<f32> {
    let n = n_in as f32;
    let mut basis = Vec::with_capacity(n_out * n_in);
    for k in 0..n_out {
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        for i in 0..n_in {
            basis.push(scale * (PI / n * (i as f32 + 0.5) * k as f32).cos());
        }
    }
    basis
}

/// Weights over `width` consecutive frames giving the `order`-th derivative
/// of the least-squares polynomial of degree `order` through them.
fn delta_weights(width: usize, order: usize) -> Vec<f32> {
    let half = (width / 2) as f64;
    let t: Vec<f64> = (0..width).map(|i| i as f64 - half).collect();
    let m = order + 1;

    // Normal equations Σ t^(i+j), augmented with the unit vector e_order.
    let mut gram: Vec<Vec<f64>> = (0..m)
        .map(|i| {
            let mut row: Vec<f64> = (0..m)
                .map(|j| t.iter().map(|x| x.powi((i + j) as i32)).sum())
                .collect();
            row.push(if i == order { 1.0 } else { 0.0 });
            row
        })
        .collect();

    // Gauss-Jordan; the Gram matrix is positive definite.
    for col in 0..m {
        let pivot = (col..m)
            .max_by(|&a, &b| gram[a][col].abs().total_cmp(&gram[b][col].abs()))
            .unwrap_or(col);
        gram.swap(col, pivot);
        let p = gram[col][col];
        for v in &mut gram[col][col..] {
            *v /= p;
        }
        for r in 0..m {
            if r == col {
                continue;
            }
            let factor = gram[r][col];
            for k in col..=m {
                let step = factor * gram[col][k];
                gram[r][k] -= step;
            }
        }
    }

    // Row `order` of the inverse, scaled by order! for the derivative.
    let coef: Vec<f64> = gram.iter().map(|row| row[m]).collect();
    let factorial: f64 = (1..=order).map(|k| k as f64).product();
    t.iter()
        .map(|&x| {
            let poly: f64 = coef.iter().enumerate().map(|(j, c)| c * x.powi(j as i32)).sum();
            (factorial * poly) as f32
        })
        .collect()
}

/// `order`-th time derivative of every column of a `rows × cols` row-major
/// matrix.  The first and last `DELTA_WIDTH / 2` frames take the value of the
/// nearest full window.  Fewer than `DELTA_WIDTH` rows yields zeros.
fn delta(data: &[f32], rows: usize, cols: usize, order: usize) -> Vec<f32> {
    let mut out = vec![0.0_f32; rows * cols];
    if rows < DELTA_WIDTH || cols == 0 {
        return out;
    }

    let half = DELTA_WIDTH / 2;
    let weights = delta_weights(DELTA_WIDTH, order);
    for frame in half..rows - half {
        let dst = &mut out[frame * cols..(frame + 1) * cols];
        for (i, w) in weights.iter().enumerate() {
            let src = &data[(frame - half + i) * cols..(frame - half + i + 1) * cols];
            for (d, s) in dst.iter_mut().zip(src) {
                *d += w * s;
            }
        }
    }

    let first = half * cols;
    let last = (rows - 1 - half) * cols;
    for frame in 0..half {
        out.copy_within(first..first + cols, frame * cols);
        out.copy_within(last..last + cols, (rows - 1 - frame) * cols);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
