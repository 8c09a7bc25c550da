//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files.  Every section is
//! `#[serde(default)]`, so a partial `settings.toml` fills the gaps with
//! defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Microphone capture and rolling-window settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Pipeline sample rate in Hz; device audio is resampled to this.
    pub sample_rate: u32,
    /// Length of the analysis window in seconds.
    pub window_secs: f32,
    /// Samples requested per source read.
    pub read_chunk: usize,
    /// Input device name; `None` means the system default.
    pub device: Option<String>,
    /// Discard buffered audio each time detection starts.
    pub clear_on_start: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            window_secs: 3.0,
            read_chunk: 1024,
            device: None,
            clear_on_start: false,
        }
    }
}

// ---------------------------------------------------------------------------
// DetectionConfig
// ---------------------------------------------------------------------------

/// Scheduler cadence and result delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Pause between detection ticks.
    pub tick_interval_ms: u64,
    /// Skip a tick whose inference took longer than this.  `None` = no bound.
    pub max_inference_ms: Option<u64>,
    /// Confidence above which a non-normal result is reported as an alert.
    pub alert_threshold: f32,
    /// Capacity of the detection event channel.
    pub event_capacity: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 500,
            max_inference_ms: None,
            alert_threshold: 0.7,
            event_capacity: 32,
        }
    }
}

impl DetectionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn max_inference(&self) -> Option<Duration> {
        self.max_inference_ms.map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// ModelConfig
// ---------------------------------------------------------------------------

/// Where the classifier lives and how to feed it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory with `model.onnx` and `labels.json`.  `None` uses
    /// [`AppPaths::models_dir`].
    pub dir: Option<PathBuf>,
    /// Force the model input to `[1, rows, cols]` when the file does not
    /// declare a concrete shape.
    pub input_shape: Option<(usize, usize)>,
}

impl ModelConfig {
    /// The configured directory, or the platform default.
    pub fn resolve_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| AppPaths::new().models_dir)
    }
}

// ---------------------------------------------------------------------------
// FeatureConfig
// ---------------------------------------------------------------------------

/// STFT / mel / MFCC parameters for the feature extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub n_mfcc: usize,
    /// Lowest mel band edge in Hz.
    pub fmin: f32,
    /// Highest mel band edge in Hz; must not exceed Nyquist.
    pub fmax: f32,
    /// Append first and second order MFCC deltas after the MFCCs.
    pub deltas: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_length: 160,
            n_mels: 128,
            n_mfcc: 40,
            fmin: 20.0,
            fmax: 8000.0,
            deltas: true,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use edgesense::config::AppConfig;
///
/// // Returns Default when the file is missing.
/// let config = AppConfig::load().unwrap();
/// println!("window = {} samples", config.horizon());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub detection: DetectionConfig,
    pub model: ModelConfig,
    pub features: FeatureConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Ring buffer capacity: `round(sample_rate × window_secs)`.
    pub fn horizon(&self) -> usize {
        (self.audio.sample_rate as f64 * self.audio.window_secs as f64).round() as usize
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = AppConfig::default();
        original.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(original, loaded);
    }

    /// `load_from` on a non-existent path must return `Default` without error.
    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.audio.sample_rate, 16_000);
        assert_eq!(cfg.audio.window_secs, 3.0);
        assert!(!cfg.audio.clear_on_start);
        assert_eq!(cfg.detection.tick_interval(), Duration::from_millis(500));
        assert!(cfg.detection.max_inference().is_none());
        assert_eq!(cfg.features.n_mels, 128);
        assert_eq!(cfg.features.n_mfcc, 40);
        assert!(cfg.features.deltas);
        assert_eq!(cfg.horizon(), 48_000);
    }

    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = AppConfig::default();
        cfg.audio.device = Some("USB Mic".into());
        cfg.audio.window_secs = 2.5;
        cfg.audio.clear_on_start = true;
        cfg.detection.max_inference_ms = Some(250);
        cfg.model.dir = Some(PathBuf::from("/opt/models"));
        cfg.model.input_shape = Some((301, 168));
        cfg.features.deltas = false;

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(loaded, cfg);
        assert_eq!(loaded.horizon(), 40_000);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[detection]\ntick_interval_ms = 250\n").unwrap();

        let cfg = AppConfig::load_from(&path).expect("load");
        assert_eq!(cfg.detection.tick_interval_ms, 250);
        assert_eq!(cfg.detection.event_capacity, 32);
        assert_eq!(cfg.audio, AudioConfig::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[audio\nsample_rate = ").unwrap();

        assert!(AppConfig::load_from(&path).is_err());
    }
}
