//! Cross-platform application paths using the `dirs` crate.
//!
//! Config dir (`settings.toml`):
//!   Windows: %APPDATA%\edgesense\
//!   macOS:   ~/Library/Application Support/edgesense/
//!   Linux:   ~/.config/edgesense/
//!
//! Data dir (`models/`):
//!   Windows: %LOCALAPPDATA%\edgesense\
//!   macOS:   ~/Library/Application Support/edgesense/
//!   Linux:   ~/.local/share/edgesense/

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Default directory for `model.onnx` + `labels.json`.
    pub models_dir: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "edgesense";

    /// Falls back to the current directory if the platform cannot provide a
    /// standard path.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        Self {
            settings_file: config_dir.join("settings.toml"),
            config_dir,
            models_dir: data_dir.join("models"),
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
