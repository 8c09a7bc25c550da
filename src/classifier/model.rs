//! On-disk model layout and label loading.
//!
//! A model directory holds:
//!
//! ```text
//! models/
//!   model.onnx    classifier network
//!   labels.json   ["Normal", "Asthma", ...]  (optional, output order)
//! ```
//!
//! [`ModelStore`] resolves those files and reads them into [`ModelAssets`].

use std::path::{Path, PathBuf};

use crate::config::{AppPaths, ModelConfig};

use super::engine::ClassifierError;

pub const MODEL_FILE: &str = "model.onnx";
pub const LABELS_FILE: &str = "labels.json";

/// Respiratory classes used when no `labels.json` is shipped with the model.
pub const DEFAULT_LABELS: &[&str] = &[
    "Normal",
    "Asthma",
    "COPD",
    "Pneumonia",
    "Bronchitis",
    "Tuberculosis",
    "Long-COVID",
];

/// Raw model bytes plus its class labels, ready for `Classifier::load`.
#[derive(Debug, Clone)]
pub struct ModelAssets {
    /// Where `model_bytes` came from, for error messages.
    pub source: PathBuf,
    pub model_bytes: Vec<u8>,
    pub labels: Vec<String>,
}

// ---------------------------------------------------------------------------
// ModelStore
// ---------------------------------------------------------------------------

/// Resolves the on-disk location of the classifier.
///
/// ```rust,no_run
/// use edgesense::classifier::ModelStore;
/// use edgesense::config::AppPaths;
///
/// let store = ModelStore::from_app_paths(&AppPaths::new());
/// if store.is_available() {
///     let assets = store.load().unwrap();
///     println!("{} classes", assets.labels.len());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ModelStore {
    pub models_dir: PathBuf,
}

impl ModelStore {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn from_app_paths(app_paths: &AppPaths) -> Self {
        Self::new(app_paths.models_dir.clone())
    }

    /// `model.dir` when set, the platform models directory otherwise.
    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(config.resolve_dir())
    }

    pub fn model_path(&self) -> PathBuf {
        self.models_dir.join(MODEL_FILE)
    }

    pub fn labels_path(&self) -> PathBuf {
        self.models_dir.join(LABELS_FILE)
    }

    /// Returns `true` if the model file exists on disk.
    pub fn is_available(&self) -> bool {
        self.model_path().exists()
    }

    /// Labels from `labels.json`, or [`DEFAULT_LABELS`] when the file is
    /// absent.
    ///
    /// # Errors
    ///
    /// [`ClassifierError::ModelLoad`] for an unreadable, malformed or empty
    /// label list.
    pub fn load_labels(&self) -> Result<Vec<String>, ClassifierError> {
        let path = self.labels_path();
        if !path.exists() {
            log::debug!("classifier: {} missing, using default labels", path.display());
            return Ok(DEFAULT_LABELS.iter().map(|s| s.to_string()).collect());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| load_error(&path, e))?;
        let labels: Vec<String> =
            serde_json::from_str(&content).map_err(|e| load_error(&path, e))?;
        if labels.is_empty() {
            return Err(load_error(&path, "label list is empty"));
        }
        Ok(labels)
    }

    /// Read the model and its labels.
    ///
    /// # Errors
    ///
    /// [`ClassifierError::ModelLoad`] when the model file is missing or
    /// unreadable, or the labels are invalid.
    pub fn load(&self) -> Result<ModelAssets, ClassifierError> {
        let path = self.model_path();
        if !path.exists() {
            return Err(load_error(&path, "model file not found"));
        }
        let model_bytes = std::fs::read(&path).map_err(|e| load_error(&path, e))?;
        let labels = self.load_labels()?;

        Ok(ModelAssets {
            source: path,
            model_bytes,
            labels,
        })
    }
}

fn load_error(path: &Path, reason: impl std::fmt::Display) -> ClassifierError {
    ClassifierError::ModelLoad {
        path: path.display().to_string(),
        reason: reason.to_string(),
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
    fn missing_model_is_a_load_error() {
        let dir = tempdir().expect("temp dir");
        let err = ModelStore::new(dir.path()).load().unwrap_err();
        match err {
            ClassifierError::ModelLoad { path, .. } => assert!(path.ends_with(MODEL_FILE)),
            other => panic!("expected ModelLoad, got {other:?}"),
        }
    }

    #[test]
    fn missing_labels_fall_back_to_defaults() {
        let dir = tempdir().expect("temp dir");
        std::fs::write(dir.path().join(MODEL_FILE), b"onnx").unwrap();

        let assets = ModelStore::new(dir.path()).load().unwrap();
        assert_eq!(assets.labels.len(), 7);
        assert_eq!(assets.labels[0], "Normal");
        assert_eq!(assets.labels[6], "Long-COVID");
        assert_eq!(assets.model_bytes, b"onnx");
    }

    #[test]
    fn labels_file_sets_order() {
        let dir = tempdir().expect("temp dir");
        std::fs::write(dir.path().join(LABELS_FILE), r#"["Normal", "Asthma", "COPD"]"#).unwrap();

        let labels = ModelStore::new(dir.path()).load_labels().unwrap();
        assert_eq!(labels, vec!["Normal", "Asthma", "COPD"]);
    }

    #[test]
    fn empty_or_malformed_labels_are_rejected() {
        let dir = tempdir().expect("temp dir");
        let store = ModelStore::new(dir.path());

        std::fs::write(store.labels_path(), "[]").unwrap();
        assert!(matches!(store.load_labels(), Err(ClassifierError::ModelLoad { .. })));

        std::fs::write(store.labels_path(), "{\"not\": \"a list\"}").unwrap();
        assert!(matches!(store.load_labels(), Err(ClassifierError::ModelLoad { .. })));
    }

    #[test]
    fn paths_resolve_under_models_dir() {
        let store = ModelStore::new("/models");
        assert!(store.model_path().ends_with("model.onnx"));
        assert!(store.labels_path().starts_with("/models"));
        assert!(!store.is_available());
    }
}
