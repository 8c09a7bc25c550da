//! Respiratory-state classifier.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   ModelAssets   ┌───────────────────────────────┐
//! │ ModelStore  │────────────────▶│ Classifier                    │
//! │ model.onnx  │                 │  InputShape (negotiated once) │
//! │ labels.json │                 │  Box<dyn InferenceBackend>    │
//! └─────────────┘                 └──────────────┬────────────────┘
//!                                                │ predict(&FeatureMatrix)
//!                                                ▼
//!                                  InferenceResult { label, confidence, .. }
//! ```

pub mod engine;
pub mod model;
pub mod result;
pub mod tensor;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use engine::{Classifier, ClassifierError, InferenceBackend, TractBackend};
pub use model::{ModelAssets, ModelStore, DEFAULT_LABELS, LABELS_FILE, MODEL_FILE};
pub use result::{InferenceResult, RiskLevel, NORMAL_LABEL};
pub use tensor::{argmax, InputShape, InputTensor};
