//! Classifier engine: backend trait, ONNX backend and the label decision.
//!
//! # Overview
//!
//! [`InferenceBackend`] is the seam between the pipeline and a model runtime.
//! It is object-safe and `Send + Sync` so the [`Classifier`] can hold a
//! `Box<dyn InferenceBackend>` and be shared as `Arc<Classifier>` with the
//! blocking pool.
//!
//! [`TractBackend`] is the production implementation, an optimized
//! `tract-onnx` plan.  Construct it with [`TractBackend::from_bytes`].
//!
//! [`Classifier`] negotiates the input shape once, validates every feature
//! matrix against it, runs the backend and picks the label.

use std::io::Cursor;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tract_onnx::prelude::*;

use super::model::ModelAssets;
use super::result::InferenceResult;
use super::tensor::{argmax, InputShape, InputTensor};
use crate::features::FeatureMatrix;

// ---------------------------------------------------------------------------
// ClassifierError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifierError {
    /// Model or labels could not be read, parsed or prepared.
    #[error("failed to load model from {path}: {reason}")]
    ModelLoad { path: String, reason: String },

    #[error("feature shape {got:?} does not match model input {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("{labels} labels for a model with {classes} output classes")]
    LabelMismatch { labels: usize, classes: usize },

    #[error("classifier is closed")]
    Closed,

    #[error("inference failed: {0}")]
    Inference(String),
}

impl ClassifierError {
    /// Errors that will repeat on every call and should stop detection.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Inference(_))
    }
}

// ---------------------------------------------------------------------------
// InferenceBackend
// ---------------------------------------------------------------------------

/// A loaded model that maps one input tensor to one score per class.
pub trait InferenceBackend: Send + Sync {
    /// Full input tensor dims, batch axis included.
    fn input_dims(&self) -> &[usize];

    fn output_classes(&self) -> usize;

    fn run(&self, input: &InputTensor) -> Result<Vec<f32>, ClassifierError>;
}

// Compile-time assertion: Box<dyn InferenceBackend> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn InferenceBackend>) {}
};

// ---------------------------------------------------------------------------
// TractBackend
// ---------------------------------------------------------------------------

type RunnableModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// ONNX model optimized and planned by tract.
pub struct TractBackend {
    plan: RunnableModel,
    input_dims: Vec<usize>,
    output_classes: usize,
}

impl std::fmt::Debug for TractBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TractBackend")
            .field("input_dims", &self.input_dims)
            .field("output_classes", &self.output_classes)
            .finish_non_exhaustive()
    }
}

impl TractBackend {
    /// Parse and optimize an ONNX model.
    ///
    /// `input_override` pins the input to `[1, rows, cols]` for models
    /// exported with symbolic dimensions.
    ///
    /// # Errors
    ///
    /// [`ClassifierError::ModelLoad`] when the bytes are not a valid model or
    /// its input/output shapes are not concrete.
    pub fn from_bytes(
        bytes: &[u8],
        input_override: Option<(usize, usize)>,
    ) -> Result<Self, ClassifierError> {
        let load_err = |reason: String| ClassifierError::ModelLoad {
            path: "<model>".into(),
            reason,
        };

        let mut model = tract_onnx::onnx()
            .model_for_read(&mut Cursor::new(bytes))
            .map_err(|e| load_err(e.to_string()))?;

        if let Some((rows, cols)) = input_override {
            model = model
                .with_input_fact(0, f32::fact([1, rows, cols]).into())
                .map_err(|e| load_err(format!("input override {rows}×{cols}: {e}")))?;
        }

        let plan = model
            .into_optimized()
            .map_err(|e| load_err(format!("optimization: {e}")))?
            .into_runnable()
            .map_err(|e| load_err(format!("planning: {e}")))?;

        let input_dims = concrete_shape(plan.model().input_fact(0))
            .ok_or_else(|| load_err("input tensor has no concrete shape".into()))?;
        let output_classes = concrete_shape(plan.model().output_fact(0))
            .map(|dims| dims.iter().product::<usize>())
            .ok_or_else(|| load_err("output tensor has no concrete shape".into()))?;

        log::info!("classifier: onnx model input {input_dims:?}, {output_classes} classes");

        Ok(Self {
            plan,
            input_dims,
            output_classes,
        })
    }
}

fn concrete_shape(fact: TractResult<&TypedFact>) -> Option<Vec<usize>> {
    fact.ok()?.shape.as_concrete().map(|dims| dims.to_vec())
}

impl InferenceBackend for TractBackend {
    fn input_dims(&self) -> &[usize] {
        &self.input_dims
    }

    fn output_classes(&self) -> usize {
        self.output_classes
    }

    fn run(&self, input: &InputTensor) -> Result<Vec<f32>, ClassifierError> {
        let bytes = input.to_ne_bytes();
        // SAFETY: every bit pattern is a valid f32 and tract copies the bytes
        // into its own aligned storage.
        #[allow(unused_unsafe)]
        let tensor = unsafe { Tensor::from_raw::<f32>(input.dims(), &bytes) }
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let first = outputs
            .first()
            .ok_or_else(|| ClassifierError::Inference("model produced no outputs".into()))?;
        let scores = first
            .to_array_view::<f32>()
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        Ok(scores.iter().copied().collect())
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Feature matrix → labelled [`InferenceResult`].
///
/// ```rust,no_run
/// use edgesense::classifier::{Classifier, ModelStore};
/// use edgesense::features::FeatureMatrix;
///
/// let assets = ModelStore::new("models").load().unwrap();
/// let classifier = Classifier::load(&assets, None).unwrap();
/// let (rows, cols) = classifier.input_shape().as_tuple();
/// let result = classifier.predict(&FeatureMatrix::zeros(rows, cols)).unwrap();
/// println!("{} ({:.2})", result.label, result.confidence);
/// classifier.close();
/// ```
pub struct Classifier {
    /// `None` once closed.  Predictions hold the read lock, `close` the write
    /// lock, so the model is never released mid-inference.
    backend: RwLock<Option<Box<dyn InferenceBackend>>>,
    shape: InputShape,
    labels: Vec<String>,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("shape", &self.shape)
            .field("labels", &self.labels)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Classifier {
    /// Wrap a loaded backend.
    ///
    /// # Errors
    ///
    /// - [`ClassifierError::ModelLoad`]: unsupported input tensor shape.
    /// - [`ClassifierError::LabelMismatch`]: `labels.len()` differs from the
    ///   model's class count.
    pub fn new(
        backend: Box<dyn InferenceBackend>,
        labels: Vec<String>,
    ) -> Result<Self, ClassifierError> {
        let shape = InputShape::from_dims(backend.input_dims())?;
        let classes = backend.output_classes();
        if labels.len() != classes {
            return Err(ClassifierError::LabelMismatch {
                labels: labels.len(),
                classes,
            });
        }

        log::info!("classifier: ready, input {shape}, labels {labels:?}");
        Ok(Self {
            backend: RwLock::new(Some(backend)),
            shape,
            labels,
        })
    }

    /// Build a [`TractBackend`] from `assets` and wrap it.
    pub fn load(
        assets: &ModelAssets,
        input_override: Option<(usize, usize)>,
    ) -> Result<Self, ClassifierError> {
        let backend = TractBackend::from_bytes(&assets.model_bytes, input_override).map_err(
            |e| match e {
                ClassifierError::ModelLoad { reason, .. } => ClassifierError::ModelLoad {
                    path: assets.source.display().to_string(),
                    reason,
                },
                other => other,
            },
        )?;
        Self::new(Box::new(backend), assets.labels.clone())
    }

    /// Classify one feature matrix.
    ///
    /// # Errors
    ///
    /// - [`ClassifierError::ShapeMismatch`]: `features` is not exactly
    ///   [`input_shape`](Self::input_shape).
    /// - [`ClassifierError::Closed`]: called after [`close`](Self::close).
    /// - [`ClassifierError::Inference`]: the runtime failed or returned the
    ///   wrong number of scores.
    pub fn predict(&self, features: &FeatureMatrix) -> Result<InferenceResult, ClassifierError> {
        let guard = self.read();
        let backend = guard.as_ref().ok_or(ClassifierError::Closed)?;

        let input = InputTensor::from_features(features, self.shape, backend.input_dims())?;
        let distribution = backend.run(&input)?;

        if distribution.len() != self.labels.len() {
            return Err(ClassifierError::Inference(format!(
                "model returned {} scores for {} labels",
                distribution.len(),
                self.labels.len()
            )));
        }

        let class_index = argmax(&distribution)
            .ok_or_else(|| ClassifierError::Inference("all scores are NaN".into()))?;

        Ok(InferenceResult {
            label: self.labels[class_index].clone(),
            class_index,
            confidence: distribution[class_index],
            distribution,
        })
    }

    /// Release the model.  Later calls are no-ops.
    pub fn close(&self) {
        if self.write().take().is_some() {
            log::info!("classifier: closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.read().is_none()
    }

    pub fn input_shape(&self) -> InputShape {
        self.shape
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Box<dyn InferenceBackend>>> {
        self.backend.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Box<dyn InferenceBackend>>> {
        self.backend.write().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
