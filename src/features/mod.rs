//! Feature extraction contract: normalized window → 2-D feature matrix.
//!
//! ```text
//! NormalizedWindow ──FeatureExtractor::extract──▶ FeatureMatrix (frames × channels)
//! ```
//!
//! Extractors must be deterministic and stateless between calls, and the
//! shape they produce must match the classifier's input tensor.  The
//! classifier validates the shape on every call.

pub mod mel;

use thiserror::Error;

use crate::audio::NormalizedWindow;

pub use mel::MelFeatureExtractor;

// ---------------------------------------------------------------------------
// FeatureError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FeatureError {
    #[error("feature data has {got} values, expected {expected} ({rows}×{cols})")]
    DataLength {
        rows: usize,
        cols: usize,
        expected: usize,
        got: usize,
    },

    #[error("row {row} has {got} columns, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("invalid feature configuration: {0}")]
    InvalidConfig(String),
}

// ---------------------------------------------------------------------------
// FeatureMatrix
// ---------------------------------------------------------------------------

/// Immutable row-major matrix: rows are time frames, columns are feature
/// channels.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    /// Wrap row-major `data` of exactly `rows × cols` values.
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self, FeatureError> {
        let expected = rows * cols;
        if data.len() != expected {
            return Err(FeatureError::DataLength {
                rows,
                cols,
                expected,
                got: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Build from nested rows; every row must have the same length.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, FeatureError> {
        let cols = rows.first().map_or(0, Vec::len);
        let n_rows = rows.len();
        let mut data = Vec::with_capacity(n_rows * cols);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != cols {
                return Err(FeatureError::RaggedRow {
                    row: i,
                    expected: cols,
                    got: row.len(),
                });
            }
            data.extend(row);
        }
        Ok(Self {
            rows: n_rows,
            cols,
            data,
        })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.cols;
        Some(&self.data[start..start + self.cols])
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        Some(self.data[row * self.cols + col])
    }

    /// All values, frame by frame.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

// ---------------------------------------------------------------------------
// FeatureExtractor
// ---------------------------------------------------------------------------

/// Pure function from a normalized window to a feature matrix.
///
/// Object-safe and `Send + Sync` so the scheduler can hold an
/// `Arc<dyn FeatureExtractor>` and call it from the blocking pool.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, window: &NormalizedWindow) -> FeatureMatrix;

    /// Shape `extract` produces for a window of `window_len` samples.
    fn output_shape(&self, window_len: usize) -> (usize, usize);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
