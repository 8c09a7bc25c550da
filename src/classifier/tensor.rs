//! Model input contract: negotiated shape, row-major marshalling, argmax.

use crate::features::FeatureMatrix;

use super::engine::ClassifierError;

// ---------------------------------------------------------------------------
// InputShape
// ---------------------------------------------------------------------------

/// Feature matrix shape a model accepts, read once from its input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub rows: usize,
    pub cols: usize,
}

impl InputShape {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Accepts `[1, rows, cols]` with any number of trailing unit axes
    /// (e.g. `[1, rows, cols, 1]` for conv models).
    pub fn from_dims(dims: &[usize]) -> Result<Self, ClassifierError> {
        let unsupported = || ClassifierError::ModelLoad {
            path: "<model>".into(),
            reason: format!("unsupported input tensor shape {dims:?}, expected [1, rows, cols]"),
        };

        match dims {
            [1, rows, cols, rest @ ..] if rest.iter().all(|&d| d == 1) && *rows > 0 && *cols > 0 => {
                Ok(Self::new(*rows, *cols))
            }
            _ => Err(unsupported()),
        }
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_tuple(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

impl std::fmt::Display for InputShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}×{}", self.rows, self.cols)
    }
}

// ---------------------------------------------------------------------------
// InputTensor
// ---------------------------------------------------------------------------

/// Flattened model input: outer index = frame, inner index = channel.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    dims: Vec<usize>,
    values: Vec<f32>,
}

impl InputTensor {
    /// Marshal `features` into a tensor with the backend's full `dims`.
    ///
    /// The matrix must match `shape` exactly; nothing is padded or cut.
    pub fn from_features(
        features: &FeatureMatrix,
        shape: InputShape,
        dims: &[usize],
    ) -> Result<Self, ClassifierError> {
        if features.shape() != shape.as_tuple() {
            return Err(ClassifierError::ShapeMismatch {
                expected: shape.as_tuple(),
                got: features.shape(),
            });
        }
        Ok(Self {
            dims: dims.to_vec(),
            values: features.as_slice().to_vec(),
        })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Native-endian `f32` bytes, 4 per value, in marshalling order.
    pub fn to_ne_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }
}

/// Index of the first maximal score.  NaN scores never win.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_dims_accepts_rank3_and_trailing_unit() {
        assert_eq!(InputShape::from_dims(&[1, 301, 168]).unwrap(), InputShape::new(301, 168));
        assert_eq!(InputShape::from_dims(&[1, 4, 5, 1]).unwrap(), InputShape::new(4, 5));
    }

    #[test]
    fn from_dims_rejects_batches_and_odd_ranks() {
        let cases: [&[usize]; 5] = [&[2, 4, 5], &[4, 5], &[1, 4, 5, 3], &[1, 0, 5], &[]];
        for dims in cases {
            assert!(
                matches!(InputShape::from_dims(dims), Err(ClassifierError::ModelLoad { .. })),
                "{dims:?}"
            );
        }
    }

    #[test]
    fn marshalling_is_row_major() {
        let m = FeatureMatrix::from_rows(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        let t = InputTensor::from_features(&m, InputShape::new(2, 3), &[1, 2, 3]).unwrap();
        assert_eq!(t.values(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(t.dims(), &[1, 2, 3]);
    }

    #[test]
    fn byte_layout_is_native_endian_f32() {
        let m = FeatureMatrix::from_rows(vec![vec![1.5, -2.0]]).unwrap();
        let t = InputTensor::from_features(&m, InputShape::new(1, 2), &[1, 1, 2]).unwrap();
        let bytes = t.to_ne_bytes();

        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.5_f32.to_ne_bytes());
        assert_eq!(&bytes[4..], &(-2.0_f32).to_ne_bytes());
    }

    #[test]
    fn transposed_matrix_is_rejected() {
        let m = FeatureMatrix::zeros(3, 2);
        let err = InputTensor::from_features(&m, InputShape::new(2, 3), &[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            ClassifierError::ShapeMismatch {
                expected: (2, 3),
                got: (3, 2)
            }
        ));
    }

    #[test]
    fn argmax_prefers_first_of_ties() {
        assert_eq!(argmax(&[0.4, 0.4, 0.2]), Some(0));
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[0.2, 0.3, 0.3]), Some(1));
    }

    #[test]
    fn argmax_skips_nan() {
        assert_eq!(argmax(&[f32::NAN, 0.1, 0.05]), Some(1));
        assert_eq!(argmax(&[f32::NAN, f32::NAN]), None);
        assert_eq!(argmax(&[]), None);
    }
}
