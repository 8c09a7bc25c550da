//! EdgeSense: on-device respiratory sound classification.
//!
//! Microphone audio is kept in a rolling window; on a fixed cadence the
//! window is normalized, turned into a feature matrix and classified by an
//! ONNX model into one of a small set of respiratory states.
//!
//! - [`audio`]: capture loop, ring buffer, normalization.
//! - [`features`]: feature extractor contract and the MFCC/mel extractor.
//! - [`classifier`]: model loading, input marshalling, label decision.
//! - [`pipeline`]: the detection scheduler and its events.
//! - [`config`]: TOML settings and platform paths.

pub mod audio;
pub mod classifier;
pub mod config;
pub mod features;
pub mod pipeline;
