//! Scheduler lifecycle, detection events and pipeline errors.
//!
//! [`SchedulerState`] is the two-state machine the host drives through
//! `start` / `stop`.  Everything the scheduler reports to the host travels as
//! a [`DetectionEvent`] over the result channel.

use std::time::Duration;

use crate::audio::CaptureError;
use crate::classifier::InferenceResult;

// ---------------------------------------------------------------------------
// SchedulerState
// ---------------------------------------------------------------------------

/// ```text
/// Stopped ──start()──▶ Running ──stop() / fatal error──▶ Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Stopped,
    Running,
}

impl SchedulerState {
    /// ```
    /// use edgesense::pipeline::SchedulerState;
    ///
    /// assert!(SchedulerState::Running.is_running());
    /// assert!(!SchedulerState::Stopped.is_running());
    /// ```
    pub fn is_running(&self) -> bool {
        matches!(self, SchedulerState::Running)
    }

    /// Short label for status output.
    pub fn label(&self) -> &'static str {
        match self {
            SchedulerState::Stopped => "Stopped",
            SchedulerState::Running => "Running",
        }
    }
}

// ---------------------------------------------------------------------------
// DetectionEvent
// ---------------------------------------------------------------------------

/// One successful tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Tick counter since `start`, counting ticks that were not ready.
    pub tick: u64,
    pub result: InferenceResult,
    /// Feature extraction + inference wall time.
    pub latency: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionEvent {
    Started,
    Detection(Detection),
    /// The loop has exited; nothing follows for this run.
    Stopped,
    /// A fatal error ended the loop.  `Stopped` follows.
    Error { message: String },
}

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// Errors surfaced by the scheduler's control surface.
#[derive(Debug)]
pub enum PipelineError {
    /// The capture loop could not be started.
    Capture(CaptureError),
    /// Internal / unexpected error (e.g. no tokio runtime).
    Internal(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Capture(e) => write!(f, "Audio capture failed: {e}"),
            PipelineError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Capture(e) => Some(e),
            PipelineError::Internal(_) => None,
        }
    }
}

impl From<CaptureError> for PipelineError {
    fn from(e: CaptureError) -> Self {
        PipelineError::Capture(e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
