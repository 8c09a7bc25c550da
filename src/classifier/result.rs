//! Classification outcome and its risk interpretation.

use serde::Serialize;

/// Label of the healthy class.
pub const NORMAL_LABEL: &str = "Normal";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One classifier decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceResult {
    pub label: String,
    pub class_index: usize,
    /// `distribution[class_index]`.
    pub confidence: f32,
    /// Raw model scores in label order.
    pub distribution: Vec<f32>,
}

impl InferenceResult {
    pub fn is_normal(&self) -> bool {
        self.label == NORMAL_LABEL
    }

    /// `Normal` is always low; otherwise high above 0.8, medium above 0.6.
    pub fn risk_level(&self) -> RiskLevel {
        if self.is_normal() {
            RiskLevel::Low
        } else if self.confidence > 0.8 {
            RiskLevel::High
        } else if self.confidence > 0.6 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Non-normal result with confidence above `threshold`.
    pub fn is_alert(&self, threshold: f32) -> bool {
        !self.is_normal() && self.confidence > threshold
    }
}
