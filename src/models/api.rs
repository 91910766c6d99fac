use crate::error::FieldIssue;
use serde::{Deserialize, Serialize};

/// Validated `/api/generate` body.
#[derive(Debug, Clone, PartialEq)]
pub struct TextToImageJob {
    pub prompt: String,
    pub aspect_ratio: String,
    pub temperature: f32,
}

/// Validated `/api/refine` body.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageToImageJob {
    pub images: Vec<String>,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMeta {
    pub model: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub images: Vec<String>,
    pub meta: GenerationMeta,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

impl ErrorBody {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.to_string(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_issues(mut self, issues: &[FieldIssue]) -> Self {
        self.error.details = serde_json::to_value(issues).ok();
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.error.details = Some(serde_json::Value::String(details.into()));
        self
    }
}
