use serde::Serialize;
use thiserror::Error;

/// A single field-level validation failure, reported back to HTTP callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldIssue {
    pub path: String,
    pub message: String,
}

impl FieldIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Failure categories reported by the diffusion runner script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerErrorKind {
    Vram,
    Validation,
    Runtime,
    Spawn,
    Output,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: status {status}: {body}")]
    Transport { status: u16, body: String },

    #[error("Request error: {0}")]
    Request(String),

    #[error("Response error: {0}")]
    Response(String),

    #[error("Request validation failed")]
    Validation(Vec<FieldIssue>),

    #[error("{message}")]
    ModelInvocation {
        message: String,
        details: Option<String>,
    },

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Route not found")]
    NotFound,

    #[error("Origin not allowed")]
    CorsRejected,

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Runner error: {message}")]
    Runner {
        message: String,
        kind: RunnerErrorKind,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether a caller may retry the same operation against another engine.
    pub fn allows_fallback(&self) -> bool {
        match self {
            EngineError::Transport { .. } | EngineError::Request(_) | EngineError::Response(_) => true,
            EngineError::Runner { kind, .. } => *kind != RunnerErrorKind::Validation,
            _ => false,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Validation(_) => 400,
            EngineError::CorsRejected => 403,
            EngineError::NotFound => 404,
            EngineError::PayloadTooLarge => 413,
            EngineError::ModelInvocation { .. } => 502,
            EngineError::UpstreamUnavailable(_) => 503,
            _ => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::CorsRejected => "CORS_NOT_ALLOWED",
            EngineError::NotFound => "NOT_FOUND",
            EngineError::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            EngineError::ModelInvocation { .. } => "MODEL_INVOCATION_FAILED",
            EngineError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            _ => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
