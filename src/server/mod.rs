//! Glue service that validates moodboard requests and forwards them to Hugging Face.
//!
//! Validation, the provider seam and the generation pipeline are always built;
//! the actix-web front lives behind the `server` feature.

#[cfg(feature = "server")]
pub mod http;
pub mod pipeline;
pub mod provider;
pub mod validation;

pub use pipeline::{dimensions_for, temperature_to_guidance_scale, GenerationPipeline};
pub use provider::{HuggingFaceProvider, ImageProvider, TextToImageParams};
pub use validation::{validate_generate, validate_refine, SUPPORTED_ASPECT_RATIOS};

use crate::{error::EngineError, models::ErrorBody};

pub const MASKED_SERVER_ERROR: &str = "Unexpected server error";

/// Renders the `{error: {code, message, details?}}` body for a failure.
pub fn error_body(error: &EngineError) -> ErrorBody {
    let message = if error.status_code() >= 500 {
        MASKED_SERVER_ERROR.to_string()
    } else {
        error.to_string()
    };

    let body = ErrorBody::new(error.code(), message);
    match error {
        EngineError::Validation(issues) => body.with_issues(issues),
        EngineError::ModelInvocation {
            details: Some(details), ..
        } => body.with_details(details.clone()),
        _ => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldIssue;
    use serde_json::json;

    #[test]
    fn test_client_errors_keep_their_message() {
        let body = error_body(&EngineError::Validation(vec![FieldIssue::new("prompt", "prompt is required")]));
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({"error": {
                "code": "VALIDATION_ERROR",
                "message": "Request validation failed",
                "details": [{"path": "prompt", "message": "prompt is required"}]
            }})
        );
    }

    #[test]
    fn test_server_errors_are_masked_but_keep_details() {
        let body = error_body(&EngineError::ModelInvocation {
            message: "Image at index 0 is not a valid data URL".into(),
            details: Some("Invalid image data URL".into()),
        });
        assert_eq!(body.error.code, "MODEL_INVOCATION_FAILED");
        assert_eq!(body.error.message, MASKED_SERVER_ERROR);
        assert_eq!(body.error.details, Some(json!("Invalid image data URL")));

        let body = error_body(&EngineError::Internal("db".into()));
        assert_eq!(body.error.code, "INTERNAL_SERVER_ERROR");
        assert!(body.error.details.is_none());
    }
}
