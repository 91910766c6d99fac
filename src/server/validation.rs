use crate::{
    error::{EngineError, FieldIssue, Result},
    models::{ImageToImageJob, TextToImageJob},
};
use serde_json::Value;

pub const SUPPORTED_ASPECT_RATIOS: [&str; 8] = ["Auto", "1:1", "16:9", "9:16", "3:2", "2:3", "4:5", "5:4"];
pub const DEFAULT_ASPECT_RATIO: &str = "Auto";
pub const DEFAULT_TEMPERATURE: f32 = 0.8;
pub const MAX_PROMPT_CHARS: usize = 500;

/// Validates a `/api/generate` body, collecting every field issue before failing.
pub fn validate_generate(body: &Value) -> Result<TextToImageJob> {
    let fields = object_fields(body)?;
    let mut issues = Vec::new();

    let prompt = prompt_field(fields.get("prompt"), &mut issues);
    let aspect_ratio = aspect_ratio_field(fields.get("aspectRatio"), &mut issues);
    let temperature = temperature_field(fields.get("temperature"), &mut issues);

    match (prompt, aspect_ratio, temperature) {
        (Some(prompt), Some(aspect_ratio), Some(temperature)) if issues.is_empty() => Ok(TextToImageJob {
            prompt,
            aspect_ratio,
            temperature,
        }),
        _ => Err(EngineError::Validation(issues)),
    }
}

/// Validates a `/api/refine` body.
pub fn validate_refine(body: &Value) -> Result<ImageToImageJob> {
    let fields = object_fields(body)?;
    let mut issues = Vec::new();

    let images = images_field(fields.get("images"), &mut issues);
    let prompt = prompt_field(fields.get("prompt"), &mut issues);

    match (images, prompt) {
        (Some(images), Some(prompt)) if issues.is_empty() => Ok(ImageToImageJob { images, prompt }),
        _ => Err(EngineError::Validation(issues)),
    }
}

fn object_fields(body: &Value) -> Result<&serde_json::Map<String, Value>> {
    body.as_object()
        .ok_or_else(|| EngineError::Validation(vec![FieldIssue::new("", "Expected object")]))
}

fn prompt_field(value: Option<&Value>, issues: &mut Vec<FieldIssue>) -> Option<String> {
    let raw = match value {
        None | Some(Value::Null) => {
            issues.push(FieldIssue::new("prompt", "prompt is required"));
            return None;
        }
        Some(Value::String(raw)) => raw,
        Some(_) => {
            issues.push(FieldIssue::new("prompt", "prompt must be a string"));
            return None;
        }
    };

    let prompt = raw.trim();
    if prompt.is_empty() {
        issues.push(FieldIssue::new("prompt", "prompt must not be empty"));
        return None;
    }
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        issues.push(FieldIssue::new(
            "prompt",
            format!("prompt must be at most {} characters", MAX_PROMPT_CHARS),
        ));
        return None;
    }
    Some(prompt.to_string())
}

fn aspect_ratio_field(value: Option<&Value>, issues: &mut Vec<FieldIssue>) -> Option<String> {
    let ratio = match value {
        None | Some(Value::Null) => return Some(DEFAULT_ASPECT_RATIO.to_string()),
        Some(Value::String(raw)) => raw.trim(),
        Some(_) => {
            issues.push(FieldIssue::new("aspectRatio", "aspectRatio must be a string"));
            return None;
        }
    };

    if SUPPORTED_ASPECT_RATIOS.contains(&ratio) {
        Some(ratio.to_string())
    } else {
        issues.push(FieldIssue::new(
            "aspectRatio",
            format!("aspectRatio must be one of: {}", SUPPORTED_ASPECT_RATIOS.join(", ")),
        ));
        None
    }
}

/// Accepts numbers and numeric strings.
fn temperature_field(value: Option<&Value>, issues: &mut Vec<FieldIssue>) -> Option<f32> {
    let parsed = match value {
        None | Some(Value::Null) => return Some(DEFAULT_TEMPERATURE),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(raw)) => raw.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    let temperature = match parsed.filter(|t| t.is_finite()) {
        Some(t) => t,
        None => {
            issues.push(FieldIssue::new("temperature", "temperature must be a number"));
            return None;
        }
    };

    if temperature < 0.0 {
        issues.push(FieldIssue::new("temperature", "temperature must be at least 0"));
        None
    } else if temperature > 2.0 {
        issues.push(FieldIssue::new("temperature", "temperature must be at most 2"));
        None
    } else {
        Some(temperature as f32)
    }
}

fn images_field(value: Option<&Value>, issues: &mut Vec<FieldIssue>) -> Option<Vec<String>> {
    let items = match value {
        Some(Value::Array(items)) => items,
        None | Some(Value::Null) => {
            issues.push(FieldIssue::new("images", "images is required"));
            return None;
        }
        Some(_) => {
            issues.push(FieldIssue::new("images", "images must be an array"));
            return None;
        }
    };

    if items.is_empty() {
        issues.push(FieldIssue::new("images", "images must contain at least one image"));
        return None;
    }

    let mut images = Vec::with_capacity(items.len());
    let before = issues.len();
    for (index, item) in items.iter().enumerate() {
        match item.as_str() {
            Some(image) => images.push(image.trim().to_string()),
            None => issues.push(FieldIssue::new(format!("images.{}", index), "Expected string")),
        }
    }
    if issues.len() > before {
        return None;
    }

    if !images.iter().all(|image| image.starts_with("data:image")) {
        issues.push(FieldIssue::new("images", "images must be data URLs"));
        return None;
    }
    Some(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn issues(result: Result<impl std::fmt::Debug>) -> Vec<FieldIssue> {
        match result {
            Err(EngineError::Validation(issues)) => issues,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_generate_defaults() {
        let job = validate_generate(&json!({"prompt": "  neon rain  "})).unwrap();
        assert_eq!(job.prompt, "neon rain");
        assert_eq!(job.aspect_ratio, "Auto");
        assert!((job.temperature - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_generate_coerces_temperature_strings() {
        let job = validate_generate(&json!({"prompt": "dunes", "aspectRatio": " 16:9 ", "temperature": "1.5"})).unwrap();
        assert_eq!(job.aspect_ratio, "16:9");
        assert!((job.temperature - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_generate_reports_every_field() {
        let found = issues(validate_generate(&json!({
            "prompt": "   ",
            "aspectRatio": "7:3",
            "temperature": 2.5
        })));
        let paths: Vec<&str> = found.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["prompt", "aspectRatio", "temperature"]);
        assert_eq!(found[0].message, "prompt must not be empty");
        assert_eq!(found[2].message, "temperature must be at most 2");
    }

    #[test]
    fn test_generate_prompt_length_limit() {
        let long = "a".repeat(MAX_PROMPT_CHARS + 1);
        let found = issues(validate_generate(&json!({ "prompt": long })));
        assert_eq!(found[0].message, "prompt must be at most 500 characters");

        let exact = "a".repeat(MAX_PROMPT_CHARS);
        assert!(validate_generate(&json!({ "prompt": exact })).is_ok());
    }

    #[test]
    fn test_generate_rejects_non_numeric_temperature() {
        let found = issues(validate_generate(&json!({"prompt": "x", "temperature": "warm"})));
        assert_eq!(found, vec![FieldIssue::new("temperature", "temperature must be a number")]);
    }

    #[test]
    fn test_body_must_be_object() {
        let found = issues(validate_generate(&json!(["prompt"])));
        assert_eq!(found[0].path, "");
    }

    #[test]
    fn test_refine_accepts_data_urls() {
        let job = validate_refine(&json!({
            "images": [" data:image/png;base64,AAAA "],
            "prompt": "warmer light"
        }))
        .unwrap();
        assert_eq!(job.images, vec!["data:image/png;base64,AAAA".to_string()]);
    }

    #[test]
    fn test_refine_rejections() {
        let found = issues(validate_refine(&json!({"images": [], "prompt": "x"})));
        assert_eq!(found[0].message, "images must contain at least one image");

        let found = issues(validate_refine(&json!({"images": ["data:image/png;base64,AA", 3], "prompt": "x"})));
        assert_eq!(found[0].path, "images.1");

        let found = issues(validate_refine(&json!({"images": ["https://x/y.png"]})));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].message, "images must be data URLs");
        assert_eq!(found[1].message, "prompt is required");
    }
}
