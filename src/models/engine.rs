use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    #[default]
    Auto,
    Local,
    Cloud,
}

impl EngineMode {
    pub fn label(&self) -> &'static str {
        match self {
            EngineMode::Auto => "Auto (fallback)",
            EngineMode::Local => "Local",
            EngineMode::Cloud => "Cloud",
        }
    }
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineMode::Auto => "auto",
            EngineMode::Local => "local",
            EngineMode::Cloud => "cloud",
        };
        f.write_str(name)
    }
}

impl FromStr for EngineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(EngineMode::Auto),
            "local" => Ok(EngineMode::Local),
            "cloud" => Ok(EngineMode::Cloud),
            other => Err(format!("unknown engine mode: {}", other)),
        }
    }
}

/// Optional tuning knobs forwarded to the engines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub model_path: Option<String>,
    pub steps: Option<u32>,
    pub guidance_scale: Option<f32>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model_path(mut self, path: impl Into<String>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = Some(steps);
        self
    }

    pub fn with_guidance_scale(mut self, scale: f32) -> Self {
        self.guidance_scale = Some(scale);
        self
    }
}

/// Sparse wire form of [`EngineConfig`]: absent keys are never serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance_scale: Option<f32>,
}

impl ConfigPayload {
    pub fn is_empty(&self) -> bool {
        self.model_path.is_none() && self.steps.is_none() && self.guidance_scale.is_none()
    }
}

pub fn build_config_payload(config: &EngineConfig) -> ConfigPayload {
    ConfigPayload {
        model_path: config
            .model_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from),
        steps: config.steps.filter(|s| *s > 0),
        guidance_scale: config.guidance_scale.filter(|g| g.is_finite()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub aspect_ratio: String,
    pub temperature: f32,
    pub config: EngineConfig,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, aspect_ratio: impl Into<String>, temperature: f32) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio: aspect_ratio.into(),
            temperature,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefineRequest {
    /// Bare base64 or data URIs; engines strip prefixes before sending.
    pub base_images: Vec<String>,
    pub prompt: String,
    pub config: EngineConfig,
}

impl RefineRequest {
    pub fn new(base_images: Vec<String>, prompt: impl Into<String>) -> Self {
        Self {
            base_images,
            prompt: prompt.into(),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub disable_fallback: bool,
}

impl CallOptions {
    pub fn fallback_enabled() -> Self {
        Self {
            disable_fallback: false,
        }
    }

    pub fn fallback_disabled() -> Self {
        Self {
            disable_fallback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_payload_omits_absent_and_invalid_fields() {
        let empty = build_config_payload(&EngineConfig::new());
        assert!(empty.is_empty());
        assert_eq!(serde_json::to_value(&empty).unwrap(), serde_json::json!({}));

        let junk = EngineConfig {
            model_path: Some("   ".into()),
            steps: Some(0),
            guidance_scale: Some(f32::NAN),
        };
        assert!(build_config_payload(&junk).is_empty());
    }

    #[test]
    fn test_config_payload_keeps_present_fields() {
        let config = EngineConfig::new()
            .with_model_path("  runwayml/sd-1.5 ")
            .with_steps(25)
            .with_guidance_scale(0.0);
        let value = serde_json::to_value(build_config_payload(&config)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"modelPath": "runwayml/sd-1.5", "steps": 25, "guidanceScale": 0.0})
        );

        let only_steps = serde_json::to_value(build_config_payload(&EngineConfig::new().with_steps(10))).unwrap();
        assert_eq!(only_steps, serde_json::json!({"steps": 10}));
    }

    #[test]
    fn test_engine_mode_parse() {
        assert_eq!("AUTO".parse::<EngineMode>().unwrap(), EngineMode::Auto);
        assert_eq!(" local ".parse::<EngineMode>().unwrap(), EngineMode::Local);
        assert_eq!("cloud".parse::<EngineMode>().unwrap(), EngineMode::Cloud);
        assert!("gpu".parse::<EngineMode>().is_err());
        assert_eq!(EngineMode::default(), EngineMode::Auto);
    }
}
