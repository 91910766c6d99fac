use super::{ImageEngine, Rendered};
use crate::{
    config::RunnerConfig,
    error::{EngineError, Result, RunnerErrorKind},
    models::{strip_data_uri, CallOptions, GenerationRequest, HealthSnapshot, RefineRequest},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub const DEFAULT_GUIDANCE: f32 = 6.5;
pub const DEFAULT_STEPS: u32 = 30;
pub const DEFAULT_IMG2IMG_STRENGTH: f32 = 0.6;
pub const IMAGES_PER_CALL: u32 = 2;

const AUTO_DIMENSIONS: (u32, u32) = (640, 640);

pub fn resolve_dimensions(aspect_ratio: &str) -> (u32, u32) {
    match aspect_ratio.trim() {
        "1:1" => (640, 640),
        "3:2" => (768, 512),
        "2:3" => (512, 768),
        "16:9" => (896, 512),
        "9:16" => (512, 896),
        _ => AUTO_DIMENSIONS,
    }
}

/// Maps the 0..2 temperature slider onto a 4.5..10.5 guidance scale.
pub fn normalize_temperature(temperature: f32) -> f32 {
    if !temperature.is_finite() {
        return DEFAULT_GUIDANCE;
    }
    let clamped = temperature.clamp(0.0, 2.0);
    ((4.5 + clamped * 3.0) * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RunnerMode {
    #[serde(rename = "txt2img")]
    TextToImage,
    #[serde(rename = "img2img")]
    ImageToImage,
}

/// One JSON document written to the runner's stdin.
#[derive(Debug, Clone, Serialize)]
pub struct RunnerRequest {
    pub mode: RunnerMode,
    pub model_id: String,
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub guidance_scale: f32,
    pub num_inference_steps: u32,
    pub precision: String,
    pub device: String,
    pub output_format: &'static str,
    pub num_images: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_images: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RunnerResponse {
    success: bool,
    #[serde(default)]
    images: Vec<String>,
    error: Option<String>,
    #[serde(rename = "errorType")]
    error_type: Option<String>,
    diagnostics: Option<Value>,
}

pub fn parse_runner_output(stdout: &str, stderr: &str, exit_code: Option<i32>) -> Result<Vec<String>> {
    if stdout.trim().is_empty() {
        log::error!(
            "Diffusion runner produced no output (exit code {:?}): {}",
            exit_code,
            stderr.trim()
        );
        return Err(EngineError::Runner {
            message: "Diffusion runner produced no output.".into(),
            kind: RunnerErrorKind::Output,
        });
    }

    let parsed: RunnerResponse = serde_json::from_str(stdout.trim()).map_err(|e| {
        log::debug!("Unparsable runner output: {}", stdout);
        EngineError::Runner {
            message: format!("Unable to parse diffusion runner output: {}", e),
            kind: RunnerErrorKind::Output,
        }
    })?;

    if parsed.success {
        if let Some(diagnostics) = &parsed.diagnostics {
            log::debug!("Diffusion runner diagnostics: {}", diagnostics);
        }
        return Ok(parsed.images);
    }

    let runner_message = parsed.error.unwrap_or_default();
    let (message, kind) = match parsed.error_type.as_deref() {
        Some("vram") => (
            "Stable diffusion generation failed due to insufficient GPU memory. Try lowering resolution or freeing VRAM."
                .to_string(),
            RunnerErrorKind::Vram,
        ),
        Some("validation") => (
            format!("Invalid diffusion request: {}", runner_message),
            RunnerErrorKind::Validation,
        ),
        _ if runner_message.is_empty() => (
            "Stable diffusion generation failed.".to_string(),
            RunnerErrorKind::Runtime,
        ),
        _ => (runner_message.clone(), RunnerErrorKind::Runtime),
    };
    log::error!(
        "Diffusion runner failed: {} (exit code {:?}, stderr: {})",
        runner_message,
        exit_code,
        stderr.trim()
    );
    Err(EngineError::Runner { message, kind })
}

/// Spawns the external diffusion script once per call.
#[derive(Debug, Clone)]
pub struct DiffusionRunner {
    config: RunnerConfig,
}

impl DiffusionRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn text_request(&self, request: &GenerationRequest) -> RunnerRequest {
        let (width, height) = resolve_dimensions(&request.aspect_ratio);
        let config = &request.config;
        RunnerRequest {
            mode: RunnerMode::TextToImage,
            model_id: self.model_override(request.config.model_path.as_deref(), &self.config.text_model),
            prompt: request.prompt.clone(),
            width,
            height,
            guidance_scale: config
                .guidance_scale
                .filter(|g| g.is_finite())
                .unwrap_or_else(|| normalize_temperature(request.temperature)),
            num_inference_steps: config.steps.filter(|s| *s > 0).unwrap_or(DEFAULT_STEPS),
            precision: self.config.precision.clone(),
            device: self.config.device.clone(),
            output_format: "png",
            num_images: IMAGES_PER_CALL,
            scheduler: self.config.scheduler.clone(),
            strength: None,
            init_images: None,
        }
    }

    pub fn image_request(&self, request: &RefineRequest) -> Result<RunnerRequest> {
        if request.base_images.is_empty() {
            return Err(EngineError::Runner {
                message: "At least one base image is required to run image-to-image refinement.".into(),
                kind: RunnerErrorKind::Validation,
            });
        }
        let config = &request.config;
        let (width, height) = AUTO_DIMENSIONS;
        Ok(RunnerRequest {
            mode: RunnerMode::ImageToImage,
            model_id: self.model_override(config.model_path.as_deref(), &self.config.img2img_model),
            prompt: request.prompt.clone(),
            width,
            height,
            guidance_scale: config
                .guidance_scale
                .filter(|g| g.is_finite())
                .unwrap_or(DEFAULT_GUIDANCE),
            num_inference_steps: config.steps.filter(|s| *s > 0).unwrap_or(DEFAULT_STEPS),
            precision: self.config.precision.clone(),
            device: self.config.device.clone(),
            output_format: "png",
            num_images: IMAGES_PER_CALL,
            scheduler: self.config.scheduler.clone(),
            strength: Some(DEFAULT_IMG2IMG_STRENGTH),
            init_images: Some(
                request
                    .base_images
                    .iter()
                    .map(|image| strip_data_uri(image).trim().to_string())
                    .collect(),
            ),
        })
    }

    fn model_override(&self, model_path: Option<&str>, default: &str) -> String {
        model_path
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(default)
            .to_string()
    }

    async fn run(&self, request: &RunnerRequest) -> Result<Vec<String>> {
        let body = serde_json::to_vec(request)?;
        log::info!(
            "Spawning diffusion runner: {} {} ({:?}, {}x{})",
            self.config.python,
            self.config.script_path,
            request.mode,
            request.width,
            request.height
        );

        let mut child = Command::new(&self.config.python)
            .arg(&self.config.script_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Runner {
                message: format!("Failed to start diffusion runner: {}", e),
                kind: RunnerErrorKind::Spawn,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A runner that exits early closes its end; its stdout still tells us why.
            if let Err(e) = stdin.write_all(&body).await {
                log::warn!("Could not write request to diffusion runner: {}", e);
            }
            drop(stdin);
        }

        let output = child.wait_with_output().await.map_err(|e| EngineError::Runner {
            message: format!("Diffusion runner did not complete: {}", e),
            kind: RunnerErrorKind::Output,
        })?;

        parse_runner_output(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
            output.status.code(),
        )
    }
}

#[async_trait]
impl ImageEngine for DiffusionRunner {
    fn name(&self) -> &str {
        "runner"
    }

    async fn generate(&self, request: &GenerationRequest, _options: CallOptions) -> Result<Rendered> {
        let runner_request = self.text_request(request);
        Ok(Rendered::new(self.name(), self.run(&runner_request).await?))
    }

    async fn refine(&self, request: &RefineRequest, _options: CallOptions) -> Result<Rendered> {
        let runner_request = self.image_request(request)?;
        Ok(Rendered::new(self.name(), self.run(&runner_request).await?))
    }

    async fn health(&self) -> HealthSnapshot {
        match tokio::fs::metadata(&self.config.script_path).await {
            Ok(_) => HealthSnapshot::online(json!({
                "device": self.config.device,
                "model": self.config.text_model,
                "runner": self.config.script_path,
            })),
            Err(e) => HealthSnapshot::unavailable(format!(
                "Diffusion runner script not found at {}: {}",
                self.config.script_path, e
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EngineConfig;

    #[test]
    fn test_dimensions_and_guidance() {
        assert_eq!(resolve_dimensions("16:9"), (896, 512));
        assert_eq!(resolve_dimensions("9:16"), (512, 896));
        assert_eq!(resolve_dimensions("21:9"), (640, 640));
        assert_eq!(resolve_dimensions("Auto"), (640, 640));

        assert_eq!(normalize_temperature(0.0), 4.5);
        assert_eq!(normalize_temperature(1.0), 7.5);
        assert_eq!(normalize_temperature(5.0), 10.5);
        assert_eq!(normalize_temperature(f32::NAN), DEFAULT_GUIDANCE);
    }

    #[test]
    fn test_text_request_uses_config_overrides() {
        let runner = DiffusionRunner::new(RunnerConfig::new());
        let plain = runner.text_request(&GenerationRequest::new("dunes", "3:2", 1.0));
        assert_eq!((plain.width, plain.height), (768, 512));
        assert_eq!(plain.guidance_scale, 7.5);
        assert_eq!(plain.num_inference_steps, DEFAULT_STEPS);
        assert_eq!(plain.num_images, 2);

        let tuned = runner.text_request(
            &GenerationRequest::new("dunes", "3:2", 1.0).with_config(
                EngineConfig::new()
                    .with_model_path("local/sd15")
                    .with_steps(12)
                    .with_guidance_scale(3.0),
            ),
        );
        assert_eq!(tuned.model_id, "local/sd15");
        assert_eq!(tuned.num_inference_steps, 12);
        assert_eq!(tuned.guidance_scale, 3.0);

        let value = serde_json::to_value(&plain).unwrap();
        assert_eq!(value["mode"], "txt2img");
        assert!(value.get("init_images").is_none());
    }

    #[test]
    fn test_image_request_requires_base_images() {
        let runner = DiffusionRunner::new(RunnerConfig::new());
        let err = runner.image_request(&RefineRequest::new(vec![], "x")).unwrap_err();
        assert!(!err.allows_fallback());

        let request = runner
            .image_request(&RefineRequest::new(vec!["data:image/png;base64, AAAA ".into()], "x"))
            .unwrap();
        assert_eq!(request.init_images, Some(vec!["AAAA".to_string()]));
        assert_eq!(request.strength, Some(DEFAULT_IMG2IMG_STRENGTH));
        assert_eq!(serde_json::to_value(&request).unwrap()["mode"], "img2img");
    }

    #[test]
    fn test_parse_runner_output() {
        let ok = parse_runner_output(r#"{"success": true, "images": ["a", "b"]}"#, "", Some(0)).unwrap();
        assert_eq!(ok, vec!["a", "b"]);

        let vram = parse_runner_output(
            r#"{"success": false, "error": "CUDA out of memory", "errorType": "vram"}"#,
            "",
            Some(1),
        )
        .unwrap_err();
        assert!(matches!(vram, EngineError::Runner { kind: RunnerErrorKind::Vram, ref message } if message.contains("insufficient GPU memory")));

        let invalid = parse_runner_output(
            r#"{"success": false, "error": "width must be positive", "errorType": "validation"}"#,
            "",
            Some(1),
        )
        .unwrap_err();
        assert!(invalid.to_string().contains("Invalid diffusion request: width must be positive"));

        assert!(matches!(
            parse_runner_output("", "Traceback", Some(1)),
            Err(EngineError::Runner { kind: RunnerErrorKind::Output, .. })
        ));
        assert!(matches!(
            parse_runner_output("loading weights...", "", Some(0)),
            Err(EngineError::Runner { kind: RunnerErrorKind::Output, .. })
        ));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let runner = DiffusionRunner::new(
            RunnerConfig::new()
                .with_python("/nonexistent/aura-python")
                .with_script("/nonexistent/runner.py"),
        );
        let err = runner
            .generate(&GenerationRequest::new("x", "1:1", 0.5), CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Runner { kind: RunnerErrorKind::Spawn, .. }));
        assert!(!runner.health().await.ok);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_reads_stdout_json() {
        let script = std::env::temp_dir().join(format!("aura-runner-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&script, r#"{"success": true, "images": ["x1", "x2"]}"#).unwrap();

        // `cat <file>` stands in for the interpreter and echoes a canned response.
        let runner = DiffusionRunner::new(
            RunnerConfig::new()
                .with_python("cat")
                .with_script(script.to_string_lossy().to_string()),
        );
        let rendered = runner
            .generate(&GenerationRequest::new("x", "1:1", 0.5), CallOptions::default())
            .await
            .unwrap();
        assert_eq!(rendered.images, vec!["x1", "x2"]);
        assert_eq!(rendered.engine, "runner");
        assert!(runner.health().await.ok);

        std::fs::remove_file(&script).unwrap();
    }
}
