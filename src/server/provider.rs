use crate::error::{EngineError, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};

pub const HUGGING_FACE_INFERENCE_URL: &str = "https://api-inference.huggingface.co/models";
pub const UPSTREAM_BUSY: &str = "The image generation service is temporarily unavailable";
pub const GENERATION_FAILED: &str = "Failed to generate images";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TextToImageParams {
    pub guidance_scale: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// A hosted model API that turns prompts (and source images) into image bytes.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn text_to_image(&self, model: &str, prompt: &str, params: TextToImageParams) -> Result<Vec<u8>>;

    async fn image_to_image(&self, model: &str, prompt: &str, image: &[u8], strength: f32) -> Result<Vec<u8>>;
}

pub struct HuggingFaceProvider {
    client: Client,
    token: Option<String>,
    base_url: String,
}

impl HuggingFaceProvider {
    pub fn new(token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            token,
            base_url: HUGGING_FACE_INFERENCE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> Self {
        self.base_url = base_url.as_ref().trim_end_matches('/').to_string();
        self
    }

    async fn invoke(&self, model: &str, payload: Value) -> Result<Vec<u8>> {
        let url = format!("{}/{}", self.base_url, model);
        let mut request = self.client.post(&url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| EngineError::ModelInvocation {
            message: GENERATION_FAILED.to_string(),
            details: Some(e.to_string()),
        })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream_error(status, body));
        }

        let bytes = response.bytes().await.map_err(|e| EngineError::ModelInvocation {
            message: GENERATION_FAILED.to_string(),
            details: Some(e.to_string()),
        })?;
        Ok(bytes.to_vec())
    }
}

/// Maps a failed inference response onto the glue service's error contract.
pub fn upstream_error(status: u16, body: String) -> EngineError {
    if status == 503 {
        log::warn!("Hugging Face reported the model as unavailable: {}", body);
        return EngineError::UpstreamUnavailable(UPSTREAM_BUSY.to_string());
    }
    log::error!("Pipeline invocation failed with status {}: {}", status, body);
    EngineError::ModelInvocation {
        message: GENERATION_FAILED.to_string(),
        details: Some(if body.is_empty() {
            format!("Inference request failed with status {}", status)
        } else {
            body
        }),
    }
}

#[async_trait]
impl ImageProvider for HuggingFaceProvider {
    async fn text_to_image(&self, model: &str, prompt: &str, params: TextToImageParams) -> Result<Vec<u8>> {
        let payload = json!({
            "inputs": prompt,
            "parameters": params,
        });
        self.invoke(model, payload).await
    }

    async fn image_to_image(&self, model: &str, prompt: &str, image: &[u8], strength: f32) -> Result<Vec<u8>> {
        let payload = json!({
            "inputs": STANDARD.encode(image),
            "parameters": {
                "prompt": prompt,
                "strength": strength,
            },
        });
        self.invoke(model, payload).await
    }
}
