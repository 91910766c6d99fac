use crate::error::{EngineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// The network seam shared by the local and cloud engines.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POSTs `payload` to `{base_url}{path}` and returns the `images` array.
    async fn post(&self, base_url: &str, path: &str, payload: &Value) -> Result<Vec<String>>;

    async fn get_json(&self, base_url: &str, path: &str) -> Result<Value>;
}

fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Normalizes an engine response body into its ordered image list.
pub fn parse_images_body(status: u16, body: &str) -> Result<Vec<String>> {
    if !(200..300).contains(&status) {
        let body = if body.trim().is_empty() {
            format!("Engine request failed with status {}", status)
        } else {
            body.to_string()
        };
        return Err(EngineError::Transport { status, body });
    }

    let json: Value = serde_json::from_str(body)
        .map_err(|e| EngineError::Response(format!("Engine response is not JSON: {}", e)))?;

    let images = json
        .get("images")
        .and_then(Value::as_array)
        .ok_or_else(|| EngineError::Response("Engine response missing images array.".into()))?;

    images
        .iter()
        .map(|image| {
            image.as_str().map(String::from).ok_or_else(|| {
                EngineError::Response("Engine response contained a non-string image entry.".into())
            })
        })
        .collect()
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, base_url: &str, path: &str, payload: &Value) -> Result<Vec<String>> {
        let url = join_url(base_url, path);
        log::debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| EngineError::Request(format!("{} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::Response(e.to_string()))?;

        parse_images_body(status, &body)
    }

    async fn get_json(&self, base_url: &str, path: &str) -> Result<Value> {
        let url = join_url(base_url, path);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::Request(format!("{} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Transport {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| EngineError::Response(format!("Health response is not JSON: {}", e)))
    }
}
