use super::{probe_health, transport::Transport, ImageEngine, Rendered};
use crate::{
    error::{EngineError, Result},
    models::{
        build_config_payload, strip_data_uri, CallOptions, GenerationRequest, HealthSnapshot,
        RefineRequest,
    },
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const CLOUD_NOT_CONFIGURED: &str = "Cloud engine URL is not configured.";

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Remembers whether the cloud device is GPU-class for `ttl`.
pub struct GpuCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entry: Mutex<Option<(bool, Instant)>>,
}

impl GpuCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entry: Mutex::new(None),
        }
    }

    /// The cached flag, or `None` once it is older than the TTL.
    pub fn get(&self) -> Option<bool> {
        let entry = self.entry.lock().ok()?;
        let (gpu, stored_at) = (*entry)?;
        if self.clock.now().saturating_duration_since(stored_at) < self.ttl {
            Some(gpu)
        } else {
            None
        }
    }

    pub fn store(&self, gpu: bool) {
        if let Ok(mut entry) = self.entry.lock() {
            *entry = Some((gpu, self.clock.now()));
        }
    }
}

#[derive(Clone)]
pub struct CloudEngine {
    base_url: String,
    transport: Arc<dyn Transport>,
    health_timeout: Duration,
    gpu_cache: Arc<GpuCache>,
}

impl CloudEngine {
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn Transport>,
        health_timeout: Duration,
        gpu_cache: GpuCache,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            transport,
            health_timeout,
            gpu_cache: Arc::new(gpu_cache),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }

    fn ensure_configured(&self) -> Result<()> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(EngineError::Config(CLOUD_NOT_CONFIGURED.into()))
        }
    }

    async fn gpu_available(&self) -> bool {
        if let Some(gpu) = self.gpu_cache.get() {
            return gpu;
        }
        let snapshot = probe_health(self.transport.as_ref(), &self.base_url, self.health_timeout).await;
        let gpu = snapshot.ok && snapshot.has_gpu();
        log::debug!("Cloud GPU probe: device={:?} gpu={}", snapshot.device(), gpu);
        self.gpu_cache.store(gpu);
        gpu
    }

    pub fn generate_payload(&self, request: &GenerationRequest, gpu: bool) -> Value {
        let mut payload = json!({
            "prompt": request.prompt,
            "aspectRatio": request.aspect_ratio,
            "temperature": request.temperature,
            "resolution": if gpu { "high" } else { "standard" },
        });
        let config = build_config_payload(&request.config);
        if !config.is_empty() {
            payload["config"] = json!(config);
        }
        payload
    }

    pub fn refine_payload(&self, request: &RefineRequest) -> Value {
        let images: Vec<&str> = request.base_images.iter().map(|i| strip_data_uri(i)).collect();
        let mut payload = json!({
            "refinePrompt": request.prompt,
            "images": images,
        });
        let config = build_config_payload(&request.config);
        if !config.is_empty() {
            payload["config"] = json!(config);
        }
        payload
    }
}

#[async_trait]
impl ImageEngine for CloudEngine {
    fn name(&self) -> &str {
        "cloud"
    }

    async fn generate(&self, request: &GenerationRequest, _options: CallOptions) -> Result<Rendered> {
        self.ensure_configured()?;
        let gpu = self.gpu_available().await;
        let payload = self.generate_payload(request, gpu);
        log::info!(
            "Cloud generate: aspect_ratio={} resolution={}",
            request.aspect_ratio,
            payload["resolution"]
        );
        let images = self.transport.post(&self.base_url, "/generate", &payload).await?;
        Ok(Rendered::new(self.name(), images))
    }

    async fn refine(&self, request: &RefineRequest, _options: CallOptions) -> Result<Rendered> {
        self.ensure_configured()?;
        log::info!("Cloud refine: {} base image(s)", request.base_images.len());
        let payload = self.refine_payload(request);
        let images = self.transport.post(&self.base_url, "/refine", &payload).await?;
        Ok(Rendered::new(self.name(), images))
    }

    async fn health(&self) -> HealthSnapshot {
        if !self.is_configured() {
            return HealthSnapshot::unavailable(CLOUD_NOT_CONFIGURED);
        }
        let snapshot = probe_health(self.transport.as_ref(), &self.base_url, self.health_timeout).await;
        self.gpu_cache.store(snapshot.ok && snapshot.has_gpu());
        snapshot
    }
}
