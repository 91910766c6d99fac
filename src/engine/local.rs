use super::{cloud::CloudEngine, probe_health, transport::Transport, ImageEngine, Rendered};
use crate::{
    error::Result,
    models::{
        build_config_payload, strip_data_uri, CallOptions, GenerationRequest, HealthSnapshot,
        RefineRequest,
    },
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Engine server running next to the app, with optional cloud fallback.
#[derive(Clone)]
pub struct LocalEngine {
    base_url: String,
    transport: Arc<dyn Transport>,
    health_timeout: Duration,
    fallback: Option<CloudEngine>,
}

impl LocalEngine {
    pub fn new(base_url: impl Into<String>, transport: Arc<dyn Transport>, health_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            transport,
            health_timeout,
            fallback: None,
        }
    }

    /// Unconfigured cloud engines are ignored.
    pub fn with_fallback(mut self, cloud: CloudEngine) -> Self {
        self.fallback = cloud.is_configured().then_some(cloud);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn generate_payload(&self, request: &GenerationRequest) -> Value {
        let mut payload = json!({
            "prompt": request.prompt,
            "aspectRatio": request.aspect_ratio,
            "temperature": request.temperature,
        });
        let config = build_config_payload(&request.config);
        if !config.is_empty() {
            payload["config"] = json!(config);
        }
        payload
    }

    pub fn refine_payload(&self, request: &RefineRequest) -> Value {
        let base_images: Vec<&str> = request.base_images.iter().map(|i| strip_data_uri(i)).collect();
        let mut payload = json!({
            "prompt": request.prompt,
            "baseImages": base_images,
        });
        let config = build_config_payload(&request.config);
        if !config.is_empty() {
            payload["config"] = json!(config);
        }
        payload
    }

    fn fallback_for(&self, options: CallOptions) -> Option<&CloudEngine> {
        if options.disable_fallback {
            None
        } else {
            self.fallback.as_ref()
        }
    }
}

#[async_trait]
impl ImageEngine for LocalEngine {
    fn name(&self) -> &str {
        "local"
    }

    async fn generate(&self, request: &GenerationRequest, options: CallOptions) -> Result<Rendered> {
        let payload = self.generate_payload(request);
        match self.transport.post(&self.base_url, "/generate", &payload).await {
            Ok(images) => Ok(Rendered::new(self.name(), images)),
            Err(e) if e.allows_fallback() => match self.fallback_for(options) {
                Some(cloud) => {
                    log::warn!("Local generate failed ({}), falling back to cloud", e);
                    cloud.generate(request, options).await
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    async fn refine(&self, request: &RefineRequest, options: CallOptions) -> Result<Rendered> {
        let payload = self.refine_payload(request);
        match self.transport.post(&self.base_url, "/refine", &payload).await {
            Ok(images) => Ok(Rendered::new(self.name(), images)),
            Err(e) if e.allows_fallback() => match self.fallback_for(options) {
                Some(cloud) => {
                    log::warn!("Local refine failed ({}), falling back to cloud", e);
                    cloud.refine(request, options).await
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    async fn health(&self) -> HealthSnapshot {
        probe_health(self.transport.as_ref(), &self.base_url, self.health_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cloud::{GpuCache, SystemClock};
    use crate::engine::testing::{Scripted, ScriptedTransport, CLOUD, LOCAL};
    use crate::error::EngineError;
    use crate::models::EngineConfig;

    fn engines(transport: Arc<ScriptedTransport>, cloud_url: &str) -> LocalEngine {
        let cloud = CloudEngine::new(
            cloud_url,
            transport.clone(),
            Duration::from_millis(100),
            GpuCache::new(Duration::from_secs(60), Arc::new(SystemClock)),
        );
        LocalEngine::new(LOCAL, transport, Duration::from_millis(100)).with_fallback(cloud)
    }

    #[tokio::test]
    async fn test_generate_payload_is_sparse() {
        let transport = Arc::new(
            ScriptedTransport::new().on_post(LOCAL, "/generate", Scripted::Images(vec!["a".into(), "b".into()])),
        );
        let local = engines(transport.clone(), CLOUD);
        let request = GenerationRequest::new("autumn", "1:1", 0.5)
            .with_config(EngineConfig::new().with_model_path(" ").with_guidance_scale(7.5));

        let rendered = local.generate(&request, CallOptions::default()).await.unwrap();
        assert_eq!(rendered, Rendered::new("local", vec!["a".into(), "b".into()]));
        let payload = transport.last_payload(LOCAL, "/generate").unwrap();
        assert_eq!(
            payload,
            json!({"prompt": "autumn", "aspectRatio": "1:1", "temperature": 0.5, "config": {"guidanceScale": 7.5}})
        );
    }

    #[tokio::test]
    async fn test_failure_with_fallback_disabled_never_touches_cloud() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on_post(LOCAL, "/generate", Scripted::Fail(500, "boom".into()))
                .on_post(CLOUD, "/generate", Scripted::Images(vec!["c".into()])),
        );
        let local = engines(transport.clone(), CLOUD);

        let err = local
            .generate(&GenerationRequest::new("x", "1:1", 0.5), CallOptions::fallback_disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transport { status: 500, .. }));
        assert_eq!(transport.posts_to(CLOUD), 0);
        assert_eq!(transport.health_probes_to(CLOUD), 0);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_cloud_once() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on_post(LOCAL, "/refine", Scripted::Fail(503, "busy".into()))
                .on_post(CLOUD, "/refine", Scripted::Images(vec!["cloud".into()])),
        );
        let local = engines(transport.clone(), CLOUD);
        let request = RefineRequest::new(vec!["data:image/png;base64,QUJD".into()], "warmer");

        let rendered = local.refine(&request, CallOptions::fallback_enabled()).await.unwrap();
        assert_eq!(rendered.images, vec!["cloud"]);
        assert_eq!(rendered.engine, "cloud");
        assert_eq!(transport.posts_to(LOCAL), 1);
        assert_eq!(transport.posts_to(CLOUD), 1);

        let local_payload = transport.last_payload(LOCAL, "/refine").unwrap();
        assert_eq!(local_payload["baseImages"], json!(["QUJD"]));
        assert_eq!(local_payload["prompt"], "warmer");
    }

    #[tokio::test]
    async fn test_cloud_error_is_returned_after_fallback() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on_post(LOCAL, "/generate", Scripted::Fail(500, "local down".into()))
                .on_post(CLOUD, "/generate", Scripted::Fail(502, "cloud down".into())),
        );
        let local = engines(transport.clone(), CLOUD);
        let err = local
            .generate(&GenerationRequest::new("x", "1:1", 0.5), CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transport { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_unconfigured_cloud_is_not_a_fallback() {
        let transport = Arc::new(
            ScriptedTransport::new().on_post(LOCAL, "/generate", Scripted::Fail(500, "boom".into())),
        );
        let local = engines(transport.clone(), "");
        assert!(!local.has_fallback());
        let err = local
            .generate(&GenerationRequest::new("x", "1:1", 0.5), CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transport { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_health_times_out_instead_of_hanging() {
        let transport = Arc::new(ScriptedTransport::new().on_health(
            LOCAL,
            Duration::from_secs(5),
            Some(json!({"device": "cuda"})),
        ));
        let local = LocalEngine::new(LOCAL, transport, Duration::from_millis(50));

        let started = std::time::Instant::now();
        let snapshot = local.health().await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(snapshot, HealthSnapshot::timeout());
    }

    #[tokio::test]
    async fn test_health_never_throws() {
        let transport = Arc::new(ScriptedTransport::new().on_health(LOCAL, Duration::ZERO, None));
        let local = LocalEngine::new(LOCAL, transport, Duration::from_millis(50));
        let snapshot = local.health().await;
        assert!(!snapshot.ok);
        assert!(snapshot.error.unwrap().contains("503"));

        let healthy = Arc::new(ScriptedTransport::new().on_health(LOCAL, Duration::ZERO, Some(json!({"device": "cpu"}))));
        let snapshot = LocalEngine::new(LOCAL, healthy, Duration::from_millis(50)).health().await;
        assert!(snapshot.ok);
        assert!(snapshot.is_cpu_only());
    }
}
