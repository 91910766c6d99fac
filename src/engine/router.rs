//! Engine selection for generate/refine calls.
//!
//! `LOCAL` and `CLOUD` pin a single engine. `AUTO` consults the last published
//! health snapshots (never a fresh probe) and prefers the cloud engine when the
//! local one looks unable to serve the request well. A call makes at most two
//! attempts: the chosen engine, then one fallback.

use super::{
    cloud::{CloudEngine, GpuCache, SystemClock},
    local::LocalEngine,
    transport::HttpTransport,
    ImageEngine, Rendered,
};
use crate::{
    config::EngineSettings,
    error::Result,
    models::{CallOptions, EngineMode, GenerationRequest, HealthSnapshot, RefineRequest},
};
use std::sync::Arc;
use tokio::sync::RwLock;

pub const HIGH_DEMAND_ASPECT_RATIOS: [&str; 3] = ["16:9", "9:16", "21:9"];
pub const HIGH_TEMPERATURE: f32 = 1.5;

/// Request properties the AUTO heuristic may look at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteHints {
    pub aspect_ratio: Option<String>,
    pub temperature: Option<f32>,
}

impl RouteHints {
    pub fn generate(aspect_ratio: impl Into<String>, temperature: f32) -> Self {
        Self {
            aspect_ratio: Some(aspect_ratio.into()),
            temperature: Some(temperature),
        }
    }

    /// Refinements carry no aspect ratio or temperature; only health matters.
    pub fn refine() -> Self {
        Self::default()
    }
}

/// Why AUTO would pick the cloud engine, if it would.
pub fn cloud_preference_reason(
    local: Option<&HealthSnapshot>,
    cloud: Option<&HealthSnapshot>,
    hints: &RouteHints,
) -> Option<&'static str> {
    let cloud_online = cloud.map(|c| c.ok).unwrap_or(false);
    if !cloud_online {
        return None;
    }

    let local_ok = local.map(|l| l.ok).unwrap_or(false);
    if !local_ok {
        return Some("local engine unavailable");
    }

    let local_cpu_only = local.map(HealthSnapshot::is_cpu_only).unwrap_or(false);
    let high_temperature = hints.temperature.map(|t| t >= HIGH_TEMPERATURE).unwrap_or(false);
    if high_temperature && local_cpu_only {
        return Some("high temperature on CPU-only local engine");
    }
    if local_cpu_only {
        return Some("local engine is CPU-only");
    }

    let high_demand = hints
        .aspect_ratio
        .as_deref()
        .map(|ratio| HIGH_DEMAND_ASPECT_RATIOS.contains(&ratio.trim()))
        .unwrap_or(false);
    if high_demand {
        return Some("high-demand aspect ratio");
    }

    None
}

pub fn prefer_cloud_auto(
    local: Option<&HealthSnapshot>,
    cloud: Option<&HealthSnapshot>,
    hints: &RouteHints,
) -> bool {
    cloud_preference_reason(local, cloud, hints).is_some()
}

/// The latest health snapshots. `None` means never probed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthBoard {
    pub local: Option<HealthSnapshot>,
    pub cloud: Option<HealthSnapshot>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub mode: EngineMode,
    /// Engine that produced the images.
    pub engine: String,
    pub reason: Option<&'static str>,
    /// Set when the images came from an engine other than the one tried first.
    pub fell_back: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteOutcome {
    pub images: Vec<String>,
    pub decision: RouteDecision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    /// Local only, its built-in fallback disabled.
    LocalPinned,
    CloudPinned,
    /// Local first; the local engine falls back to cloud by itself.
    LocalAuto,
    /// Cloud first, then local with its own fallback disabled.
    CloudAuto,
}

enum Operation<'a> {
    Generate(&'a GenerationRequest),
    Refine(&'a RefineRequest),
}

impl Operation<'_> {
    fn label(&self) -> &'static str {
        match self {
            Operation::Generate(_) => "generate",
            Operation::Refine(_) => "refine",
        }
    }

    fn hints(&self) -> RouteHints {
        match self {
            Operation::Generate(request) => RouteHints::generate(request.aspect_ratio.clone(), request.temperature),
            Operation::Refine(_) => RouteHints::refine(),
        }
    }

    async fn run(&self, engine: &dyn ImageEngine, options: CallOptions) -> Result<Rendered> {
        match self {
            Operation::Generate(request) => engine.generate(request, options).await,
            Operation::Refine(request) => engine.refine(request, options).await,
        }
    }
}

pub struct EngineRouter {
    local: Arc<dyn ImageEngine>,
    cloud: Arc<dyn ImageEngine>,
    health: RwLock<HealthBoard>,
}

impl EngineRouter {
    pub fn new(local: Arc<dyn ImageEngine>, cloud: Arc<dyn ImageEngine>) -> Self {
        Self {
            local,
            cloud,
            health: RwLock::new(HealthBoard::default()),
        }
    }

    /// HTTP-backed local and cloud engines; the local one falls back to cloud
    /// when a cloud URL is configured.
    pub fn from_settings(settings: &EngineSettings) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(settings.request_timeout)?);
        let cloud = CloudEngine::new(
            settings.cloud_url.clone(),
            transport.clone(),
            settings.health_timeout,
            GpuCache::new(settings.gpu_cache_ttl, Arc::new(SystemClock)),
        );
        let local = LocalEngine::new(settings.local_url.clone(), transport, settings.health_timeout)
            .with_fallback(cloud.clone());

        if !settings.cloud_configured() {
            log::warn!("CLOUD_ENGINE_URL is not set; cloud engine and fallback are disabled");
        }

        Ok(Self::new(Arc::new(local), Arc::new(cloud)))
    }

    /// `from_settings` followed by the startup health refresh, so the first
    /// AUTO call already sees real snapshots.
    pub async fn connect(settings: &EngineSettings) -> Result<Self> {
        let router = Self::from_settings(settings)?;
        router.refresh_health().await;
        Ok(router)
    }

    pub async fn health_board(&self) -> HealthBoard {
        self.health.read().await.clone()
    }

    pub async fn publish_health(&self, board: HealthBoard) {
        *self.health.write().await = board;
    }

    /// Probes both engines concurrently and publishes both snapshots together.
    pub async fn refresh_health(&self) -> HealthBoard {
        let (local, cloud) = futures::join!(self.local.health(), self.cloud.health());
        log::info!(
            "Engine health: local={} cloud={}",
            local.status_label(),
            cloud.status_label()
        );
        let board = HealthBoard {
            local: Some(local),
            cloud: Some(cloud),
        };
        self.publish_health(board.clone()).await;
        board
    }

    pub async fn generate(&self, mode: EngineMode, request: &GenerationRequest) -> Result<RouteOutcome> {
        self.execute(mode, Operation::Generate(request)).await
    }

    pub async fn refine(&self, mode: EngineMode, request: &RefineRequest) -> Result<RouteOutcome> {
        self.execute(mode, Operation::Refine(request)).await
    }

    async fn plan(&self, mode: EngineMode, hints: &RouteHints) -> (Plan, Option<&'static str>) {
        match mode {
            EngineMode::Local => (Plan::LocalPinned, None),
            EngineMode::Cloud => (Plan::CloudPinned, None),
            EngineMode::Auto => {
                let board = self.health.read().await;
                match cloud_preference_reason(board.local.as_ref(), board.cloud.as_ref(), hints) {
                    Some(reason) => (Plan::CloudAuto, Some(reason)),
                    None => (Plan::LocalAuto, None),
                }
            }
        }
    }

    async fn execute(&self, mode: EngineMode, op: Operation<'_>) -> Result<RouteOutcome> {
        let (plan, reason) = self.plan(mode, &op.hints()).await;
        let primary = match plan {
            Plan::LocalPinned | Plan::LocalAuto => &self.local,
            Plan::CloudPinned | Plan::CloudAuto => &self.cloud,
        };
        log::info!(
            "Routing {} in {} mode to {} engine{}",
            op.label(),
            mode,
            primary.name(),
            reason.map(|r| format!(" ({})", r)).unwrap_or_default()
        );

        let options = match plan {
            Plan::LocalPinned => CallOptions::fallback_disabled(),
            _ => CallOptions::fallback_enabled(),
        };

        let rendered = match op.run(primary.as_ref(), options).await {
            Ok(rendered) => rendered,
            Err(e) if plan == Plan::CloudAuto && e.allows_fallback() => {
                log::warn!("Cloud {} failed ({}), falling back to local engine", op.label(), e);
                op.run(self.local.as_ref(), CallOptions::fallback_disabled()).await?
            }
            Err(e) => {
                log::error!("{} via {} engine failed: {}", op.label(), primary.name(), e);
                return Err(e);
            }
        };

        let fell_back = rendered.engine != primary.name();
        if fell_back {
            log::info!("{} served by {} engine after fallback", op.label(), rendered.engine);
        }
        Ok(RouteOutcome {
            images: rendered.images,
            decision: RouteDecision {
                mode,
                engine: rendered.engine,
                reason,
                fell_back,
            },
        })
    }
}
