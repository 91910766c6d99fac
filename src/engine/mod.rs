pub mod cloud;
pub mod local;
pub mod router;
pub mod runner;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

use crate::{
    error::Result,
    models::{CallOptions, GenerationRequest, HealthSnapshot, RefineRequest},
};
use async_trait::async_trait;
use std::time::Duration;

pub use cloud::{Clock, CloudEngine, GpuCache, SystemClock};
pub use local::LocalEngine;
pub use router::{prefer_cloud_auto, EngineRouter, HealthBoard, RouteDecision, RouteHints, RouteOutcome};
pub use runner::DiffusionRunner;
pub use transport::{HttpTransport, Transport};

/// Images plus the name of the engine that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub images: Vec<String>,
    pub engine: String,
}

impl Rendered {
    pub fn new(engine: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            images,
            engine: engine.into(),
        }
    }
}

/// A generate/refine capability, whichever provider backs it.
#[async_trait]
pub trait ImageEngine: Send + Sync {
    fn name(&self) -> &str;

    /// An engine with a built-in fallback reports the engine that served the call.
    async fn generate(&self, request: &GenerationRequest, options: CallOptions) -> Result<Rendered>;

    async fn refine(&self, request: &RefineRequest, options: CallOptions) -> Result<Rendered>;

    /// Never fails; problems are reported inside the snapshot.
    async fn health(&self) -> HealthSnapshot;
}

pub(crate) async fn probe_health(
    transport: &dyn Transport,
    base_url: &str,
    timeout: Duration,
) -> HealthSnapshot {
    match tokio::time::timeout(timeout, transport.get_json(base_url, "/health")).await {
        Ok(Ok(data)) => HealthSnapshot::online(data),
        Ok(Err(e)) => HealthSnapshot::unavailable(e.to_string()),
        Err(_) => HealthSnapshot::timeout(),
    }
}
