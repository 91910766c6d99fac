pub mod config;
pub mod engine;
pub mod error;
pub mod logger;
pub mod models;
pub mod server;
pub mod session;

pub use config::{EngineSettings, RunnerConfig, ServerConfig};
pub use engine::{
    CloudEngine, DiffusionRunner, EngineRouter, HealthBoard, HttpTransport, ImageEngine, LocalEngine, Rendered,
    RouteDecision, RouteOutcome, Transport,
};
pub use error::{EngineError, FieldIssue, Result, RunnerErrorKind};
pub use models::*;
pub use session::{AppState, MoodboardSession};
