//! In-memory transport used by the engine, router and session tests.

use super::transport::Transport;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub const LOCAL: &str = "http://local.test";
pub const CLOUD: &str = "http://cloud.test";

#[derive(Debug, Clone)]
pub enum Scripted {
    Images(Vec<String>),
    Fail(u16, String),
}

impl Scripted {
    fn produce(&self) -> Result<Vec<String>> {
        match self {
            Scripted::Images(images) => Ok(images.clone()),
            Scripted::Fail(status, body) => Err(EngineError::Transport {
                status: *status,
                body: body.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub base_url: String,
    pub path: String,
    pub payload: Value,
}

#[derive(Default)]
pub struct ScriptedTransport {
    calls: Mutex<Vec<RecordedCall>>,
    posts: Mutex<HashMap<String, Scripted>>,
    health: Mutex<HashMap<String, (Duration, Option<Value>)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_post(self, base_url: &str, path: &str, outcome: Scripted) -> Self {
        self.posts
            .lock()
            .unwrap()
            .insert(format!("{}{}", base_url, path), outcome);
        self
    }

    /// `None` makes the probe fail with a 503.
    pub fn on_health(self, base_url: &str, delay: Duration, body: Option<Value>) -> Self {
        self.health
            .lock()
            .unwrap()
            .insert(base_url.to_string(), (delay, body));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn posts_to(&self, base_url: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.base_url == base_url && c.path != "/health")
            .count()
    }

    pub fn health_probes_to(&self, base_url: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.base_url == base_url && c.path == "/health")
            .count()
    }

    pub fn last_payload(&self, base_url: &str, path: &str) -> Option<Value> {
        self.calls()
            .into_iter()
            .rev()
            .find(|c| c.base_url == base_url && c.path == path)
            .map(|c| c.payload)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post(&self, base_url: &str, path: &str, payload: &Value) -> Result<Vec<String>> {
        self.calls.lock().unwrap().push(RecordedCall {
            base_url: base_url.to_string(),
            path: path.to_string(),
            payload: payload.clone(),
        });
        let scripted = self
            .posts
            .lock()
            .unwrap()
            .get(&format!("{}{}", base_url, path))
            .cloned();
        match scripted {
            Some(outcome) => outcome.produce(),
            None => Err(EngineError::Request(format!("connection refused: {}{}", base_url, path))),
        }
    }

    async fn get_json(&self, base_url: &str, path: &str) -> Result<Value> {
        self.calls.lock().unwrap().push(RecordedCall {
            base_url: base_url.to_string(),
            path: path.to_string(),
            payload: Value::Null,
        });
        let scripted = self.health.lock().unwrap().get(base_url).cloned();
        match scripted {
            Some((delay, body)) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                body.ok_or(EngineError::Transport {
                    status: 503,
                    body: "unavailable".into(),
                })
            }
            None => Err(EngineError::Request(format!("connection refused: {}{}", base_url, path))),
        }
    }
}
