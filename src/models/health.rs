use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Loosely-typed diagnostics returned by an engine's `/health` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceInfo(pub Map<String, Value>);

impl DeviceInfo {
    /// Non-object payloads are wrapped under a `value` key.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => DeviceInfo(map),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                DeviceInfo(map)
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn device(&self) -> Option<&str> {
        self.0.get("device").and_then(Value::as_str)
    }

    pub fn model(&self) -> Option<&str> {
        self.0
            .get("model")
            .and_then(Value::as_str)
            .or_else(|| self.0.get("diagnostics")?.get("model_id")?.as_str())
    }

    pub fn scheduler(&self) -> Option<&str> {
        self.0
            .get("optimizations")
            .and_then(|o| o.get("scheduler"))
            .and_then(Value::as_str)
            .or_else(|| self.0.get("diagnostics")?.get("scheduler")?.as_str())
    }

    pub fn is_cpu_only(&self) -> bool {
        self.device()
            .map(|d| d.trim().eq_ignore_ascii_case("cpu"))
            .unwrap_or(false)
    }

    pub fn has_gpu(&self) -> bool {
        self.device()
            .map(|d| {
                let d = d.to_ascii_lowercase();
                d.contains("cuda") || d.contains("mps")
            })
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<DeviceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthSnapshot {
    pub fn online(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(DeviceInfo::from_value(data)),
            error: None,
        }
    }

    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn timeout() -> Self {
        Self::unavailable("timeout")
    }

    pub fn device(&self) -> Option<&str> {
        self.data.as_ref().and_then(DeviceInfo::device)
    }

    pub fn is_cpu_only(&self) -> bool {
        self.data.as_ref().map(DeviceInfo::is_cpu_only).unwrap_or(false)
    }

    pub fn has_gpu(&self) -> bool {
        self.data.as_ref().map(DeviceInfo::has_gpu).unwrap_or(false)
    }

    pub fn status_label(&self) -> &'static str {
        if self.ok {
            "Online"
        } else {
            "Unavailable"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_device_classification() {
        let cpu = HealthSnapshot::online(json!({"device": "cpu", "model": "sd-2-1"}));
        assert!(cpu.is_cpu_only());
        assert!(!cpu.has_gpu());

        let cuda = HealthSnapshot::online(json!({"device": "cuda:0"}));
        assert!(cuda.has_gpu());
        assert!(!cuda.is_cpu_only());

        let mps = HealthSnapshot::online(json!({"device": "MPS"}));
        assert!(mps.has_gpu());

        let unknown = HealthSnapshot::online(json!({"status": "ok"}));
        assert!(!unknown.has_gpu());
        assert!(!unknown.is_cpu_only());
    }

    #[test]
    fn test_summary_accessors_fall_back_to_diagnostics() {
        let info = DeviceInfo::from_value(json!({
            "device": "cuda",
            "diagnostics": {"model_id": "sdxl", "scheduler": "euler"}
        }));
        assert_eq!(info.model(), Some("sdxl"));
        assert_eq!(info.scheduler(), Some("euler"));

        let wrapped = DeviceInfo::from_value(json!("fine"));
        assert_eq!(wrapped.get("value"), Some(&json!("fine")));
    }

    #[test]
    fn test_snapshot_serialization_skips_empty_fields() {
        let value = serde_json::to_value(HealthSnapshot::timeout()).unwrap();
        assert_eq!(value, json!({"ok": false, "error": "timeout"}));
    }
}
