use crate::error::{EngineError, Result};
use std::env;
use std::time::Duration;

pub const DEFAULT_LOCAL_ENGINE_URL: &str = "http://localhost:8000";
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_millis(1500);
pub const DEFAULT_GPU_CACHE_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

fn trim_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn parse_positive(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| EngineError::Config(format!("{name} must be a positive integer, got {raw}")))
}

/// `None` when the variable is unset; an error when it is set but unusable.
fn positive_env(name: &str) -> Result<Option<u64>> {
    env::var(name).ok().map(|raw| parse_positive(name, &raw)).transpose()
}

/// Where the local and cloud engine servers live and how long to wait on them.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub local_url: String,
    /// Empty means "not configured".
    pub cloud_url: String,
    pub health_timeout: Duration,
    pub gpu_cache_ttl: Duration,
    pub request_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            local_url: DEFAULT_LOCAL_ENGINE_URL.to_string(),
            cloud_url: String::new(),
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            gpu_cache_ttl: DEFAULT_GPU_CACHE_TTL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl EngineSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let local_url = env::var("LOCAL_ENGINE_URL")
            .map(|url| trim_base_url(&url))
            .unwrap_or(defaults.local_url);
        let cloud_url = env::var("CLOUD_ENGINE_URL")
            .map(|url| trim_base_url(&url))
            .unwrap_or_default();
        let health_timeout = positive_env("HEALTH_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.health_timeout);
        let gpu_cache_ttl = positive_env("GPU_CACHE_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.gpu_cache_ttl);
        let request_timeout = positive_env("REQUEST_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        Ok(EngineSettings {
            local_url,
            cloud_url,
            health_timeout,
            gpu_cache_ttl,
            request_timeout,
        })
    }

    pub fn with_local_url(mut self, url: impl AsRef<str>) -> Self {
        self.local_url = trim_base_url(url.as_ref());
        self
    }

    pub fn with_cloud_url(mut self, url: impl AsRef<str>) -> Self {
        self.cloud_url = trim_base_url(url.as_ref());
        self
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn with_gpu_cache_ttl(mut self, ttl: Duration) -> Self {
        self.gpu_cache_ttl = ttl;
        self
    }

    pub fn cloud_configured(&self) -> bool {
        !self.cloud_url.is_empty()
    }
}

/// Settings for the spawned diffusion runner script.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub python: String,
    pub script_path: String,
    pub text_model: String,
    pub img2img_model: String,
    pub precision: String,
    pub device: String,
    pub scheduler: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            python: "python3".to_string(),
            script_path: "scripts/diffusion_runner.py".to_string(),
            text_model: "stabilityai/stable-diffusion-xl-base-1.0".to_string(),
            img2img_model: "stabilityai/stable-diffusion-xl-base-1.0".to_string(),
            precision: "auto".to_string(),
            device: "auto".to_string(),
            scheduler: None,
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        let python = env::var("DIFFUSION_PYTHON_PATH")
            .or_else(|_| env::var("PYTHON"))
            .unwrap_or(defaults.python);
        let script_path = env::var("DIFFUSION_RUNNER_PATH").unwrap_or(defaults.script_path);
        let text_model = env::var("SD_MODEL_ID").unwrap_or(defaults.text_model);
        let img2img_model = env::var("SD_IMG2IMG_MODEL_ID").unwrap_or_else(|_| text_model.clone());

        RunnerConfig {
            python,
            script_path,
            text_model,
            img2img_model,
            precision: env::var("SD_PRECISION").unwrap_or(defaults.precision),
            device: env::var("SD_DEVICE").unwrap_or(defaults.device),
            scheduler: env::var("SD_SCHEDULER").ok().filter(|s| !s.trim().is_empty()),
        }
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    pub fn with_script(mut self, path: impl Into<String>) -> Self {
        self.script_path = path.into();
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }
}

/// Settings for the Hugging Face glue service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub hf_token: Option<String>,
    pub text_to_image_model: String,
    pub image_to_image_model: String,
    pub image_to_image_strength: f32,
    pub allowed_origins: Vec<String>,
    pub body_limit_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 3000,
            hf_token: None,
            text_to_image_model: "stabilityai/stable-diffusion-2-1".to_string(),
            image_to_image_model: "stabilityai/stable-diffusion-2-1".to_string(),
            image_to_image_strength: 0.6,
            allowed_origins: Vec::new(),
            body_limit_mb: 15,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let port = match env::var("PORT") {
            Ok(raw) => raw
                .trim()
                .parse::<u16>()
                .ok()
                .filter(|port| *port > 0)
                .ok_or_else(|| EngineError::Config(format!("PORT must be a positive integer, got {raw}")))?,
            Err(_) => defaults.port,
        };

        let hf_token = env::var("HF_API_TOKEN").ok().filter(|t| !t.is_empty());
        let text_model = env::var("TEXT2IMG_MODEL").ok().filter(|m| !m.is_empty());
        let img_model = env::var("IMG2IMG_MODEL").ok().filter(|m| !m.is_empty());

        let image_to_image_strength = match env::var("IMG2IMG_STRENGTH") {
            Ok(raw) => raw
                .trim()
                .parse::<f32>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| EngineError::Config("IMG2IMG_STRENGTH must be a number".into()))?,
            Err(_) => defaults.image_to_image_strength,
        };

        let body_limit_mb = match env::var("BODY_LIMIT_MB") {
            Ok(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| {
                    EngineError::Config("BODY_LIMIT_MB must be a positive integer".into())
                })?,
            Err(_) => defaults.body_limit_mb,
        };

        let text_to_image_model = text_model.clone().unwrap_or(defaults.text_to_image_model);
        let image_to_image_model = img_model
            .or(text_model)
            .unwrap_or(defaults.image_to_image_model);

        Ok(ServerConfig {
            port,
            hf_token,
            text_to_image_model,
            image_to_image_model,
            image_to_image_strength,
            allowed_origins: parse_origins(env::var("ALLOWED_ORIGINS").ok().as_deref()),
            body_limit_mb,
        })
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    pub fn with_models(mut self, text: impl Into<String>, image: impl Into<String>) -> Self {
        self.text_to_image_model = text.into();
        self.image_to_image_model = image.into();
        self
    }

    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_mb.saturating_mul(1024 * 1024)
    }

    /// No configured origins means every origin is accepted.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(_) if self.allowed_origins.is_empty() => true,
            Some(origin) => self.allowed_origins.iter().any(|o| o == origin),
        }
    }
}

pub fn parse_origins(raw: Option<&str>) -> Vec<String> {
    raw.map(|origins| {
        origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}
