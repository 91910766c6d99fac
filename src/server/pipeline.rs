use super::provider::{ImageProvider, TextToImageParams, GENERATION_FAILED};
use crate::{
    config::ServerConfig,
    error::{EngineError, Result},
    models::{DataUri, GenerationMeta, GenerationResult, ImageToImageJob, TextToImageJob},
};
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Instant;

/// Images produced per text-to-image request.
pub const TEXT_TO_IMAGE_BATCH: usize = 2;

const MIN_GUIDANCE_SCALE: f32 = 1.0;
const MAX_GUIDANCE_SCALE: f32 = 20.0;

/// Output size for a ratio; `Auto` and unknown ratios leave it to the model.
pub fn dimensions_for(aspect_ratio: &str) -> Option<(u32, u32)> {
    match aspect_ratio {
        "1:1" => Some((1024, 1024)),
        "16:9" => Some((1152, 648)),
        "9:16" => Some((648, 1152)),
        "3:2" => Some((1152, 768)),
        "2:3" => Some((768, 1152)),
        "4:5" => Some((1024, 1280)),
        "5:4" => Some((1280, 1024)),
        _ => None,
    }
}

pub fn temperature_to_guidance_scale(temperature: f32) -> f32 {
    let normalized = temperature.clamp(0.0, 2.0) / 2.0;
    MIN_GUIDANCE_SCALE + normalized * (MAX_GUIDANCE_SCALE - MIN_GUIDANCE_SCALE)
}

/// Provider failures already carry the right HTTP category; anything else is a model failure.
fn invocation_error(error: EngineError) -> EngineError {
    match error {
        EngineError::ModelInvocation { .. } | EngineError::UpstreamUnavailable(_) => error,
        other => {
            log::error!("Pipeline invocation failed: {}", other);
            EngineError::ModelInvocation {
                message: GENERATION_FAILED.to_string(),
                details: Some(other.to_string()),
            }
        }
    }
}

#[derive(Clone)]
pub struct GenerationPipeline {
    provider: Arc<dyn ImageProvider>,
    config: ServerConfig,
}

impl GenerationPipeline {
    pub fn new(provider: Arc<dyn ImageProvider>, config: ServerConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn run_text_to_image(&self, job: &TextToImageJob) -> Result<GenerationResult> {
        let dimensions = dimensions_for(&job.aspect_ratio);
        let params = TextToImageParams {
            guidance_scale: temperature_to_guidance_scale(job.temperature),
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
        };
        let model = self.config.text_to_image_model.as_str();

        let started = Instant::now();
        let calls = (0..TEXT_TO_IMAGE_BATCH).map(|index| {
            let provider = self.provider.clone();
            let prompt = job.prompt.as_str();
            async move {
                log::debug!("Invoking text-to-image pipeline {} for '{}'", index, prompt);
                let bytes = provider
                    .text_to_image(model, prompt, params)
                    .await
                    .map_err(invocation_error)?;
                Ok::<_, EngineError>(DataUri::from_bytes(&bytes, "image/png").to_string())
            }
        });
        let images = try_join_all(calls).await?;

        Ok(GenerationResult {
            images,
            meta: GenerationMeta {
                model: model.to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
                strength: None,
            },
        })
    }

    pub async fn run_image_to_image(&self, job: &ImageToImageJob) -> Result<GenerationResult> {
        let model = self.config.image_to_image_model.as_str();
        let strength = self.config.image_to_image_strength;

        let started = Instant::now();
        let calls = job.images.iter().enumerate().map(|(index, data_url)| {
            let provider = self.provider.clone();
            let prompt = job.prompt.as_str();
            async move {
                let source = DataUri::parse(data_url)
                    .and_then(|uri| uri.decode())
                    .map_err(|e| EngineError::ModelInvocation {
                        message: format!("Image at index {} is not a valid data URL", index),
                        details: Some(e.to_string()),
                    })?;

                log::debug!("Invoking image-to-image pipeline {} for '{}'", index, prompt);
                let bytes = provider
                    .image_to_image(model, prompt, &source, strength)
                    .await
                    .map_err(invocation_error)?;
                Ok::<_, EngineError>(DataUri::from_bytes(&bytes, "image/png").to_string())
            }
        });
        let images = try_join_all(calls).await?;

        Ok(GenerationResult {
            images,
            meta: GenerationMeta {
                model: model.to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
                strength: Some(strength),
            },
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::EchoProvider;
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    fn pipeline(provider: Arc<EchoProvider>) -> GenerationPipeline {
        GenerationPipeline::new(provider, ServerConfig::new().with_models("text/model", "img/model"))
    }

    fn decoded(uri: &str) -> String {
        let bytes = DataUri::parse(uri).unwrap().decode().unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_guidance_scale_bounds() {
        assert_eq!(temperature_to_guidance_scale(0.0), 1.0);
        assert_eq!(temperature_to_guidance_scale(1.0), 10.5);
        assert_eq!(temperature_to_guidance_scale(2.0), 20.0);
        assert_eq!(temperature_to_guidance_scale(9.0), 20.0);
        assert_eq!(temperature_to_guidance_scale(-1.0), 1.0);
    }

    #[test]
    fn test_dimension_table() {
        assert_eq!(dimensions_for("16:9"), Some((1152, 648)));
        assert_eq!(dimensions_for("4:5"), Some((1024, 1280)));
        assert_eq!(dimensions_for("Auto"), None);
    }

    #[tokio::test]
    async fn test_text_to_image_returns_two_png_data_urls() {
        let provider = Arc::new(EchoProvider::default());
        let result = pipeline(provider.clone())
            .run_text_to_image(&TextToImageJob {
                prompt: "glass city".into(),
                aspect_ratio: "1:1".into(),
                temperature: 1.0,
            })
            .await
            .unwrap();

        assert_eq!(result.images.len(), 2);
        assert!(result.images.iter().all(|i| i.starts_with("data:image/png;base64,")));
        assert_eq!(decoded(&result.images[0]), "glass city|10.5|Some(1024)");
        assert_eq!(result.meta.model, "text/model");
        assert_eq!(result.meta.strength, None);
        assert_eq!(provider.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_image_to_image_preserves_order() {
        let provider = Arc::new(EchoProvider::default());
        let first = format!("data:image/png;base64,{}", STANDARD.encode("first"));
        let second = format!("data:image/jpeg;base64,{}", STANDARD.encode("second"));
        let result = pipeline(provider)
            .run_image_to_image(&ImageToImageJob {
                images: vec![first, second],
                prompt: "warmer".into(),
            })
            .await
            .unwrap();

        assert_eq!(decoded(&result.images[0]), "first|0.6");
        assert_eq!(decoded(&result.images[1]), "second|0.6");
        assert_eq!(result.meta.strength, Some(0.6));
        assert_eq!(result.meta.model, "img/model");
    }

    #[tokio::test]
    async fn test_invalid_data_url_names_its_index() {
        let provider = Arc::new(EchoProvider::default());
        let good = format!("data:image/png;base64,{}", STANDARD.encode("ok"));
        let error = pipeline(provider)
            .run_image_to_image(&ImageToImageJob {
                images: vec![good, "data:image/gif;base64,AAAA".into()],
                prompt: "x".into(),
            })
            .await
            .unwrap_err();

        assert_eq!(error.status_code(), 502);
        assert_eq!(error.to_string(), "Image at index 1 is not a valid data URL");
    }

    #[tokio::test]
    async fn test_busy_provider_surfaces_unavailable() {
        let provider = Arc::new(EchoProvider::failing(503));
        let error = pipeline(provider)
            .run_text_to_image(&TextToImageJob {
                prompt: "x".into(),
                aspect_ratio: "Auto".into(),
                temperature: 0.8,
            })
            .await
            .unwrap_err();
        assert_eq!(error.code(), "UPSTREAM_UNAVAILABLE");
    }
}
