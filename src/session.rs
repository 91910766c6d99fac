//! Headless moodboard session: the state machine a UI drives.

use crate::{
    engine::{EngineRouter, HealthBoard, RouteDecision},
    models::{EngineConfig, EngineMode, GeneratedImage, GenerationRequest, RefineRequest},
};
use std::sync::Arc;

pub const GENERATE_FAILED: &str = "Failed to generate images. Please try again.";
pub const REFINE_FAILED: &str = "Failed to refine images. Please try again.";
pub const REFINE_NEEDS_SELECTION: &str =
    "Please select at least one image and provide a refinement prompt.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Initial,
    Generating,
    Results,
    Refining,
    Gallery,
}

pub struct MoodboardSession {
    router: Arc<EngineRouter>,
    mode: EngineMode,
    config: EngineConfig,
    state: AppState,
    images: Vec<GeneratedImage>,
    selected: Vec<String>,
    galleries: Vec<Vec<GeneratedImage>>,
    error: Option<String>,
    last_decision: Option<RouteDecision>,
}

impl MoodboardSession {
    pub fn new(router: Arc<EngineRouter>) -> Self {
        Self {
            router,
            mode: EngineMode::default(),
            config: EngineConfig::default(),
            state: AppState::Initial,
            images: Vec::new(),
            selected: Vec::new(),
            galleries: Vec::new(),
            error: None,
            last_decision: None,
        }
    }

    /// A fresh session that probes both engines once before the first call.
    pub async fn start(router: Arc<EngineRouter>) -> Self {
        router.refresh_health().await;
        Self::new(router)
    }

    pub fn with_mode(mut self, mode: EngineMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn set_mode(&mut self, mode: EngineMode) {
        self.mode = mode;
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn state(&self) -> AppState {
        self.state
    }

    pub fn images(&self) -> &[GeneratedImage] {
        &self.images
    }

    pub fn galleries(&self) -> &[Vec<GeneratedImage>] {
        &self.galleries
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn last_decision(&self) -> Option<&RouteDecision> {
        self.last_decision.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, AppState::Generating | AppState::Refining)
    }

    pub async fn refresh_health(&self) -> HealthBoard {
        self.router.refresh_health().await
    }

    pub async fn generate(&mut self, prompt: &str, aspect_ratio: &str, temperature: f32) {
        if prompt.trim().is_empty() || self.is_loading() {
            return;
        }
        self.state = AppState::Generating;
        self.error = None;
        self.selected.clear();

        let request = GenerationRequest::new(prompt, aspect_ratio, temperature).with_config(self.config.clone());
        match self.router.generate(self.mode, &request).await {
            Ok(outcome) => {
                self.images = GeneratedImage::batch("img", &outcome.images);
                self.last_decision = Some(outcome.decision);
                self.state = AppState::Results;
            }
            Err(e) => {
                log::error!("Generation failed: {}", e);
                self.error = Some(GENERATE_FAILED.to_string());
                self.state = AppState::Initial;
            }
        }
    }

    pub async fn refine(&mut self, prompt: &str) {
        if self.is_loading() {
            return;
        }
        let base_images: Vec<String> = self.selected_images().into_iter().map(|i| i.src.clone()).collect();
        if base_images.is_empty() || prompt.trim().is_empty() {
            self.error = Some(REFINE_NEEDS_SELECTION.to_string());
            return;
        }

        self.state = AppState::Refining;
        self.error = None;

        let request = RefineRequest::new(base_images, prompt).with_config(self.config.clone());
        match self.router.refine(self.mode, &request).await {
            Ok(outcome) => {
                self.images = GeneratedImage::batch("img-refined", &outcome.images);
                self.selected.clear();
                self.last_decision = Some(outcome.decision);
                self.state = AppState::Results;
            }
            Err(e) => {
                log::error!("Refinement failed: {}", e);
                self.error = Some(REFINE_FAILED.to_string());
                self.state = AppState::Results;
            }
        }
    }

    pub fn toggle_selection(&mut self, id: &str) {
        if let Some(pos) = self.selected.iter().position(|s| s == id) {
            self.selected.remove(pos);
        } else if self.images.iter().any(|i| i.id == id) {
            self.selected.push(id.to_string());
        }
    }

    /// Selected images in display order.
    pub fn selected_images(&self) -> Vec<&GeneratedImage> {
        self.images
            .iter()
            .filter(|image| self.selected.contains(&image.id))
            .collect()
    }

    pub fn reset(&mut self) {
        self.state = AppState::Initial;
        self.images.clear();
        self.selected.clear();
        self.error = None;
    }

    pub fn save_to_gallery(&mut self) {
        if self.images.is_empty() {
            return;
        }
        self.galleries.push(std::mem::take(&mut self.images));
        self.selected.clear();
        self.state = AppState::Gallery;
    }

    /// File names for downloading the current selection.
    pub fn download_names(&self) -> Vec<(String, &GeneratedImage)> {
        let stamp = chrono::Utc::now().timestamp_millis();
        self.selected_images()
            .into_iter()
            .enumerate()
            .map(|(index, image)| (format!("aura-reflect-{}-{}.png", stamp, index), image))
            .collect()
    }
}
