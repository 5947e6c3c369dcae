use std::sync::Arc;
use tracing::info;
use image::{DynamicImage, GenericImageView};

use super::error::ApplicationError;
use super::orchestrator::{CancellationToken, Generation, GenerationContext};
use super::session::{GenerationSlot, Session};
use crate::config::{resolve_model, GenerationDefaults};
use crate::domain::artifact::Artifact;
use crate::domain::artifact_store_trait::ArtifactStore;
use crate::domain::error::DomainError;
use crate::domain::generation::GenerationRequest;
use crate::domain::image::{is_stride_aligned, MaskLayer};
use crate::domain::image_processor_trait::ImageProcessor;
use crate::domain::inference_engine_trait::InferenceEngine;

/// Fields a caller may override per generation; anything left out falls back to the defaults.
#[derive(Debug, Clone, Default)]
pub struct GenerationParams {
    pub prompt: Option<String>,
    pub model: Option<String>,
    pub guidance_scale: Option<f32>,
    pub steps: Option<u32>,
}

/// Image shown for masking after an upload or resize.
#[derive(Debug, Clone)]
pub struct ResizeOutcome {
    pub image: DynamicImage,
    /// Largest resize target that still makes sense for the working image.
    pub max_size: u32,
}

pub struct InpaintService {
    image_processor: Arc<dyn ImageProcessor + Send + Sync>,
    engine: Arc<dyn InferenceEngine + Send + Sync>,
    artifact_store: Arc<dyn ArtifactStore + Send + Sync>,
    session: Session,
    defaults: GenerationDefaults,
}

impl InpaintService {
    pub fn new(
        image_processor: Arc<dyn ImageProcessor + Send + Sync>,
        engine: Arc<dyn InferenceEngine + Send + Sync>,
        artifact_store: Arc<dyn ArtifactStore + Send + Sync>,
        session: Session,
        defaults: GenerationDefaults,
    ) -> Self {
        Self {
            image_processor,
            engine,
            artifact_store,
            session,
            defaults,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn defaults(&self) -> &GenerationDefaults {
        &self.defaults
    }

    pub fn upload(&self, image_bytes: &[u8]) -> Result<ResizeOutcome, ApplicationError> {
        let image = self.image_processor.decode(image_bytes)?;
        self.load_working_image(image)
    }

    /// Makes `image` the working image and derives the display image with the current resize target.
    pub fn load_working_image(&self, image: DynamicImage) -> Result<ResizeOutcome, ApplicationError> {
        let (width, height) = image.dimensions();
        info!("New working image {}x{}", width, height);
        self.session.set_working_image(image);
        self.resize(self.session.resize_target())
    }

    /// Re-derives the display image from the full-resolution working image.
    pub fn resize(&self, target_max_side: u32) -> Result<ResizeOutcome, ApplicationError> {
        let working = self
            .session
            .current_working_image()
            .ok_or(ApplicationError::NoWorkingImage)?;
        let quantized = self.image_processor.quantize(&working, target_max_side)?;

        let (width, height) = quantized.image.dimensions();
        info!("Resized to {}x{} (target {}, max {})", width, height, target_max_side, quantized.max_side);

        self.session.set_display_image(quantized.image.clone());
        self.session.set_resize_target(target_max_side);
        Ok(ResizeOutcome {
            image: quantized.image,
            max_size: quantized.max_side,
        })
    }

    pub fn decode_mask(&self, mask_bytes: &[u8]) -> Result<MaskLayer, ApplicationError> {
        Ok(MaskLayer::new(self.image_processor.decode(mask_bytes)?))
    }

    /// Starts a generation over the session's display image.
    pub fn generate(
        &self,
        params: GenerationParams,
        mask: &MaskLayer,
        cancel: CancellationToken,
    ) -> Result<Generation, ApplicationError> {
        let source = self
            .session
            .display_image()
            .ok_or(ApplicationError::NoWorkingImage)?;
        self.generate_from(source, params, mask, cancel)
    }

    /// Prepares the stencil and canvas for `source` and returns the not-yet-started generation.
    /// Fails with `GenerationInProgress` while another generation holds the session.
    pub fn generate_from(
        &self,
        source: DynamicImage,
        params: GenerationParams,
        mask: &MaskLayer,
        cancel: CancellationToken,
    ) -> Result<Generation, ApplicationError> {
        let slot = self.claim()?;
        self.prepare(slot, source, params, mask, cancel)
    }

    /// Generates over a freshly uploaded image. The upload only replaces the session's images
    /// once the mask and parameters have been accepted.
    pub fn upload_and_generate(
        &self,
        image_bytes: &[u8],
        params: GenerationParams,
        mask: &MaskLayer,
        cancel: CancellationToken,
    ) -> Result<Generation, ApplicationError> {
        let slot = self.claim()?;
        let image = self.image_processor.decode(image_bytes)?;
        let quantized = self.image_processor.quantize(&image, self.session.resize_target())?;
        let generation = self.prepare(slot, quantized.image.clone(), params, mask, cancel)?;

        let (width, height) = image.dimensions();
        info!("New working image {}x{}", width, height);
        self.session.set_working_image(image);
        self.session.set_display_image(quantized.image);
        Ok(generation)
    }

    fn claim(&self) -> Result<GenerationSlot, ApplicationError> {
        self.session
            .claim_generation()
            .ok_or(ApplicationError::GenerationInProgress)
    }

    fn prepare(
        &self,
        slot: GenerationSlot,
        source: DynamicImage,
        params: GenerationParams,
        mask: &MaskLayer,
        cancel: CancellationToken,
    ) -> Result<Generation, ApplicationError> {
        let model = params.model.unwrap_or_else(|| self.defaults.model.clone());
        let model_id = resolve_model(&model).ok_or(ApplicationError::UnknownModel(model))?;

        let guidance_scale = params.guidance_scale.unwrap_or(self.defaults.guidance_scale);
        if !(guidance_scale.is_finite() && guidance_scale > 0.0) {
            return Err(ApplicationError::InvalidRequest(format!(
                "guidance scale must be positive, got {}",
                guidance_scale
            )));
        }
        let steps = params.steps.unwrap_or(self.defaults.steps);
        if steps == 0 {
            return Err(ApplicationError::InvalidRequest("steps must be greater than 0".to_string()));
        }

        let stencil = self.image_processor.to_binary_stencil(mask)?;
        let canvas = self.image_processor.cut_hole(&source, &stencil)?;
        let (width, height) = canvas.dimensions();
        if !is_stride_aligned(width, height) {
            return Err(DomainError::UnsupportedDimensions { width, height }.into());
        }

        let request = GenerationRequest {
            prompt: params.prompt.unwrap_or_else(|| self.defaults.prompt.clone()),
            canvas,
            guidance_scale,
            steps,
            model_id: model_id.to_string(),
        };
        info!(
            "Prepared {}x{} canvas, {} pixels masked",
            width,
            height,
            stencil.covered_count()
        );

        let context = GenerationContext {
            engine: self.engine.clone(),
            image_processor: self.image_processor.clone(),
            artifact_store: self.artifact_store.clone(),
            session: self.session.clone(),
        };
        Ok(Generation::new(context, request, source, stencil, cancel, slot))
    }

    /// Sends the latest result back as the input image. `None` when there is nothing to send.
    pub fn feedback(&self) -> Option<DynamicImage> {
        let promoted = self.session.feedback();
        if promoted.is_some() {
            info!("Latest result sent back to input");
        }
        promoted
    }

    pub fn latest_result(&self) -> Option<Artifact> {
        self.session
            .latest_artifact()
            .or_else(|| self.artifact_store.latest())
    }

    pub fn encode_png(&self, image: &DynamicImage) -> Result<Vec<u8>, ApplicationError> {
        Ok(self.image_processor.encode_png(image)?)
    }
}
