use std::sync::Arc;

use image::DynamicImage;

use crate::domain::artifact::Artifact;

/// Payload handed to the inference engine. `canvas` is the source with the stenciled region blanked.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub prompt: String,
    pub canvas: DynamicImage,
    pub guidance_scale: f32,
    pub steps: u32,
    pub model_id: String,
}

/// One intermediate image of a streamed run. Frames arrive in denoising order.
#[derive(Clone, Debug)]
pub struct GeneratedFrame {
    pub index: usize,
    pub image: DynamicImage,
}

impl GeneratedFrame {
    pub fn new(index: usize, image: DynamicImage) -> Self {
        Self { index, image }
    }
}

#[derive(Debug)]
pub enum GenerationEvent {
    /// Partial result paired with the prepared canvas it was generated from.
    Progress {
        frame: GeneratedFrame,
        canvas: Arc<DynamicImage>,
    },
    /// Authoritative composite. `warning` is set when the artifact could not be saved.
    Complete {
        artifact: Artifact,
        warning: Option<String>,
    },
}
