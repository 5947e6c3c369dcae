use crate::domain::error::DomainError;
use crate::domain::image::{BinaryStencil, MaskLayer};
use crate::infrastructure::error::InfrastructureError;
use image::DynamicImage;

/// Result of quantizing an image to the model stride.
#[derive(Clone, Debug)]
pub struct Quantized {
    pub image: DynamicImage,
    /// Stride-floored longest side of the unscaled image; upper bound for later resizes.
    pub max_side: u32,
}

// Pure image operations. Every method returns a new image and leaves its inputs untouched.
pub trait ImageProcessor {
    fn to_binary_stencil(&self, mask: &MaskLayer) -> Result<BinaryStencil, DomainError>;

    fn quantize(&self, image: &DynamicImage, target_max_side: u32) -> Result<Quantized, DomainError>;

    fn cut_hole(&self, source: &DynamicImage, stencil: &BinaryStencil) -> Result<DynamicImage, DomainError>;

    fn fill_hole(
        &self,
        base: &DynamicImage,
        overlay: &DynamicImage,
        stencil: &BinaryStencil,
    ) -> Result<DynamicImage, DomainError>;

    fn decode(&self, image_bytes: &[u8]) -> Result<DynamicImage, InfrastructureError>;

    fn encode_png(&self, image: &DynamicImage) -> Result<Vec<u8>, InfrastructureError>;
}
