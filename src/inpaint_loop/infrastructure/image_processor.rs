use crate::domain::error::DomainError;
use crate::domain::image::{floor_to_stride, BinaryStencil, MaskLayer};
use crate::domain::image_processor_trait::{ImageProcessor, Quantized};
use super::error::InfrastructureError;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, ImageFormat, Luma, Rgb, Rgba};
use std::io::Cursor;

pub struct DefaultImageProcessor;

impl DefaultImageProcessor {
    pub fn new() -> Self {
        Self
    }
}

fn ensure_same_dimensions(expected: (u32, u32), actual: (u32, u32)) -> Result<(), DomainError> {
    if expected != actual {
        return Err(DomainError::mismatch(expected, actual));
    }
    Ok(())
}

impl ImageProcessor for DefaultImageProcessor {
    fn to_binary_stencil(&self, mask: &MaskLayer) -> Result<BinaryStencil, DomainError> {
        if !mask.image.color().has_alpha() {
            return Err(DomainError::InvalidMaskFormat(format!("{:?}", mask.image.color())));
        }
        // 16-bit view so faint alpha in deep masks is not rounded away
        let rgba = mask.image.to_rgba16();
        let (width, height) = rgba.dimensions();
        let alpha = GrayImage::from_fn(width, height, |x, y| {
            Luma([if rgba.get_pixel(x, y).0[3] > 0 { 255 } else { 0 }])
        });
        Ok(BinaryStencil::from_gray(alpha))
    }

    fn quantize(&self, image: &DynamicImage, target_max_side: u32) -> Result<Quantized, DomainError> {
        let target = floor_to_stride(target_max_side);
        if target == 0 {
            return Err(DomainError::InvalidInput(format!(
                "resize target must be at least 8, got {}",
                target_max_side
            )));
        }

        let (width, height) = image.dimensions();
        // Fit inside target x target keeping aspect ratio; never upscale
        let scaled = if width <= target && height <= target {
            image.clone()
        } else {
            image.resize(target, target, FilterType::Lanczos3)
        };

        let (scaled_width, scaled_height) = scaled.dimensions();
        let crop_width = floor_to_stride(scaled_width);
        let crop_height = floor_to_stride(scaled_height);
        if crop_width == 0 || crop_height == 0 {
            return Err(DomainError::UnsupportedDimensions {
                width: scaled_width,
                height: scaled_height,
            });
        }

        Ok(Quantized {
            image: scaled.crop_imm(0, 0, crop_width, crop_height),
            max_side: floor_to_stride(width.max(height)),
        })
    }

    fn cut_hole(&self, source: &DynamicImage, stencil: &BinaryStencil) -> Result<DynamicImage, DomainError> {
        ensure_same_dimensions(stencil.dimensions(), source.dimensions())?;

        if source.color().has_alpha() {
            let mut out = source.to_rgba8();
            for (x, y, pixel) in out.enumerate_pixels_mut() {
                if stencil.is_covered(x, y) {
                    *pixel = Rgba([0, 0, 0, 0]);
                }
            }
            Ok(DynamicImage::ImageRgba8(out))
        } else {
            let mut out = source.to_rgb8();
            for (x, y, pixel) in out.enumerate_pixels_mut() {
                if stencil.is_covered(x, y) {
                    *pixel = Rgb([0, 0, 0]);
                }
            }
            Ok(DynamicImage::ImageRgb8(out))
        }
    }

    fn fill_hole(
        &self,
        base: &DynamicImage,
        overlay: &DynamicImage,
        stencil: &BinaryStencil,
    ) -> Result<DynamicImage, DomainError> {
        ensure_same_dimensions(stencil.dimensions(), base.dimensions())?;
        ensure_same_dimensions(stencil.dimensions(), overlay.dimensions())?;

        let overlay = overlay.to_rgba8();
        let mut out = base.to_rgba8();
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            if stencil.is_covered(x, y) {
                *pixel = *overlay.get_pixel(x, y);
            }
        }

        // Keep the base layout: an opaque base stays opaque
        if base.color().has_alpha() {
            Ok(DynamicImage::ImageRgba8(out))
        } else {
            Ok(DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(out).to_rgb8()))
        }
    }

    fn decode(&self, image_bytes: &[u8]) -> Result<DynamicImage, InfrastructureError> {
        let reader = image::io::Reader::new(Cursor::new(image_bytes))
            .with_guessed_format()
            .map_err(InfrastructureError::IoError)?;
        reader.decode().map_err(InfrastructureError::ImageLibError)
    }

    fn encode_png(&self, image: &DynamicImage) -> Result<Vec<u8>, InfrastructureError> {
        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(InfrastructureError::ImageLibError)?;
        Ok(buffer.into_inner())
    }
}
