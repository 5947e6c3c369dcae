use image::{DynamicImage, GrayImage};

/// Divisor every model input dimension must evenly divide (latent compression factor).
pub const STRIDE: u32 = 8;

pub const COVERED: u8 = 255;
pub const UNCOVERED: u8 = 0;

/// Rounds `value` down to the nearest multiple of [`STRIDE`].
pub fn floor_to_stride(value: u32) -> u32 {
    (value / STRIDE) * STRIDE
}

pub fn is_stride_aligned(width: u32, height: u32) -> bool {
    width > 0 && height > 0 && width % STRIDE == 0 && height % STRIDE == 0
}

/// User-painted layer; only its alpha channel carries meaning.
#[derive(Clone, Debug)]
pub struct MaskLayer {
    pub image: DynamicImage,
}

impl MaskLayer {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }
}

/// Single-channel selection where every pixel is exactly [`COVERED`] or [`UNCOVERED`].
#[derive(Clone, Debug, PartialEq)]
pub struct BinaryStencil(GrayImage);

impl BinaryStencil {
    /// Builds a stencil from arbitrary single-channel data: any non-zero value counts as covered.
    pub fn from_gray(mut gray: GrayImage) -> Self {
        for pixel in gray.pixels_mut() {
            pixel.0[0] = if pixel.0[0] > 0 { COVERED } else { UNCOVERED };
        }
        Self(gray)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    pub fn value(&self, x: u32, y: u32) -> u8 {
        self.0.get_pixel(x, y).0[0]
    }

    pub fn is_covered(&self, x: u32, y: u32) -> bool {
        self.value(x, y) == COVERED
    }

    pub fn covered_count(&self) -> usize {
        self.0.pixels().filter(|p| p.0[0] == COVERED).count()
    }
}
