use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Mask layer has no alpha channel (got {0})")]
    InvalidMaskFormat(String),

    #[error("Dimension mismatch: expected {expected_width}x{expected_height}, got {actual_width}x{actual_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("Unsupported dimensions {width}x{height}: both sides must be non-zero multiples of 8")]
    UnsupportedDimensions { width: u32, height: u32 },
}

impl DomainError {
    pub fn mismatch(expected: (u32, u32), actual: (u32, u32)) -> Self {
        DomainError::DimensionMismatch {
            expected_width: expected.0,
            expected_height: expected.1,
            actual_width: actual.0,
            actual_height: actual.1,
        }
    }
}
