use std::path::PathBuf;
use thiserror::Error;
use crate::domain::error::DomainError;

#[derive(Error, Debug)]
pub enum InfrastructureError {
    #[error("Failed to persist artifact to {path}: {source}")]
    PersistFailed {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Inference engine error: {0}")]
    EngineError(String),

    #[error("Data decoding failed: {0}")]
    DecodingError(String),

    #[error("Underlying image library error: {0}")]
    ImageLibError(#[from] image::ImageError),

    #[error("Underlying I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("Base64 decode error: {0}")]
    Base64DecodeError(#[from] base64::DecodeError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Domain Error Wrapper: {0}")]
    DomainErrorWrapper(#[from] DomainError),
}
