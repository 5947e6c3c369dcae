use thiserror::Error;
use crate::domain::error::DomainError;
use crate::infrastructure::error::InfrastructureError;

#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("Inference failed: {0}")]
    InferenceFailed(#[source] InfrastructureError),

    #[error("No working image: upload an image first")]
    NoWorkingImage,

    #[error("No generated image yet")]
    NoResult,

    #[error("Generation cancelled")]
    Cancelled,

    #[error("A generation is already running")]
    GenerationInProgress,

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Domain error occurred: {0}")]
    DomainError(#[from] DomainError),

    #[error("Infrastructure error occurred: {0}")]
    InfrastructureError(#[from] InfrastructureError),

    #[error("Underlying error: {source:?}")]
    AnyhowError {
        #[from]
        source: anyhow::Error,
    }
}

// IntoResponse implementation for ApplicationError
use axum::response::{IntoResponse, Response};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

impl ApplicationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApplicationError::InferenceFailed(_) => StatusCode::BAD_GATEWAY,
            ApplicationError::NoWorkingImage | ApplicationError::GenerationInProgress => StatusCode::CONFLICT,
            ApplicationError::NoResult => StatusCode::NOT_FOUND,
            ApplicationError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ApplicationError::UnknownModel(_) | ApplicationError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApplicationError::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApplicationError::DomainError(_) => StatusCode::BAD_REQUEST,
            ApplicationError::InfrastructureError(infra_err) => match infra_err {
                InfrastructureError::EngineError(_) | InfrastructureError::ReqwestError(_) => StatusCode::BAD_GATEWAY,
                InfrastructureError::DecodingError(_)
                | InfrastructureError::Base64DecodeError(_)
                | InfrastructureError::DomainErrorWrapper(_) => StatusCode::BAD_REQUEST,
                InfrastructureError::ImageLibError(_) => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApplicationError::AnyhowError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApplicationError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = match &self {
            ApplicationError::InfrastructureError(infra_err) => {
                tracing::error!("InfrastructureError: {:?}", infra_err);
                infra_err.to_string()
            }
            ApplicationError::AnyhowError { source } => {
                tracing::error!("Unhandled AnyhowError: {:?}", source);
                "An unexpected error occurred.".to_string()
            }
            other => other.to_string(),
        };
        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApplicationError::NoWorkingImage.status_code(), StatusCode::CONFLICT);
        assert_eq!(ApplicationError::GenerationInProgress.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApplicationError::InferenceFailed(InfrastructureError::EngineError("boom".into())).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApplicationError::from(DomainError::InvalidMaskFormat("Rgb8".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_into_response_carries_status() {
        let response = ApplicationError::UnknownModel("sd15".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
