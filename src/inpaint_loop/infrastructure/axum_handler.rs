use crate::application::error::ApplicationError;
use crate::application::inpaint_service::{GenerationParams, InpaintService, ResizeOutcome};
use crate::application::orchestrator::CancellationToken;
use crate::config::MODELS;
use crate::domain::generation::GenerationEvent;
use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Json, Multipart, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tracing::{debug, info};

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub inpaint_service: Arc<InpaintService>,
}

#[derive(Deserialize, Debug)]
pub struct ResizeParams {
    pub size: u32,
}

#[derive(Serialize, Debug)]
pub struct ImageResponse {
    pub image: String,
    pub width: u32,
    pub height: u32,
    pub max_size: u32,
}

#[derive(Serialize, Debug)]
pub struct FeedbackResponse {
    pub updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

pub fn build_router(state: Arc<AppState>, static_dir: Option<&Path>) -> Router {
    let router = Router::new()
        .route("/upload", post(upload_image_handler))
        .route("/resize", post(resize_handler))
        .route("/generate", post(generate_handler))
        .route("/feedback", post(feedback_handler))
        .route("/preview", get(preview_image_handler))
        .route("/download", get(download_image_handler))
        .route("/models", get(models_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES));

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };
    router.with_state(state)
}

fn data_url(service: &InpaintService, image: &DynamicImage) -> Result<String, ApplicationError> {
    let png = service.encode_png(image)?;
    Ok(format!("data:image/png;base64,{}", base64::encode(png)))
}

fn image_response(service: &InpaintService, outcome: &ResizeOutcome) -> Result<ImageResponse, ApplicationError> {
    let (width, height) = outcome.image.dimensions();
    Ok(ImageResponse {
        image: data_url(service, &outcome.image)?,
        width,
        height,
        max_size: outcome.max_size,
    })
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApplicationError {
    ApplicationError::InvalidRequest(format!("Multipart error: {}", e))
}

fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> Result<Option<T>, ApplicationError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| ApplicationError::InvalidRequest(format!("invalid {}: {:?}", name, value)))
}

fn event_value(service: &InpaintService, event: GenerationEvent) -> Result<Value, ApplicationError> {
    match event {
        GenerationEvent::Progress { frame, canvas } => {
            let image = data_url(service, &frame.image)?;
            let canvas = data_url(service, &canvas)?;
            Ok(json!({
                "event": "progress",
                "index": frame.index,
                "image": image,
                "canvas": canvas,
            }))
        }
        GenerationEvent::Complete { artifact, warning } => {
            let image = data_url(service, &artifact.pixels)?;
            let path = artifact.path.as_ref().map(|p| p.display().to_string());
            Ok(json!({
                "event": "complete",
                "image": image,
                "path": path,
                "warning": warning,
            }))
        }
    }
}

/// One NDJSON line describing a generation event or the error that ended it.
pub fn event_line(service: &InpaintService, event: Result<GenerationEvent, ApplicationError>) -> String {
    let value = event
        .and_then(|event| event_value(service, event))
        .unwrap_or_else(|e| {
            json!({
                "event": "error",
                "status": e.status_code().as_u16(),
                "error": e.to_string(),
            })
        });
    let mut line = value.to_string();
    line.push('\n');
    line
}

pub async fn upload_image_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<ImageResponse>, ApplicationError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("image") {
            continue;
        }
        let data = field.bytes().await.map_err(multipart_error)?;
        info!("Upload received ({} bytes)", data.len());

        let service = state.inpaint_service.clone();
        let response = tokio::task::spawn_blocking(move || {
            let outcome = service.upload(&data)?;
            image_response(&service, &outcome)
        })
        .await
        .map_err(anyhow::Error::from)??;
        return Ok(Json(response));
    }

    Err(ApplicationError::InvalidRequest("missing \"image\" field".to_string()))
}

pub async fn resize_handler(
    State(state): State<Arc<AppState>>,
    Json(params): Json<ResizeParams>,
) -> Result<Json<ImageResponse>, ApplicationError> {
    let service = state.inpaint_service.clone();
    let response = tokio::task::spawn_blocking(move || {
        let outcome = service.resize(params.size)?;
        image_response(&service, &outcome)
    })
    .await
    .map_err(anyhow::Error::from)??;
    Ok(Json(response))
}

pub async fn generate_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response, ApplicationError> {
    let mut params = GenerationParams::default();
    let mut mask_bytes = None;
    let mut source_bytes = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "mask" => mask_bytes = Some(field.bytes().await.map_err(multipart_error)?),
            "image" => source_bytes = Some(field.bytes().await.map_err(multipart_error)?),
            "prompt" => params.prompt = Some(field.text().await.map_err(multipart_error)?),
            "model" => {
                let text = field.text().await.map_err(multipart_error)?;
                params.model = parse_field("model", &text)?;
            }
            "guidance_scale" => {
                let text = field.text().await.map_err(multipart_error)?;
                params.guidance_scale = parse_field("guidance_scale", &text)?;
            }
            "steps" => {
                let text = field.text().await.map_err(multipart_error)?;
                params.steps = parse_field("steps", &text)?;
            }
            other => debug!("Ignoring form field {:?}", other),
        }
    }
    let mask_bytes = mask_bytes.ok_or_else(|| ApplicationError::InvalidRequest("missing \"mask\" field".to_string()))?;

    // Preparation errors are reported with a proper status before streaming starts.
    let cancel = CancellationToken::new();
    let service = state.inpaint_service.clone();
    let token = cancel.clone();
    let generation = tokio::task::spawn_blocking(move || {
        let mask = service.decode_mask(&mask_bytes)?;
        match source_bytes {
            Some(bytes) => service.upload_and_generate(&bytes, params, &mask, token),
            None => service.generate(params, &mask, token),
        }
    })
    .await
    .map_err(anyhow::Error::from)??;

    let (mut sender, body) = Body::channel();
    let service = state.inpaint_service.clone();
    let runtime = tokio::runtime::Handle::current();
    tokio::task::spawn_blocking(move || {
        for event in generation {
            let line = event_line(&service, event);
            if runtime.block_on(sender.send_data(Bytes::from(line))).is_err() && !cancel.is_cancelled() {
                info!("Client disconnected, cancelling generation");
                cancel.cancel();
            }
        }
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .map(IntoResponse::into_response)
        .map_err(|e| ApplicationError::InvalidRequest(format!("Failed to build generate response: {}", e)))
}

pub async fn feedback_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FeedbackResponse>, ApplicationError> {
    let service = state.inpaint_service.clone();
    let response = tokio::task::spawn_blocking(move || -> Result<FeedbackResponse, ApplicationError> {
        match service.feedback() {
            Some(image) => Ok(FeedbackResponse {
                updated: true,
                image: Some(data_url(&service, &image)?),
            }),
            None => Ok(FeedbackResponse {
                updated: false,
                image: None,
            }),
        }
    })
    .await
    .map_err(anyhow::Error::from)??;
    Ok(Json(response))
}

// Latest result as PNG bytes plus its file name.
async fn latest_png(state: &AppState) -> Result<(Vec<u8>, String), ApplicationError> {
    let service = state.inpaint_service.clone();
    tokio::task::spawn_blocking(move || -> Result<(Vec<u8>, String), ApplicationError> {
        let artifact = service.latest_result().ok_or(ApplicationError::NoResult)?;
        let image_data = service.encode_png(&artifact.pixels)?;
        let file_name = artifact.file_name().unwrap_or("result.png").to_string();
        Ok((image_data, file_name))
    })
    .await
    .map_err(anyhow::Error::from)?
}

pub async fn preview_image_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApplicationError> {
    let (image_data, _) = latest_png(&state).await?;

    Response::builder()
        .header(header::CONTENT_TYPE, "image/png")
        .body(Body::from(image_data))
        .map_err(|e| ApplicationError::InvalidRequest(format!("Failed to build preview response: {}", e)))
}

pub async fn download_image_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApplicationError> {
    let (image_data, file_name) = latest_png(&state).await?;

    Response::builder()
        .header(header::CONTENT_TYPE, "image/png")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file_name),
        )
        .body(Body::from(image_data))
        .map_err(|e| ApplicationError::InvalidRequest(format!("Failed to build download response: {}", e)))
}

pub async fn models_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let labels: Vec<&str> = MODELS.iter().map(|(label, _)| *label).collect();
    Json(json!({
        "models": labels,
        "default": state.inpaint_service.defaults().model,
    }))
}
