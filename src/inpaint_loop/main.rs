mod application;
mod config;
mod domain;
mod infrastructure;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use axum::http::header::HeaderName;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use application::inpaint_service::InpaintService;
use application::session::Session;
use config::AppConfig;
use domain::image_processor_trait::ImageProcessor;
use infrastructure::artifact_store::LocalArtifactStore;
use infrastructure::axum_handler::{build_router, AppState};
use infrastructure::image_processor::DefaultImageProcessor;
use infrastructure::remote_engine::HttpInferenceEngine;

fn init_tracing(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("inpaint_loop={log_level},tower_http=info").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = AppConfig::parse();
    init_tracing(config.verbose);

    if let Err(err) = run(config).await {
        tracing::error!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    config.validate().context("Invalid configuration")?;

    let image_processor: Arc<dyn ImageProcessor + Send + Sync> = Arc::new(DefaultImageProcessor::new());
    let engine = Arc::new(HttpInferenceEngine::new(&config.engine_url, image_processor.clone()));
    let artifact_store = Arc::new(LocalArtifactStore::new(&config.output_dir));
    let output_dir = artifact_store.output_dir().display().to_string();
    let session = Session::new(config.resize);

    let inpaint_service = InpaintService::new(
        image_processor,
        engine,
        artifact_store,
        session,
        config.generation_defaults(),
    );
    let state = Arc::new(AppState {
        inpaint_service: Arc::new(inpaint_service),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(vec![HeaderName::from_static("content-type")]);
    let app = build_router(state, config.static_dir.as_deref()).layer(cors);

    info!(
        "Listening on http://{} (engine {}, outputs in {})",
        config.bind,
        config.engine_url,
        output_dir
    );
    axum::Server::bind(&config.bind)
        .serve(app.into_make_service())
        .await
        .context("HTTP server failed")?;

    Ok(())
}
