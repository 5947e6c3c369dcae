use crate::application::error::ApplicationError;
use crate::domain::image::STRIDE;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Selectable models: display label and the model id handed to the engine.
pub const MODELS: &[(&str, &str)] = &[(
    "RealVisXL V5.0 Lightning",
    "SG161222/RealVisXL_V5.0_Lightning",
)];

pub const DEFAULT_MODEL: &str = "RealVisXL V5.0 Lightning";
pub const DEFAULT_PROMPT: &str = "high quality, 4K";

/// Accepts either a catalog label or a model id.
pub fn resolve_model(name: &str) -> Option<&'static str> {
    MODELS
        .iter()
        .find(|(label, id)| *label == name || *id == name)
        .map(|(_, id)| *id)
}

/// Mask-and-regenerate inpainting server.
#[derive(Parser, Debug, Clone)]
#[command(name = "inpaint_loop", version, about, long_about = None)]
pub struct AppConfig {
    /// Address the HTTP server listens on.
    #[arg(long, env = "INPAINT_BIND", default_value = "0.0.0.0:7860")]
    pub bind: SocketAddr,

    /// Directory generated images are written to.
    #[arg(long, env = "INPAINT_OUTPUT_DIR", default_value = "outputs")]
    pub output_dir: PathBuf,

    /// Base URL of the inference engine.
    #[arg(long, env = "INPAINT_ENGINE_URL")]
    pub engine_url: String,

    /// Default model label.
    #[arg(long, env = "INPAINT_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Default prompt.
    #[arg(long, env = "INPAINT_PROMPT", default_value = DEFAULT_PROMPT)]
    pub prompt: String,

    #[arg(long, env = "INPAINT_GUIDANCE_SCALE", default_value_t = 1.5)]
    pub guidance_scale: f32,

    /// Denoising steps per generation.
    #[arg(long, env = "INPAINT_STEPS", default_value_t = 8)]
    pub steps: u32,

    /// Longest side uploaded images are scaled down to.
    #[arg(long, env = "INPAINT_RESIZE", default_value_t = 1024)]
    pub resize: u32,

    /// Serve a frontend build from this directory at `/`.
    #[arg(long, env = "INPAINT_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,
}

/// Values used when a generation request leaves a field out.
#[derive(Debug, Clone)]
pub struct GenerationDefaults {
    pub prompt: String,
    pub model: String,
    pub guidance_scale: f32,
    pub steps: u32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            guidance_scale: 1.5,
            steps: 8,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ApplicationError> {
        if !(self.guidance_scale.is_finite() && self.guidance_scale > 0.0) {
            return Err(ApplicationError::ConfigurationError(
                "guidance scale must be positive".to_string(),
            ));
        }
        if self.steps == 0 {
            return Err(ApplicationError::ConfigurationError(
                "steps must be greater than 0".to_string(),
            ));
        }
        if self.resize < STRIDE {
            return Err(ApplicationError::ConfigurationError(format!(
                "resize must be at least {}",
                STRIDE
            )));
        }
        if resolve_model(&self.model).is_none() {
            return Err(ApplicationError::UnknownModel(self.model.clone()));
        }
        Ok(())
    }

    pub fn generation_defaults(&self) -> GenerationDefaults {
        GenerationDefaults {
            prompt: self.prompt.clone(),
            model: self.model.clone(),
            guidance_scale: self.guidance_scale,
            steps: self.steps,
        }
    }
}
