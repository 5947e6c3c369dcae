use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{DynamicImage, ImageError, Rgb, RgbImage};
use tempfile::TempDir;

use super::inpaint_service::InpaintService;
use super::orchestrator::GenerationContext;
use super::session::Session;
use crate::config::GenerationDefaults;
use crate::domain::artifact::Artifact;
use crate::domain::artifact_store_trait::ArtifactStore;
use crate::domain::generation::{GeneratedFrame, GenerationRequest};
use crate::domain::inference_engine_trait::{FrameStream, InferenceEngine};
use crate::infrastructure::artifact_store::LocalArtifactStore;
use crate::infrastructure::error::InfrastructureError;
use crate::infrastructure::image_processor::DefaultImageProcessor;

pub fn solid_rgb(width: u32, height: u32, value: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([value, value, value])))
}

pub enum StubOutcome {
    Frame(u8),
    Color([u8; 3]),
    Fail(String),
}

// Deterministic engine: replays a fixed script of frames and failures.
pub struct StubEngine {
    size: u32,
    script: Vec<StubOutcome>,
    refuse: Option<String>,
    frame_delay: Duration,
    calls: AtomicUsize,
    last_request: Mutex<Option<GenerationRequest>>,
}

impl StubEngine {
    pub fn new(size: u32, script: Vec<StubOutcome>) -> Self {
        Self {
            size,
            script,
            refuse: None,
            frame_delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn solid_frames(size: u32, count: usize) -> Self {
        Self::new(size, (0..count).map(|i| StubOutcome::Frame((i as u8).wrapping_mul(40).wrapping_add(20))).collect())
    }

    pub fn solid_frames_of(size: u32, colors: Vec<[u8; 3]>) -> Self {
        Self::new(size, colors.into_iter().map(StubOutcome::Color).collect())
    }

    pub fn refusing(message: &str) -> Self {
        let mut engine = Self::new(0, Vec::new());
        engine.refuse = Some(message.to_string());
        engine
    }

    /// Each frame takes `delay` to arrive, like a real denoising step.
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &str {
        "stub"
    }

    fn stream(&self, request: &GenerationRequest) -> Result<FrameStream, InfrastructureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        if let Some(message) = &self.refuse {
            return Err(InfrastructureError::EngineError(message.clone()));
        }

        let size = self.size;
        let frames: Vec<Result<GeneratedFrame, InfrastructureError>> = self
            .script
            .iter()
            .enumerate()
            .map(|(index, outcome)| match outcome {
                StubOutcome::Frame(value) => Ok(GeneratedFrame::new(index, solid_rgb(size, size, *value))),
                StubOutcome::Color(color) => Ok(GeneratedFrame::new(
                    index,
                    DynamicImage::ImageRgb8(RgbImage::from_pixel(size, size, Rgb(*color))),
                )),
                StubOutcome::Fail(message) => Err(InfrastructureError::EngineError(message.clone())),
            })
            .collect();
        let delay = self.frame_delay;
        Ok(Box::new(frames.into_iter().map(move |frame| {
            std::thread::sleep(delay);
            frame
        })))
    }
}

pub struct FailingStore;

impl ArtifactStore for FailingStore {
    fn persist(&self, _image: &DynamicImage) -> Result<Artifact, InfrastructureError> {
        Err(InfrastructureError::PersistFailed {
            path: PathBuf::from("outputs/img_20261017093000.png"),
            source: ImageError::IoError(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only file system",
            )),
        })
    }

    fn latest(&self) -> Option<Artifact> {
        None
    }
}

pub struct TestHarness {
    pub engine: Arc<StubEngine>,
    pub processor: Arc<DefaultImageProcessor>,
    pub store: Arc<dyn ArtifactStore + Send + Sync>,
    pub session: Session,
    _output: TempDir,
}

impl TestHarness {
    pub fn new(engine: StubEngine) -> Self {
        let output = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalArtifactStore::new(output.path().join("outputs")));
        Self::build(engine, store, output)
    }

    pub fn with_failing_store(engine: StubEngine) -> Self {
        Self::build(engine, Arc::new(FailingStore), tempfile::tempdir().unwrap())
    }

    fn build(engine: StubEngine, store: Arc<dyn ArtifactStore + Send + Sync>, output: TempDir) -> Self {
        Self {
            engine: Arc::new(engine),
            processor: Arc::new(DefaultImageProcessor::new()),
            store,
            session: Session::new(1024),
            _output: output,
        }
    }

    pub fn context(&self) -> GenerationContext {
        GenerationContext {
            engine: self.engine.clone(),
            image_processor: self.processor.clone(),
            artifact_store: self.store.clone(),
            session: self.session.clone(),
        }
    }

    pub fn service(&self) -> InpaintService {
        InpaintService::new(
            self.processor.clone(),
            self.engine.clone(),
            self.store.clone(),
            self.session.clone(),
            GenerationDefaults::default(),
        )
    }
}
