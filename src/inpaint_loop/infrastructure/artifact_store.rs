use super::error::InfrastructureError;
use crate::domain::artifact::Artifact;
use crate::domain::artifact_store_trait::ArtifactStore;
use chrono::{DateTime, Local};
use image::{DynamicImage, ImageError, ImageFormat};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

#[cfg_attr(test, mockall::automock)]
pub trait Clock {
    fn now(&self) -> DateTime<Local>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// `img_<YYYYMMDDHHMMSS>.png`. Second granularity: two saves in the same second share a name
/// and the later one overwrites the earlier.
pub fn artifact_file_name(created_at: &DateTime<Local>) -> String {
    format!("img_{}.png", created_at.format("%Y%m%d%H%M%S"))
}

pub struct LocalArtifactStore {
    output_dir: PathBuf,
    clock: Box<dyn Clock + Send + Sync>,
    latest: Mutex<Option<Artifact>>,
}

impl LocalArtifactStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self::with_clock(output_dir, Box::new(SystemClock))
    }

    pub fn with_clock(output_dir: impl Into<PathBuf>, clock: Box<dyn Clock + Send + Sync>) -> Self {
        Self {
            output_dir: output_dir.into(),
            clock,
            latest: Mutex::new(None),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn persist(&self, image: &DynamicImage) -> Result<Artifact, InfrastructureError> {
        let created_at = self.clock.now();
        let path = self.output_dir.join(artifact_file_name(&created_at));

        fs::create_dir_all(&self.output_dir).map_err(|e| InfrastructureError::PersistFailed {
            path: path.clone(),
            source: ImageError::IoError(e),
        })?;
        image
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|source| InfrastructureError::PersistFailed {
                path: path.clone(),
                source,
            })?;

        let full_path = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        info!("Image saved as: {}", full_path.display());

        let artifact = Artifact::new(image.clone(), Some(path), created_at);
        let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        *latest = Some(artifact.clone());
        Ok(artifact)
    }

    fn latest(&self) -> Option<Artifact> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
