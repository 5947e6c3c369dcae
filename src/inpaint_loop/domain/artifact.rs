use chrono::{DateTime, Local};
use image::DynamicImage;
use std::path::PathBuf;

/// Final result of one completed generation. Never mutated after creation.
#[derive(Clone, Debug)]
pub struct Artifact {
    pub pixels: DynamicImage,
    // None when persisting failed; the result is still usable in the session.
    pub path: Option<PathBuf>,
    pub created_at: DateTime<Local>,
}

impl Artifact {
    pub fn new(pixels: DynamicImage, path: Option<PathBuf>, created_at: DateTime<Local>) -> Self {
        Self {
            pixels,
            path,
            created_at,
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path
            .as_ref()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
    }

    pub fn is_saved(&self) -> bool {
        self.path.is_some()
    }
}
