use crate::domain::artifact::Artifact;
use image::DynamicImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct SessionState {
    // full-resolution image the user uploaded (or fed back)
    working_image: Option<DynamicImage>,
    // stride-aligned image currently shown for masking; generation source
    display_image: Option<DynamicImage>,
    latest_artifact: Option<Artifact>,
    resize_target: u32,
}

/// Handle to the single editing session. Clones share the same state.
#[derive(Clone)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
    generating: Arc<AtomicBool>,
}

/// Held by the one generation running in a session. Dropping it frees the session for the next one.
#[derive(Debug)]
pub struct GenerationSlot(Arc<AtomicBool>);

impl Drop for GenerationSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Session {
    pub fn new(resize_target: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                resize_target,
                ..SessionState::default()
            })),
            generating: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claims the session for a generation. `None` while another generation holds it.
    pub fn claim_generation(&self) -> Option<GenerationSlot> {
        self.generating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| GenerationSlot(self.generating.clone()))
    }

    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces the working image. The old display image no longer applies and is dropped.
    pub fn set_working_image(&self, image: DynamicImage) {
        let mut state = self.lock();
        state.working_image = Some(image);
        state.display_image = None;
    }

    pub fn current_working_image(&self) -> Option<DynamicImage> {
        self.lock().working_image.clone()
    }

    pub fn set_display_image(&self, image: DynamicImage) {
        self.lock().display_image = Some(image);
    }

    pub fn display_image(&self) -> Option<DynamicImage> {
        self.lock().display_image.clone()
    }

    pub fn resize_target(&self) -> u32 {
        self.lock().resize_target
    }

    pub fn set_resize_target(&self, target: u32) {
        self.lock().resize_target = target;
    }

    pub fn record_artifact(&self, artifact: Artifact) {
        self.lock().latest_artifact = Some(artifact);
    }

    pub fn latest_artifact(&self) -> Option<Artifact> {
        self.lock().latest_artifact.clone()
    }

    /// Promotes the latest result to working and display image. Returns `None` and changes
    /// nothing when there is no result yet.
    pub fn feedback(&self) -> Option<DynamicImage> {
        let mut state = self.lock();
        let pixels = state.latest_artifact.as_ref()?.pixels.clone();
        state.working_image = Some(pixels.clone());
        state.display_image = Some(pixels.clone());
        Some(pixels)
    }
}
