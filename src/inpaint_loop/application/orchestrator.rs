use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use image::DynamicImage;
use tracing::{debug, info, warn};

use super::error::ApplicationError;
use super::session::{GenerationSlot, Session};
use crate::domain::artifact::Artifact;
use crate::domain::artifact_store_trait::ArtifactStore;
use crate::domain::generation::{GenerationEvent, GenerationRequest};
use crate::domain::image::BinaryStencil;
use crate::domain::image_processor_trait::ImageProcessor;
use crate::domain::inference_engine_trait::{FrameStream, InferenceEngine};
use crate::infrastructure::error::InfrastructureError;

/// Cooperative cancellation flag, checked before every frame. Never set by default.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Collaborators a generation needs once it finishes.
#[derive(Clone)]
pub struct GenerationContext {
    pub engine: Arc<dyn InferenceEngine + Send + Sync>,
    pub image_processor: Arc<dyn ImageProcessor + Send + Sync>,
    pub artifact_store: Arc<dyn ArtifactStore + Send + Sync>,
    pub session: Session,
}

enum Stage {
    Pending,
    Streaming(FrameStream),
    Finished,
}

/// One in-flight generation, consumed as a lazy sequence of events.
///
/// The engine is started on the first call to `next`. Every frame becomes a
/// `Progress` event; once the engine is exhausted the last frame is composited
/// over the source through the stencil, persisted, recorded in the session and
/// emitted as `Complete`. Any engine failure ends the sequence with a single
/// `InferenceFailed` and leaves no artifact behind. The session stays claimed
/// until the sequence ends or the generation is dropped.
pub struct Generation {
    context: GenerationContext,
    request: GenerationRequest,
    source: DynamicImage,
    stencil: BinaryStencil,
    canvas: Arc<DynamicImage>,
    cancel: CancellationToken,
    stage: Stage,
    last_frame: Option<DynamicImage>,
    slot: Option<GenerationSlot>,
}

impl Generation {
    pub fn new(
        context: GenerationContext,
        request: GenerationRequest,
        source: DynamicImage,
        stencil: BinaryStencil,
        cancel: CancellationToken,
        slot: GenerationSlot,
    ) -> Self {
        let canvas = Arc::new(request.canvas.clone());
        Self {
            context,
            request,
            source,
            stencil,
            canvas,
            cancel,
            stage: Stage::Pending,
            last_frame: None,
            slot: Some(slot),
        }
    }

    fn finish(&mut self) {
        self.stage = Stage::Finished;
        self.slot = None;
    }

    fn fail(&mut self, error: InfrastructureError) -> ApplicationError {
        self.finish();
        warn!("Generation failed: {}", error);
        ApplicationError::InferenceFailed(error)
    }

    fn complete(&mut self) -> Result<GenerationEvent, ApplicationError> {
        let last = match self.last_frame.take() {
            Some(frame) => frame,
            None => {
                return Err(self.fail(InfrastructureError::EngineError(
                    "engine produced no frames".to_string(),
                )))
            }
        };

        let composite = match self.context.image_processor.fill_hole(&self.source, &last, &self.stencil) {
            Ok(composite) => composite,
            // a frame that does not match the canvas is the engine's fault
            Err(e) => return Err(self.fail(InfrastructureError::DomainErrorWrapper(e))),
        };

        let (artifact, warning) = match self.context.artifact_store.persist(&composite) {
            Ok(artifact) => (artifact, None),
            Err(e) => {
                warn!("Error saving image: {}", e);
                (Artifact::new(composite, None, Local::now()), Some(e.to_string()))
            }
        };
        self.context.session.record_artifact(artifact.clone());
        info!("Generation complete ({})", artifact.file_name().unwrap_or("unsaved"));

        Ok(GenerationEvent::Complete { artifact, warning })
    }
}

impl Iterator for Generation {
    type Item = Result<GenerationEvent, ApplicationError>;

    fn next(&mut self) -> Option<Self::Item> {
        if matches!(self.stage, Stage::Finished) {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.finish();
            info!("Generation cancelled");
            return Some(Err(ApplicationError::Cancelled));
        }

        if matches!(self.stage, Stage::Pending) {
            info!(
                "Starting generation on {} (model {}, {} steps, guidance {})",
                self.context.engine.name(),
                self.request.model_id,
                self.request.steps,
                self.request.guidance_scale
            );
            match self.context.engine.stream(&self.request) {
                Ok(frames) => self.stage = Stage::Streaming(frames),
                Err(e) => return Some(Err(self.fail(e))),
            }
        }

        let next_frame = match &mut self.stage {
            Stage::Streaming(frames) => frames.next(),
            _ => None,
        };

        match next_frame {
            Some(Ok(frame)) => {
                debug!("Frame {} ready", frame.index);
                self.last_frame = Some(frame.image.clone());
                Some(Ok(GenerationEvent::Progress {
                    frame,
                    canvas: self.canvas.clone(),
                }))
            }
            Some(Err(e)) => Some(Err(self.fail(e))),
            None => {
                let result = self.complete();
                self.finish();
                Some(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{solid_rgb, StubEngine, StubOutcome, TestHarness};
    use crate::domain::image::MaskLayer;
    use image::{GenericImageView, Rgba, RgbaImage};

    fn left_half_mask(size: u32) -> MaskLayer {
        MaskLayer::new(DynamicImage::ImageRgba8(RgbaImage::from_fn(size, size, |x, _| {
            Rgba([0, 0, 0, if x < size / 2 { 255 } else { 0 }])
        })))
    }

    fn start(harness: &TestHarness, source: DynamicImage, mask: &MaskLayer, cancel: CancellationToken) -> Generation {
        let stencil = harness.processor.to_binary_stencil(mask).unwrap();
        let canvas = harness.processor.cut_hole(&source, &stencil).unwrap();
        let request = GenerationRequest {
            prompt: "high quality, 4K".to_string(),
            canvas,
            guidance_scale: 1.5,
            steps: 3,
            model_id: "stub".to_string(),
        };
        let slot = harness.session.claim_generation().unwrap();
        Generation::new(harness.context(), request, source, stencil, cancel, slot)
    }

    #[test]
    fn test_engine_started_lazily_once() {
        let harness = TestHarness::new(StubEngine::solid_frames(16, 3));
        let mut generation = start(&harness, solid_rgb(16, 16, 7), &left_half_mask(16), CancellationToken::new());

        assert_eq!(harness.engine.calls(), 0);
        generation.next();
        generation.next();
        assert_eq!(harness.engine.calls(), 1);
        assert_eq!(generation.count(), 2);
        assert_eq!(harness.engine.calls(), 1);
    }

    #[test]
    fn test_n_progress_events_then_one_composite() {
        let harness = TestHarness::new(StubEngine::solid_frames(16, 4));
        let source = solid_rgb(16, 16, 7);
        let mask = left_half_mask(16);
        let stencil = harness.processor.to_binary_stencil(&mask).unwrap();
        let events: Vec<_> = start(&harness, source.clone(), &mask, CancellationToken::new())
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(events.len(), 5);
        let mut frames = Vec::new();
        for (i, event) in events[..4].iter().enumerate() {
            match event {
                GenerationEvent::Progress { frame, canvas } => {
                    assert_eq!(frame.index, i);
                    assert_eq!(canvas.get_pixel(0, 0), Rgba([0, 0, 0, 255]));
                    frames.push(frame.image.clone());
                }
                other => panic!("Expected Progress, got {:?}", other),
            }
        }
        match &events[4] {
            GenerationEvent::Complete { artifact, warning } => {
                let expected = harness.processor.fill_hole(&source, &frames[3], &stencil).unwrap();
                assert_eq!(artifact.pixels, expected);
                assert!(warning.is_none());
                assert!(artifact.is_saved());
            }
            other => panic!("Expected Complete, got {:?}", other),
        }
        assert!(harness.session.latest_artifact().is_some());
    }

    #[test]
    fn test_failure_mid_stream_leaves_no_artifact() {
        let harness = TestHarness::new(StubEngine::new(
            16,
            vec![StubOutcome::Frame(10), StubOutcome::Fail("device lost".to_string()), StubOutcome::Frame(11)],
        ));
        let mut generation = start(&harness, solid_rgb(16, 16, 7), &left_half_mask(16), CancellationToken::new());

        assert!(matches!(generation.next(), Some(Ok(GenerationEvent::Progress { .. }))));
        match generation.next() {
            Some(Err(ApplicationError::InferenceFailed(InfrastructureError::EngineError(msg)))) => {
                assert_eq!(msg, "device lost")
            }
            other => panic!("Expected InferenceFailed, got {:?}", other),
        }
        assert!(generation.next().is_none());
        assert!(harness.store.latest().is_none());
        assert!(harness.session.latest_artifact().is_none());
    }

    #[test]
    fn test_engine_refusing_to_start() {
        let harness = TestHarness::new(StubEngine::refusing("invalid canvas"));
        let mut generation = start(&harness, solid_rgb(16, 16, 7), &left_half_mask(16), CancellationToken::new());

        assert!(matches!(generation.next(), Some(Err(ApplicationError::InferenceFailed(_)))));
        assert!(generation.next().is_none());
    }

    #[test]
    fn test_zero_frames_is_a_failure() {
        let harness = TestHarness::new(StubEngine::solid_frames(16, 0));
        let mut generation = start(&harness, solid_rgb(16, 16, 7), &left_half_mask(16), CancellationToken::new());

        assert!(matches!(generation.next(), Some(Err(ApplicationError::InferenceFailed(_)))));
        assert!(harness.store.latest().is_none());
    }

    #[test]
    fn test_frame_of_wrong_size_is_a_failure() {
        let harness = TestHarness::new(StubEngine::solid_frames(8, 1));
        let mut generation = start(&harness, solid_rgb(16, 16, 7), &left_half_mask(16), CancellationToken::new());

        assert!(generation.next().unwrap().is_ok());
        match generation.next() {
            Some(Err(ApplicationError::InferenceFailed(InfrastructureError::DomainErrorWrapper(_)))) => {}
            other => panic!("Expected InferenceFailed, got {:?}", other),
        }
        assert!(harness.session.latest_artifact().is_none());
    }

    #[test]
    fn test_cancel_between_frames() {
        let harness = TestHarness::new(StubEngine::solid_frames(16, 5));
        let cancel = CancellationToken::new();
        let mut generation = start(&harness, solid_rgb(16, 16, 7), &left_half_mask(16), cancel.clone());

        assert!(generation.next().unwrap().is_ok());
        cancel.cancel();
        assert!(matches!(generation.next(), Some(Err(ApplicationError::Cancelled))));
        assert!(generation.next().is_none());
        assert!(harness.store.latest().is_none());
    }

    #[test]
    fn test_persist_failure_still_completes() {
        let harness = TestHarness::with_failing_store(StubEngine::solid_frames(16, 2));
        let events: Vec<_> = start(&harness, solid_rgb(16, 16, 7), &left_half_mask(16), CancellationToken::new())
            .collect::<Result<_, _>>()
            .unwrap();

        match events.last() {
            Some(GenerationEvent::Complete { artifact, warning }) => {
                assert!(!artifact.is_saved());
                assert!(warning.as_deref().unwrap_or_default().contains("persist"));
            }
            other => panic!("Expected Complete, got {:?}", other),
        }
        // the unsaved result can still be fed back
        assert!(harness.session.feedback().is_some());
    }

    #[test]
    fn test_dropping_early_persists_nothing() {
        let harness = TestHarness::new(StubEngine::solid_frames(16, 3));
        {
            let mut generation = start(&harness, solid_rgb(16, 16, 7), &left_half_mask(16), CancellationToken::new());
            generation.next();
            assert!(harness.session.is_generating());
        }
        assert!(harness.store.latest().is_none());
        assert!(!harness.session.is_generating());
    }

    #[test]
    fn test_session_released_when_sequence_ends() {
        let harness = TestHarness::new(StubEngine::solid_frames(16, 2));
        let mut generation = start(&harness, solid_rgb(16, 16, 7), &left_half_mask(16), CancellationToken::new());

        assert!(generation.next().unwrap().is_ok());
        assert!(harness.session.is_generating());
        assert_eq!(generation.by_ref().count(), 2);
        // finished but not yet dropped
        assert!(!harness.session.is_generating());
    }

    #[test]
    fn test_session_released_after_failure() {
        let harness = TestHarness::new(StubEngine::refusing("invalid canvas"));
        let mut generation = start(&harness, solid_rgb(16, 16, 7), &left_half_mask(16), CancellationToken::new());

        assert!(generation.next().unwrap().is_err());
        assert!(!harness.session.is_generating());
    }
}
