use crate::domain::generation::{GeneratedFrame, GenerationRequest};
use crate::infrastructure::error::InfrastructureError;

/// Ordered frames of a single engine run. Pulling the next item blocks until the engine produces it.
pub type FrameStream = Box<dyn Iterator<Item = Result<GeneratedFrame, InfrastructureError>> + Send>;

// The generative model lives behind this trait; it performs `request.steps`
// denoising iterations and reports each intermediate image.
pub trait InferenceEngine {
    fn name(&self) -> &str;

    fn stream(&self, request: &GenerationRequest) -> Result<FrameStream, InfrastructureError>;
}
