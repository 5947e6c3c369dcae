use crate::domain::artifact::Artifact;
use crate::infrastructure::error::InfrastructureError;
use image::DynamicImage;

pub trait ArtifactStore {
    /// Writes `image` losslessly and returns the resulting artifact.
    fn persist(&self, image: &DynamicImage) -> Result<Artifact, InfrastructureError>;

    /// Most recently persisted artifact of this process.
    fn latest(&self) -> Option<Artifact>;
}
