pub mod artifact;
pub mod artifact_store_trait;
pub mod error;
pub mod generation;
pub mod image;
pub mod image_processor_trait;
pub mod inference_engine_trait;
