use super::error::InfrastructureError;
use crate::domain::generation::{GeneratedFrame, GenerationRequest};
use crate::domain::image_processor_trait::ImageProcessor;
use crate::domain::inference_engine_trait::{FrameStream, InferenceEngine};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use tracing::debug;

// Client for an inference server that streams one JSON line per denoising step:
//   POST {endpoint}/v1/inpaint  ->  {"image": "<base64 png>"}\n ... or {"error": "..."}\n
pub struct HttpInferenceEngine {
    endpoint: String,
    image_processor: Arc<dyn ImageProcessor + Send + Sync>,
}

#[derive(Serialize)]
struct InpaintPayload<'a> {
    model_id: &'a str,
    prompt: &'a str,
    guidance_scale: f32,
    steps: u32,
    canvas: String,
}

#[derive(Deserialize, Debug)]
struct FrameLine {
    image: Option<String>,
    error: Option<String>,
}

impl HttpInferenceEngine {
    pub fn new(endpoint: &str, image_processor: Arc<dyn ImageProcessor + Send + Sync>) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            image_processor,
        }
    }
}

impl InferenceEngine for HttpInferenceEngine {
    fn name(&self) -> &str {
        &self.endpoint
    }

    fn stream(&self, request: &GenerationRequest) -> Result<FrameStream, InfrastructureError> {
        let canvas = base64::encode(self.image_processor.encode_png(&request.canvas)?);
        let payload = InpaintPayload {
            model_id: &request.model_id,
            prompt: &request.prompt,
            guidance_scale: request.guidance_scale,
            steps: request.steps,
            canvas,
        };

        // A run takes as long as it takes; no overall timeout.
        let client = reqwest::blocking::Client::builder()
            .timeout(None)
            .build()
            .map_err(InfrastructureError::ReqwestError)?;
        let response = client
            .post(format!("{}/v1/inpaint", self.endpoint))
            .json(&payload)
            .send()
            .map_err(InfrastructureError::ReqwestError)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(InfrastructureError::EngineError(format!(
                "engine responded with {}: {}",
                status, body
            )));
        }

        Ok(Box::new(NdjsonFrames::new(
            BufReader::new(response),
            self.image_processor.clone(),
        )))
    }
}

/// Lazily decodes frames from a newline-delimited JSON body. Stops after the first error.
pub struct NdjsonFrames<R> {
    reader: R,
    image_processor: Arc<dyn ImageProcessor + Send + Sync>,
    next_index: usize,
    done: bool,
}

impl<R: BufRead> NdjsonFrames<R> {
    pub fn new(reader: R, image_processor: Arc<dyn ImageProcessor + Send + Sync>) -> Self {
        Self {
            reader,
            image_processor,
            next_index: 0,
            done: false,
        }
    }

    fn decode_line(&self, line: &str) -> Result<GeneratedFrame, InfrastructureError> {
        let parsed: FrameLine = serde_json::from_str(line)?;
        if let Some(message) = parsed.error {
            return Err(InfrastructureError::EngineError(message));
        }
        let encoded = parsed
            .image
            .ok_or_else(|| InfrastructureError::DecodingError("frame line without image".to_string()))?;
        // Accept bare base64 as well as data URLs
        let base64_data = if encoded.starts_with("data:") {
            encoded
                .split(',')
                .nth(1)
                .ok_or_else(|| InfrastructureError::DecodingError("Invalid data URL: missing comma".to_string()))?
        } else {
            encoded.as_str()
        };
        let bytes = base64::decode(base64_data)?;
        let image = self.image_processor.decode(&bytes)?;
        Ok(GeneratedFrame::new(self.next_index, image))
    }
}

impl<R: BufRead> Iterator for NdjsonFrames<R> {
    type Item = Result<GeneratedFrame, InfrastructureError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) if line.trim().is_empty() => continue,
                Ok(_) => break,
                Err(e) => {
                    self.done = true;
                    return Some(Err(InfrastructureError::IoError(e)));
                }
            }
        }

        match self.decode_line(line.trim()) {
            Ok(frame) => {
                debug!("received frame {}", frame.index);
                self.next_index += 1;
                Some(Ok(frame))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
