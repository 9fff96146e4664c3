//! Seam to the external face detector/encoder.

use crate::types::Detection;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid encoder input: {0}")]
    Invalid(String),
}

/// A decoded frame with its detections, boxes and embeddings aligned by index.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub image: RgbImage,
    pub detections: Vec<Detection>,
}

/// Turns a captured frame into face boxes and embeddings.
///
/// Encoding is the slow step of the pipeline and runs on the frame worker,
/// never on the pacing loop.
pub trait FaceEncoder: Send {
    type Input: Send + 'static;

    fn encode(&mut self, input: Self::Input) -> Result<EncodedFrame, EncoderError>;
}
