//! [`FaceBackend`] backed by the SCRFD detector and ArcFace encoder.

use crate::backend::FaceBackend;
use crate::detector::{DetectorError, FaceDetector};
use crate::encoder::{EncoderError, FaceEncoder};
use crate::types::{Embedding, FaceLocation};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum OnnxBackendError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("encoder: {0}")]
    Encoder(#[from] EncoderError),
}

pub struct OnnxBackend {
    detector: FaceDetector,
    encoder: FaceEncoder,
}

impl OnnxBackend {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, OnnxBackendError> {
        let detector = FaceDetector::load(&model_dir.join(SCRFD_MODEL_FILE))?;
        let encoder = FaceEncoder::load(&model_dir.join(ARCFACE_MODEL_FILE))?;
        Ok(Self { detector, encoder })
    }
}

impl FaceBackend for OnnxBackend {
    type Error = OnnxBackendError;

    fn locate(&mut self, image: &RgbImage) -> Result<Vec<FaceLocation>, Self::Error> {
        let (w, h) = image.dimensions();
        Ok(self
            .detector
            .detect(image)?
            .iter()
            .map(|d| d.to_location(w, h))
            .filter(|l| l.width() > 0 && l.height() > 0)
            .collect())
    }

    fn encode(&mut self, image: &RgbImage, faces: &[FaceLocation]) -> Result<Vec<Embedding>, Self::Error> {
        faces
            .iter()
            .map(|&face| self.encoder.encode(image, face).map_err(Into::into))
            .collect()
    }
}
