//! ArcFace embedding extraction via ONNX Runtime.
//!
//! Each face is cropped with a margin, resized to 112×112 and encoded into
//! an L2-normalized embedding. Normalized ArcFace embeddings sit at
//! Euclidean distance `sqrt(2 - 2·cos)` from each other.

use crate::types::{Embedding, FaceLocation};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
/// Extra context around the detector box, as a fraction of its size.
const CROP_MARGIN: f32 = 0.15;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box {0:?} is empty")]
    EmptyCrop(FaceLocation),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceEncoder {
    session: Session,
}

impl FaceEncoder {
    pub fn load(model_path: &Path) -> Result<Self, EncoderError> {
        if !model_path.exists() {
            return Err(EncoderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );
        Ok(Self { session })
    }

    pub fn encode(&mut self, image: &RgbImage, face: FaceLocation) -> Result<Embedding, EncoderError> {
        let crop = crop_face(image, face).ok_or(EncoderError::EmptyCrop(face))?;
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("embedding extraction: {e}")))?;
        if raw.is_empty() {
            return Err(EncoderError::InferenceFailed("model produced an empty embedding".into()));
        }

        Ok(Embedding::new(l2_normalize(raw)))
    }
}

/// Square crop around the face with margin, resized to the ArcFace input.
fn crop_face(image: &RgbImage, face: FaceLocation) -> Option<RgbImage> {
    let (w, h) = image.dimensions();
    if face.width() == 0 || face.height() == 0 || w == 0 || h == 0 {
        return None;
    }

    let side = face.width().max(face.height()) as f32 * (1.0 + 2.0 * CROP_MARGIN);
    let cx = (face.left + face.right) as f32 / 2.0;
    let cy = (face.top + face.bottom) as f32 / 2.0;
    let x0 = (cx - side / 2.0).max(0.0) as u32;
    let y0 = (cy - side / 2.0).max(0.0) as u32;
    let x1 = ((cx + side / 2.0) as u32).min(w);
    let y1 = ((cy + side / 2.0) as u32).min(h);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let view = imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    Some(imageops::resize(&view, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, FilterType::Triangle))
}

fn preprocess(face: &RgbImage) -> Array4<f32> {
    let n = ARCFACE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, n, n));
    for (x, y, pixel) in face.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_is_arcface_sized() {
        let image = RgbImage::new(200, 100);
        let face = FaceLocation { top: 20, right: 90, bottom: 80, left: 30 };
        let crop = crop_face(&image, face).unwrap();
        assert_eq!(crop.dimensions(), (ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE));
    }

    #[test]
    fn test_crop_rejects_degenerate_box() {
        let image = RgbImage::new(50, 50);
        let face = FaceLocation { top: 10, right: 10, bottom: 20, left: 10 };
        assert!(crop_face(&image, face).is_none());
    }

    #[test]
    fn test_crop_at_frame_edge() {
        let image = RgbImage::new(40, 40);
        let face = FaceLocation { top: 0, right: 40, bottom: 40, left: 0 };
        assert!(crop_face(&image, face).is_some());
    }

    #[test]
    fn test_preprocess_normalization() {
        let face = RgbImage::from_pixel(112, 112, image::Rgb([255, 127, 0]));
        let t = preprocess(&face);
        assert_eq!(t.shape(), &[1, 3, 112, 112]);
        assert!((t[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((t[[0, 2, 5, 5]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
