//! SCRFD face detector via ONNX Runtime, on RGB frames.
//!
//! The frame is letterboxed into a 640×640 tensor, the three stride heads
//! are decoded into boxes, and overlapping boxes are suppressed.

use crate::types::FaceLocation;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Detection in frame pixel space, before rounding to a [`FaceLocation`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
}

impl Detection {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Round outward and clamp to a `width`×`height` frame.
    pub fn to_location(&self, width: u32, height: u32) -> FaceLocation {
        let clamp = |v: f32, max: u32| v.max(0.0).min(max.saturating_sub(1) as f32);
        FaceLocation {
            top: clamp(self.y1.floor(), height) as u32,
            right: clamp(self.x2.ceil(), width) as u32,
            bottom: clamp(self.y2.ceil(), height) as u32,
            left: clamp(self.x1.floor(), width) as u32,
        }
    }
}

/// Scale and padding applied by the letterbox, for mapping boxes back.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
}

pub struct FaceDetector {
    session: Session,
    /// Output slot of (scores, boxes) for each stride.
    heads: [(usize, usize); 3],
    score_threshold: f32,
    nms_threshold: f32,
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {} outputs",
                names.len()
            )));
        }
        let heads = output_heads(&names);
        tracing::info!(path = %model_path.display(), outputs = ?names, ?heads, "loaded SCRFD model");

        Ok(Self {
            session,
            heads,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        })
    }

    /// Detect faces, best score first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.heads[slot];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, boxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("boxes stride {stride}: {e}")))?;
            candidates.extend(decode_stride(scores, boxes, stride, &letterbox, self.score_threshold));
        }

        let kept = nms(candidates, self.nms_threshold);
        tracing::trace!(faces = kept.len(), "SCRFD detections");
        Ok(kept)
    }
}

/// Map output names to (score, bbox) slots per stride.
///
/// Exports named `score_8`/`bbox_8`/... are matched by name; anything else
/// uses the standard positional layout (scores 0-2, boxes 3-5).
fn output_heads(names: &[String]) -> [(usize, usize); 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };
    let mut heads = [(0, 3), (1, 4), (2, 5)];
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride)) {
            (Some(s), Some(b)) => heads[slot] = (s, b),
            _ => return [(0, 3), (1, 4), (2, 5)],
        }
    }
    heads
}

/// Letterbox the frame into the SCRFD input and normalize to NCHW.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let size = SCRFD_INPUT_SIZE;
    let scale = (size as f32 / image.width() as f32).min(size as f32 / image.height() as f32);
    let new_w = ((image.width() as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((image.height() as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    // Zero is the normalized value of the mean, so padding stays neutral.
    let n = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, n, n));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = ((x + pad_x) as usize, (y + pad_y) as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, Letterbox { scale, pad_x, pad_y })
}

fn decode_stride(scores: &[f32], boxes: &[f32], stride: usize, letterbox: &Letterbox, threshold: f32) -> Vec<Detection> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;
    let unmap_x = |v: f32| (v - letterbox.pad_x as f32) / letterbox.scale;
    let unmap_y = |v: f32| (v - letterbox.pad_y as f32) / letterbox.scale;

    (0..anchors.min(scores.len()))
        .filter(|&i| scores[i] > threshold)
        .filter_map(|i| {
            let off = i * 4;
            let d = boxes.get(off..off + 4)?;
            let cell = i / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid) as f32 * s;
            let cy = (cell / grid) as f32 * s;
            Some(Detection {
                x1: unmap_x(cx - d[0] * s),
                y1: unmap_y(cy - d[1] * s),
                x2: unmap_x(cx + d[2] * s),
                y2: unmap_y(cy + d[3] * s),
                score: scores[i],
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; output is sorted by descending score.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let inter = Detection {
        x1: a.x1.max(b.x1),
        y1: a.y1.max(b.y1),
        x2: a.x2.min(b.x2),
        y2: a.y2.min(b.y2),
        score: 0.0,
    }
    .area();
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
