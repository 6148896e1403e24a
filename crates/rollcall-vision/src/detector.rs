//! SCRFD face detector via ONNX Runtime.
//!
//! The frame is letterboxed into a 640×640 RGB tensor (image at the top-left,
//! padding at the mean so it normalises to zero), the three stride heads are
//! decoded into boxes with five landmarks each, and overlapping boxes are
//! suppressed.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (download det_10g.onnx from insightface)")]
    ModelNotFound(String),
    #[error("unexpected model layout: {0}")]
    BadModel(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A detected face in source-image pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    /// [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: [(f32, f32); 5],
}

impl DetectedFace {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &DetectedFace) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 { inter / union } else { 0.0 }
    }
}

/// Output tensor positions for one stride level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Heads {
    score: usize,
    bbox: usize,
    kps: usize,
}

pub struct FaceDetector {
    session: Session,
    heads: [Heads; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 9 {
            return Err(DetectorError::BadModel(format!(
                "SCRFD needs 9 outputs (score/bbox/kps for 3 strides), got {}",
                names.len()
            )));
        }
        let heads = locate_heads(&names);

        tracing::info!(path = %model_path.display(), outputs = ?names, ?heads, "loaded SCRFD model");
        Ok(Self { session, heads })
    }

    /// Detect faces, most confident first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, scale) = letterbox(image);
        let heads = self.heads;
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut faces = Vec::new();
        for (&stride, head) in STRIDES.iter().zip(heads) {
            let (_, scores) = outputs[head.score]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores/{stride}: {e}")))?;
            let (_, boxes) = outputs[head.bbox]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bbox/{stride}: {e}")))?;
            let (_, kps) = outputs[head.kps]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps/{stride}: {e}")))?;

            faces.extend(decode_level(stride, scores, boxes, kps, scale, SCORE_THRESHOLD));
        }

        let faces = suppress_overlaps(faces, NMS_IOU_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detection done");
        Ok(faces)
    }
}

/// Map output names to stride heads.
///
/// Exports named `score_8`, `bbox_8`, `kps_8`, ... are mapped by name in any
/// order; anything else gets the stock layout of scores, boxes, then
/// keypoints, each for strides 8/16/32.
fn locate_heads(names: &[String]) -> [Heads; 3] {
    let position = |name: String| names.iter().position(|n| *n == name);
    let named: Option<Vec<Heads>> = STRIDES
        .iter()
        .map(|stride| {
            Some(Heads {
                score: position(format!("score_{stride}"))?,
                bbox: position(format!("bbox_{stride}"))?,
                kps: position(format!("kps_{stride}"))?,
            })
        })
        .collect();

    match named {
        Some(heads) => [heads[0], heads[1], heads[2]],
        None => std::array::from_fn(|i| Heads {
            score: i,
            bbox: i + 3,
            kps: i + 6,
        }),
    }
}

/// Resize into the model input, keeping aspect ratio.
///
/// Returns the NCHW tensor and the factor from source to input pixels.
fn letterbox(image: &RgbImage) -> (Array4<f32>, f32) {
    let (w, h) = image.dimensions();
    let scale = (INPUT_SIZE as f32 / w as f32).min(INPUT_SIZE as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, INPUT_SIZE as u32);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, INPUT_SIZE as u32);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    (tensor, scale)
}

/// Decode one stride level. Anchors sit on a `INPUT_SIZE / stride` grid,
/// two per cell; box and keypoint offsets are in stride units.
fn decode_level(
    stride: usize,
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    scale: f32,
    threshold: f32,
) -> Vec<DetectedFace> {
    let grid = INPUT_SIZE / stride;
    let s = stride as f32;

    (0..grid * grid * ANCHORS_PER_CELL)
        .filter(|&idx| scores.get(idx).is_some_and(|&score| score >= threshold))
        .filter_map(|idx| {
            let cell = idx / ANCHORS_PER_CELL;
            let cx = (cell % grid) as f32 * s;
            let cy = (cell / grid) as f32 * s;
            let d = boxes.get(idx * 4..idx * 4 + 4)?;
            let k = kps.get(idx * 10..idx * 10 + 10)?;

            let landmarks = std::array::from_fn(|i| {
                ((cx + k[i * 2] * s) / scale, (cy + k[i * 2 + 1] * s) / scale)
            });
            Some(DetectedFace {
                x1: (cx - d[0] * s) / scale,
                y1: (cy - d[1] * s) / scale,
                x2: (cx + d[2] * s) / scale,
                y2: (cy + d[3] * s) / scale,
                score: scores[idx],
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; the result is ordered by score.
fn suppress_overlaps(mut faces: Vec<DetectedFace>, iou_threshold: f32) -> Vec<DetectedFace> {
    faces.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<DetectedFace> = Vec::with_capacity(faces.len());
    for face in faces {
        if kept.iter().all(|k| k.iou(&face) <= iou_threshold) {
            kept.push(face);
        }
    }
    kept
}
