//! rollcall-vision — face embedding provider backed by ONNX Runtime.
//!
//! SCRFD finds faces and their five landmarks, each face is aligned to the
//! canonical ArcFace crop, and ArcFace turns the crop into a unit-length
//! 512-dimensional embedding.

pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod recognizer;

pub use detector::{DetectedFace, DetectorError, FaceDetector};
pub use embedder::OnnxEmbedder;
pub use recognizer::{FaceRecognizer, RecognizerError};

/// SCRFD model file name expected in the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace model file name expected in the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";
