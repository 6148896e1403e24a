use crate::alignment;
use crate::detector::FaceDetector;
use crate::recognizer::FaceRecognizer;
use crate::{DETECTOR_MODEL_FILE, RECOGNIZER_MODEL_FILE};
use image::RgbImage;
use rollcall_core::{DistanceMetric, EmbedError, Embedding, FaceEmbedder};
use std::path::Path;

/// Euclidean tolerance for unit-length ArcFace embeddings.
///
/// For unit vectors `d² = 2 − 2·cos`, so 1.1 corresponds to a cosine
/// similarity of roughly 0.4.
pub const ARCFACE_TOLERANCE: f32 = 1.1;

/// SCRFD + ArcFace embedding provider.
pub struct OnnxEmbedder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    tolerance: f32,
}

impl OnnxEmbedder {
    /// Load both models from `model_dir`.
    ///
    /// A missing or broken model makes the provider unavailable, which is
    /// the one failure that stops registration and attendance runs.
    pub fn load(model_dir: &Path) -> Result<Self, EmbedError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))
            .map_err(|e| EmbedError::Unavailable(e.to_string()))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))
            .map_err(|e| EmbedError::Unavailable(e.to_string()))?;
        Ok(Self {
            detector,
            recognizer,
            tolerance: ARCFACE_TOLERANCE,
        })
    }

    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn embed(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EmbedError> {
        let faces = self.detector.detect(image).map_err(EmbedError::failed)?;

        let mut embeddings = Vec::with_capacity(faces.len());
        for face in &faces {
            let crop = alignment::align_face(image, &face.landmarks);
            let embedding = self.recognizer.extract(&crop).map_err(EmbedError::failed)?;
            embeddings.push(embedding);
        }

        tracing::debug!(faces = embeddings.len(), "embedded frame");
        Ok(embeddings)
    }
}

impl DistanceMetric for OnnxEmbedder {
    fn tolerance(&self) -> f32 {
        self.tolerance
    }
}
