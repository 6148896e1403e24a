//! Embedding provider seam.
//!
//! The face model is an external collaborator. It is split into two traits:
//! [`FaceEmbedder`] turns an image into one embedding per detected face, and
//! [`DistanceMetric`] says how far apart two embeddings are and how far is
//! still "the same person".

use crate::types::Embedding;
use image::RgbImage;
use thiserror::Error;

/// Default match tolerance for dlib-style 128-d embeddings.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    #[error("embedding failed: {0}")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl EmbedError {
    pub fn failed<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(Box::new(err))
    }
}

/// Produces 0..N embeddings per image, one per detected face.
///
/// Implementations return faces in detector preference order: the first
/// embedding is the one used when a registration image holds several faces.
pub trait FaceEmbedder {
    fn embed(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EmbedError>;
}

impl<T: FaceEmbedder + ?Sized> FaceEmbedder for &mut T {
    fn embed(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EmbedError> {
        (**self).embed(image)
    }
}

impl<T: FaceEmbedder + ?Sized> FaceEmbedder for Box<T> {
    fn embed(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EmbedError> {
        (**self).embed(image)
    }
}

/// Distance between embeddings and the largest distance that still counts
/// as a match.
pub trait DistanceMetric {
    fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        a.euclidean_distance(b)
    }

    fn tolerance(&self) -> f32 {
        DEFAULT_TOLERANCE
    }
}

/// Plain Euclidean distance with a configurable tolerance.
#[derive(Debug, Clone, Copy)]
pub struct Euclidean {
    pub tolerance: f32,
}

impl Default for Euclidean {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl DistanceMetric for Euclidean {
    fn tolerance(&self) -> f32 {
        self.tolerance
    }
}
