//! Feature vector extraction.
//!
//! The primary path runs an ONNX embedding model over the cropped face
//! region. When no model is loaded, the geometric fallback in
//! [`crate::geometry`] takes over.

use crate::geometry;
use crate::types::{BoundingBox, DetectedFace, DetectionOutcome, FaceVector, VectorSource};
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// Fraction of the box size added on each side before cropping.
const BBOX_EXPANSION: f32 = 0.2;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("model output too short: expected at least {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Declared tensor shapes of the embedding model.
///
/// Supplied by whoever provides the model artifact; the batch dimension is
/// read from the model's declared input shape rather than hard-coded, and the
/// single sample is replicated across it.
#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    pub input_size: u32,
    pub embedding_dim: usize,
    pub batch: usize,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self { input_size: 112, embedding_dim: 128, batch: 1 }
    }
}

/// ONNX embedding model wrapper.
pub struct EmbeddingModel {
    session: Session,
    spec: ModelSpec,
}

impl EmbeddingModel {
    /// Load the embedding model from the given path.
    pub fn load(model_path: &str, spec: ModelSpec) -> Result<Self, ExtractorError> {
        if !Path::new(model_path).exists() {
            return Err(ExtractorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            input_size = spec.input_size,
            embedding_dim = spec.embedding_dim,
            batch = spec.batch,
            "loaded embedding model"
        );

        Ok(Self { session, spec })
    }

    /// Run the model over a face crop and return the L2-normalized embedding.
    ///
    /// Only the first output row is used; any replicated batch rows are
    /// discarded. A zero-norm output is returned unchanged.
    pub fn embed(&mut self, face_crop: &DynamicImage) -> Result<FaceVector, ExtractorError> {
        let input = preprocess(face_crop, &self.spec);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractorError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() < self.spec.embedding_dim {
            return Err(ExtractorError::ShapeMismatch {
                expected: self.spec.embedding_dim,
                actual: raw.len(),
            });
        }

        let mut vector = FaceVector::new(raw[..self.spec.embedding_dim].to_vec(), VectorSource::Neural);
        vector.l2_normalize();
        Ok(vector)
    }
}

/// Resize a face crop to the model input and build an NCHW tensor with each
/// RGB channel normalized to [0, 1]. The sample is replicated across the
/// declared batch dimension.
fn preprocess(face_crop: &DynamicImage, spec: &ModelSpec) -> Array4<f32> {
    let size = spec.input_size;
    let batch = spec.batch.max(1);
    let rgb = face_crop
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb8();

    let side = size as usize;
    let mut tensor = Array4::<f32>::zeros((batch, 3, side, side));

    for y in 0..side {
        for x in 0..side {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            for c in 0..3 {
                let normalized = pixel[c] as f32 / 255.0;
                for b in 0..batch {
                    tensor[[b, c, y, x]] = normalized;
                }
            }
        }
    }

    tensor
}

/// Crop the face region with a 20% margin on each side, clamped to the image.
pub fn crop_face_region(image: &DynamicImage, bbox: &BoundingBox) -> DynamicImage {
    let img_w = image.width() as f32;
    let img_h = image.height() as f32;

    let margin_x = bbox.width * BBOX_EXPANSION;
    let margin_y = bbox.height * BBOX_EXPANSION;

    let x0 = (bbox.x - margin_x).max(0.0);
    let y0 = (bbox.y - margin_y).max(0.0);
    let x1 = (bbox.x + bbox.width + margin_x).min(img_w);
    let y1 = (bbox.y + bbox.height + margin_y).min(img_h);

    let w = ((x1 - x0) as u32).max(1);
    let h = ((y1 - y0) as u32).max(1);

    image.crop_imm(x0 as u32, y0 as u32, w, h)
}

/// Turns a detected face into a feature vector, choosing the neural path when
/// a model is loaded and the geometric fallback otherwise.
pub struct VectorExtractor {
    model: Option<EmbeddingModel>,
}

impl VectorExtractor {
    pub fn new(model: Option<EmbeddingModel>) -> Self {
        Self { model }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Extract a feature vector for one detected face.
    pub fn extract(
        &mut self,
        image: &DynamicImage,
        face: &DetectedFace,
    ) -> Result<FaceVector, ExtractorError> {
        match &mut self.model {
            Some(model) => {
                let crop = crop_face_region(image, &face.bbox);
                model.embed(&crop)
            }
            None => Ok(geometry::geometric_vector(face, image.width(), image.height())),
        }
    }

    /// Interpret a detection set for one photo and produce the outcome.
    ///
    /// Exactly one face yields a vector; zero or several faces are reported
    /// as such; extraction failures are captured as messages, never panics.
    pub fn extract_outcome(
        &mut self,
        image: &DynamicImage,
        faces: &[DetectedFace],
    ) -> DetectionOutcome {
        match faces {
            [] => DetectionOutcome::NoFace,
            [face] => match self.extract(image, face) {
                Ok(vector) => DetectionOutcome::Vector(vector),
                Err(e) => {
                    tracing::warn!(error = %e, "vector extraction failed");
                    DetectionOutcome::Failed(e.to_string())
                }
            },
            many => DetectionOutcome::MultipleFaces(many.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Landmarks;
    use image::RgbImage;

    fn test_image(w: u32, h: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, image::Rgb([value, value, value])))
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let spec = ModelSpec { input_size: 16, embedding_dim: 128, batch: 2 };
        let tensor = preprocess(&test_image(64, 64, 255), &spec);
        assert_eq!(tensor.shape(), &[2, 3, 16, 16]);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);

        let dark = preprocess(&test_image(64, 64, 0), &spec);
        assert_eq!(dark[[0, 1, 5, 5]], 0.0);
    }

    #[test]
    fn test_preprocess_replicates_batch_rows() {
        let spec = ModelSpec { input_size: 8, embedding_dim: 128, batch: 2 };
        let tensor = preprocess(&test_image(32, 32, 100), &spec);
        for c in 0..3 {
            for y in 0..8 {
                for x in 0..8 {
                    assert_eq!(tensor[[0, c, y, x]], tensor[[1, c, y, x]]);
                }
            }
        }
    }

    #[test]
    fn test_crop_expands_by_margin() {
        let image = test_image(400, 400, 10);
        let bbox = BoundingBox { x: 100.0, y: 100.0, width: 100.0, height: 100.0 };
        let crop = crop_face_region(&image, &bbox);
        // 20% margin on each side: 100 + 2*20
        assert_eq!(crop.width(), 140);
        assert_eq!(crop.height(), 140);
    }

    #[test]
    fn test_crop_clamps_to_image_bounds() {
        let image = test_image(120, 120, 10);
        let bbox = BoundingBox { x: 0.0, y: 0.0, width: 110.0, height: 110.0 };
        let crop = crop_face_region(&image, &bbox);
        assert!(crop.width() <= 120);
        assert!(crop.height() <= 120);
    }

    #[test]
    fn test_extract_without_model_uses_geometric_path() {
        let mut extractor = VectorExtractor::new(None);
        let image = test_image(640, 480, 50);
        let face = DetectedFace {
            bbox: BoundingBox { x: 10.0, y: 10.0, width: 100.0, height: 100.0 },
            confidence: 0.8,
            landmarks: Landmarks::default(),
        };
        let vector = extractor.extract(&image, &face).unwrap();
        assert_eq!(vector.source, VectorSource::Geometric);
        assert_eq!(vector.len(), geometry::GEOMETRIC_DIM);
    }

    #[test]
    fn test_extract_outcome_counts_faces() {
        let mut extractor = VectorExtractor::new(None);
        let image = test_image(640, 480, 50);
        let face = DetectedFace {
            bbox: BoundingBox { x: 10.0, y: 10.0, width: 100.0, height: 100.0 },
            confidence: 0.8,
            landmarks: Landmarks::default(),
        };

        assert!(matches!(extractor.extract_outcome(&image, &[]), DetectionOutcome::NoFace));
        assert!(matches!(
            extractor.extract_outcome(&image, &[face.clone()]),
            DetectionOutcome::Vector(_)
        ));
        assert!(matches!(
            extractor.extract_outcome(&image, &[face.clone(), face]),
            DetectionOutcome::MultipleFaces(2)
        ));
    }
}
