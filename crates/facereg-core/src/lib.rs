//! facereg-core — face detection, feature vectors, and nearest-match search.
//!
//! Detection runs an SCRFD-family model via ONNX Runtime; feature vectors
//! come from an embedding model when one is loaded, or from geometric
//! landmark features otherwise.

pub mod detector;
pub mod extractor;
pub mod geometry;
pub mod types;

pub use detector::{DetectorError, FaceDetection, OnnxFaceDetector};
pub use extractor::{EmbeddingModel, ExtractorError, ModelSpec, VectorExtractor};
pub use types::{
    BoundingBox, DetectedFace, DetectionOutcome, FaceVector, Landmarks, MatchOutcome, Matcher,
    NearestMatcher, RegisteredIdentity, VectorSource,
};
