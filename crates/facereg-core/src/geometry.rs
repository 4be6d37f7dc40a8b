//! Fallback feature vectors for when no embedding model is loaded.
//!
//! The geometric path derives features from the detector's bounding box and
//! landmarks. The synthetic path is a last resort for images with no usable
//! detection signal; it is deterministic but carries no biometric meaning.

use crate::types::{DetectedFace, FaceVector, VectorSource};
use image::DynamicImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

/// Relative position substituted for a missing landmark (box center).
const DEFAULT_RELATIVE_LANDMARK: (f32, f32) = (0.5, 0.5);
/// Eye-to-eye distance (fraction of face width) substituted when an eye is missing.
const DEFAULT_EYE_DISTANCE: f32 = 0.3;
/// Eye-to-nose distance (fraction of face width) substituted when a landmark is missing.
const DEFAULT_EYE_NOSE_DISTANCE: f32 = 0.25;

pub const GEOMETRIC_DIM: usize = 13;
pub const SYNTHETIC_DIM: usize = 128;

/// Position of a landmark relative to the face box, in [0, 1] for points
/// inside the box.
fn relative_position(point: Option<(f32, f32)>, face: &DetectedFace) -> (f32, f32) {
    let bbox = &face.bbox;
    match point {
        Some((x, y)) if bbox.width > 0.0 && bbox.height > 0.0 => {
            ((x - bbox.x) / bbox.width, (y - bbox.y) / bbox.height)
        }
        _ => DEFAULT_RELATIVE_LANDMARK,
    }
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Derive a 13-dimensional feature vector from box shape and landmark layout.
///
/// Features: normalized box width/height, aspect ratio, normalized center
/// x/y, relative left-eye/right-eye/nose positions, and eye-to-eye and
/// eye-to-nose distances normalized by face width. Missing landmarks fall
/// back to fixed defaults. The result is deliberately not L2-normalized;
/// cosine similarity is scale-invariant.
pub fn geometric_vector(face: &DetectedFace, image_width: u32, image_height: u32) -> FaceVector {
    let bbox = &face.bbox;
    let img_w = image_width.max(1) as f32;
    let img_h = image_height.max(1) as f32;

    let aspect = if bbox.height > 0.0 { bbox.width / bbox.height } else { 0.0 };
    let center_x = (bbox.x + bbox.width / 2.0) / img_w;
    let center_y = (bbox.y + bbox.height / 2.0) / img_h;

    let left_eye = relative_position(face.landmarks.left_eye, face);
    let right_eye = relative_position(face.landmarks.right_eye, face);
    let nose = relative_position(face.landmarks.nose, face);

    let eye_distance = match (face.landmarks.left_eye, face.landmarks.right_eye) {
        (Some(l), Some(r)) if bbox.width > 0.0 => distance(l, r) / bbox.width,
        _ => DEFAULT_EYE_DISTANCE,
    };
    let eye_nose_distance = match (face.landmarks.left_eye, face.landmarks.nose) {
        (Some(l), Some(n)) if bbox.width > 0.0 => distance(l, n) / bbox.width,
        _ => DEFAULT_EYE_NOSE_DISTANCE,
    };

    let values = vec![
        bbox.width / img_w,
        bbox.height / img_h,
        aspect,
        center_x,
        center_y,
        left_eye.0,
        left_eye.1,
        right_eye.0,
        right_eye.1,
        nose.0,
        nose.1,
        eye_distance,
        eye_nose_distance,
    ];

    debug_assert_eq!(values.len(), GEOMETRIC_DIM);
    FaceVector::new(values, VectorSource::Geometric)
}

/// Derive a deterministic pseudo-vector from image content.
///
/// SHA-256 over the pixel sum and dimensions seeds a reproducible RNG, so
/// identical pixel data always yields a bit-identical vector. Not suitable
/// for production matching; every call logs a warning.
pub fn synthetic_vector(image: &DynamicImage) -> FaceVector {
    let rgb = image.to_rgb8();
    let pixel_sum: u64 = rgb.as_raw().iter().map(|&b| b as u64).sum();

    let mut hasher = Sha256::new();
    hasher.update(pixel_sum.to_le_bytes());
    hasher.update(rgb.width().to_le_bytes());
    hasher.update(rgb.height().to_le_bytes());
    let digest = hasher.finalize();
    let mut seed_bytes = [0u8; 8];
    seed_bytes.copy_from_slice(&digest[..8]);
    let seed = u64::from_le_bytes(seed_bytes);

    tracing::warn!(
        seed,
        "generating synthetic fallback vector; no biometric meaning"
    );

    let mut rng = StdRng::seed_from_u64(seed);
    let values: Vec<f32> = (0..SYNTHETIC_DIM)
        .map(|_| rng.gen_range(-1.0f32..1.0))
        .collect();
    FaceVector::new(values, VectorSource::Synthetic)
}
