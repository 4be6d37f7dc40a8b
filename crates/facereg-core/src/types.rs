use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a [`FaceVector`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorSource {
    /// Embedding from the ONNX recognition model, L2-normalized.
    Neural,
    /// Hand-engineered features from bounding box and landmarks.
    Geometric,
    /// Deterministic pseudo-vector derived from pixel content. Carries no
    /// biometric meaning; only produced when no detection signal is usable.
    Synthetic,
}

impl VectorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorSource::Neural => "neural",
            VectorSource::Geometric => "geometric",
            VectorSource::Synthetic => "synthetic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "neural" => Some(VectorSource::Neural),
            "geometric" => Some(VectorSource::Geometric),
            "synthetic" => Some(VectorSource::Synthetic),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum VectorParseError {
    #[error("empty vector string")]
    Empty,
    #[error("invalid vector component at position {index}: {value:?}")]
    InvalidComponent { index: usize, value: String },
}

/// Fixed-length face feature vector used for similarity comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceVector {
    pub values: Vec<f32>,
    pub source: VectorSource,
}

impl FaceVector {
    pub fn new(values: Vec<f32>, source: VectorSource) -> Self {
        Self { values, source }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// L2-normalize in place. The zero vector is left unchanged so repeated
    /// normalization stays deterministic.
    pub fn l2_normalize(&mut self) {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut self.values {
                *x /= norm;
            }
        }
    }

    /// Cosine similarity between two vectors, in [-1, 1].
    ///
    /// Returns 0.0 when the lengths differ or either norm is 0 — a defined
    /// result, not an error.
    pub fn similarity(&self, other: &FaceVector) -> f32 {
        if self.values.len() != other.values.len() {
            return 0.0;
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Serialize to the comma-joined decimal form used by the identity store.
    pub fn to_delimited(&self) -> String {
        self.values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse the comma-joined decimal form back into a vector.
    pub fn from_delimited(s: &str, source: VectorSource) -> Result<Self, VectorParseError> {
        if s.trim().is_empty() {
            return Err(VectorParseError::Empty);
        }
        let mut values = Vec::new();
        for (index, part) in s.split(',').enumerate() {
            let trimmed = part.trim();
            let v: f32 = trimmed.parse().map_err(|_| VectorParseError::InvalidComponent {
                index,
                value: trimmed.to_string(),
            })?;
            values.push(v);
        }
        Ok(Self { values, source })
    }
}

/// Bounding box of a detected face, in source image pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Facial landmarks in source image pixels. Each point is optional because
/// not every detector (or every detection) yields all of them.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Landmarks {
    pub left_eye: Option<(f32, f32)>,
    pub right_eye: Option<(f32, f32)>,
    pub nose: Option<(f32, f32)>,
}

/// A single face detection: box, confidence, optional landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub landmarks: Landmarks,
}

/// Outcome of running detection + extraction on one photo.
#[derive(Debug, Clone)]
pub enum DetectionOutcome {
    /// Exactly one face found; its feature vector.
    Vector(FaceVector),
    NoFace,
    MultipleFaces(usize),
    Failed(String),
}

/// A registered person record, keyed by national ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredIdentity {
    pub name: String,
    pub surname: String,
    /// Unique natural key; always stored trimmed.
    pub national_id: String,
    pub contact: String,
    pub vector: Option<FaceVector>,
    /// Raw photo bytes captured at registration, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<Vec<u8>>,
    pub created_at: String,
}

/// Result of matching a probe vector against the registered identities.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Found {
        national_id: String,
        name: String,
        similarity: f32,
    },
    NotFound {
        reason: String,
    },
    Failed {
        message: String,
    },
}

/// Strategy for finding the registered identity closest to a probe vector.
pub trait Matcher {
    fn find_best(
        &self,
        probe: &FaceVector,
        candidates: &[RegisteredIdentity],
        threshold: f32,
    ) -> MatchOutcome;
}

/// Linear-scan nearest match over raw cosine similarity.
///
/// O(n) in the number of candidates with stored vectors; fine at the fleet
/// sizes this registry holds. Ties keep the first-seen candidate: the best is
/// replaced only on strictly greater similarity.
pub struct NearestMatcher;

impl Matcher for NearestMatcher {
    fn find_best(
        &self,
        probe: &FaceVector,
        candidates: &[RegisteredIdentity],
        threshold: f32,
    ) -> MatchOutcome {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, identity) in candidates.iter().enumerate() {
            let Some(vector) = &identity.vector else {
                continue;
            };
            let sim = probe.similarity(vector);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            None => MatchOutcome::NotFound {
                reason: "no identities registered".to_string(),
            },
            Some(idx) if best_sim >= threshold => {
                let identity = &candidates[idx];
                MatchOutcome::Found {
                    national_id: identity.national_id.clone(),
                    name: identity.name.clone(),
                    similarity: best_sim,
                }
            }
            Some(_) => MatchOutcome::NotFound {
                reason: format!("insufficient similarity: {best_sim:.2} < {threshold:.2}"),
            },
        }
    }
}
