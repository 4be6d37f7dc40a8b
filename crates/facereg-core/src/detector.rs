//! Face detection capability.
//!
//! [`FaceDetection`] is the seam the orchestrator depends on; the concrete
//! [`OnnxFaceDetector`] runs an SCRFD-family model (anchor-free decode over
//! strides 8/16/32 with NMS) via ONNX Runtime.

use crate::types::{BoundingBox, DetectedFace, Landmarks};
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DET_INPUT_SIZE: u32 = 640;
const DET_MEAN: f32 = 127.5;
const DET_STD: f32 = 128.0;
const DET_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DET_NMS_THRESHOLD: f32 = 0.4;
const DET_STRIDES: [usize; 3] = [8, 16, 32];
const DET_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Capability that turns an image into zero, one, or many face detections,
/// sorted by descending confidence.
pub trait FaceDetection {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<DetectedFace>, DetectorError>;
}

/// SCRFD-family detector over ONNX Runtime.
pub struct OnnxFaceDetector {
    session: Session,
}

impl OnnxFaceDetector {
    /// Load the detection model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();
        if num_outputs < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "detection model requires 9 outputs (3 strides x score/bbox/kps), got {num_outputs}"
            )));
        }

        tracing::info!(path = model_path, outputs = num_outputs, "loaded detection model");
        Ok(Self { session })
    }

    /// Resize into the top-left of a square input and normalize channels.
    ///
    /// InsightFace detection models expect BGR channel order.
    fn preprocess(&self, image: &DynamicImage) -> (Array4<f32>, f32) {
        let side = DET_INPUT_SIZE;
        let scale = side as f32 / image.width().max(image.height()).max(1) as f32;
        let new_w = ((image.width() as f32 * scale) as u32).max(1);
        let new_h = ((image.height() as f32 * scale) as u32).max(1);

        let resized = image.resize_exact(new_w, new_h, FilterType::Triangle).to_rgb8();

        let size = side as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        // Padding stays at zero, which is close enough to the mean-normalized
        // background for detection purposes.
        for y in 0..new_h as usize {
            for x in 0..new_w as usize {
                let pixel = resized.get_pixel(x as u32, y as u32);
                tensor[[0, 0, y, x]] = (pixel[2] as f32 - DET_MEAN) / DET_STD;
                tensor[[0, 1, y, x]] = (pixel[1] as f32 - DET_MEAN) / DET_STD;
                tensor[[0, 2, y, x]] = (pixel[0] as f32 - DET_MEAN) / DET_STD;
            }
        }

        (tensor, scale)
    }
}

impl FaceDetection for OnnxFaceDetector {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<DetectedFace>, DetectorError> {
        let (input, scale) = self.preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut detections = Vec::new();

        // Standard SCRFD output ordering: [0-2] scores, [3-5] bboxes, [6-8]
        // landmarks, each for strides 8/16/32.
        for (stride_pos, &stride) in DET_STRIDES.iter().enumerate() {
            let (_, scores) = outputs[stride_pos]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[stride_pos + 3]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[stride_pos + 6]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            detections.extend(decode_stride(scores, bboxes, kps, stride, scale));
        }

        let mut result = nms(detections, DET_NMS_THRESHOLD);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        tracing::debug!(faces = result.len(), "detection complete");
        Ok(result)
    }
}

/// Decode anchor-free detections for one stride level, mapping coordinates
/// back to the original image space.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    scale: f32,
) -> Vec<DetectedFace> {
    let grid = DET_INPUT_SIZE as usize / stride;
    let num_anchors = grid * grid * DET_ANCHORS_PER_CELL;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= DET_CONFIDENCE_THRESHOLD {
            continue;
        }

        let anchor_idx = idx / DET_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid) as f32 * stride as f32;
        let anchor_cy = (anchor_idx / grid) as f32 * stride as f32;

        let bbox_off = idx * 4;
        if bbox_off + 3 >= bboxes.len() {
            continue;
        }
        let x1 = (anchor_cx - bboxes[bbox_off] * stride as f32) / scale;
        let y1 = (anchor_cy - bboxes[bbox_off + 1] * stride as f32) / scale;
        let x2 = (anchor_cx + bboxes[bbox_off + 2] * stride as f32) / scale;
        let y2 = (anchor_cy + bboxes[bbox_off + 3] * stride as f32) / scale;

        // Five-point landmark set; we keep the three the fallback features use.
        let kps_off = idx * 10;
        let landmarks = if kps_off + 9 < kps.len() {
            let point = |i: usize| {
                Some((
                    (anchor_cx + kps[kps_off + i * 2] * stride as f32) / scale,
                    (anchor_cy + kps[kps_off + i * 2 + 1] * stride as f32) / scale,
                ))
            };
            Landmarks { left_eye: point(0), right_eye: point(1), nose: point(2) }
        } else {
            Landmarks::default()
        };

        detections.push(DetectedFace {
            bbox: BoundingBox { x: x1, y: y1, width: x2 - x1, height: y2 - y1 },
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression over detections sorted by confidence.
fn nms(mut detections: Vec<DetectedFace>, iou_threshold: f32) -> Vec<DetectedFace> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<DetectedFace> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(&k.bbox, &det.bbox) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 { inter / union } else { 0.0 }
}
