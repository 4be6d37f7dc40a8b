//! Registration/recognition orchestrator.
//!
//! One dedicated OS thread owns the detector, extractor, matcher and store;
//! async callers talk to it through [`EngineHandle`]. Registration is
//! single-flight: a second registration while one is pending is rejected,
//! not queued.

use crate::validate::{validate_registration, ValidationError};
use facereg_core::{
    geometry, DetectionOutcome, DetectorError, FaceDetection, MatchOutcome, Matcher,
    NearestMatcher, RegisteredIdentity, VectorExtractor, VectorSource,
};
use facereg_store::{IdentityStore, StoreError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("photo could not be decoded: {0}")]
    InvalidImage(String),
    #[error("no face detected in photo")]
    NoFace,
    #[error("{0} faces detected; exactly one is required")]
    MultipleFaces(usize),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("vector extraction failed: {0}")]
    Extraction(String),
    #[error("national ID {0} is already registered")]
    DuplicateId(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("another registration is already in progress")]
    Busy,
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Fields captured for a new registration.
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub name: String,
    pub surname: String,
    pub national_id: String,
    pub contact: String,
    /// Encoded photo bytes (PNG/JPEG/...).
    pub photo: Vec<u8>,
}

/// What a successful registration produced.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterOutcome {
    pub national_id: String,
    pub vector_source: VectorSource,
    pub vector_len: usize,
}

/// Tunables fixed at engine startup.
pub struct EngineOptions {
    /// Default minimum similarity for recognition.
    pub match_threshold: f32,
    /// Bounded wait for one operation's reply.
    pub operation_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            match_threshold: 0.70,
            operation_timeout: Duration::from_secs(10),
        }
    }
}

enum EngineRequest {
    Register {
        request: RegistrationRequest,
        reply: oneshot::Sender<Result<RegisterOutcome, EngineError>>,
    },
    Recognize {
        photo: Vec<u8>,
        threshold: f32,
        reply: oneshot::Sender<Result<MatchOutcome, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    register_pending: Arc<AtomicBool>,
    match_threshold: f32,
    operation_timeout: Duration,
}

impl EngineHandle {
    /// Run a registration end to end. At most one registration is in flight
    /// at a time; overlapping calls get [`EngineError::Busy`]. A registration
    /// that hits [`EngineError::Timeout`] is abandoned by the caller but may
    /// still complete on the engine thread, which processes requests one at
    /// a time.
    pub async fn register(
        &self,
        request: RegistrationRequest,
    ) -> Result<RegisterOutcome, EngineError> {
        if self.register_pending.swap(true, Ordering::AcqRel) {
            return Err(EngineError::Busy);
        }
        let result = self.register_inner(request).await;
        self.register_pending.store(false, Ordering::Release);
        result
    }

    async fn register_inner(
        &self,
        request: RegistrationRequest,
    ) -> Result<RegisterOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Register { request, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        self.await_reply(reply_rx).await
    }

    /// Recognize the face in a photo against all registered identities.
    /// `threshold` overrides the engine default when given.
    pub async fn recognize(
        &self,
        photo: Vec<u8>,
        threshold: Option<f32>,
    ) -> Result<MatchOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize {
                photo,
                threshold: threshold.unwrap_or(self.match_threshold),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        self.await_reply(reply_rx).await
    }

    /// Await a worker reply under the bounded operation timeout. On timeout
    /// the in-flight work is abandoned on the engine thread; no partial
    /// writes exist because persistence starts only after extraction.
    async fn await_reply<T>(
        &self,
        reply_rx: oneshot::Receiver<Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        match tokio::time::timeout(self.operation_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EngineError::ChannelClosed),
            Err(_) => Err(EngineError::Timeout(self.operation_timeout)),
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The detector, extractor and store are constructed by the caller and moved
/// in; there is no ambient global state. When no detector is supplied the
/// engine falls back to deterministic synthetic vectors.
pub fn spawn_engine(
    detector: Option<Box<dyn FaceDetection + Send>>,
    extractor: VectorExtractor,
    store: IdentityStore,
    options: EngineOptions,
) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    let mut worker = EngineWorker {
        detector,
        extractor,
        matcher: NearestMatcher,
        store,
    };

    std::thread::Builder::new()
        .name("facereg-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Register { request, reply } => {
                        let _ = reply.send(worker.run_register(request));
                    }
                    EngineRequest::Recognize { photo, threshold, reply } => {
                        let _ = reply.send(worker.run_recognize(&photo, threshold));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle {
        tx,
        register_pending: Arc::new(AtomicBool::new(false)),
        match_threshold: options.match_threshold,
        operation_timeout: options.operation_timeout,
    }
}

struct EngineWorker {
    detector: Option<Box<dyn FaceDetection + Send>>,
    extractor: VectorExtractor,
    matcher: NearestMatcher,
    store: IdentityStore,
}

impl EngineWorker {
    /// Validate → detect → extract → duplicate check → persist.
    fn run_register(&mut self, request: RegistrationRequest) -> Result<RegisterOutcome, EngineError> {
        validate_registration(&request)?;

        let image = image::load_from_memory(&request.photo)
            .map_err(|e| EngineError::InvalidImage(e.to_string()))?;

        let vector = self.compute_vector(&image)?;

        let national_id = request.national_id.trim().to_string();
        if self.store.get(&national_id)?.is_some() {
            return Err(EngineError::DuplicateId(national_id));
        }

        let vector_source = vector.source;
        let vector_len = vector.len();

        // Identity, vector and photo land in a single create call.
        self.store.create(&RegisteredIdentity {
            name: request.name.trim().to_string(),
            surname: request.surname.trim().to_string(),
            national_id: national_id.clone(),
            contact: request.contact.trim().to_string(),
            vector: Some(vector),
            photo: Some(request.photo),
            created_at: String::new(),
        })?;

        tracing::info!(national_id = %national_id, source = vector_source.as_str(), "registration complete");
        Ok(RegisterOutcome { national_id, vector_source, vector_len })
    }

    /// Detect → extract → search. The probe vector is computed transiently
    /// and never persisted; detection failures become terminal messages.
    fn run_recognize(&mut self, photo: &[u8], threshold: f32) -> Result<MatchOutcome, EngineError> {
        let image = match image::load_from_memory(photo) {
            Ok(image) => image,
            Err(e) => {
                return Ok(MatchOutcome::Failed {
                    message: format!("photo could not be decoded: {e}"),
                })
            }
        };

        let vector = match self.compute_vector(&image) {
            Ok(vector) => vector,
            Err(e @ (EngineError::NoFace
            | EngineError::MultipleFaces(_)
            | EngineError::Detector(_)
            | EngineError::Extraction(_))) => {
                return Ok(MatchOutcome::Failed { message: e.to_string() })
            }
            Err(e) => return Err(e),
        };

        let candidates = self.store.list()?;
        let outcome = self.matcher.find_best(&vector, &candidates, threshold);
        tracing::info!(threshold, candidates = candidates.len(), ?outcome, "recognition complete");
        Ok(outcome)
    }

    /// Produce a feature vector for a photo: detect exactly one face and
    /// extract from it, or fall back to a synthetic vector when no detector
    /// is available.
    fn compute_vector(
        &mut self,
        image: &image::DynamicImage,
    ) -> Result<facereg_core::FaceVector, EngineError> {
        let Some(detector) = &mut self.detector else {
            tracing::warn!("no detector available; using synthetic fallback vector");
            return Ok(geometry::synthetic_vector(image));
        };

        let faces = detector.detect(image)?;
        match self.extractor.extract_outcome(image, &faces) {
            DetectionOutcome::Vector(vector) => Ok(vector),
            DetectionOutcome::NoFace => Err(EngineError::NoFace),
            DetectionOutcome::MultipleFaces(n) => Err(EngineError::MultipleFaces(n)),
            DetectionOutcome::Failed(message) => Err(EngineError::Extraction(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facereg_core::{BoundingBox, DetectedFace, Landmarks};
    use image::RgbImage;

    /// Detector returning a preset list of faces, optionally after a delay.
    struct FakeDetector {
        faces: Vec<DetectedFace>,
        delay: Duration,
    }

    impl FaceDetection for FakeDetector {
        fn detect(
            &mut self,
            _image: &image::DynamicImage,
        ) -> Result<Vec<DetectedFace>, DetectorError> {
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            Ok(self.faces.clone())
        }
    }

    fn one_face() -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox { x: 20.0, y: 20.0, width: 60.0, height: 60.0 },
            confidence: 0.95,
            landmarks: Landmarks {
                left_eye: Some((35.0, 40.0)),
                right_eye: Some((65.0, 40.0)),
                nose: Some((50.0, 55.0)),
            },
        }
    }

    fn png_bytes(value: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(100, 100, image::Rgb([value, value, value]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn test_engine(faces: Vec<DetectedFace>, delay: Duration) -> EngineHandle {
        spawn_engine(
            Some(Box::new(FakeDetector { faces, delay })),
            VectorExtractor::new(None),
            IdentityStore::open_in_memory().unwrap(),
            EngineOptions::default(),
        )
    }

    fn request(national_id: &str) -> RegistrationRequest {
        RegistrationRequest {
            name: "Ana".into(),
            surname: "Quispe".into(),
            national_id: national_id.into(),
            contact: "ana@example.com".into(),
            photo: png_bytes(120),
        }
    }

    #[tokio::test]
    async fn test_register_then_recognize_same_photo() {
        let engine = test_engine(vec![one_face()], Duration::ZERO);

        let outcome = engine.register(request("12345678")).await.unwrap();
        assert_eq!(outcome.national_id, "12345678");
        assert_eq!(outcome.vector_source, VectorSource::Geometric);

        // The same photo through the same geometric path matches exactly.
        match engine.recognize(png_bytes(120), None).await.unwrap() {
            MatchOutcome::Found { national_id, similarity, .. } => {
                assert_eq!(national_id, "12345678");
                assert!(similarity > 0.99, "similarity = {similarity}");
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recognize_with_empty_registry() {
        let engine = test_engine(vec![one_face()], Duration::ZERO);
        match engine.recognize(png_bytes(120), None).await.unwrap() {
            MatchOutcome::NotFound { reason } => assert_eq!(reason, "no identities registered"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_duplicate_id_rejected_after_trim() {
        let engine = test_engine(vec![one_face()], Duration::ZERO);
        engine.register(request("12345678")).await.unwrap();

        let err = engine.register(request("  12345678 ")).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateId(id) if id == "12345678"));
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_fields() {
        let engine = test_engine(vec![one_face()], Duration::ZERO);
        let mut r = request("1234567");
        let err = engine.register(r.clone()).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(ValidationError::NationalId)));

        r.national_id = "12345678".into();
        r.contact = "nope".into();
        let err = engine.register(r).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(ValidationError::Contact)));
    }

    #[tokio::test]
    async fn test_register_requires_exactly_one_face() {
        let none = test_engine(vec![], Duration::ZERO);
        let err = none.register(request("12345678")).await.unwrap_err();
        assert!(matches!(err, EngineError::NoFace));

        let two = test_engine(vec![one_face(), one_face()], Duration::ZERO);
        let err = two.register(request("12345678")).await.unwrap_err();
        assert!(matches!(err, EngineError::MultipleFaces(2)));
    }

    #[tokio::test]
    async fn test_recognize_detection_failure_is_terminal_message() {
        let engine = test_engine(vec![], Duration::ZERO);
        match engine.recognize(png_bytes(120), None).await.unwrap() {
            MatchOutcome::Failed { message } => {
                assert!(message.contains("no face"), "message = {message}");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_overlapping_registration_is_rejected() {
        let engine = test_engine(vec![one_face()], Duration::from_millis(300));

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.register(request("11111111")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = engine.register(request("22222222")).await.unwrap_err();
        assert!(matches!(err, EngineError::Busy));

        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_slow_inference_hits_operation_timeout() {
        let engine = spawn_engine(
            Some(Box::new(FakeDetector {
                faces: vec![one_face()],
                delay: Duration::from_millis(500),
            })),
            VectorExtractor::new(None),
            IdentityStore::open_in_memory().unwrap(),
            EngineOptions {
                match_threshold: 0.70,
                operation_timeout: Duration::from_millis(100),
            },
        );

        let err = engine.recognize(png_bytes(120), None).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout(t) if t == Duration::from_millis(100)));

        let err = engine.register(request("12345678")).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_synthetic_fallback_without_detector() {
        let engine = spawn_engine(
            None,
            VectorExtractor::new(None),
            IdentityStore::open_in_memory().unwrap(),
            EngineOptions::default(),
        );

        let outcome = engine.register(request("12345678")).await.unwrap();
        assert_eq!(outcome.vector_source, VectorSource::Synthetic);

        // Identical pixel data yields a bit-identical probe vector.
        match engine.recognize(png_bytes(120), None).await.unwrap() {
            MatchOutcome::Found { similarity, .. } => {
                assert!((similarity - 1.0).abs() < 1e-6);
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }
}
