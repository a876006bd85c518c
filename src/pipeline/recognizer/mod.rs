mod blaze;
pub mod common;
mod face;
mod handpose;
mod palm;

use anyhow::Result;

use crate::{
    config::VisionConfig,
    gesture::{self, GestureClassifier},
    model_download::{ModelKind, ensure_model_ready},
    types::{DetectedHand, Frame, FrameAnalysis},
};

use self::{
    blaze::DecodeConfig, face::FaceDetector, handpose::HandposeEstimator, palm::PalmDetector,
};

/// The vision stage of the pipeline: everything the server knows about a
/// frame comes out of `analyze`.
pub trait VisionEngine: Send + 'static {
    fn analyze(&mut self, frame: &Frame) -> Result<FrameAnalysis>;

    fn label(&self) -> &'static str;
}

/// Reports nothing. Keeps the stream alive when no models could be loaded.
pub struct PassthroughEngine;

impl VisionEngine for PassthroughEngine {
    fn analyze(&mut self, _frame: &Frame) -> Result<FrameAnalysis> {
        Ok(FrameAnalysis::default())
    }

    fn label(&self) -> &'static str {
        "passthrough"
    }
}

/// Palm detection, handpose landmarks, gesture classification and optional
/// face detection on ONNX Runtime.
pub struct OrtVisionEngine {
    palm_detector: PalmDetector,
    handpose: HandposeEstimator,
    face_detector: Option<FaceDetector>,
    classifier: GestureClassifier,
    max_hands: usize,
}

impl OrtVisionEngine {
    pub fn new(cfg: &VisionConfig) -> Result<Self> {
        let handpose_path = cfg.handpose_model_path();
        let palm_path = cfg.palm_model_path();
        ensure_model_ready(ModelKind::HandposeEstimator, &handpose_path)?;
        ensure_model_ready(ModelKind::PalmDetector, &palm_path)?;

        let palm_detector = PalmDetector::new(
            &palm_path,
            DecodeConfig {
                score_threshold: 0.5,
                nms_threshold: 0.3,
                top_k: cfg.max_hands,
            },
        )?;
        let handpose = HandposeEstimator::new(&handpose_path, cfg.min_hand_confidence)?;

        let face_detector = optional_face_detector(cfg);

        log::info!(
            "handpose ORT backend ready using {} and palm detector {}",
            handpose_path.display(),
            palm_path.display()
        );

        Ok(Self {
            palm_detector,
            handpose,
            face_detector,
            classifier: GestureClassifier::from_optional_model(cfg.gesture_model.as_deref()),
            max_hands: cfg.max_hands,
        })
    }
}

impl VisionEngine for OrtVisionEngine {
    fn analyze(&mut self, frame: &Frame) -> Result<FrameAnalysis> {
        let palms = self.palm_detector.detect(frame).unwrap_or_else(|err| {
            log::warn!("palm detection failed: {err:?}");
            Vec::new()
        });

        let faces = match self.face_detector.as_mut() {
            Some(detector) => detector.detect(frame).unwrap_or_else(|err| {
                log::warn!("face detection failed: {err:?}");
                Vec::new()
            }),
            None => Vec::new(),
        };

        let mut hands = Vec::new();
        for palm in palms.iter().take(self.max_hands) {
            let estimate = match self.handpose.estimate(frame, palm) {
                Ok(Some(estimate)) => estimate,
                Ok(None) => continue,
                Err(err) => {
                    log::warn!("handpose inference failed: {err:?}");
                    continue;
                }
            };

            let thumbs_up = gesture::is_thumbs_up(&estimate.landmarks, estimate.handedness);
            let category = self.classifier.classify(&estimate.landmarks, thumbs_up);
            log::debug!(
                "{} hand ({:.2}): thumbs_up={thumbs_up} gesture={} ({:.2})",
                estimate.handedness.label(),
                estimate.confidence,
                category.kind.name(),
                category.score
            );
            hands.push(DetectedHand {
                landmarks: estimate.landmarks,
                handedness: estimate.handedness,
                score: estimate.confidence,
                thumbs_up,
                gesture: category,
            });
        }

        hands.sort_by(|a, b| b.score.total_cmp(&a.score));

        Ok(FrameAnalysis { hands, faces })
    }

    fn label(&self) -> &'static str {
        "ort"
    }
}

/// Face detection is optional: a missing or broken model disables the stage
/// with a warning instead of failing the engine.
fn optional_face_detector(cfg: &VisionConfig) -> Option<FaceDetector> {
    let Some(path) = cfg.face_model.as_deref() else {
        log::warn!("no face model configured, face detection disabled");
        return None;
    };
    if !path.is_file() {
        log::warn!("face model {} not found, face detection disabled", path.display());
        return None;
    }
    let decode = DecodeConfig {
        score_threshold: cfg.min_face_confidence,
        nms_threshold: 0.3,
        top_k: 16,
    };
    FaceDetector::new(path, decode)
        .map_err(|err| log::warn!("face detection disabled: {err:?}"))
        .ok()
}

/// Starts the ONNX engine, falling back to [`PassthroughEngine`] so a missing
/// model never takes the stream down.
pub fn build_engine(cfg: &VisionConfig) -> Box<dyn VisionEngine> {
    match OrtVisionEngine::new(cfg) {
        Ok(engine) => Box::new(engine),
        Err(err) => {
            log::error!("failed to start ORT vision engine, streaming without detections: {err:?}");
            Box::new(PassthroughEngine)
        }
    }
}

impl<E: VisionEngine + ?Sized> VisionEngine for Box<E> {
    fn analyze(&mut self, frame: &Frame) -> Result<FrameAnalysis> {
        (**self).analyze(frame)
    }

    fn label(&self) -> &'static str {
        (**self).label()
    }
}
