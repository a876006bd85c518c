use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use crate::types::{FaceRegion, Frame};

use super::blaze::{self, DecodeConfig, FACE_LAYOUT};
use super::common::{FACE_INPUT_SIZE, prepare_frame_with_size};

/// BlazeFace short-range detector. Expects the same NHWC `[0, 1]` input and
/// `(regressors, scores)` output order as the palm model.
pub struct FaceDetector {
    session: Session,
    anchors: Vec<[f32; 2]>,
    cfg: DecodeConfig,
}

impl FaceDetector {
    pub fn new(model_path: &Path, cfg: DecodeConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load face detector from {}", model_path.display()))?;

        Ok(Self {
            session,
            anchors: blaze::generate_anchors(&FACE_LAYOUT),
            cfg,
        })
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>> {
        let (input, letterbox) = prepare_frame_with_size(frame, FACE_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run face detector session")?;

        if outputs.len() < 2 {
            return Err(anyhow!(
                "face detector returned {} outputs, expected 2",
                outputs.len()
            ));
        }

        let regressors = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;
        let detections = blaze::decode(
            &FACE_LAYOUT,
            &self.anchors,
            regressors
                .as_slice()
                .ok_or_else(|| anyhow!("face regressors not contiguous"))?,
            regressors.shape(),
            scores
                .as_slice()
                .ok_or_else(|| anyhow!("face scores not contiguous"))?,
            scores.shape(),
            &letterbox,
            &self.cfg,
        )?;

        Ok(detections
            .into_iter()
            .map(|d| FaceRegion {
                bbox: d.bbox,
                keypoints: d.keypoints,
                score: d.score,
            })
            .collect())
    }
}
