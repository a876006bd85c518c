use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, SessionOutputs, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use crate::types::{Frame, HandLandmarks, Handedness, PalmRegion};

use super::common::{self, HANDPOSE_INPUT_SIZE};
use super::palm::crop_from_palm;

pub struct HandposeEstimate {
    pub landmarks: HandLandmarks,
    pub handedness: Handedness,
    pub confidence: f32,
}

pub struct HandposeEstimator {
    session: Session,
    min_confidence: f32,
}

impl HandposeEstimator {
    pub fn new(model_path: &Path, min_confidence: f32) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load ORT session from {}", model_path.display()))?;

        Ok(Self {
            session,
            min_confidence,
        })
    }

    /// Landmarks for the hand around `palm`, or `None` when the model is not
    /// confident there is a hand in the crop.
    pub fn estimate(&mut self, frame: &Frame, palm: &PalmRegion) -> Result<Option<HandposeEstimate>> {
        let (center, side, angle) = crop_from_palm(palm);
        let (input, transform) =
            common::prepare_rotated_crop(frame, center, side, angle, HANDPOSE_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run ORT session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("model returned no outputs"));
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flattened: Vec<f32> = coords.iter().copied().collect();
        let crop_landmarks = common::decode_landmarks(&flattened)?;

        let confidence = (first_scalar(&outputs, 1) * palm.score).clamp(0.0, 1.0);
        if confidence < self.min_confidence {
            log::trace!("handpose confidence {confidence:.2} below threshold");
            return Ok(None);
        }

        let projected: Vec<[f32; 3]> = crop_landmarks
            .iter()
            .map(|p| transform.project(*p))
            .collect();

        Ok(Some(HandposeEstimate {
            landmarks: HandLandmarks::new(&projected)?,
            handedness: Handedness::from_score(first_scalar(&outputs, 2)),
            confidence,
        }))
    }
}

fn first_scalar(outputs: &SessionOutputs<'_>, idx: usize) -> f32 {
    if outputs.len() <= idx {
        return 0.0;
    }
    outputs[idx]
        .try_extract_array::<f32>()
        .ok()
        .and_then(|arr| arr.iter().next().copied())
        .unwrap_or(0.0)
}
