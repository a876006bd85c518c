use std::{f32::consts::PI, path::Path};

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use crate::types::{Frame, PalmRegion};

use super::blaze::{self, DecodeConfig, PALM_LAYOUT};
use super::common::{PALM_INPUT_SIZE, prepare_frame_with_size};

// Crop side relative to the palm extent, generous enough to keep fingertips.
const CROP_EXPANSION: f32 = 2.4;
const MIN_CROP_SIDE: f32 = 80.0;

pub struct PalmDetector {
    session: Session,
    anchors: Vec<[f32; 2]>,
    cfg: DecodeConfig,
}

impl PalmDetector {
    pub fn new(model_path: &Path, cfg: DecodeConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load palm detector from {}", model_path.display())
            })?;

        Ok(Self {
            session,
            anchors: blaze::generate_anchors(&PALM_LAYOUT),
            cfg,
        })
    }

    /// Palms in the frame, most confident first.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<PalmRegion>> {
        let (input, letterbox) = prepare_frame_with_size(frame, PALM_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run palm detector session")?;

        if outputs.len() < 2 {
            return Err(anyhow!(
                "palm detector returned {} outputs, expected at least 2",
                outputs.len()
            ));
        }

        let boxes = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;

        let detections = blaze::decode(
            &PALM_LAYOUT,
            &self.anchors,
            boxes
                .as_slice()
                .ok_or_else(|| anyhow!("palm boxes not contiguous"))?,
            boxes.shape(),
            scores
                .as_slice()
                .ok_or_else(|| anyhow!("palm scores not contiguous"))?,
            scores.shape(),
            &letterbox,
            &self.cfg,
        )?;

        Ok(detections
            .into_iter()
            .map(|d| PalmRegion {
                bbox: d.bbox,
                landmarks: d.keypoints,
                score: d.score,
            })
            .collect())
    }
}

/// Centre, side length and rotation of the square the handpose model sees.
pub fn crop_from_palm(region: &PalmRegion) -> ((f32, f32), f32, f32) {
    let center = if region.landmarks.is_empty() {
        (
            (region.bbox[0] + region.bbox[2]) * 0.5,
            (region.bbox[1] + region.bbox[3]) * 0.5,
        )
    } else {
        mean(&region.landmarks)
    };

    let base_w = (region.bbox[2] - region.bbox[0]).abs();
    let base_h = (region.bbox[3] - region.bbox[1]).abs();
    let landmark_span = if region.landmarks.is_empty() {
        0.0
    } else {
        let (min_x, max_x, min_y, max_y) = region
            .landmarks
            .iter()
            .fold((f32::MAX, f32::MIN, f32::MAX, f32::MIN), |acc, (x, y)| {
                (acc.0.min(*x), acc.1.max(*x), acc.2.min(*y), acc.3.max(*y))
            });
        (max_x - min_x).max(max_y - min_y)
    };
    let side = base_w.max(base_h).max(landmark_span).max(MIN_CROP_SIDE) * CROP_EXPANSION;

    (center, side, estimate_orientation(region))
}

fn mean(points: &[(f32, f32)]) -> (f32, f32) {
    let (sx, sy) = points
        .iter()
        .fold((0.0_f32, 0.0_f32), |acc, p| (acc.0 + p.0, acc.1 + p.1));
    (sx / points.len() as f32, sy / points.len() as f32)
}

/// Rotation that turns the palm keypoints' principal axis upright.
pub fn estimate_orientation(region: &PalmRegion) -> f32 {
    if region.landmarks.len() < 2 {
        return 0.0;
    }

    let n = region.landmarks.len() as f32;
    let (mx, my) = mean(&region.landmarks);
    let (mut cov_xx, mut cov_xy, mut cov_yy) = (0.0, 0.0, 0.0);
    for (x, y) in &region.landmarks {
        let dx = x - mx;
        let dy = y - my;
        cov_xx += dx * dx;
        cov_xy += dx * dy;
        cov_yy += dy * dy;
    }
    cov_xx /= n;
    cov_xy /= n;
    cov_yy /= n;

    let trace = cov_xx + cov_yy;
    let det = cov_xx * cov_yy - cov_xy * cov_xy;
    let lambda1 = (trace * 0.5 + ((trace * 0.5).powi(2) - det).max(0.0).sqrt()).max(1e-6);
    let (vx, vy) = if cov_xy.abs() > 1e-6 {
        (lambda1 - cov_yy, cov_xy)
    } else if cov_xx >= cov_yy {
        (1.0, 0.0)
    } else {
        (0.0, 1.0)
    };

    vy.atan2(vx) - PI * 0.5
}
