//! Box and keypoint decoding shared by the BlazePalm and BlazeFace detectors.
//!
//! Both models emit one regression row per SSD anchor: `[cx, cy, w, h,
//! kx0, ky0, kx1, ky1, ...]` in input pixels relative to the anchor centre,
//! plus a raw logit score per anchor.

use std::cmp::Ordering;

use anyhow::{Result, anyhow};

use super::common::LetterboxInfo;

#[derive(Clone, Debug)]
pub struct BlazeLayout {
    pub input_size: u32,
    pub strides: &'static [u32],
    pub keypoints: usize,
}

pub const PALM_LAYOUT: BlazeLayout = BlazeLayout {
    input_size: 192,
    strides: &[8, 16, 16, 16],
    keypoints: 7,
};

pub const FACE_LAYOUT: BlazeLayout = BlazeLayout {
    input_size: 128,
    strides: &[8, 16, 16, 16],
    keypoints: 6,
};

#[derive(Clone, Debug)]
pub struct DecodeConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
}

#[derive(Clone, Debug)]
pub struct BlazeDetection {
    pub bbox: [f32; 4],
    pub keypoints: Vec<(f32, f32)>,
    pub score: f32,
}

/// Normalized anchor centres in model output order.
///
/// Consecutive layers sharing a stride are merged into one feature map with
/// two anchors per layer at every cell (fixed anchor size, aspect ratio 1
/// plus the interpolated scale).
pub fn generate_anchors(layout: &BlazeLayout) -> Vec<[f32; 2]> {
    let mut anchors = Vec::new();
    let mut layer = 0;
    while layer < layout.strides.len() {
        let stride = layout.strides[layer];
        let mut per_cell = 0;
        while layer < layout.strides.len() && layout.strides[layer] == stride {
            per_cell += 2;
            layer += 1;
        }

        let cells = layout.input_size.div_ceil(stride);
        for y in 0..cells {
            for x in 0..cells {
                let center = [
                    (x as f32 + 0.5) / cells as f32,
                    (y as f32 + 0.5) / cells as f32,
                ];
                anchors.extend(std::iter::repeat_n(center, per_cell));
            }
        }
    }
    anchors
}

/// Decodes raw detector outputs into frame-space detections after NMS.
pub fn decode(
    layout: &BlazeLayout,
    anchors: &[[f32; 2]],
    regressors: &[f32],
    regressor_shape: &[usize],
    scores: &[f32],
    score_shape: &[usize],
    letterbox: &LetterboxInfo,
    cfg: &DecodeConfig,
) -> Result<Vec<BlazeDetection>> {
    let (anchor_dim, feature_dim) = trailing_dims(regressor_shape, "box")?;
    let (score_anchor_dim, score_feature_dim) = trailing_dims(score_shape, "score")?;

    if feature_dim < 4 + layout.keypoints * 2 {
        return Err(anyhow!("box feature dimension too small: {feature_dim}"));
    }
    if anchor_dim != score_anchor_dim {
        return Err(anyhow!(
            "anchor dimension mismatch between boxes ({anchor_dim}) and scores ({score_anchor_dim})"
        ));
    }
    if regressors.len() < anchor_dim * feature_dim || scores.len() < anchor_dim * score_feature_dim
    {
        return Err(anyhow!("detector output shorter than its declared shape"));
    }

    // Letterboxed input coordinates back to source pixels.
    let scale = letterbox.orig_w.max(letterbox.orig_h) as f32;
    let pad_bias_x = letterbox.pad_x / letterbox.scale;
    let pad_bias_y = letterbox.pad_y / letterbox.scale;
    let input = layout.input_size as f32;
    let to_frame = |nx: f32, ny: f32| (nx * scale - pad_bias_x, ny * scale - pad_bias_y);

    let mut candidates = Vec::new();
    for (idx, anchor) in anchors.iter().take(anchor_dim).enumerate() {
        let score = sigmoid(scores[idx * score_feature_dim]);
        if score < cfg.score_threshold {
            continue;
        }

        let row = &regressors[idx * feature_dim..(idx + 1) * feature_dim];
        let cx = row[0] / input + anchor[0];
        let cy = row[1] / input + anchor[1];
        let hw = row[2] / input / 2.0;
        let hh = row[3] / input / 2.0;

        let (x1, y1) = to_frame(cx - hw, cy - hh);
        let (x2, y2) = to_frame(cx + hw, cy + hh);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        let keypoints = (0..layout.keypoints)
            .map(|k| {
                let kx = row[4 + k * 2] / input + anchor[0];
                let ky = row[4 + k * 2 + 1] / input + anchor[1];
                to_frame(kx, ky)
            })
            .collect();

        candidates.push(BlazeDetection {
            bbox: clamp_box([x1, y1, x2, y2], letterbox.orig_w, letterbox.orig_h),
            keypoints,
            score,
        });
    }

    let kept = nms(&candidates, cfg.nms_threshold, cfg.top_k);
    let mut kept_set = vec![false; candidates.len()];
    for idx in &kept {
        kept_set[*idx] = true;
    }
    let mut by_index: Vec<Option<BlazeDetection>> = candidates
        .into_iter()
        .zip(kept_set)
        .map(|(c, keep)| keep.then_some(c))
        .collect();

    Ok(kept
        .into_iter()
        .filter_map(|idx| by_index[idx].take())
        .collect())
}

fn trailing_dims(shape: &[usize], what: &str) -> Result<(usize, usize)> {
    match shape {
        [.., anchors, features] if shape.len() >= 3 => Ok((*anchors, *features)),
        _ => Err(anyhow!(
            "unexpected {what} shape {shape:?}, need [batch, anchors, features]"
        )),
    }
}

/// Greedy non-max suppression; returns indices ordered by descending score.
pub fn nms(candidates: &[BlazeDetection], threshold: f32, top_k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|a, b| {
        candidates[*b]
            .score
            .partial_cmp(&candidates[*a].score)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<usize> = Vec::new();
    'outer: for &idx in &order {
        for &k in &keep {
            if iou(&candidates[idx].bbox, &candidates[k].bbox) >= threshold {
                continue 'outer;
            }
        }
        keep.push(idx);
        if keep.len() >= top_k {
            break;
        }
    }
    keep
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    if inter <= 0.0 {
        return 0.0;
    }

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn clamp_box(b: [f32; 4], w: u32, h: u32) -> [f32; 4] {
    let max_w = (w.saturating_sub(1)) as f32;
    let max_h = (h.saturating_sub(1)) as f32;
    [
        b[0].clamp(0.0, max_w),
        b[1].clamp(0.0, max_h),
        b[2].clamp(0.0, max_w),
        b[3].clamp(0.0, max_h),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn detection(bbox: [f32; 4], score: f32) -> BlazeDetection {
        BlazeDetection {
            bbox,
            keypoints: Vec::new(),
            score,
        }
    }

    #[test]
    fn test_anchor_counts() {
        assert_eq!(generate_anchors(&PALM_LAYOUT).len(), 2016);
        assert_eq!(generate_anchors(&FACE_LAYOUT).len(), 896);
    }

    #[test]
    fn test_anchor_order() {
        let anchors = generate_anchors(&FACE_LAYOUT);
        // Stride 8 map is 16x16 with two anchors per cell.
        assert_eq!(anchors[0], [0.5 / 16.0, 0.5 / 16.0]);
        assert_eq!(anchors[1], anchors[0]);
        assert_eq!(anchors[2], [1.5 / 16.0, 0.5 / 16.0]);
        // Then the merged stride 16 map, 8x8 with six anchors per cell.
        assert_eq!(anchors[512], [0.5 / 8.0, 0.5 / 8.0]);
        assert_eq!(anchors[517], anchors[512]);
        assert_eq!(anchors[518], [1.5 / 8.0, 0.5 / 8.0]);
        assert_eq!(anchors[895], [7.5 / 8.0, 7.5 / 8.0]);
    }

    #[test]
    fn test_iou() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert_relative_eq!(iou(&a, &a), 1.0);
        assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
        assert_relative_eq!(iou(&a, &[5.0, 0.0, 15.0, 10.0]), 50.0 / 150.0);
    }

    #[test]
    fn test_nms_suppresses_overlaps() {
        let candidates = vec![
            detection([0.0, 0.0, 10.0, 10.0], 0.6),
            detection([1.0, 1.0, 11.0, 11.0], 0.9),
            detection([50.0, 50.0, 60.0, 60.0], 0.7),
        ];
        assert_eq!(nms(&candidates, 0.3, 10), vec![1, 2]);
        assert_eq!(nms(&candidates, 0.3, 1), vec![1]);
    }

    #[test]
    fn test_decode_single_anchor() {
        let layout = BlazeLayout {
            input_size: 100,
            strides: &[50],
            keypoints: 1,
        };
        let anchors = vec![[0.5, 0.5]];
        // Box 20x40 centred 10px right of the anchor, keypoint at the anchor.
        let regressors = [10.0, 0.0, 20.0, 40.0, 0.0, 0.0];
        let letterbox = LetterboxInfo {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            orig_w: 100,
            orig_h: 100,
        };
        let cfg = DecodeConfig {
            score_threshold: 0.5,
            nms_threshold: 0.3,
            top_k: 4,
        };

        let found = decode(
            &layout,
            &anchors,
            &regressors,
            &[1, 1, 6],
            &[4.0],
            &[1, 1, 1],
            &letterbox,
            &cfg,
        )
        .unwrap();
        assert_eq!(found.len(), 1);
        let det = &found[0];
        assert_relative_eq!(det.bbox[0], 50.0, epsilon = 1e-4);
        assert_relative_eq!(det.bbox[1], 30.0, epsilon = 1e-4);
        assert_relative_eq!(det.bbox[2], 70.0, epsilon = 1e-4);
        assert_relative_eq!(det.bbox[3], 70.0, epsilon = 1e-4);
        assert_relative_eq!(det.keypoints[0].0, 50.0, epsilon = 1e-4);
        assert!(det.score > 0.98);

        let none = decode(
            &layout,
            &anchors,
            &regressors,
            &[1, 1, 6],
            &[-4.0],
            &[1, 1, 1],
            &letterbox,
            &cfg,
        )
        .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_shapes() {
        let letterbox = LetterboxInfo {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            orig_w: 10,
            orig_h: 10,
        };
        let cfg = DecodeConfig {
            score_threshold: 0.5,
            nms_threshold: 0.3,
            top_k: 4,
        };
        let anchors = generate_anchors(&PALM_LAYOUT);
        assert!(
            decode(&PALM_LAYOUT, &anchors, &[0.0; 18], &[1, 18], &[0.0], &[1, 1, 1], &letterbox, &cfg)
                .is_err()
        );
        assert!(
            decode(&PALM_LAYOUT, &anchors, &[0.0; 4], &[1, 1, 4], &[0.0], &[1, 1, 1], &letterbox, &cfg)
                .is_err()
        );
    }
}
