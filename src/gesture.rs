use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ndarray::Array2;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use crate::types::{GestureCategory, GestureKind, HandLandmarks, Handedness, Landmark};

const THUMB_ANGLE_MIN_DEG: f64 = 150.0;
const THUMB_ANGLE_MAX_DEG: f64 = 180.0;
const MODEL_INPUTS: usize = 42;

/// Thumbs-up heuristic over one hand's image-space landmarks.
///
/// True when the thumb tip sits above the thumb MCP joint, the index finger's
/// PIP, DIP and tip all sit below it, and the thumb is nearly straight (the
/// angle at the IP joint is within 150..=180 degrees). A degenerate thumb with
/// coincident joints never matches.
///
/// `handedness` does not change the outcome: a thumbs-up points along the
/// image's vertical axis, which a lateral mirror leaves untouched.
pub fn is_thumbs_up(landmarks: &HandLandmarks, handedness: Handedness) -> bool {
    let thumb_tip = landmarks.get(Landmark::ThumbTip);
    let thumb_ip = landmarks.get(Landmark::ThumbIp);
    let thumb_mcp = landmarks.get(Landmark::ThumbMcp);

    let thumb_extended = match handedness {
        Handedness::Left | Handedness::Right => thumb_tip[1] < thumb_mcp[1],
    };

    let fingers_folded = [Landmark::IndexTip, Landmark::IndexDip, Landmark::IndexPip]
        .into_iter()
        .all(|joint| landmarks.get(joint)[1] > thumb_mcp[1]);

    let thumb_straight = joint_angle(thumb_tip, thumb_ip, thumb_mcp)
        .is_some_and(|deg| (THUMB_ANGLE_MIN_DEG..=THUMB_ANGLE_MAX_DEG).contains(&deg));

    thumb_extended && fingers_folded && thumb_straight
}

/// Angle in degrees at vertex `b` between rays `b -> a` and `b -> c`.
///
/// Returns `None` when either ray has zero length.
pub fn joint_angle(a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> Option<f64> {
    let ba = sub(a, b);
    let bc = sub(c, b);
    let (len_ba, len_bc) = (length(ba), length(bc));
    if len_ba == 0.0 || len_bc == 0.0 {
        return None;
    }
    let norm = len_ba * len_bc;
    let cos = (dot(ba, bc) / norm).clamp(-1.0, 1.0);
    // acos is bounded by pi; min() absorbs the last-ulp overshoot of to_degrees.
    Some(cos.acos().to_degrees().min(THUMB_ANGLE_MAX_DEG))
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f64; 3] {
    [
        a[0] as f64 - b[0] as f64,
        a[1] as f64 - b[1] as f64,
        a[2] as f64 - b[2] as f64,
    ]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn length(v: [f64; 3]) -> f64 {
    dot(v, v).sqrt()
}

/// Assigns a canned gesture category to each hand.
///
/// Uses an ONNX classifier over normalized landmarks when one is configured,
/// otherwise promotes the geometric thumbs-up verdict to `Thumb_Up`.
pub struct GestureClassifier {
    model_session: Option<Session>,
}

impl GestureClassifier {
    pub fn heuristic() -> Self {
        Self {
            model_session: None,
        }
    }

    pub fn from_model(model_path: &Path) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!(
                    "failed to load gesture classifier from {}",
                    model_path.display()
                )
            })?;
        log::info!(
            "loaded gesture classification model from {}",
            model_path.display()
        );
        Ok(Self {
            model_session: Some(session),
        })
    }

    /// Loads the model when a path is given, falling back to the heuristic
    /// with a warning if it cannot be opened.
    pub fn from_optional_model(model_path: Option<&Path>) -> Self {
        match model_path {
            Some(path) => Self::from_model(path).unwrap_or_else(|err| {
                log::warn!("gesture model unavailable, using thumbs-up heuristic: {err:?}");
                Self::heuristic()
            }),
            None => {
                log::info!("no gesture model configured, using thumbs-up heuristic");
                Self::heuristic()
            }
        }
    }

    pub fn classify(&mut self, landmarks: &HandLandmarks, thumbs_up: bool) -> GestureCategory {
        let Some(session) = self.model_session.as_mut() else {
            return heuristic_category(thumbs_up);
        };

        match run_model(session, landmarks) {
            Ok(category) => category,
            Err(err) => {
                log::warn!("gesture model inference failed: {err:?}");
                heuristic_category(thumbs_up)
            }
        }
    }
}

fn heuristic_category(thumbs_up: bool) -> GestureCategory {
    GestureCategory {
        kind: if thumbs_up {
            GestureKind::ThumbUp
        } else {
            GestureKind::None
        },
        score: 1.0,
    }
}

fn run_model(session: &mut Session, landmarks: &HandLandmarks) -> Result<GestureCategory> {
    let input = normalize_for_model(landmarks)
        .ok_or_else(|| anyhow!("hand too small to normalize for gesture model"))?;
    let array = Array2::from_shape_vec((1, MODEL_INPUTS), input)
        .map_err(|err| anyhow!("failed to build gesture input: {err}"))?;
    let tensor = Tensor::from_array(array)?;
    let outputs = session
        .run(ort::inputs![tensor])
        .context("failed to run gesture session")?;
    let logits = outputs[0].try_extract_array::<f32>()?;
    let logits: Vec<f32> = logits.iter().copied().collect();
    top_category(&logits).ok_or_else(|| anyhow!("gesture model returned no usable logits"))
}

/// Wrist-relative (x, y) coordinates scaled by palm width, flattened to 42
/// values. Depth is dropped.
pub fn normalize_for_model(landmarks: &HandLandmarks) -> Option<Vec<f32>> {
    let points = landmarks.points();
    let wrist = points[Landmark::Wrist as usize];
    let rel: Vec<[f32; 2]> = points
        .iter()
        .map(|p| [p[0] - wrist[0], p[1] - wrist[1]])
        .collect();

    let planar = |a: [f32; 2], b: [f32; 2]| ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt();
    let palm_width = planar(
        rel[Landmark::IndexMcp as usize],
        rel[Landmark::PinkyMcp as usize],
    );
    let scale = if palm_width > 1e-6 {
        palm_width
    } else {
        planar(rel[Landmark::MiddleMcp as usize], [0.0, 0.0])
    };
    if scale <= 1e-6 {
        return None;
    }

    Some(
        rel.into_iter()
            .flat_map(|[x, y]| [x / scale, y / scale])
            .collect(),
    )
}

/// Softmax over `logits`, returning the best known category and its probability.
pub fn top_category(logits: &[f32]) -> Option<GestureCategory> {
    let known = &logits[..logits.len().min(GestureKind::ALL.len())];
    let max = known.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return None;
    }
    let exp: Vec<f32> = known.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    let (idx, best) = exp
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))?;

    Some(GestureCategory {
        kind: GestureKind::from_class_index(idx)?,
        score: best / sum,
    })
}
