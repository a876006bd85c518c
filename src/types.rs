use std::time::Instant;

use crate::error::LandmarkError;

pub const NUM_LANDMARKS: usize = 21;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

/// Fixed anatomical roles of the 21 hand points, in detector output order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum Landmark {
    Wrist = 0,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexMcp,
    IndexPip,
    IndexDip,
    IndexTip,
    MiddleMcp,
    MiddlePip,
    MiddleDip,
    MiddleTip,
    RingMcp,
    RingPip,
    RingDip,
    RingTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

/// One hand's landmarks in image space: y grows downward, z is relative depth.
///
/// Construction validates the point count and rejects non-finite coordinates,
/// so everything downstream can index by [`Landmark`] without checks.
#[derive(Clone, Debug, PartialEq)]
pub struct HandLandmarks {
    points: [[f32; 3]; NUM_LANDMARKS],
}

impl HandLandmarks {
    pub fn new(points: &[[f32; 3]]) -> Result<Self, LandmarkError> {
        if points.len() != NUM_LANDMARKS {
            return Err(LandmarkError::WrongCount { got: points.len() });
        }
        if let Some(index) = points
            .iter()
            .position(|p| p.iter().any(|c| !c.is_finite()))
        {
            return Err(LandmarkError::NonFinite { index });
        }

        let mut fixed = [[0.0; 3]; NUM_LANDMARKS];
        fixed.copy_from_slice(points);
        Ok(Self { points: fixed })
    }

    pub fn get(&self, landmark: Landmark) -> [f32; 3] {
        self.points[landmark as usize]
    }

    pub fn points(&self) -> &[[f32; 3]; NUM_LANDMARKS] {
        &self.points
    }

    /// Axis-aligned bounds of the (x, y) projection as `[x1, y1, x2, y2]`.
    pub fn bounds(&self) -> [f32; 4] {
        self.points.iter().fold(
            [f32::MAX, f32::MAX, f32::MIN, f32::MIN],
            |acc, [x, y, _]| [acc[0].min(*x), acc[1].min(*y), acc[2].max(*x), acc[3].max(*y)],
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    /// Maps the handpose model's handedness probability onto a label.
    pub fn from_score(score: f32) -> Self {
        if score >= 0.5 {
            Handedness::Right
        } else {
            Handedness::Left
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Handedness::Left => "Left",
            Handedness::Right => "Right",
        }
    }
}

/// Canned gesture categories, in classifier output order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GestureKind {
    None,
    ClosedFist,
    OpenPalm,
    PointingUp,
    ThumbDown,
    ThumbUp,
    Victory,
    ILoveYou,
}

impl GestureKind {
    pub const ALL: [GestureKind; 8] = [
        GestureKind::None,
        GestureKind::ClosedFist,
        GestureKind::OpenPalm,
        GestureKind::PointingUp,
        GestureKind::ThumbDown,
        GestureKind::ThumbUp,
        GestureKind::Victory,
        GestureKind::ILoveYou,
    ];

    pub fn from_class_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    /// Name published to the broker and drawn on the stream.
    pub fn name(&self) -> &'static str {
        match self {
            GestureKind::None => "None",
            GestureKind::ClosedFist => "Closed_Fist",
            GestureKind::OpenPalm => "Open_Palm",
            GestureKind::PointingUp => "Pointing_Up",
            GestureKind::ThumbDown => "Thumb_Down",
            GestureKind::ThumbUp => "Thumb_Up",
            GestureKind::Victory => "Victory",
            GestureKind::ILoveYou => "ILoveYou",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GestureCategory {
    pub kind: GestureKind,
    pub score: f32,
}

#[derive(Clone, Debug)]
pub struct PalmRegion {
    pub bbox: [f32; 4],
    pub landmarks: Vec<(f32, f32)>,
    pub score: f32,
}

#[derive(Clone, Debug)]
pub struct FaceRegion {
    pub bbox: [f32; 4],
    pub keypoints: Vec<(f32, f32)>,
    pub score: f32,
}

#[derive(Clone, Debug)]
pub struct DetectedHand {
    pub landmarks: HandLandmarks,
    pub handedness: Handedness,
    pub score: f32,
    pub thumbs_up: bool,
    pub gesture: GestureCategory,
}

#[derive(Clone, Debug, Default)]
pub struct FrameAnalysis {
    pub hands: Vec<DetectedHand>,
    pub faces: Vec<FaceRegion>,
}

impl FrameAnalysis {
    /// Gesture of the most confident hand, if any hand was found.
    pub fn top_gesture(&self) -> Option<GestureCategory> {
        self.hands.first().map(|hand| hand.gesture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<[f32; 3]> {
        (0..NUM_LANDMARKS)
            .map(|i| [i as f32, (i * 2) as f32, 0.0])
            .collect()
    }

    #[test]
    fn test_landmarks_reject_wrong_count() {
        let points = vec![[0.0; 3]; 20];
        assert_eq!(
            HandLandmarks::new(&points),
            Err(LandmarkError::WrongCount { got: 20 })
        );
        let points = vec![[0.0; 3]; 22];
        assert_eq!(
            HandLandmarks::new(&points),
            Err(LandmarkError::WrongCount { got: 22 })
        );
    }

    #[test]
    fn test_landmarks_reject_non_finite() {
        let mut points = grid();
        points[7][2] = f32::NAN;
        assert_eq!(
            HandLandmarks::new(&points),
            Err(LandmarkError::NonFinite { index: 7 })
        );

        let mut points = grid();
        points[3][1] = f32::INFINITY;
        assert_eq!(
            HandLandmarks::new(&points),
            Err(LandmarkError::NonFinite { index: 3 })
        );
    }

    #[test]
    fn test_landmark_roles_follow_detector_order() {
        let hand = HandLandmarks::new(&grid()).unwrap();
        assert_eq!(hand.get(Landmark::Wrist), [0.0, 0.0, 0.0]);
        assert_eq!(hand.get(Landmark::ThumbTip), [4.0, 8.0, 0.0]);
        assert_eq!(hand.get(Landmark::IndexTip), [8.0, 16.0, 0.0]);
        assert_eq!(hand.get(Landmark::PinkyTip), [20.0, 40.0, 0.0]);
    }

    #[test]
    fn test_bounds() {
        let hand = HandLandmarks::new(&grid()).unwrap();
        assert_eq!(hand.bounds(), [0.0, 0.0, 20.0, 40.0]);
    }

    #[test]
    fn test_handedness_from_score() {
        assert_eq!(Handedness::from_score(0.9), Handedness::Right);
        assert_eq!(Handedness::from_score(0.5), Handedness::Right);
        assert_eq!(Handedness::from_score(0.1), Handedness::Left);
    }

    #[test]
    fn test_gesture_class_order() {
        assert_eq!(GestureKind::from_class_index(5), Some(GestureKind::ThumbUp));
        assert_eq!(GestureKind::from_class_index(8), None);
        assert_eq!(GestureKind::ThumbUp.name(), "Thumb_Up");
    }
}
