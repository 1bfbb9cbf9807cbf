//! Whole-face measurements taken from landmark coordinate deltas.

use serde::{Deserialize, Serialize};

use crate::landmarks::FacialLandmarks;
use crate::types::Point;

/// Jawline angle is not measured from the landmarks.
pub const JAWLINE_ANGLE_DEGREES: i64 = 125;
/// Facial symmetry is not measured from the landmarks.
pub const FACIAL_SYMMETRY_PERCENT: i64 = 90;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedMeasurements {
    pub face_ratio: f64,
    pub eye_distance: i64,
    pub nose_to_mouth_ratio: f64,
    pub jawline_angle: i64,
    pub facial_symmetry: i64,
}

impl DetailedMeasurements {
    pub fn from_landmarks(lm: &FacialLandmarks) -> Self {
        let x = |pts: &[Point], i: usize| pts.get(i).map(|p| p.x);
        let y = |pts: &[Point], i: usize| pts.get(i).map(|p| p.y);

        let face_width = span_or(x(&lm.jawline, 16), x(&lm.jawline, 0), 120.0);
        let face_height = span_or(y(&lm.chin, 0), y(&lm.forehead, 0), 150.0);
        let eye_distance = span_or(x(&lm.eyes.right, 0), x(&lm.eyes.left, 0), 35.0);
        let nose_height = span_or(y(&lm.nose, 8), y(&lm.nose, 0), 40.0);
        let mouth_height = span_or(y(&lm.mouth, 19), y(&lm.mouth, 13), 8.0);

        Self {
            face_ratio: round2(face_height / face_width),
            eye_distance: eye_distance.round() as i64,
            nose_to_mouth_ratio: round2(nose_height / mouth_height),
            jawline_angle: JAWLINE_ANGLE_DEGREES,
            facial_symmetry: FACIAL_SYMMETRY_PERCENT,
        }
    }
}

/// Absolute difference of two coordinates, or `fallback` when either point
/// is missing or the difference is zero.
pub(crate) fn span_or(a: Option<f32>, b: Option<f32>, fallback: f64) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => {
            let d = (f64::from(a) - f64::from(b)).abs();
            if d == 0.0 || d.is_nan() {
                fallback
            } else {
                d
            }
        }
        _ => fallback,
    }
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::EyePair;

    fn empty_landmarks() -> FacialLandmarks {
        FacialLandmarks {
            forehead: vec![],
            eyes: EyePair {
                left: vec![],
                right: vec![],
            },
            nose: vec![],
            mouth: vec![],
            chin: vec![],
            jawline: vec![],
        }
    }

    #[test]
    fn missing_points_use_fallbacks() {
        let m = DetailedMeasurements::from_landmarks(&empty_landmarks());
        assert_eq!(m.face_ratio, 1.25);
        assert_eq!(m.eye_distance, 35);
        assert_eq!(m.nose_to_mouth_ratio, 5.0);
        assert_eq!(m.jawline_angle, 125);
        assert_eq!(m.facial_symmetry, 90);
    }

    #[test]
    fn measures_real_deltas() {
        let mut lm = empty_landmarks();
        lm.jawline = (0..17).map(|i| Point::new(i as f32 * 10.0, 0.0)).collect();
        lm.forehead = vec![Point::new(0.0, 20.0)];
        lm.chin = vec![Point::new(0.0, 220.0)];
        lm.eyes.left = vec![Point::new(40.0, 0.0)];
        lm.eyes.right = vec![Point::new(100.4, 0.0)];
        lm.nose = (0..9).map(|i| Point::new(0.0, i as f32 * 5.0)).collect();
        lm.mouth = (0..20).map(|i| Point::new(0.0, i as f32)).collect();

        let m = DetailedMeasurements::from_landmarks(&lm);
        assert_eq!(m.face_ratio, 1.25); // 200 / 160
        assert_eq!(m.eye_distance, 60);
        assert_eq!(m.nose_to_mouth_ratio, 6.67); // 40 / 6
    }

    #[test]
    fn zero_span_falls_back() {
        assert_eq!(span_or(Some(3.0), Some(3.0), 50.0), 50.0);
        assert_eq!(span_or(Some(3.0), None, 50.0), 50.0);
        assert_eq!(span_or(Some(10.0), Some(75.0), 50.0), 65.0);
    }
}
