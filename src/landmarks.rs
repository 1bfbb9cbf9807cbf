//! Region grouping of the iBUG 68-point landmark layout.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Point, Shape};

/// The 68-point layout has no forehead points, so the forehead is estimated
/// by lifting the eyebrow centers this many pixels.
const FOREHEAD_LIFT: f32 = 30.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EyePair {
    pub left: Vec<Point>,
    pub right: Vec<Point>,
}

/// Landmarks grouped by facial region, in image coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacialLandmarks {
    pub forehead: Vec<Point>,
    pub eyes: EyePair,
    pub nose: Vec<Point>,
    pub mouth: Vec<Point>,
    pub chin: Vec<Point>,
    pub jawline: Vec<Point>,
}

impl FacialLandmarks {
    /// Group a predicted shape into regions.
    ///
    /// Points beyond 68 (e.g. the extra hairline points of 81-point models)
    /// are ignored.
    pub fn from_shape(shape: &Shape) -> Result<Self> {
        if shape.num_landmarks() < 68 {
            return Err(Error::InvalidLandmarks(shape.num_landmarks()));
        }
        let points = &shape.points;

        Ok(Self {
            forehead: vec![points[19].raised(FOREHEAD_LIFT), points[24].raised(FOREHEAD_LIFT)],
            eyes: EyePair {
                left: points[36..42].to_vec(),
                right: points[42..48].to_vec(),
            },
            nose: points[27..36].to_vec(),
            mouth: points[48..68].to_vec(),
            chin: vec![points[8]],
            jawline: points[0..17].to_vec(),
        })
    }
}
