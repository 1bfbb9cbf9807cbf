//! Ensemble-of-regression-trees shape predictor.
//!
//! Starting from a mean face placed inside the detector's box, each cascade
//! stage sums the leaf deltas of its trees and nudges every landmark. Trees
//! split on the intensity difference between two pixels anchored to the
//! current landmark estimate.
//!
//! The estimate is kept in [0,1] box coordinates until the last stage. Pixel
//! offsets follow the rotation and scale between the mean face and the current
//! estimate, so a tilted face samples the same facial spots as an upright one.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{BoundingBox, Point, Shape};

/// Grayscale pixel lookup used by split features.
pub trait ImageAccess {
    /// Intensity at (x, y); 0 outside the image.
    fn get_pixel(&self, x: i32, y: i32) -> u8;
}

impl ImageAccess for GrayImage {
    fn get_pixel(&self, x: i32, y: i32) -> u8 {
        if x < 0 || y < 0 {
            return 0;
        }
        self.get_pixel_checked(x as u32, y as u32)
            .map_or(0, |p| p.0[0])
    }
}

/// Pixel pair anchored on two landmarks, offsets normalized to the face box.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SplitFeature {
    pub anchor1_idx: u16,
    pub offset1_x: f32,
    pub offset1_y: f32,
    pub anchor2_idx: u16,
    pub offset2_x: f32,
    pub offset2_y: f32,
}

impl SplitFeature {
    /// Pixel difference for `shape` (box coordinates) warped by `tform`.
    fn value<I: ImageAccess>(
        &self,
        shape: &Shape,
        tform: &SimilarityTransform2D,
        bbox: &BoundingBox,
        image: &I,
    ) -> f32 {
        let p1 = shape[self.anchor1_idx as usize]
            + tform.apply(Point::new(self.offset1_x, self.offset1_y));
        let p2 = shape[self.anchor2_idx as usize]
            + tform.apply(Point::new(self.offset2_x, self.offset2_y));
        sample_bilinear(image, bbox.denormalize_point(p1))
            - sample_bilinear(image, bbox.denormalize_point(p2))
    }
}

/// Rotation plus uniform scale: `[[a, -b], [b, a]]`. No translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform2D {
    pub a: f32,
    pub b: f32,
}

impl SimilarityTransform2D {
    pub const IDENTITY: Self = Self { a: 1.0, b: 0.0 };

    pub fn apply(&self, p: Point) -> Point {
        Point::new(self.a * p.x - self.b * p.y, self.b * p.x + self.a * p.y)
    }

    pub fn scale(&self) -> f32 {
        self.a.hypot(self.b)
    }
}

/// Least-squares rotation and scale taking `from` onto `to`, both centered.
///
/// Falls back to the identity for fewer than two points or a collapsed `from`.
pub fn find_similarity_transform(from: &Shape, to: &Shape) -> SimilarityTransform2D {
    let n = from.num_landmarks().min(to.num_landmarks());
    if n < 2 {
        return SimilarityTransform2D::IDENTITY;
    }

    let centroid = |s: &Shape| {
        let (sx, sy) = s.points[..n]
            .iter()
            .fold((0.0f64, 0.0f64), |(x, y), p| (x + p.x as f64, y + p.y as f64));
        (sx / n as f64, sy / n as f64)
    };
    let (fx0, fy0) = centroid(from);
    let (tx0, ty0) = centroid(to);

    let (mut dot, mut cross, mut norm) = (0.0f64, 0.0f64, 0.0f64);
    for (f, t) in from.points[..n].iter().zip(&to.points[..n]) {
        let (fx, fy) = (f.x as f64 - fx0, f.y as f64 - fy0);
        let (tx, ty) = (t.x as f64 - tx0, t.y as f64 - ty0);
        dot += fx * tx + fy * ty;
        cross += fx * ty - fy * tx;
        norm += fx * fx + fy * fy;
    }
    if norm <= f64::EPSILON {
        return SimilarityTransform2D::IDENTITY;
    }

    SimilarityTransform2D {
        a: (dot / norm) as f32,
        b: (cross / norm) as f32,
    }
}

#[inline]
fn sample_bilinear<I: ImageAccess>(image: &I, p: Point) -> f32 {
    let x0 = p.x.floor() as i32;
    let y0 = p.y.floor() as i32;
    let fx = p.x - x0 as f32;
    let fy = p.y - y0 as f32;

    let p00 = image.get_pixel(x0, y0) as f32;
    let p10 = image.get_pixel(x0 + 1, y0) as f32;
    let p01 = image.get_pixel(x0, y0 + 1) as f32;
    let p11 = image.get_pixel(x0 + 1, y0 + 1) as f32;

    let top = p00 * (1.0 - fx) + p10 * fx;
    let bottom = p01 * (1.0 - fx) + p11 * fx;
    top * (1.0 - fy) + bottom * fy
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Split {
        feature: SplitFeature,
        threshold: f32,
        left: u32,
        right: u32,
    },
    Leaf {
        delta: Shape,
    },
}

/// Node 0 is the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub fn new(nodes: Vec<TreeNode>) -> Self {
        Self { nodes }
    }

    /// Walk to a leaf; a feature above the threshold goes left.
    pub fn predict<F>(&self, feature_value: F) -> Result<&Shape>
    where
        F: Fn(&SplitFeature) -> f32,
    {
        let mut idx = 0usize;
        // A well-formed tree reaches a leaf in fewer steps than it has nodes.
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(idx) {
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    idx = if feature_value(feature) > *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    };
                }
                Some(TreeNode::Leaf { delta }) => return Ok(delta),
                None => {
                    return Err(Error::InvalidModel(format!(
                        "tree node {idx} out of range ({} nodes)",
                        self.nodes.len()
                    )))
                }
            }
        }
        Err(Error::InvalidModel("regression tree contains a cycle".into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub trees: Vec<RegressionTree>,
}

impl TreeEnsemble {
    pub fn new(trees: Vec<RegressionTree>) -> Self {
        Self { trees }
    }

    fn predict<F>(&self, num_landmarks: usize, feature_value: F) -> Result<Shape>
    where
        F: Fn(&SplitFeature) -> f32,
    {
        let mut delta = Shape::zeros(num_landmarks);
        for tree in &self.trees {
            let leaf = tree.predict(&feature_value)?;
            if leaf.num_landmarks() != num_landmarks {
                return Err(Error::InvalidModel(format!(
                    "leaf has {} points, model has {num_landmarks}",
                    leaf.num_landmarks()
                )));
            }
            delta.add_delta(leaf);
        }
        Ok(delta)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapePredictor {
    /// Mean face in [0,1] box-relative coordinates.
    mean_shape: Shape,
    cascade: Vec<TreeEnsemble>,
}

impl ShapePredictor {
    pub fn new(mean_shape: Shape, cascade: Vec<TreeEnsemble>) -> Result<Self> {
        let model = Self {
            mean_shape,
            cascade,
        };
        model.validate()?;
        Ok(model)
    }

    /// Load a bincode-serialized predictor.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut bytes = Vec::new();
        BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let model: Self = bincode::deserialize(bytes)?;
        model.validate()?;
        Ok(model)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Every split must anchor on an existing landmark.
    fn validate(&self) -> Result<()> {
        if self.cascade.is_empty() {
            return Err(Error::InvalidModel(
                "cascade must have at least one stage".into(),
            ));
        }
        let n = self.num_landmarks();
        for (stage, ensemble) in self.cascade.iter().enumerate() {
            for node in ensemble.trees.iter().flat_map(|t| &t.nodes) {
                if let TreeNode::Split { feature, .. } = node {
                    let worst = feature.anchor1_idx.max(feature.anchor2_idx) as usize;
                    if worst >= n {
                        return Err(Error::InvalidModel(format!(
                            "stage {stage}: anchor {worst} out of range for {n} landmarks"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn num_landmarks(&self) -> usize {
        self.mean_shape.num_landmarks()
    }

    pub fn num_cascade_stages(&self) -> usize {
        self.cascade.len()
    }

    /// Predict landmarks, in image coordinates, for the face inside `face_rect`.
    pub fn predict<I: ImageAccess>(&self, image: &I, face_rect: &BoundingBox) -> Result<Shape> {
        let mut shape = self.mean_shape.clone();

        for stage in &self.cascade {
            let tform = find_similarity_transform(&self.mean_shape, &shape);
            let delta = stage.predict(self.num_landmarks(), |f| {
                f.value(&shape, &tform, face_rect, image)
            })?;
            shape.add_delta(&delta);
        }

        Ok(Shape::new(
            shape
                .points
                .iter()
                .map(|p| face_rect.denormalize_point(*p))
                .collect(),
        ))
    }
}

/// Approximate iBUG 68-point mean face in [0,1] box coordinates.
pub fn default_68_point_mean_shape() -> Shape {
    const POINTS: [(f32, f32); 68] = [
        // Jaw line (0-16)
        (0.10, 0.35),
        (0.11, 0.45),
        (0.12, 0.55),
        (0.14, 0.65),
        (0.18, 0.73),
        (0.24, 0.80),
        (0.32, 0.85),
        (0.41, 0.88),
        (0.50, 0.89),
        (0.59, 0.88),
        (0.68, 0.85),
        (0.76, 0.80),
        (0.82, 0.73),
        (0.86, 0.65),
        (0.88, 0.55),
        (0.89, 0.45),
        (0.90, 0.35),
        // Eyebrows (17-26)
        (0.20, 0.26),
        (0.25, 0.22),
        (0.32, 0.21),
        (0.38, 0.23),
        (0.43, 0.27),
        (0.57, 0.27),
        (0.62, 0.23),
        (0.68, 0.21),
        (0.75, 0.22),
        (0.80, 0.26),
        // Nose bridge (27-30) and base (31-35)
        (0.50, 0.32),
        (0.50, 0.40),
        (0.50, 0.48),
        (0.50, 0.55),
        (0.40, 0.58),
        (0.45, 0.60),
        (0.50, 0.62),
        (0.55, 0.60),
        (0.60, 0.58),
        // Eyes (36-47)
        (0.24, 0.32),
        (0.28, 0.29),
        (0.34, 0.29),
        (0.38, 0.33),
        (0.34, 0.35),
        (0.28, 0.35),
        (0.62, 0.33),
        (0.66, 0.29),
        (0.72, 0.29),
        (0.76, 0.32),
        (0.72, 0.35),
        (0.66, 0.35),
        // Lips, outer (48-59) and inner (60-67)
        (0.32, 0.72),
        (0.38, 0.68),
        (0.44, 0.66),
        (0.50, 0.67),
        (0.56, 0.66),
        (0.62, 0.68),
        (0.68, 0.72),
        (0.62, 0.78),
        (0.56, 0.80),
        (0.50, 0.81),
        (0.44, 0.80),
        (0.38, 0.78),
        (0.36, 0.72),
        (0.44, 0.70),
        (0.50, 0.70),
        (0.56, 0.70),
        (0.64, 0.72),
        (0.56, 0.74),
        (0.50, 0.75),
        (0.44, 0.74),
    ];

    Shape::new(POINTS.iter().map(|&(x, y)| Point::new(x, y)).collect())
}
