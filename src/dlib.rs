//! Reader for dlib's `shape_predictor` files.
//!
//! Accepts the raw `.dat` layout and its bzip2-compressed `.dat.bz2` form, as
//! published in the dlib-models repository:
//!
//! ```bash
//! git clone --depth 1 https://github.com/davisking/dlib-models.git
//! ```
//!
//! `shape_predictor_68_face_landmarks.dat.bz2` is the model the face reader
//! needs; the 5-point model loads too but cannot be grouped into regions.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bzip2::read::BzDecoder;

use crate::error::{Error, Result};
use crate::predictor::{RegressionTree, ShapePredictor, SplitFeature, TreeEnsemble, TreeNode};
use crate::types::{Point, Shape};

/// Upper bound on any length read from a model header before allocating.
const MAX_PREALLOC: usize = 1 << 16;

/// dlib's portable integer and float encoding.
///
/// An integer is a control byte (high bit: negative, low nibble: byte count)
/// followed by that many little-endian bytes. A float is a `(mantissa,
/// exponent)` integer pair.
struct DlibReader<R: Read> {
    reader: R,
}

impl<R: Read> DlibReader<R> {
    fn new(reader: R) -> Self {
        Self { reader }
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.reader.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_int(&mut self) -> Result<i64> {
        let control = self.read_byte()?;
        let negative = control & 0x80 != 0;
        let num_bytes = (control & 0x0F) as usize;
        if num_bytes > 8 {
            return Err(Error::InvalidModel(format!(
                "integer with {num_bytes} bytes"
            )));
        }

        let mut val: u64 = 0;
        for i in 0..num_bytes {
            val |= (self.read_byte()? as u64) << (8 * i);
        }
        let val = val as i64;
        Ok(if negative { val.wrapping_neg() } else { val })
    }

    fn read_ulong(&mut self) -> Result<u64> {
        let val = self.read_int()?;
        u64::try_from(val)
            .map_err(|_| Error::InvalidModel(format!("expected unsigned value, got {val}")))
    }

    fn read_len(&mut self) -> Result<usize> {
        usize::try_from(self.read_ulong()?)
            .map_err(|_| Error::InvalidModel("length does not fit in memory".into()))
    }

    fn read_float(&mut self) -> Result<f32> {
        let mantissa = self.read_int()?;
        let exponent = self.read_int()?;
        if mantissa == 0 {
            return Ok(0.0);
        }
        let exponent = i32::try_from(exponent)
            .map_err(|_| Error::InvalidModel(format!("float exponent {exponent}")))?;
        Ok((mantissa as f64 * 2.0_f64.powi(exponent)) as f32)
    }

    /// Column of `(x, y)` pairs stored as `rows, cols, values...`.
    fn read_point_column(&mut self) -> Result<Vec<Point>> {
        // Newer dlib writes the dimensions negated.
        let rows = self.read_int()?.unsigned_abs() as usize;
        let cols = self.read_int()?.unsigned_abs() as usize;
        if cols != 1 || rows % 2 != 0 {
            return Err(Error::InvalidModel(format!(
                "expected a 2N x 1 point column, got {rows}x{cols}"
            )));
        }

        let mut points = Vec::with_capacity((rows / 2).min(MAX_PREALLOC));
        for _ in 0..rows / 2 {
            let x = self.read_float()?;
            let y = self.read_float()?;
            points.push(Point::new(x, y));
        }
        Ok(points)
    }
}

/// Split before its feature indices are resolved against the stage's pixel table.
struct RawSplit {
    idx1: usize,
    idx2: usize,
    threshold: f32,
}

struct RawTree {
    splits: Vec<RawSplit>,
    leaves: Vec<Shape>,
}

/// Per-stage pixel table: feature index to (anchor landmark, box-relative offset).
struct StagePixels {
    anchors: Vec<u16>,
    offsets: Vec<Point>,
}

/// Load a `.dat` or `.dat.bz2` model.
pub fn load_dlib_model<P: AsRef<Path>>(path: P) -> Result<ShapePredictor> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    if path.extension().is_some_and(|ext| ext == "bz2") {
        load_dlib_model_from_reader(BzDecoder::new(reader))
    } else {
        load_dlib_model_from_reader(reader)
    }
}

pub fn load_dlib_model_from_reader<R: Read>(reader: R) -> Result<ShapePredictor> {
    parse_shape_predictor(&mut DlibReader::new(reader))
}

/// Whether `path` names a dlib model rather than a bincode one.
pub fn is_dlib_model(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "dat" || ext == "bz2")
}

fn parse_shape_predictor<R: Read>(r: &mut DlibReader<R>) -> Result<ShapePredictor> {
    let version = r.read_int()?;
    if version != 1 {
        return Err(Error::InvalidModel(format!(
            "unsupported shape_predictor version {version}"
        )));
    }

    let mean_shape = Shape::new(r.read_point_column()?);
    let num_landmarks = mean_shape.num_landmarks();

    let num_stages = r.read_len()?;
    let mut raw_stages = Vec::with_capacity(num_stages.min(MAX_PREALLOC));
    for _ in 0..num_stages {
        let num_trees = r.read_len()?;
        let mut trees = Vec::with_capacity(num_trees.min(MAX_PREALLOC));
        for _ in 0..num_trees {
            trees.push(parse_raw_tree(r, num_landmarks)?);
        }
        raw_stages.push(trees);
    }

    let num_anchor_stages = r.read_len()?;
    let mut anchors = Vec::with_capacity(num_anchor_stages.min(MAX_PREALLOC));
    for _ in 0..num_anchor_stages {
        let n = r.read_len()?;
        let mut stage = Vec::with_capacity(n.min(MAX_PREALLOC));
        for _ in 0..n {
            let idx = r.read_ulong()?;
            stage.push(u16::try_from(idx).map_err(|_| {
                Error::InvalidModel(format!("anchor index {idx} out of range"))
            })?);
        }
        anchors.push(stage);
    }

    let num_offset_stages = r.read_len()?;
    let mut offsets = Vec::with_capacity(num_offset_stages.min(MAX_PREALLOC));
    for _ in 0..num_offset_stages {
        let n = r.read_len()?;
        let mut stage = Vec::with_capacity(n.min(MAX_PREALLOC));
        for _ in 0..n {
            let dx = r.read_float()?;
            let dy = r.read_float()?;
            stage.push(Point::new(dx, dy));
        }
        offsets.push(stage);
    }

    if anchors.len() != raw_stages.len() || offsets.len() != raw_stages.len() {
        return Err(Error::InvalidModel(format!(
            "{} stages but {} anchor tables and {} offset tables",
            raw_stages.len(),
            anchors.len(),
            offsets.len()
        )));
    }

    let cascade = raw_stages
        .into_iter()
        .zip(anchors.into_iter().zip(offsets))
        .map(|(trees, (anchors, offsets))| {
            let pixels = StagePixels { anchors, offsets };
            trees
                .into_iter()
                .map(|t| resolve_tree(t, &pixels))
                .collect::<Result<Vec<_>>>()
                .map(TreeEnsemble::new)
        })
        .collect::<Result<Vec<_>>>()?;

    ShapePredictor::new(mean_shape, cascade)
}

/// Splits in breadth-first order, then one leaf per split plus one.
fn parse_raw_tree<R: Read>(r: &mut DlibReader<R>, num_landmarks: usize) -> Result<RawTree> {
    let num_splits = r.read_len()?;
    let mut splits = Vec::with_capacity(num_splits.min(MAX_PREALLOC));
    for _ in 0..num_splits {
        let idx1 = r.read_len()?;
        let idx2 = r.read_len()?;
        let threshold = r.read_float()?;
        splits.push(RawSplit {
            idx1,
            idx2,
            threshold,
        });
    }

    let num_leaves = r.read_len()?;
    if num_leaves != num_splits + 1 {
        return Err(Error::InvalidModel(format!(
            "tree with {num_splits} splits has {num_leaves} leaves"
        )));
    }
    let mut leaves = Vec::with_capacity(num_leaves.min(MAX_PREALLOC));
    for _ in 0..num_leaves {
        let delta = r.read_point_column()?;
        if delta.len() != num_landmarks {
            return Err(Error::InvalidModel(format!(
                "leaf has {} points, model has {num_landmarks}",
                delta.len()
            )));
        }
        leaves.push(Shape::new(delta));
    }

    Ok(RawTree { splits, leaves })
}

/// Flatten into our node list: split `i` has children `2i+1` and `2i+2`.
fn resolve_tree(raw: RawTree, pixels: &StagePixels) -> Result<RegressionTree> {
    let pixel = |idx: usize| -> Result<(u16, Point)> {
        match (pixels.anchors.get(idx), pixels.offsets.get(idx)) {
            (Some(&anchor), Some(&offset)) => Ok((anchor, offset)),
            _ => Err(Error::InvalidModel(format!(
                "feature index {idx} out of range"
            ))),
        }
    };

    let mut nodes = Vec::with_capacity(raw.splits.len() + raw.leaves.len());
    for (i, split) in raw.splits.iter().enumerate() {
        let (anchor1_idx, o1) = pixel(split.idx1)?;
        let (anchor2_idx, o2) = pixel(split.idx2)?;
        nodes.push(TreeNode::Split {
            feature: SplitFeature {
                anchor1_idx,
                offset1_x: o1.x,
                offset1_y: o1.y,
                anchor2_idx,
                offset2_x: o2.x,
                offset2_y: o2.y,
            },
            threshold: split.threshold,
            left: (2 * i + 1) as u32,
            right: (2 * i + 2) as u32,
        });
    }
    nodes.extend(raw.leaves.into_iter().map(|delta| TreeNode::Leaf { delta }));

    Ok(RegressionTree::new(nodes))
}
