//! Face detection and landmark extraction.
//!
//! [`FaceDetector::load`] is the one-time initialization step: it reads the
//! SeetaFace detection model and the landmark model and hands back a handle.
//! Callers keep the handle (or its absence) themselves.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;
use rustface::ImageData;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dlib::{is_dlib_model, load_dlib_model};
use crate::error::{Error, Result};
use crate::predictor::ShapePredictor;
use crate::types::{BoundingBox, Shape};

/// Anything that can turn a decoded photo into a single face's landmarks.
pub trait LandmarkExtractor: Send + Sync {
    fn extract(&self, image: &DynamicImage) -> Result<Shape>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// SeetaFace frontal detector model (`seeta_fd_frontal_v1.0.bin`).
    pub detector_model: PathBuf,
    /// 68-point shape predictor: dlib `.dat`/`.dat.bz2`, or a bincode
    /// `ShapePredictor` otherwise.
    pub landmark_model: PathBuf,
    pub min_face_size: u32,
    pub score_thresh: f64,
    pub pyramid_scale_factor: f32,
    pub slide_window_step: (u32, u32),
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            detector_model: PathBuf::from("seeta_fd_frontal_v1.0.bin"),
            landmark_model: PathBuf::from("shape_predictor_68_face_landmarks.dat.bz2"),
            min_face_size: 20,
            score_thresh: 2.0,
            pyramid_scale_factor: 0.8,
            slide_window_step: (4, 4),
        }
    }
}

/// Read a landmark model in whichever format its file name says.
pub fn load_landmark_model(path: &Path) -> Result<ShapePredictor> {
    if is_dlib_model(path) {
        load_dlib_model(path)
    } else {
        ShapePredictor::load(path)
    }
}

/// Loaded detection and landmark models.
///
/// The rustface detector keeps mutable scan state, so a fresh detector is
/// built from the cached model bytes for every image.
#[derive(Clone)]
pub struct FaceDetector {
    detector_model: Arc<[u8]>,
    predictor: Arc<ShapePredictor>,
    config: DetectorConfig,
}

impl std::fmt::Debug for FaceDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceDetector")
            .field("detector_model_bytes", &self.detector_model.len())
            .field("landmarks", &self.predictor.num_landmarks())
            .field("config", &self.config)
            .finish()
    }
}

impl FaceDetector {
    pub fn load(config: &DetectorConfig) -> Result<Self> {
        let detector_model: Arc<[u8]> = fs::read(&config.detector_model)
            .map_err(|e| {
                Error::ModelLoad(format!("{}: {e}", config.detector_model.display()))
            })?
            .into();
        // Parse once up front so a corrupt file fails here, not per request.
        rustface::read_model(Cursor::new(&detector_model[..]))
            .map_err(|e| Error::ModelLoad(format!("{}: {e}", config.detector_model.display())))?;

        let predictor = load_landmark_model(&config.landmark_model)
            .map_err(|e| Error::ModelLoad(format!("{}: {e}", config.landmark_model.display())))?;
        if predictor.num_landmarks() < 68 {
            return Err(Error::ModelLoad(format!(
                "{}: {}-point model, need 68",
                config.landmark_model.display(),
                predictor.num_landmarks()
            )));
        }

        info!(
            detector = %config.detector_model.display(),
            landmarks = %config.landmark_model.display(),
            cascade_stages = predictor.num_cascade_stages(),
            "face models loaded"
        );

        Ok(Self {
            detector_model,
            predictor: Arc::new(predictor),
            config: config.clone(),
        })
    }

    fn detect_faces(&self, gray: &image::GrayImage) -> Result<Vec<BoundingBox>> {
        let model = rustface::read_model(Cursor::new(&self.detector_model[..]))
            .map_err(|e| Error::ModelLoad(e.to_string()))?;
        let mut detector = rustface::create_detector_with_model(model);
        detector.set_min_face_size(self.config.min_face_size);
        detector.set_score_thresh(self.config.score_thresh);
        detector.set_pyramid_scale_factor(self.config.pyramid_scale_factor);
        detector.set_slide_window_step(self.config.slide_window_step.0, self.config.slide_window_step.1);

        let image_data = ImageData::new(gray.as_raw(), gray.width(), gray.height());
        Ok(detector
            .detect(&image_data)
            .iter()
            .map(|face| {
                let b = face.bbox();
                BoundingBox::new(b.x() as f32, b.y() as f32, b.width() as f32, b.height() as f32)
            })
            .collect())
    }
}

impl LandmarkExtractor for FaceDetector {
    fn extract(&self, image: &DynamicImage) -> Result<Shape> {
        let gray = image.to_luma8();
        let faces = self.detect_faces(&gray)?;
        debug!(faces = faces.len(), width = gray.width(), height = gray.height(), "face detection");

        match faces.as_slice() {
            [] => Err(Error::NoFaceDetected),
            [face] => self.predictor.predict(&gray, face),
            many => Err(Error::MultipleFacesDetected(many.len())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_files_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = DetectorConfig {
            detector_model: dir.path().join("absent.bin"),
            landmark_model: dir.path().join("absent-landmarks.bin"),
            ..Default::default()
        };
        let err = FaceDetector::load(&config).unwrap_err();
        assert!(matches!(err, Error::ModelLoad(_)));
        assert!(err.to_string().contains("absent.bin"));
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: DetectorConfig = serde_json::from_str(r#"{"min_face_size": 40}"#).unwrap();
        assert_eq!(config.min_face_size, 40);
        assert_eq!(config.slide_window_step, (4, 4));
        assert_eq!(config.score_thresh, 2.0);
    }
}
