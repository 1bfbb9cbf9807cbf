use std::sync::Arc;

use tracing::{info, warn};

use crate::detector::LandmarkExtractor;
use crate::error::Result;
use crate::landmarks::FacialLandmarks;
use crate::physiognomy::{analyze_physiognomy, Gender, PhysiognomyResults};
use crate::store::{AnalysisStore, NewAnalysis};

/// One uploaded photo to analyze.
#[derive(Debug, Clone)]
pub struct AnalysisRequest<'a> {
    pub image: &'a [u8],
    /// Where the upload was saved; stored alongside the results.
    pub image_url: String,
    pub gender: Option<Gender>,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub landmarks: FacialLandmarks,
    pub results: PhysiognomyResults,
    /// `None` when persisting failed; the results are still valid.
    pub analysis_id: Option<u64>,
}

/// Image → landmarks → rule engine → best-effort persistence.
#[derive(Clone)]
pub struct AnalysisPipeline {
    extractor: Arc<dyn LandmarkExtractor>,
    store: Arc<dyn AnalysisStore>,
}

impl AnalysisPipeline {
    pub fn new(extractor: Arc<dyn LandmarkExtractor>, store: Arc<dyn AnalysisStore>) -> Self {
        Self { extractor, store }
    }

    pub fn analyze(&self, request: &AnalysisRequest<'_>) -> Result<AnalysisOutcome> {
        let image = image::load_from_memory(request.image)?;
        let shape = self.extractor.extract(&image)?;
        let landmarks = FacialLandmarks::from_shape(&shape)?;
        let results = analyze_physiognomy(&landmarks, request.gender);

        let analysis_id = self.persist(request, &landmarks, &results);
        info!(
            image_url = %request.image_url,
            gender = ?request.gender,
            animal = %results.animal_face.primary_animal,
            analysis_id = ?analysis_id,
            "face analyzed"
        );

        Ok(AnalysisOutcome {
            landmarks,
            results,
            analysis_id,
        })
    }

    /// Save failures are logged and swallowed so the caller always gets results.
    fn persist(
        &self,
        request: &AnalysisRequest<'_>,
        landmarks: &FacialLandmarks,
        results: &PhysiognomyResults,
    ) -> Option<u64> {
        let saved = NewAnalysis::from_results(
            request.image_url.clone(),
            request.gender,
            landmarks,
            results,
        )
        .and_then(|record| self.store.put(record));

        match saved {
            Ok(stored) => Some(stored.id),
            Err(e) => {
                warn!(error = %e, image_url = %request.image_url, "failed to save analysis results");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::predictor::default_68_point_mean_shape;
    use crate::store::{MemoryStore, StoredAnalysis};
    use crate::types::{BoundingBox, Shape};
    use chrono::{DateTime, Utc};
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    /// Places the mean face in the middle of whatever image it is given.
    struct MeanFace;

    impl LandmarkExtractor for MeanFace {
        fn extract(&self, image: &DynamicImage) -> Result<Shape> {
            let w = image.width() as f32;
            let h = image.height() as f32;
            let face = BoundingBox::new(w * 0.25, h * 0.25, w * 0.5, h * 0.5);
            Ok(Shape::new(
                default_68_point_mean_shape()
                    .points
                    .into_iter()
                    .map(|p| face.denormalize_point(p))
                    .collect(),
            ))
        }
    }

    struct NoFace;

    impl LandmarkExtractor for NoFace {
        fn extract(&self, _image: &DynamicImage) -> Result<Shape> {
            Err(Error::NoFaceDetected)
        }
    }

    struct BrokenStore;

    impl AnalysisStore for BrokenStore {
        fn put(&self, _analysis: NewAnalysis) -> Result<StoredAnalysis> {
            Err(Error::Storage("disk full".into()))
        }

        fn get(&self, _id: u64) -> Result<Option<StoredAnalysis>> {
            Ok(None)
        }

        fn list_range(&self, _from: DateTime<Utc>, _to: DateTime<Utc>) -> Result<Vec<StoredAnalysis>> {
            Ok(Vec::new())
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut bytes, ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    fn request(image: &[u8]) -> AnalysisRequest<'_> {
        AnalysisRequest {
            image,
            image_url: "/uploads/face.png".into(),
            gender: Some(Gender::Female),
        }
    }

    #[test]
    fn analyzes_and_stores() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = AnalysisPipeline::new(Arc::new(MeanFace), store.clone());
        let image = png(200, 200);

        let outcome = pipeline.analyze(&request(&image)).unwrap();
        assert_eq!(outcome.analysis_id, Some(1));
        assert_eq!(outcome.landmarks.jawline.len(), 17);
        assert_eq!(outcome.results.features.len(), 5);

        let stored = store.get(1).unwrap().unwrap();
        assert_eq!(stored.image_url, "/uploads/face.png");
        assert_eq!(stored.gender.as_deref(), Some("female"));
        assert_eq!(
            stored.analysis_results.get(),
            serde_json::to_string(&outcome.results).unwrap()
        );
    }

    #[test]
    fn store_failure_still_returns_results() {
        let pipeline = AnalysisPipeline::new(Arc::new(MeanFace), Arc::new(BrokenStore));
        let image = png(120, 160);
        let outcome = pipeline.analyze(&request(&image)).unwrap();
        assert_eq!(outcome.analysis_id, None);
        assert_eq!(outcome.results.features.len(), 5);
    }

    #[test]
    fn undecodable_upload_is_a_detection_failure() {
        let pipeline = AnalysisPipeline::new(Arc::new(MeanFace), Arc::new(MemoryStore::new()));
        let err = pipeline.analyze(&request(b"definitely not a picture")).unwrap_err();
        assert!(matches!(err, Error::ImageDecode(_)));
        assert!(err.is_detection_failure());
    }

    #[test]
    fn extractor_errors_propagate_without_saving() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = AnalysisPipeline::new(Arc::new(NoFace), store.clone());
        let image = png(64, 64);
        let err = pipeline.analyze(&request(&image)).unwrap_err();
        assert!(matches!(err, Error::NoFaceDetected));
        assert!(store.get(1).unwrap().is_none());
    }
}
