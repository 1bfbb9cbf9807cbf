//! End-to-end analysis through the pipeline and the JSON-lines store.

use std::io::Cursor;
use std::sync::Arc;

use gwansang::{
    analyze_physiognomy_with_rng, default_68_point_mean_shape, AnalysisPipeline,
    AnalysisRequest, AnalysisStore, BoundingBox, FacialLandmarks, FacialRegion, Gender,
    JsonlStore, LandmarkExtractor, Shape,
};
use image::{DynamicImage, ImageFormat, RgbImage};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Mean face scaled into a fixed box, whatever the image.
struct FixedFace(BoundingBox);

impl LandmarkExtractor for FixedFace {
    fn extract(&self, _image: &DynamicImage) -> gwansang::Result<Shape> {
        Ok(Shape::new(
            default_68_point_mean_shape()
                .points
                .into_iter()
                .map(|p| self.0.denormalize_point(p))
                .collect(),
        ))
    }
}

fn png_bytes() -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(300, 300))
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

fn mean_face_landmarks() -> FacialLandmarks {
    let face = BoundingBox::new(60.0, 60.0, 180.0, 180.0);
    FixedFace(face)
        .extract(&DynamicImage::new_luma8(1, 1))
        .and_then(|s| FacialLandmarks::from_shape(&s))
        .expect("landmarks")
}

#[test]
fn persisted_analysis_reads_back_byte_identical_after_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("analyses.jsonl");
    let image = png_bytes();

    let (id, landmarks_json, results_json) = {
        let store = Arc::new(JsonlStore::open(&log).expect("open store"));
        let pipeline = AnalysisPipeline::new(
            Arc::new(FixedFace(BoundingBox::new(60.0, 60.0, 180.0, 180.0))),
            store,
        );
        let outcome = pipeline
            .analyze(&AnalysisRequest {
                image: &image,
                image_url: "/uploads/face.png".into(),
                gender: Some(Gender::Male),
            })
            .expect("analysis");
        (
            outcome.analysis_id.expect("saved"),
            serde_json::to_string(&outcome.landmarks).expect("json"),
            serde_json::to_string(&outcome.results).expect("json"),
        )
    };

    let store = JsonlStore::open(&log).expect("reopen store");
    let stored = store.get(id).expect("get").expect("record present");
    assert_eq!(stored.gender.as_deref(), Some("male"));
    assert_eq!(stored.facial_landmarks.get(), landmarks_json);
    assert_eq!(stored.analysis_results.get(), results_json);
}

#[test]
fn results_stay_in_documented_ranges() {
    let landmarks = mean_face_landmarks();
    for seed in 0..100 {
        let mut rng = StdRng::seed_from_u64(seed);
        let r = analyze_physiognomy_with_rng(&landmarks, Some(Gender::Female), &mut rng);

        let regions: Vec<_> = r.features.iter().map(|f| f.region).collect();
        assert_eq!(
            regions,
            vec![
                FacialRegion::Forehead,
                FacialRegion::Eyes,
                FacialRegion::Nose,
                FacialRegion::Mouth,
                FacialRegion::Chin,
            ]
        );
        assert!(r.features.iter().all(|f| f.score <= 100));
        assert!((75..95).contains(&r.overall.balance));
        assert!((70..95).contains(&r.overall.harmony));
        assert!((60..=95).contains(&r.animal_face.percentage));
        assert_eq!(r.animal_face.secondary_animals.len(), 3);
        assert!(r.recommendations.len() == 2 || r.recommendations.len() == 4);
        assert_eq!(r.detailed_measurements.jawline_angle, 125);
        assert_eq!(r.detailed_measurements.facial_symmetry, 90);
    }
}

#[test]
fn chin_reading_follows_gender() {
    let landmarks = mean_face_landmarks();
    let mut rng = StdRng::seed_from_u64(3);
    let male = analyze_physiognomy_with_rng(&landmarks, Some(Gender::Male), &mut rng);
    let female = analyze_physiognomy_with_rng(&landmarks, Some(Gender::Female), &mut rng);

    let chin = |r: &gwansang::PhysiognomyResults| {
        r.feature(FacialRegion::Chin).expect("chin").clone()
    };
    assert!(chin(&male).has_trait("리더십"));
    assert_ne!(chin(&male).interpretation, chin(&female).interpretation);
}
