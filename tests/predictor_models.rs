//! Integration tests for landmark model files and the face detector.

use gwansang::{
    default_68_point_mean_shape, load_landmark_model, BoundingBox, DetectorConfig, FaceDetector,
    FacialLandmarks, LandmarkExtractor, Point, RegressionTree, Shape, ShapePredictor,
    SplitFeature, TreeEnsemble, TreeNode,
};
use std::path::PathBuf;

fn existing_dir(name: &str) -> Option<PathBuf> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(name);
    if path.exists() {
        Some(path)
    } else {
        None
    }
}

fn uniform_shift(dx: f32, dy: f32) -> Shape {
    Shape::new(vec![Point::new(dx, dy); 68])
}

/// One split on two pixels around landmark 30; left shifts right, right shifts left.
fn split_model(threshold: f32) -> ShapePredictor {
    let feature = SplitFeature {
        anchor1_idx: 30,
        offset1_x: 0.0,
        offset1_y: 0.0,
        anchor2_idx: 30,
        offset2_x: 0.05,
        offset2_y: 0.0,
    };
    let tree = RegressionTree::new(vec![
        TreeNode::Split {
            feature,
            threshold,
            left: 1,
            right: 2,
        },
        TreeNode::Leaf {
            delta: uniform_shift(0.1, 0.0),
        },
        TreeNode::Leaf {
            delta: uniform_shift(-0.1, 0.0),
        },
    ]);
    ShapePredictor::new(
        default_68_point_mean_shape(),
        vec![TreeEnsemble::new(vec![tree])],
    )
    .expect("valid model")
}

fn assert_close(a: Point, b: Point) {
    assert!(
        (a.x - b.x).abs() < 1e-3 && (a.y - b.y).abs() < 1e-3,
        "{a:?} != {b:?}"
    );
}

#[test]
fn saved_model_reloads_and_predicts_the_same() {
    let model = split_model(-1.0);
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("landmarks.bin");
    std::fs::write(&path, model.to_bytes().expect("serialize")).expect("write model");

    let loaded = ShapePredictor::load(&path).expect("load model");
    assert_eq!(loaded.num_landmarks(), 68);
    assert_eq!(loaded.num_cascade_stages(), 1);

    let image = image::GrayImage::from_pixel(200, 200, image::Luma([128]));
    let face = BoundingBox::new(50.0, 40.0, 100.0, 120.0);
    assert_eq!(
        model.predict(&image, &face).expect("predict"),
        loaded.predict(&image, &face).expect("predict")
    );
}

#[test]
fn split_threshold_picks_the_branch() {
    // Uniform image: every pixel difference is 0.
    let image = image::GrayImage::from_pixel(200, 200, image::Luma([128]));
    let face = BoundingBox::new(50.0, 40.0, 100.0, 120.0);
    let mean = default_68_point_mean_shape();
    let expected = |dx: f32| face.denormalize_point(mean[0]) + Point::new(dx * face.width, 0.0);

    let left = split_model(-1.0).predict(&image, &face).expect("predict");
    assert_close(left[0], expected(0.1));

    let right = split_model(1.0).predict(&image, &face).expect("predict");
    assert_close(right[0], expected(-0.1));

    let landmarks = FacialLandmarks::from_shape(&left).expect("68 points");
    assert_eq!(landmarks.jawline.len(), 17);
    assert_eq!(landmarks.mouth.len(), 20);
}

#[test]
fn truncated_model_file_is_rejected() {
    let bytes = split_model(0.0).to_bytes().expect("serialize");
    assert!(ShapePredictor::from_bytes(&bytes[..bytes.len() / 2]).is_err());
}

#[test]
fn landmark_model_format_follows_file_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bytes = split_model(0.0).to_bytes().expect("serialize");

    let bin = dir.path().join("landmarks.bin");
    std::fs::write(&bin, &bytes).expect("write model");
    assert_eq!(load_landmark_model(&bin).expect("bincode model").num_landmarks(), 68);

    // Same bytes under a dlib name go through the dlib reader and fail its version check.
    let dat = dir.path().join("landmarks.dat");
    std::fs::write(&dat, &bytes).expect("write model");
    assert!(load_landmark_model(&dat).is_err());
}

#[test]
fn real_models_reject_blank_photo() {
    let (Some(seeta), Some(dlib)) = (existing_dir("models"), existing_dir("dlib-models")) else {
        eprintln!("Skipping test: models or dlib-models directory not found");
        return;
    };
    let config = DetectorConfig {
        detector_model: seeta.join("seeta_fd_frontal_v1.0.bin"),
        landmark_model: dlib.join("shape_predictor_68_face_landmarks.dat.bz2"),
        ..DetectorConfig::default()
    };
    if !config.detector_model.exists() || !config.landmark_model.exists() {
        eprintln!("Skipping test: model files not found");
        return;
    }

    let detector = FaceDetector::load(&config).expect("load models");
    let blank = image::DynamicImage::ImageLuma8(image::GrayImage::new(320, 240));
    let err = detector.extract(&blank).expect_err("no face in a blank image");
    assert!(matches!(err, gwansang::Error::NoFaceDetected));
}
