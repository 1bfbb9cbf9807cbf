//! # gwansang
//!
//! Korean face reading (관상) from a single photo.
//!
//! This crate provides:
//! - **Landmark Detection**: face detection with `rustface` followed by an
//!   ERT-based 68-point shape predictor, loaded from dlib's published models
//! - **Rule Engine**: five per-region analyzers, an overall assessment,
//!   recommendations and an animal-face (동물상) classification
//! - **Persistence**: an append-only analysis store with in-memory and
//!   JSON-lines backends
//! - **HTTP Service**: upload-and-analyze, save, fetch and list endpoints
//!
//! ## Pipeline
//!
//! 1. Decode the upload and convert it to grayscale
//! 2. Detect exactly one face and predict its 68 landmarks
//! 3. Group the landmarks by region (forehead, eyes, nose, mouth, chin, jawline)
//! 4. Score every region, then derive overall balance, recommendations and
//!    the animal face
//! 5. Store the landmarks and results under a fresh id
//!
//! ## Quick Start
//!
//! ```rust
//! use gwansang::{
//!     analyze_physiognomy_with_rng, default_68_point_mean_shape, BoundingBox,
//!     FacialLandmarks, Gender, RegressionTree, Shape, ShapePredictor, TreeEnsemble,
//!     TreeNode,
//! };
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! // A trained model would come from
//! // `dlib::load_dlib_model("shape_predictor_68_face_landmarks.dat.bz2")`.
//! let tree = RegressionTree::new(vec![TreeNode::Leaf {
//!     delta: Shape::zeros(68),
//! }]);
//! let model = ShapePredictor::new(
//!     default_68_point_mean_shape(),
//!     vec![TreeEnsemble::new(vec![tree])],
//! )
//! .unwrap();
//!
//! let image = image::GrayImage::new(320, 320);
//! let face = BoundingBox::new(80.0, 80.0, 160.0, 160.0);
//! let shape = model.predict(&image, &face).unwrap();
//!
//! let landmarks = FacialLandmarks::from_shape(&shape).unwrap();
//! let results = analyze_physiognomy_with_rng(
//!     &landmarks,
//!     Some(Gender::Female),
//!     &mut StdRng::seed_from_u64(7),
//! );
//! assert_eq!(results.features.len(), 5);
//! println!("{}: {}", results.animal_face.primary_animal, results.overall.summary);
//! ```

pub mod animal;
pub mod config;
pub mod detector;
pub mod dlib;
mod error;
pub mod landmarks;
pub mod measurements;
pub mod physiognomy;
pub mod pipeline;
pub mod predictor;
pub mod server;
pub mod store;
mod types;

pub use animal::{classify_animal_face, AnimalFaceAnalysis, SecondaryAnimal};
pub use config::{ServerConfig, StorageConfig, StorageKind};
pub use detector::{load_landmark_model, DetectorConfig, FaceDetector, LandmarkExtractor};
pub use error::{Error, Result};
pub use landmarks::{EyePair, FacialLandmarks};
pub use measurements::DetailedMeasurements;
pub use physiognomy::{
    analyze_physiognomy, analyze_physiognomy_with_rng, FacialRegion, FeatureAnalysis,
    FeatureMeasurements, Gender, OverallAssessment, PhysiognomyResults,
};
pub use pipeline::{AnalysisOutcome, AnalysisPipeline, AnalysisRequest};
pub use predictor::{
    default_68_point_mean_shape, find_similarity_transform, ImageAccess, RegressionTree,
    ShapePredictor, SimilarityTransform2D, SplitFeature, TreeEnsemble, TreeNode,
};
pub use server::{build_router, ApiError, AppState};
pub use store::{AnalysisStore, JsonlStore, MemoryStore, NewAnalysis, StoredAnalysis};
pub use types::{BoundingBox, Point, Shape};
