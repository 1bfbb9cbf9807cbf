use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model deserialization error: {0}")]
    Deserialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("얼굴 인식 모델을 로드하는데 실패했습니다: {0}")]
    ModelLoad(String),

    #[error("이미지를 로드할 수 없습니다: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("얼굴을 감지할 수 없습니다. 얼굴이 명확히 보이는 사진을 사용해주세요.")]
    NoFaceDetected,

    #[error("여러 개의 얼굴이 감지되었습니다. 한 명의 얼굴만 포함된 사진을 사용해주세요. ({0} faces)")]
    MultipleFacesDetected(usize),

    #[error("Expected at least 68 landmarks, got {0}")]
    InvalidLandmarks(usize),

    #[error("Invalid analysis data: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Detection failures the user can fix by picking a different photo.
    pub fn is_detection_failure(&self) -> bool {
        matches!(
            self,
            Error::NoFaceDetected
                | Error::MultipleFacesDetected(_)
                | Error::ImageDecode(_)
                | Error::InvalidLandmarks(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
