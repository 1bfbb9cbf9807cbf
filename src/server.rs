//! HTTP surface: upload and analyze, save, fetch, list.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::DEFAULT_MAX_UPLOAD_BYTES;
use crate::detector::LandmarkExtractor;
use crate::error::Error;
use crate::landmarks::FacialLandmarks;
use crate::physiognomy::{Gender, PhysiognomyResults};
use crate::pipeline::{AnalysisPipeline, AnalysisRequest};
use crate::store::{AnalysisStore, NewAnalysis, StoredAnalysis};

/// Room for multipart boundaries and the other form fields on top of the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;
const DEFAULT_LIST_HOURS: i64 = 24;

#[derive(Clone)]
pub struct AppState {
    /// `None` when the face models could not be loaded at startup.
    pub extractor: Option<Arc<dyn LandmarkExtractor>>,
    pub store: Arc<dyn AnalysisStore>,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(store: Arc<dyn AnalysisStore>) -> Self {
        Self {
            extractor: None,
            store,
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn LandmarkExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = dir.into();
        self
    }

    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/analyze-face", post(analyze_face_handler))
        .route("/api/save-analysis", post(save_analysis_handler))
        .route("/api/analysis/:id", get(get_analysis_handler))
        .route("/api/analyses", get(list_analyses_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Error body: `{"message": ..., "errors": [...]?, "error": ...?}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    errors: Vec<String>,
    detail: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            errors: Vec::new(),
            detail: None,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn with_detail(mut self, detail: impl ToString) -> Self {
        self.detail = Some(detail.to_string());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Map an analysis failure; `context` is the message for server-side faults.
    fn from_analysis(err: Error, context: &str) -> Self {
        match err {
            Error::Validation(errors) => Self {
                errors,
                ..Self::bad_request("Invalid analysis data")
            },
            e if e.is_detection_failure() => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
            }
            e @ Error::ModelLoad(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            e => {
                error!(error = %e, "{context}");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, context).with_detail(e)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "message": self.message });
        if !self.errors.is_empty() {
            body["errors"] = json!(self.errors);
        }
        if let Some(detail) = self.detail {
            body["error"] = json!(detail);
        }
        (self.status, Json(body)).into_response()
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    let status = err.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::new(status, "File too large")
    } else {
        ApiError::new(status, "Malformed upload").with_detail(err.body_text())
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "timestamp": Utc::now().to_rfc3339() }))
}

struct Upload {
    bytes: Bytes,
    content_type: Option<String>,
    file_name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    success: bool,
    image_url: String,
    analysis_id: Option<u64>,
    facial_landmarks: FacialLandmarks,
    analysis_results: PhysiognomyResults,
}

async fn analyze_face_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let mut upload = None;
    let mut gender_field = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let content_type = field.content_type().map(str::to_string);
                let file_name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                upload = Some(Upload {
                    bytes,
                    content_type,
                    file_name,
                });
            }
            Some("gender") => gender_field = Some(field.text().await.map_err(multipart_error)?),
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| ApiError::bad_request("No image file provided"))?;
    if !upload
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.starts_with("image/"))
    {
        return Err(ApiError::bad_request("Only image files are allowed"));
    }
    if upload.bytes.len() > state.max_upload_bytes {
        return Err(ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, "File too large"));
    }
    let gender = match gender_field.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(g) => Some(
            g.parse::<Gender>()
                .map_err(|_| ApiError::bad_request("Invalid gender value"))?,
        ),
    };

    let extractor = state.extractor.clone().ok_or_else(|| {
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "얼굴 인식 모델이 로드되지 않았습니다. 잠시 후 다시 시도해주세요.",
        )
    })?;

    let (upload_path, image_url) = save_upload(&state.upload_dir, &upload)
        .await
        .map_err(|e| ApiError::from_analysis(e, "Face analysis failed"))?;

    let pipeline = AnalysisPipeline::new(extractor, state.store.clone());
    let bytes = upload.bytes;
    let url = image_url.clone();
    let analyzed = tokio::task::spawn_blocking(move || {
        pipeline.analyze(&AnalysisRequest {
            image: &bytes,
            image_url: url,
            gender,
        })
    })
    .await;
    let outcome = match analyzed {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            warn!(error = %e, image_url = %image_url, "face analysis rejected");
            discard_upload(&upload_path).await;
            return Err(ApiError::from_analysis(e, "Face analysis failed"));
        }
        Err(e) => {
            discard_upload(&upload_path).await;
            return Err(
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Face analysis failed")
                    .with_detail(e),
            );
        }
    };

    Ok(Json(AnalyzeResponse {
        success: true,
        image_url,
        analysis_id: outcome.analysis_id,
        facial_landmarks: outcome.landmarks,
        analysis_results: outcome.results,
    }))
}

/// Write the upload under a random name; returns the file path and its public URL.
async fn save_upload(dir: &FsPath, upload: &Upload) -> crate::Result<(PathBuf, String)> {
    let extension = upload
        .file_name
        .as_deref()
        .and_then(|n| FsPath::new(n).extension())
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();
    let name = format!("{}{extension}", Uuid::new_v4().simple());

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(&name);
    tokio::fs::write(&path, &upload.bytes).await?;
    info!(file = %name, bytes = upload.bytes.len(), "upload saved");
    Ok((path, format!("/uploads/{name}")))
}

/// Remove an upload no analysis refers to.
async fn discard_upload(path: &FsPath) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(error = %e, path = %path.display(), "could not remove rejected upload");
    }
}

async fn save_analysis_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = NewAnalysis::from_json(&body)
        .map_err(|e| ApiError::from_analysis(e, "Failed to save analysis"))?;
    let stored = state
        .store
        .put(record)
        .map_err(|e| ApiError::from_analysis(e, "Failed to save analysis"))?;
    info!(id = stored.id, image_url = %stored.image_url, "analysis saved");
    Ok(Json(json!({
        "success": true,
        "analysisId": stored.id,
        "message": "Analysis saved successfully",
    })))
}

async fn get_analysis_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StoredAnalysis>, ApiError> {
    let id: u64 = id
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid analysis ID"))?;
    state
        .store
        .get(id)
        .map_err(|e| ApiError::from_analysis(e, "Failed to retrieve analysis"))?
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Analysis not found"))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    hours: Option<i64>,
}

async fn list_analyses_handler(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<StoredAnalysis>>, ApiError> {
    let hours = match params {
        Ok(Query(p)) => p.hours.unwrap_or(DEFAULT_LIST_HOURS),
        Err(e) => return Err(ApiError::bad_request("Invalid hours value").with_detail(e.body_text())),
    };
    if !(1..=24 * 365).contains(&hours) {
        return Err(ApiError::bad_request("Invalid hours value"));
    }
    let to = Utc::now();
    let from = to - Duration::hours(hours);
    state
        .store
        .list_range(from, to)
        .map(Json)
        .map_err(|e| ApiError::from_analysis(e, "Failed to retrieve analyses"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_bad_request_with_field_list() {
        let err = ApiError::from_analysis(
            Error::Validation(vec!["imageUrl: required".into()]),
            "Failed to save analysis",
        );
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Invalid analysis data");
        assert_eq!(err.errors, vec!["imageUrl: required"]);
    }

    #[test]
    fn detection_and_model_errors_have_their_own_statuses() {
        assert_eq!(
            ApiError::from_analysis(Error::NoFaceDetected, "x").status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from_analysis(Error::MultipleFacesDetected(2), "x").status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from_analysis(Error::ModelLoad("gone".into()), "x").status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        let storage = ApiError::from_analysis(Error::Storage("disk full".into()), "Failed to save analysis");
        assert_eq!(storage.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(storage.message, "Failed to save analysis");
        assert_eq!(storage.detail.as_deref(), Some("Storage error: disk full"));
    }
}
