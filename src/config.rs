//! Server configuration: JSON file first, then `GWANSANG_*` environment
//! overrides.

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::detector::DetectorConfig;
use crate::error::{Error, Result};

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    Jsonl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub kind: StorageKind,
    /// Log file for the `jsonl` store.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Memory,
            path: PathBuf::from("data/analyses.jsonl"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub log_json: bool,
    pub storage: StorageConfig,
    /// Without a detector the service still saves and serves analyses but
    /// cannot analyze photos.
    pub detector: Option<DetectorConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            log_json: false,
            storage: StorageConfig::default(),
            detector: None,
        }
    }
}

impl ServerConfig {
    /// Load `path` if given (missing fields default), then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = fs::read_to_string(p)?;
                let config: Self = serde_json::from_str(&content)?;
                info!(path = %p.display(), "loaded configuration");
                config
            }
            None => Self::default(),
        };
        config.apply_env(|name| env::var(name).ok())?;
        Ok(config)
    }

    /// Override fields from `GWANSANG_*` variables looked up through `var`.
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("GWANSANG_BIND") {
            self.bind = parse_var("GWANSANG_BIND", &v)?;
        }
        if let Some(v) = var("GWANSANG_UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(v);
        }
        if let Some(v) = var("GWANSANG_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = parse_var("GWANSANG_MAX_UPLOAD_BYTES", &v)?;
        }
        if let Some(v) = var("GWANSANG_LOG_JSON") {
            self.log_json = parse_bool("GWANSANG_LOG_JSON", &v)?;
        }
        if let Some(v) = var("GWANSANG_STORAGE") {
            self.storage.kind = match v.as_str() {
                "memory" => StorageKind::Memory,
                "jsonl" => StorageKind::Jsonl,
                other => {
                    return Err(Error::Validation(vec![format!(
                        "GWANSANG_STORAGE: expected 'memory' or 'jsonl', got '{other}'"
                    )]))
                }
            };
        }
        if let Some(v) = var("GWANSANG_STORAGE_PATH") {
            self.storage.path = PathBuf::from(v);
        }

        let detector_model = var("GWANSANG_DETECTOR_MODEL");
        let landmark_model = var("GWANSANG_LANDMARK_MODEL");
        let min_face_size = var("GWANSANG_MIN_FACE_SIZE");
        if detector_model.is_some() || landmark_model.is_some() || min_face_size.is_some() {
            let detector = self.detector.get_or_insert_with(DetectorConfig::default);
            if let Some(v) = detector_model {
                detector.detector_model = PathBuf::from(v);
            }
            if let Some(v) = landmark_model {
                detector.landmark_model = PathBuf::from(v);
            }
            if let Some(v) = min_face_size {
                detector.min_face_size = parse_var("GWANSANG_MIN_FACE_SIZE", &v)?;
            }
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Validation(vec![format!("{name}: cannot parse '{value}'")]))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Ok(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Ok(false),
        _ => Err(Error::Validation(vec![format!("{name}: expected a boolean, got '{value}'")])),
    }
}
