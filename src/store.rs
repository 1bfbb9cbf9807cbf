//! Append-only persistence of analyses.
//!
//! Landmark and result payloads are kept as raw JSON so a record reads back
//! exactly as it was written.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::landmarks::FacialLandmarks;
use crate::physiognomy::{Gender, PhysiognomyResults};

/// An analysis ready to be stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAnalysis {
    pub image_url: String,
    pub gender: Option<String>,
    pub facial_landmarks: Box<RawValue>,
    pub analysis_results: Box<RawValue>,
}

impl NewAnalysis {
    pub fn from_results(
        image_url: impl Into<String>,
        gender: Option<Gender>,
        landmarks: &FacialLandmarks,
        results: &PhysiognomyResults,
    ) -> Result<Self> {
        Ok(Self {
            image_url: image_url.into(),
            gender: gender.map(|g| g.as_str().to_string()),
            facial_landmarks: serde_json::value::to_raw_value(landmarks)?,
            analysis_results: serde_json::value::to_raw_value(results)?,
        })
    }

    /// Validate a client-submitted record.
    ///
    /// `imageUrl` must be a string, `gender` a string or null, and both
    /// payloads present and non-null. Payload bytes are kept as sent. Every
    /// offending field is reported, not just the first.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let mut fields: HashMap<String, Box<RawValue>> = serde_json::from_slice(body)
            .map_err(|e| Error::Validation(vec![format!("body: expected a JSON object ({e})")]))?;

        let mut errors = Vec::new();

        let image_url = match fields.remove("imageUrl") {
            Some(raw) => serde_json::from_str::<String>(raw.get())
                .map_err(|_| errors.push("imageUrl: expected a string".to_string()))
                .ok(),
            None => {
                errors.push("imageUrl: required".to_string());
                None
            }
        };

        let gender = match fields.remove("gender") {
            Some(raw) => serde_json::from_str::<Option<String>>(raw.get())
                .map_err(|_| errors.push("gender: expected a string or null".to_string()))
                .ok()
                .flatten(),
            None => None,
        };

        let mut payload = |name: &str| match fields.remove(name) {
            Some(raw) if raw.get().trim() != "null" => Some(raw),
            Some(_) => {
                errors.push(format!("{name}: must not be null"));
                None
            }
            None => {
                errors.push(format!("{name}: required"));
                None
            }
        };
        let facial_landmarks = payload("facialLandmarks");
        let analysis_results = payload("analysisResults");

        match (image_url, facial_landmarks, analysis_results) {
            (Some(image_url), Some(facial_landmarks), Some(analysis_results)) if errors.is_empty() => {
                Ok(Self {
                    image_url,
                    gender,
                    facial_landmarks,
                    analysis_results,
                })
            }
            _ => Err(Error::Validation(errors)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAnalysis {
    pub id: u64,
    pub image_url: String,
    pub gender: Option<String>,
    pub facial_landmarks: Box<RawValue>,
    pub analysis_results: Box<RawValue>,
    pub created_at: DateTime<Utc>,
}

impl StoredAnalysis {
    fn assign(id: u64, new: NewAnalysis, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            image_url: new.image_url,
            gender: new.gender,
            facial_landmarks: new.facial_landmarks,
            analysis_results: new.analysis_results,
            created_at,
        }
    }
}

pub trait AnalysisStore: Send + Sync {
    /// Store under a freshly generated id.
    fn put(&self, analysis: NewAnalysis) -> Result<StoredAnalysis>;

    fn get(&self, id: u64) -> Result<Option<StoredAnalysis>>;

    /// Records created within `[from, to]`, oldest id first.
    fn list_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<StoredAnalysis>>;
}

fn lock_poisoned<T>(_: T) -> Error {
    Error::Storage("store lock poisoned".into())
}

fn in_range(
    records: &BTreeMap<u64, StoredAnalysis>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Vec<StoredAnalysis> {
    records
        .values()
        .filter(|r| r.created_at >= from && r.created_at <= to)
        .cloned()
        .collect()
}

/// Process-local store; ids start at 1.
#[derive(Debug)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<u64, StoredAnalysis>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisStore for MemoryStore {
    fn put(&self, analysis: NewAnalysis) -> Result<StoredAnalysis> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = StoredAnalysis::assign(id, analysis, Utc::now());
        self.records
            .lock()
            .map_err(lock_poisoned)?
            .insert(id, record.clone());
        debug!(id, "analysis stored in memory");
        Ok(record)
    }

    fn get(&self, id: u64) -> Result<Option<StoredAnalysis>> {
        Ok(self.records.lock().map_err(lock_poisoned)?.get(&id).cloned())
    }

    fn list_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<StoredAnalysis>> {
        Ok(in_range(&*self.records.lock().map_err(lock_poisoned)?, from, to))
    }
}

/// One JSON record per line, appended and never rewritten.
///
/// The file is replayed into memory on open; ids continue after the highest
/// id found.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    inner: Mutex<JsonlInner>,
}

#[derive(Debug)]
struct JsonlInner {
    file: File,
    records: BTreeMap<u64, StoredAnalysis>,
    next_id: u64,
}

impl JsonlStore {
    /// Open or create the log and replay it.
    ///
    /// An unterminated last line is what a crash mid-append leaves behind: it
    /// is kept if it parses and cut off otherwise. Any other bad line fails
    /// the open.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut contents = Vec::new();
        if path.exists() {
            File::open(&path)?.read_to_end(&mut contents)?;
        }
        let complete = contents
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i + 1);

        let mut records = BTreeMap::new();
        for (lineno, line) in contents[..complete].split(|&b| b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let record: StoredAnalysis = serde_json::from_slice(line).map_err(|e| {
                Error::Storage(format!("{}:{}: {e}", path.display(), lineno + 1))
            })?;
            records.insert(record.id, record);
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        let tail = &contents[complete..];
        if !tail.iter().all(u8::is_ascii_whitespace) {
            match serde_json::from_slice::<StoredAnalysis>(tail) {
                Ok(record) => {
                    records.insert(record.id, record);
                    file.write_all(b"\n")?;
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        bytes = tail.len(),
                        error = %e,
                        "dropping torn record at end of analysis log"
                    );
                    file.set_len(complete as u64)?;
                }
            }
        }

        let next_id = records.keys().next_back().map_or(1, |id| id + 1);
        info!(path = %path.display(), records = records.len(), next_id, "analysis log opened");

        Ok(Self {
            path,
            inner: Mutex::new(JsonlInner {
                file,
                records,
                next_id,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A log that can be cut back after a failed append.
trait AppendLog: Write {
    fn end(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl AppendLog for File {
    fn end(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append `line` whole or not at all.
fn append_line<L: AppendLog>(log: &mut L, line: &[u8]) -> io::Result<()> {
    let len = log.end()?;
    if let Err(e) = log.write_all(line).and_then(|()| log.flush()) {
        if let Err(undo) = log.truncate(len) {
            warn!(error = %undo, len, "could not roll back partial append");
        }
        return Err(e);
    }
    Ok(())
}

impl AnalysisStore for JsonlStore {
    fn put(&self, analysis: NewAnalysis) -> Result<StoredAnalysis> {
        let mut inner = self.inner.lock().map_err(lock_poisoned)?;
        let id = inner.next_id;
        let record = StoredAnalysis::assign(id, analysis, Utc::now());

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        append_line(&mut inner.file, &line)?;

        inner.next_id += 1;
        inner.records.insert(id, record.clone());
        debug!(id, path = %self.path.display(), "analysis appended");
        Ok(record)
    }

    fn get(&self, id: u64) -> Result<Option<StoredAnalysis>> {
        Ok(self
            .inner
            .lock()
            .map_err(lock_poisoned)?
            .records
            .get(&id)
            .cloned())
    }

    fn list_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<StoredAnalysis>> {
        Ok(in_range(
            &self.inner.lock().map_err(lock_poisoned)?.records,
            from,
            to,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(url: &str) -> NewAnalysis {
        NewAnalysis {
            image_url: url.to_string(),
            gender: Some("female".to_string()),
            facial_landmarks: RawValue::from_string(r#"{"chin":[{"x":1.5,"y":2}]}"#.into()).unwrap(),
            analysis_results: RawValue::from_string(r#"{ "overall" : {"balance":80} }"#.into())
                .unwrap(),
        }
    }

    #[test]
    fn submitted_record_keeps_payload_bytes() {
        let body = br#"{"imageUrl":"/uploads/x.jpg","gender":null,"facialLandmarks":{"chin": [ ]},"analysisResults":[1, 2]}"#;
        let record = NewAnalysis::from_json(body).unwrap();
        assert_eq!(record.image_url, "/uploads/x.jpg");
        assert_eq!(record.gender, None);
        assert_eq!(record.facial_landmarks.get(), r#"{"chin": [ ]}"#);
        assert_eq!(record.analysis_results.get(), "[1, 2]");
    }

    #[test]
    fn submitted_record_reports_every_bad_field() {
        let err = NewAnalysis::from_json(br#"{"imageUrl":7,"facialLandmarks":null}"#).unwrap_err();
        let Error::Validation(errors) = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert_eq!(
            errors,
            vec![
                "imageUrl: expected a string",
                "facialLandmarks: must not be null",
                "analysisResults: required",
            ]
        );

        assert!(matches!(
            NewAnalysis::from_json(b"[1,2,3]"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn memory_store_assigns_increasing_ids() {
        let store = MemoryStore::new();
        let a = store.put(sample("/uploads/a.jpg")).unwrap();
        let b = store.put(sample("/uploads/b.jpg")).unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(store.get(2).unwrap().unwrap().image_url, "/uploads/b.jpg");
        assert!(store.get(3).unwrap().is_none());
    }

    #[test]
    fn payloads_keep_their_exact_bytes() {
        let store = MemoryStore::new();
        let id = store.put(sample("/uploads/a.jpg")).unwrap().id;
        let back = store.get(id).unwrap().unwrap();
        assert_eq!(back.facial_landmarks.get(), r#"{"chin":[{"x":1.5,"y":2}]}"#);
        assert_eq!(back.analysis_results.get(), r#"{ "overall" : {"balance":80} }"#);
    }

    #[test]
    fn list_range_filters_by_creation_time() {
        let store = MemoryStore::new();
        store.put(sample("/uploads/a.jpg")).unwrap();
        store.put(sample("/uploads/b.jpg")).unwrap();

        let now = Utc::now();
        let all = store.list_range(now - Duration::hours(1), now).unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);

        let none = store
            .list_range(now - Duration::hours(3), now - Duration::hours(2))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn jsonl_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("analyses.jsonl");

        {
            let store = JsonlStore::open(&path).unwrap();
            assert_eq!(store.put(sample("/uploads/a.jpg")).unwrap().id, 1);
            assert_eq!(store.put(sample("/uploads/b.jpg")).unwrap().id, 2);
        }

        let store = JsonlStore::open(&path).unwrap();
        let a = store.get(1).unwrap().unwrap();
        assert_eq!(a.image_url, "/uploads/a.jpg");
        assert_eq!(a.analysis_results.get(), r#"{ "overall" : {"balance":80} }"#);
        assert_eq!(store.put(sample("/uploads/c.jpg")).unwrap().id, 3);

        let lines = std::fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 3);
    }

    /// Accepts `room` bytes, then fails like a full disk.
    struct ShortLog {
        bytes: Vec<u8>,
        room: usize,
    }

    impl Write for ShortLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.room == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "no space left on device"));
            }
            let n = buf.len().min(self.room);
            self.bytes.extend_from_slice(&buf[..n]);
            self.room -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl AppendLog for ShortLog {
        fn end(&self) -> io::Result<u64> {
            Ok(self.bytes.len() as u64)
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.bytes.truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn failed_append_leaves_no_partial_line() {
        let mut log = ShortLog {
            bytes: b"{\"id\":1}\n".to_vec(),
            room: 6,
        };
        assert!(append_line(&mut log, b"{\"id\":2,\"imageUrl\":\"/uploads/b.jpg\"}\n").is_err());
        assert_eq!(log.bytes, b"{\"id\":1}\n");

        log.room = 64;
        append_line(&mut log, b"{\"id\":2}\n").unwrap();
        assert_eq!(log.bytes, b"{\"id\":1}\n{\"id\":2}\n");
    }

    #[test]
    fn torn_last_line_is_dropped_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analyses.jsonl");
        {
            let store = JsonlStore::open(&path).unwrap();
            store.put(sample("/uploads/a.jpg")).unwrap();
        }
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(br#"{"id":2,"imageUrl":"/up"#)
            .unwrap();

        let store = JsonlStore::open(&path).unwrap();
        assert_eq!(store.get(1).unwrap().unwrap().image_url, "/uploads/a.jpg");
        assert!(store.get(2).unwrap().is_none());
        assert_eq!(store.put(sample("/uploads/b.jpg")).unwrap().id, 2);
        drop(store);

        let store = JsonlStore::open(&path).unwrap();
        assert_eq!(store.get(2).unwrap().unwrap().image_url, "/uploads/b.jpg");
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn unterminated_complete_record_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analyses.jsonl");
        {
            let store = JsonlStore::open(&path).unwrap();
            store.put(sample("/uploads/a.jpg")).unwrap();
        }
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.trim_end()).unwrap();

        let store = JsonlStore::open(&path).unwrap();
        assert_eq!(store.get(1).unwrap().unwrap().image_url, "/uploads/a.jpg");
        assert_eq!(store.put(sample("/uploads/b.jpg")).unwrap().id, 2);
        drop(store);

        let store = JsonlStore::open(&path).unwrap();
        assert_eq!(store.get(2).unwrap().unwrap().image_url, "/uploads/b.jpg");
    }

    #[test]
    fn corrupt_middle_line_still_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analyses.jsonl");
        std::fs::write(&path, "{not json}\n{\"also\": \"bad\"").unwrap();
        let err = JsonlStore::open(&path).unwrap_err();
        assert!(matches!(err, Error::Storage(msg) if msg.contains(":1:")));
    }

    #[test]
    fn corrupt_log_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analyses.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();
        let err = JsonlStore::open(&path).unwrap_err();
        assert!(matches!(err, Error::Storage(msg) if msg.contains(":1:")));
    }
}
