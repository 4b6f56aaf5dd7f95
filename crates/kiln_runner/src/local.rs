//! Filesystem-backed collaborators for local runs.
//!
//! These back the `kiln-runner` binary so a full run can be exercised
//! without any remote services: a spool directory stands in for the
//! queue, a local directory tree for the object store, and JSON-lines
//! files for the result tables.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info};

use kiln_intake::{MessageSource, ResolveError, ResourceResolver, SourceError};
use kiln_protocol::{RawMessage, ResultRecord, StorageUri, UnitInfo, WorkUnit};
use kiln_sinks::{SinkError, TableClient};

use crate::notify::{Notifier, NotifyError};
use crate::predictor::{PredictError, Predictor};

const LEASED_SUFFIX: &str = "leased";

/// Treats `*.json` files in a directory as queued messages.
///
/// Fetching renames the file to `*.leased` so a second consumer cannot
/// pick it up; ack deletes it, release renames it back. Lease and
/// release delays have no local enforcement and are ignored.
pub struct SpoolSource {
    dir: PathBuf,
}

impl SpoolSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn message_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn leased_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{LEASED_SUFFIX}"))
    }

    fn next_message_file(&self) -> Result<Option<String>, SourceError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| SourceError::Fetch(e.to_string()))?;
        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    path.file_stem()
                        .and_then(|s| s.to_str())
                        .map(str::to_string)
                } else {
                    None
                }
            })
            .collect();
        ids.sort();
        Ok(ids.into_iter().next())
    }
}

impl MessageSource for SpoolSource {
    async fn fetch_one(&mut self, _visibility: Duration) -> Result<Option<RawMessage>, SourceError> {
        let Some(id) = self.next_message_file()? else {
            return Ok(None);
        };
        fs::rename(self.message_path(&id), self.leased_path(&id))
            .map_err(|e| SourceError::Fetch(e.to_string()))?;
        let body =
            fs::read(self.leased_path(&id)).map_err(|e| SourceError::Fetch(e.to_string()))?;
        debug!(%id, "leased spool message");
        Ok(Some(RawMessage::new(id, body)))
    }

    async fn ack(&mut self, message: &RawMessage) -> Result<(), SourceError> {
        fs::remove_file(self.leased_path(&message.id.0)).map_err(|e| SourceError::Ack {
            id: message.id.0.clone(),
            message: e.to_string(),
        })
    }

    async fn release(&mut self, message: &RawMessage, _delay: Duration) -> Result<(), SourceError> {
        fs::rename(
            self.leased_path(&message.id.0),
            self.message_path(&message.id.0),
        )
        .map_err(|e| SourceError::Release {
            id: message.id.0.clone(),
            message: e.to_string(),
        })
    }
}

/// Resolves `s3://bucket/key` as `<root>/bucket/key` on disk.
pub struct DirResolver {
    root: PathBuf,
}

impl DirResolver {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl ResourceResolver for DirResolver {
    async fn resolve(&self, uri: &StorageUri) -> Result<Vec<u8>, ResolveError> {
        let path = self.root.join(&uri.bucket).join(&uri.key);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(ResolveError::NotFound(uri.clone()))
            }
            Err(err) => Err(ResolveError::Fetch {
                uri: uri.clone(),
                message: err.to_string(),
            }),
        }
    }
}

/// Appends table rows as JSON lines, one file per table.
pub struct JsonFileTableClient {
    requests_path: PathBuf,
    details_path: PathBuf,
}

impl JsonFileTableClient {
    pub fn new(out_dir: PathBuf) -> Self {
        Self {
            requests_path: out_dir.join("requests.jsonl"),
            details_path: out_dir.join("details.jsonl"),
        }
    }

    fn append(path: &PathBuf, item: &ResultRecord) -> Result<(), SinkError> {
        let line = serde_json::to_string(item).map_err(|e| SinkError::Table(e.to_string()))?;
        let mut contents = fs::read_to_string(path).unwrap_or_default();
        contents.push_str(&line);
        contents.push('\n');
        fs::write(path, contents).map_err(|e| SinkError::Table(e.to_string()))
    }
}

impl TableClient for JsonFileTableClient {
    async fn update_request(&mut self, item: ResultRecord) -> Result<(), SinkError> {
        Self::append(&self.requests_path, &item)
    }

    async fn put_detail(&mut self, item: ResultRecord) -> Result<(), SinkError> {
        Self::append(&self.details_path, &item)
    }
}

/// Logs notifications instead of delivering them.
#[derive(Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn send(&mut self, address: &str, payload: String) -> Result<(), NotifyError> {
        info!(%address, %payload, "notification");
        Ok(())
    }
}

/// Reports payload sizes without real inference. Used for smoke runs.
pub struct EchoPredictor {
    pub limit: Option<Duration>,
}

impl Predictor for EchoPredictor {
    fn version(&self) -> &str {
        "echo-0.1.0"
    }

    fn timeout(&self) -> Option<Duration> {
        self.limit
    }

    async fn predict(&mut self, unit: &WorkUnit, _info: &UnitInfo) -> Result<Value, PredictError> {
        let results: Vec<Value> = unit
            .payloads
            .iter()
            .map(|(field, payload)| {
                json!({
                    "s3_uri": unit.request.get(field).cloned().unwrap_or(Value::Null),
                    "payload_bytes": payload.len(),
                })
            })
            .collect();
        Ok(json!({ "result": results }))
    }
}
