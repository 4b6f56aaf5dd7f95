//! Core data model: work units, source messages, storage URIs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// A decoded element of a source message body: one processing request.
pub type WorkRequest = Map<String, Value>;

/// A result record headed for a sink. Structurally a JSON object; the
/// destination's required-field contract is validated at flush time,
/// not while buffering.
pub type ResultRecord = Map<String, Value>;

/// Opaque identifier for a raw source message (receipt handle).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One message fetched from the intake source. May decode into one or
/// many work requests.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: MessageId,
    pub body: Vec<u8>,
    /// How many times the source has delivered this message.
    pub receive_count: u32,
}

impl RawMessage {
    pub fn new(id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: MessageId(id.into()),
            body: body.into(),
            receive_count: 1,
        }
    }
}

/// `s3://bucket/key`-style reference to an external payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageUri {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Error)]
pub enum StorageUriError {
    #[error("invalid storage uri '{uri}': {source}")]
    Parse {
        uri: String,
        #[source]
        source: url::ParseError,
    },
    #[error("storage uri '{0}' has no bucket")]
    MissingBucket(String),
    #[error("storage uri '{0}' has no key")]
    MissingKey(String),
}

impl StorageUri {
    pub fn parse(uri: &str) -> Result<Self, StorageUriError> {
        let parsed = Url::parse(uri).map_err(|source| StorageUriError::Parse {
            uri: uri.to_string(),
            source,
        })?;
        let bucket = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| StorageUriError::MissingBucket(uri.to_string()))?
            .to_string();
        let key = parsed.path().trim_start_matches('/').to_string();
        if key.is_empty() {
            return Err(StorageUriError::MissingKey(uri.to_string()));
        }
        Ok(Self { bucket, key })
    }
}

impl fmt::Display for StorageUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

impl FromStr for StorageUri {
    type Err = StorageUriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Intake-private detail about where a unit's payload came from.
///
/// Never merged into result records; kept for operator logs only.
#[derive(Debug, Clone, Default)]
pub struct SourceDetail {
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub uri_field: Option<String>,
    pub message_id: Option<MessageId>,
}

/// Mutable side channel that accompanies a work unit from intake through
/// the runner to the sink. Request fields accumulate here and are merged
/// into the result record; `source` stays intake-private.
#[derive(Debug, Clone)]
pub struct UnitInfo {
    /// Seconds spent resolving this unit's external payloads.
    pub download_time: f64,
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub source: SourceDetail,
    /// Fields copied from the originating request.
    pub request_fields: Map<String, Value>,
}

impl Default for UnitInfo {
    fn default() -> Self {
        Self {
            download_time: 0.0,
            is_valid: true,
            errors: Vec::new(),
            source: SourceDetail::default(),
            request_fields: Map::new(),
        }
    }
}

impl UnitInfo {
    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Mark the unit invalid with an explanatory message.
    pub fn invalidate(&mut self, message: impl Into<String>) {
        self.is_valid = false;
        self.push_error(message);
    }

    /// String-valued request field, if present.
    pub fn request_str(&self, field: &str) -> Option<&str> {
        self.request_fields.get(field).and_then(Value::as_str)
    }
}

/// One unit of work: the originating request plus any resolved external
/// payloads, keyed by the request field that referenced them.
#[derive(Debug, Clone, Default)]
pub struct WorkUnit {
    pub request: WorkRequest,
    pub payloads: HashMap<String, Vec<u8>>,
}

impl WorkUnit {
    pub fn from_request(request: WorkRequest) -> Self {
        Self {
            request,
            payloads: HashMap::new(),
        }
    }

    /// True when no payload was resolved or every resolved payload is
    /// zero-length. Treated like `is_valid = false` by the runner.
    pub fn is_empty(&self) -> bool {
        self.payloads.values().all(|p| p.is_empty())
    }
}

/// State recorded on table rows for a processed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Completed,
    Error,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Completed => "completed",
            RunState::Error => "error",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a run's scope exited. Decides ack-vs-release on the intake side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn storage_uri_parses_bucket_and_key() {
        let uri = StorageUri::parse("s3://my-bucket/path/to/object.csv").unwrap();
        assert_eq!(uri.bucket, "my-bucket");
        assert_eq!(uri.key, "path/to/object.csv");
        assert_eq!(uri.to_string(), "s3://my-bucket/path/to/object.csv");
    }

    #[test]
    fn storage_uri_rejects_missing_key() {
        let err = StorageUri::parse("s3://my-bucket/").unwrap_err();
        assert!(matches!(err, StorageUriError::MissingKey(_)));
    }

    #[test]
    fn storage_uri_rejects_garbage() {
        assert!(StorageUri::parse("not a uri").is_err());
    }

    #[test]
    fn unit_info_invalidate_appends_error() {
        let mut info = UnitInfo::default();
        assert!(info.is_valid);
        info.invalidate("payload missing");
        assert!(!info.is_valid);
        assert_eq!(info.errors, vec!["payload missing".to_string()]);
    }

    #[test]
    fn work_unit_empty_detection() {
        let mut unit = WorkUnit::from_request(Map::new());
        assert!(unit.is_empty());
        unit.payloads.insert("s3_uri".into(), vec![]);
        assert!(unit.is_empty());
        unit.payloads.insert("other_uri".into(), vec![1, 2, 3]);
        assert!(!unit.is_empty());
    }

    #[test]
    fn unit_info_request_str() {
        let mut info = UnitInfo::default();
        info.request_fields
            .insert("request_id".into(), json!("req-1"));
        info.request_fields.insert("count".into(), json!(3));
        assert_eq!(info.request_str("request_id"), Some("req-1"));
        assert_eq!(info.request_str("count"), None);
        assert_eq!(info.request_str("missing"), None);
    }
}
