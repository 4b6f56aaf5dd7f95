//! Canonical default values shared across the harness.

/// Buffered sink flush threshold (records per bulk write).
pub const DEFAULT_RESULT_RECORD_CHUNK_SIZE: usize = 15;

/// Capacity ceiling for a single run's intake.
pub const DEFAULT_MAX_PROCESSING_REQUESTS: usize = 50;

/// Per-unit processing budget used for the lease computation.
pub const DEFAULT_MAX_PER_REQUEST_PROCESSING_SECONDS: u64 = 60;

/// Re-visibility delay applied to released messages after a failed run.
pub const DEFAULT_RELEASE_DELAY_SECONDS: u64 = 5;

/// Hard wire-size limit for a single notification payload.
pub const DEFAULT_MAX_NOTIFY_PAYLOAD_BYTES: usize = 262_144;

/// Soft wire-size limit for a single queue sink message.
pub const DEFAULT_MAX_QUEUE_RECORD_BYTES: usize = 2_048;

/// Decimal digits kept when converting floats for table storage.
pub const DEFAULT_DECIMAL_PRECISION_DIGITS: u32 = 6;

/// Field in a work request that uniquely identifies it.
pub const DEFAULT_REQUEST_ID_FIELD: &str = "request_id";

/// Field in a work request naming the completion-notification address.
pub const DEFAULT_NOTIFY_ADDRESS_FIELD: &str = "notify_address";

/// Fields in a work request referencing external payloads.
pub const DEFAULT_PAYLOAD_URI_FIELDS: &[&str] = &["s3_uri"];

/// Field in a prediction result holding the nested result list.
pub const DEFAULT_RESULT_FIELD: &str = "result";

/// Required sort-key field on detailed result rows.
pub const DEFAULT_DETAIL_SORT_KEY_FIELD: &str = "s3_uri";

/// Parent fields copied onto each detailed result row.
pub const DEFAULT_DETAIL_PARENT_FIELDS: &[&str] = &["request_id", "s3_uri"];

/// State field written on table rows.
pub const STATE_FIELD: &str = "state";

/// Errors field carried on requests and result records.
pub const ERRORS_FIELD: &str = "errors";

/// Namespace used when deriving deterministic request ids.
pub const DEFAULT_REQUEST_ID_NAMESPACE: &str = "kiln.invalid";
