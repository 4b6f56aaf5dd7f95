//! Run configuration shared across intake, sinks, and the runner.

use std::time::Duration;

use tracing::warn;

use crate::defaults;

/// Canonical configuration for one harness run.
///
/// Every knob has a default in [`crate::defaults`]; `from_env` overlays
/// the `KILN_*` environment variables on top. Invalid values fall back
/// to the default with a warning rather than aborting the run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Capacity ceiling for a single run's intake (soft: a message that
    /// crosses the ceiling still contributes all its requests).
    pub max_processing_requests: usize,
    /// Per-unit processing budget; multiplied by capacity for the lease.
    pub max_per_request_processing_seconds: u64,
    /// Buffered sink flush threshold.
    pub result_record_chunk_size: usize,
    /// Re-visibility delay applied when releasing messages after failure.
    pub release_delay_seconds: u64,
    /// Hard wire-size limit for a notification payload.
    pub max_notify_payload_bytes: usize,
    /// Soft wire-size limit for a queue sink record.
    pub max_queue_record_bytes: usize,
    /// Decimal digits kept when converting floats for table storage.
    pub decimal_precision_digits: u32,
    /// Request field that uniquely identifies a request.
    pub request_id_field: String,
    /// Request field naming the completion-notification address.
    pub notify_address_field: String,
    /// Request fields referencing external payloads.
    pub payload_uri_fields: Vec<String>,
    /// Prediction-result field holding the nested result list.
    pub result_field: String,
    /// Required sort-key field on detailed result rows.
    pub detail_sort_key_field: String,
    /// Parent fields copied onto each detailed result row.
    pub detail_parent_fields: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_processing_requests: defaults::DEFAULT_MAX_PROCESSING_REQUESTS,
            max_per_request_processing_seconds:
                defaults::DEFAULT_MAX_PER_REQUEST_PROCESSING_SECONDS,
            result_record_chunk_size: defaults::DEFAULT_RESULT_RECORD_CHUNK_SIZE,
            release_delay_seconds: defaults::DEFAULT_RELEASE_DELAY_SECONDS,
            max_notify_payload_bytes: defaults::DEFAULT_MAX_NOTIFY_PAYLOAD_BYTES,
            max_queue_record_bytes: defaults::DEFAULT_MAX_QUEUE_RECORD_BYTES,
            decimal_precision_digits: defaults::DEFAULT_DECIMAL_PRECISION_DIGITS,
            request_id_field: defaults::DEFAULT_REQUEST_ID_FIELD.to_string(),
            notify_address_field: defaults::DEFAULT_NOTIFY_ADDRESS_FIELD.to_string(),
            payload_uri_fields: defaults::DEFAULT_PAYLOAD_URI_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            result_field: defaults::DEFAULT_RESULT_FIELD.to_string(),
            detail_sort_key_field: defaults::DEFAULT_DETAIL_SORT_KEY_FIELD.to_string(),
            detail_parent_fields: defaults::DEFAULT_DETAIL_PARENT_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl RunConfig {
    /// Build a config from `KILN_*` environment variables over defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        overlay_parsed(
            "KILN_MAX_PROCESSING_REQUESTS",
            &mut config.max_processing_requests,
        );
        overlay_parsed(
            "KILN_MAX_PER_REQUEST_PROCESSING_SECONDS",
            &mut config.max_per_request_processing_seconds,
        );
        overlay_parsed(
            "KILN_RESULT_RECORD_CHUNK_SIZE",
            &mut config.result_record_chunk_size,
        );
        overlay_parsed("KILN_RELEASE_DELAY_SECONDS", &mut config.release_delay_seconds);
        overlay_parsed(
            "KILN_MAX_NOTIFY_PAYLOAD_BYTES",
            &mut config.max_notify_payload_bytes,
        );
        overlay_parsed(
            "KILN_MAX_QUEUE_RECORD_BYTES",
            &mut config.max_queue_record_bytes,
        );
        overlay_parsed(
            "KILN_DECIMAL_PRECISION_DIGITS",
            &mut config.decimal_precision_digits,
        );
        overlay_string("KILN_REQUEST_ID_FIELD", &mut config.request_id_field);
        overlay_string("KILN_NOTIFY_ADDRESS_FIELD", &mut config.notify_address_field);
        overlay_list("KILN_PAYLOAD_URI_FIELDS", &mut config.payload_uri_fields);
        overlay_string("KILN_RESULT_FIELD", &mut config.result_field);
        overlay_string(
            "KILN_DETAIL_SORT_KEY_FIELD",
            &mut config.detail_sort_key_field,
        );
        overlay_list("KILN_DETAIL_PARENT_FIELDS", &mut config.detail_parent_fields);
        config
    }

    /// Lease applied to every message fetched in one drain: the whole
    /// run's worst-case budget, computed once up front.
    pub fn lease(&self) -> Duration {
        Duration::from_secs(
            self.max_processing_requests as u64 * self.max_per_request_processing_seconds,
        )
    }

    pub fn release_delay(&self) -> Duration {
        Duration::from_secs(self.release_delay_seconds)
    }
}

fn overlay_parsed<T: std::str::FromStr>(var: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => warn!(%var, %raw, "invalid value, using default"),
        }
    }
}

fn overlay_string(var: &str, slot: &mut String) {
    if let Ok(raw) = std::env::var(var) {
        if raw.is_empty() {
            warn!(%var, "empty value, using default");
        } else {
            *slot = raw;
        }
    }
}

/// Comma-separated list variables.
fn overlay_list(var: &str, slot: &mut Vec<String>) {
    if let Ok(raw) = std::env::var(var) {
        let fields: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if fields.is_empty() {
            warn!(%var, %raw, "no fields parsed, using default");
        } else {
            *slot = fields;
        }
    }
}
