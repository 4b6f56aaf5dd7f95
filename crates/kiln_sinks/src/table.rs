//! Two-table destination: a requests table updated by request id and a
//! detailed-results table keyed by a deterministic dedup hash.

use std::time::Instant;

use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use kiln_protocol::defaults::{ERRORS_FIELD, STATE_FIELD};
use kiln_protocol::{dedup_key, flatten_with, ResultRecord, RunConfig, RunState};

use crate::buffer::{RecordWriter, WriteSummary};
use crate::SinkError;

/// Detail-row hash column name.
pub const DEDUP_KEY_FIELD: &str = "dedup_key";

/// Timestamp column stamped on request updates (unix seconds).
pub const UPDATED_AT_FIELD: &str = "updated_at_timestamp";

/// Storage client for the two tables.
///
/// `update_request` overwrites by request id (naturally idempotent);
/// `put_detail` overwrites by the dedup hash column, so redelivered
/// records land on the same rows instead of duplicating.
pub trait TableClient {
    fn update_request(
        &mut self,
        item: ResultRecord,
    ) -> impl std::future::Future<Output = Result<(), SinkError>> + Send;

    fn put_detail(
        &mut self,
        item: ResultRecord,
    ) -> impl std::future::Future<Output = Result<(), SinkError>> + Send;
}

/// Field-name and precision knobs for the table destination.
#[derive(Debug, Clone)]
pub struct TableWriterConfig {
    pub request_id_field: String,
    pub result_field: String,
    pub detail_sort_key_field: String,
    pub detail_parent_fields: Vec<String>,
    pub decimal_precision_digits: u32,
}

impl TableWriterConfig {
    pub fn from_run_config(config: &RunConfig) -> Self {
        Self {
            request_id_field: config.request_id_field.clone(),
            result_field: config.result_field.clone(),
            detail_sort_key_field: config.detail_sort_key_field.clone(),
            detail_parent_fields: config.detail_parent_fields.clone(),
            decimal_precision_digits: config.decimal_precision_digits,
        }
    }
}

pub struct TableWriter<C> {
    client: C,
    config: TableWriterConfig,
}

impl<C: TableClient> TableWriter<C> {
    pub fn new(client: C, config: TableWriterConfig) -> Self {
        Self { client, config }
    }

    pub fn into_client(self) -> C {
        self.client
    }

    async fn write_record(&mut self, mut record: ResultRecord, summary: &mut WriteSummary) {
        let Some(request_id) = record
            .get(&self.config.request_id_field)
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            error!(
                field = %self.config.request_id_field,
                "record missing request id field, skipping"
            );
            summary.failed += 1;
            return;
        };

        // state derives from the errors field before flattening so it
        // lands on the stored row
        let state = derive_state(&record);
        record.insert(
            STATE_FIELD.to_string(),
            Value::String(state.as_str().to_string()),
        );

        let (mut prepared, nested) = prepare_record(record, self.config.decimal_precision_digits);

        if !prepared.contains_key(&self.config.result_field) {
            warn!(
                %request_id,
                field = %self.config.result_field,
                "record missing result field, storing empty list"
            );
            prepared.insert(
                self.config.result_field.clone(),
                Value::String("[]".to_string()),
            );
        }
        if !matches!(prepared.get(ERRORS_FIELD), Some(Value::String(_))) {
            prepared.insert(ERRORS_FIELD.to_string(), Value::String("[]".to_string()));
        }
        prepared
            .entry(UPDATED_AT_FIELD.to_string())
            .or_insert_with(|| Value::Number(Utc::now().timestamp().into()));

        match self.client.update_request(prepared.clone()).await {
            Ok(()) => {
                summary.written += 1;
                summary.request_updates += 1;
            }
            Err(err) => {
                error!(%request_id, %err, "request table update failed");
                summary.failed += 1;
            }
        }

        let Some(Value::Array(results)) = nested.get(&self.config.result_field) else {
            warn!(%request_id, "no nested result list, no detail rows inserted");
            return;
        };
        for result in results {
            self.write_detail_row(&request_id, result, &prepared, summary)
                .await;
        }
    }

    async fn write_detail_row(
        &mut self,
        request_id: &str,
        result: &Value,
        prepared: &ResultRecord,
        summary: &mut WriteSummary,
    ) {
        let Value::Object(result) = result else {
            error!(%request_id, "non-object element in result list, skipping");
            summary.failed += 1;
            return;
        };
        let mut detail = result.clone();

        // parent fields carried onto each detail row for query access
        let missing: Vec<&String> = self
            .config
            .detail_parent_fields
            .iter()
            .filter(|field| !prepared.contains_key(*field))
            .collect();
        if !missing.is_empty() {
            error!(%request_id, ?missing, "parent fields missing, skipping detail row");
            summary.failed += 1;
            return;
        }
        for field in &self.config.detail_parent_fields {
            detail.insert(field.clone(), prepared[field].clone());
        }

        let flat: Map<String, Value> = flatten_with(&Value::Object(detail), "__", false)
            .into_iter()
            .collect();
        if !flat.contains_key(&self.config.detail_sort_key_field) {
            error!(
                %request_id,
                sort_key = %self.config.detail_sort_key_field,
                "detail row missing sort key, skipping"
            );
            summary.failed += 1;
            return;
        }

        let hash = dedup_key(&flat);
        let mut item: ResultRecord = flat
            .into_iter()
            .map(|(k, v)| (k, convert_value(v, self.config.decimal_precision_digits)))
            .collect();
        item.insert(DEDUP_KEY_FIELD.to_string(), Value::String(hash));

        debug!(%request_id, "putting detail row");
        match self.client.put_detail(item).await {
            Ok(()) => summary.detail_puts += 1,
            Err(err) => {
                error!(%request_id, %err, "detail table put failed");
                summary.failed += 1;
            }
        }
    }
}

impl<C: TableClient + Send> RecordWriter for TableWriter<C> {
    async fn write_batch(&mut self, records: Vec<ResultRecord>) -> WriteSummary {
        let start = Instant::now();
        let mut summary = WriteSummary::default();
        for record in records {
            self.write_record(record, &mut summary).await;
        }
        summary.elapsed = start.elapsed();
        summary
    }
}

fn derive_state(record: &ResultRecord) -> RunState {
    match record.get(ERRORS_FIELD) {
        Some(Value::Array(errors)) if !errors.is_empty() => RunState::Error,
        Some(Value::String(errors)) if !errors.is_empty() && errors != "[]" => RunState::Error,
        _ => RunState::Completed,
    }
}

/// Split a record into its storable flat form and its original nested
/// data.
///
/// Nested (array/object) values are serialized to their JSON string
/// form for storage; the untouched nested values are returned alongside
/// for detail-row processing. Scalar floats become exact decimals at
/// the configured precision.
pub fn prepare_record(
    record: ResultRecord,
    precision_digits: u32,
) -> (ResultRecord, Map<String, Value>) {
    let mut prepared = Map::new();
    let mut nested = Map::new();
    for (key, value) in record {
        match value {
            Value::Array(_) | Value::Object(_) => {
                let encoded = value.to_string();
                nested.insert(key.clone(), value);
                prepared.insert(key, Value::String(encoded));
            }
            scalar => {
                prepared.insert(key, convert_value(scalar, precision_digits));
            }
        }
    }
    if nested.is_empty() {
        warn!("no nested fields found in record");
    }
    (prepared, nested)
}

/// Floats become exact decimals, rendered in string form; everything
/// else passes through. Adapters own the native numeric type.
fn convert_value(value: Value, precision_digits: u32) -> Value {
    match value {
        Value::Number(number) if number.is_f64() => {
            let float = number.as_f64().unwrap_or_default();
            match Decimal::from_f64(float) {
                Some(decimal) => Value::String(
                    decimal
                        .round_dp_with_strategy(
                            precision_digits,
                            RoundingStrategy::MidpointAwayFromZero,
                        )
                        .normalize()
                        .to_string(),
                ),
                None => Value::Number(number),
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeTableClient {
        requests: HashMap<String, ResultRecord>,
        details: HashMap<String, ResultRecord>,
        fail_updates: bool,
    }

    impl TableClient for FakeTableClient {
        async fn update_request(&mut self, item: ResultRecord) -> Result<(), SinkError> {
            if self.fail_updates {
                return Err(SinkError::Table("scripted failure".to_string()));
            }
            let key = item["request_id"].as_str().unwrap().to_string();
            self.requests.insert(key, item);
            Ok(())
        }

        async fn put_detail(&mut self, item: ResultRecord) -> Result<(), SinkError> {
            let key = item[DEDUP_KEY_FIELD].as_str().unwrap().to_string();
            self.details.insert(key, item);
            Ok(())
        }
    }

    fn writer() -> TableWriter<FakeTableClient> {
        TableWriter::new(
            FakeTableClient::default(),
            TableWriterConfig::from_run_config(&RunConfig::default()),
        )
    }

    fn record(value: serde_json::Value) -> ResultRecord {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn clean_record_updates_request_and_puts_details() {
        let mut writer = writer();
        let summary = writer
            .write_batch(vec![record(json!({
                "request_id": "r1",
                "s3_uri": "s3://bkt/a.bin",
                "result": [{"s3_uri": "s3://bkt/a.bin", "score": 0.25}],
            }))])
            .await;

        assert_eq!(summary.request_updates, 1);
        assert_eq!(summary.detail_puts, 1);
        assert_eq!(summary.failed, 0);

        let client = writer.into_client();
        let stored = &client.requests["r1"];
        assert_eq!(stored["state"], json!("completed"));
        // nested list stored in its JSON string form
        assert!(stored["result"].is_string());
        assert_eq!(stored["errors"], json!("[]"));
        assert!(stored[UPDATED_AT_FIELD].is_number());
        assert_eq!(client.details.len(), 1);
    }

    #[tokio::test]
    async fn errors_field_flips_state_to_error() {
        let mut writer = writer();
        writer
            .write_batch(vec![record(json!({
                "request_id": "r1",
                "errors": ["payload missing"],
            }))])
            .await;
        let client = writer.into_client();
        assert_eq!(client.requests["r1"]["state"], json!("error"));
        // missing result defaults to the empty list string
        assert_eq!(client.requests["r1"]["result"], json!("[]"));
    }

    #[tokio::test]
    async fn missing_request_id_counts_failed_without_aborting_batch() {
        let mut writer = writer();
        let summary = writer
            .write_batch(vec![
                record(json!({"no_id": true})),
                record(json!({"request_id": "r2", "result": []})),
            ])
            .await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.request_updates, 1);
    }

    #[tokio::test]
    async fn redelivered_record_overwrites_the_same_detail_row() {
        let mut writer = writer();
        let payload = json!({
            "request_id": "r1",
            "s3_uri": "s3://bkt/a.bin",
            "result": [{"s3_uri": "s3://bkt/a.bin", "label": "cat"}],
        });
        writer.write_batch(vec![record(payload.clone())]).await;
        writer.write_batch(vec![record(payload)]).await;

        let client = writer.into_client();
        assert_eq!(client.details.len(), 1);
    }

    #[tokio::test]
    async fn missing_parent_field_skips_only_that_detail_row() {
        let mut writer = writer();
        // no s3_uri on the parent record: detail rows cannot carry it
        let summary = writer
            .write_batch(vec![record(json!({
                "request_id": "r1",
                "result": [{"s3_uri": "s3://bkt/a.bin", "score": 1}],
            }))])
            .await;
        assert_eq!(summary.request_updates, 1);
        assert_eq!(summary.detail_puts, 0);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn missing_sort_key_skips_the_detail_row() {
        let mut writer = TableWriter::new(
            FakeTableClient::default(),
            TableWriterConfig {
                detail_parent_fields: vec!["request_id".to_string()],
                ..TableWriterConfig::from_run_config(&RunConfig::default())
            },
        );
        let summary = writer
            .write_batch(vec![record(json!({
                "request_id": "r1",
                "result": [{"score": 1}],
            }))])
            .await;
        assert_eq!(summary.detail_puts, 0);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn update_failure_is_counted_not_raised() {
        let mut writer = TableWriter::new(
            FakeTableClient {
                fail_updates: true,
                ..FakeTableClient::default()
            },
            TableWriterConfig::from_run_config(&RunConfig::default()),
        );
        let summary = writer
            .write_batch(vec![record(json!({"request_id": "r1", "result": []}))])
            .await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.written, 0);
    }

    #[tokio::test]
    async fn write_batch_runs_on_a_spawned_task() {
        let mut writer = writer();
        let handle = tokio::spawn(async move {
            let summary = writer
                .write_batch(vec![record(json!({"request_id": "r1", "result": []}))])
                .await;
            (writer, summary)
        });
        let (_, summary) = handle.await.unwrap();
        assert_eq!(summary.request_updates, 1);
    }

    #[test]
    fn floats_round_to_configured_precision() {
        let (prepared, _) = prepare_record(
            record(json!({"request_id": "r", "score": 0.123456789, "count": 3})),
            6,
        );
        assert_eq!(prepared["score"], json!("0.123457"));
        // integers pass through untouched
        assert_eq!(prepared["count"], json!(3));
    }

    #[test]
    fn prepare_record_returns_original_nested_data() {
        let (prepared, nested) = prepare_record(
            record(json!({"request_id": "r", "result": [{"a": 1}]})),
            6,
        );
        assert_eq!(prepared["result"], json!("[{\"a\":1}]"));
        assert_eq!(nested["result"], json!([{"a": 1}]));
    }
}
