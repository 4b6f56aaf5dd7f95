//! End-to-end run lifecycle against in-memory collaborators.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::{json, Value};

use kiln_protocol::{RunConfig, UnitInfo, WorkUnit};
use kiln_runner::{PredictError, Predictor, RunExecutor};
use kiln_sinks::{QueueWriter, TableWriter, TableWriterConfig};
use kiln_test_utils::{
    request_body, InMemoryResolver, InMemorySource, InMemoryTableClient, RecordingNotifier,
    RecordingQueueClient,
};

/// Scripted predictor: fails or stalls on named request ids, otherwise
/// returns one detail row per payload.
#[derive(Default)]
struct ScriptedPredictor {
    fail_ids: HashSet<String>,
    stall_ids: HashSet<String>,
    limit: Option<Duration>,
}

impl ScriptedPredictor {
    fn failing_on(ids: &[&str]) -> Self {
        Self {
            fail_ids: ids.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    fn stalling_on(ids: &[&str], limit: Duration) -> Self {
        Self {
            stall_ids: ids.iter().map(|s| s.to_string()).collect(),
            limit: Some(limit),
            ..Self::default()
        }
    }
}

impl Predictor for ScriptedPredictor {
    fn timeout(&self) -> Option<Duration> {
        self.limit
    }

    async fn predict(&mut self, unit: &WorkUnit, info: &UnitInfo) -> Result<Value, PredictError> {
        let id = info.request_str("request_id").unwrap_or_default();
        if self.fail_ids.contains(id) {
            return Err(PredictError::Failed(format!("scripted failure for {id}")));
        }
        if self.stall_ids.contains(id) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
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

fn body(requests: &[Value]) -> String {
    serde_json::to_string(requests).unwrap()
}

fn request(id: &str) -> Value {
    Value::Object(kiln_test_utils::request(id, &format!("s3://bkt/{id}.bin")))
}

fn store_for(ids: &[&str]) -> InMemoryResolver {
    let mut resolver = InMemoryResolver::new();
    for id in ids {
        resolver = resolver.with_object(&format!("s3://bkt/{id}.bin"), b"payload");
    }
    resolver
}

struct Harness {
    executor: RunExecutor<
        InMemorySource,
        InMemoryResolver,
        TableWriter<InMemoryTableClient>,
        RecordingNotifier,
        ScriptedPredictor,
    >,
    source_log: std::sync::Arc<std::sync::Mutex<kiln_test_utils::SourceCallLog>>,
    tables: std::sync::Arc<std::sync::Mutex<kiln_test_utils::table::Tables>>,
    notified: std::sync::Arc<std::sync::Mutex<Vec<(String, String)>>>,
}

fn harness(
    source: InMemorySource,
    resolver: InMemoryResolver,
    predictor: ScriptedPredictor,
    config: RunConfig,
) -> Harness {
    harness_with(
        source,
        resolver,
        predictor,
        config,
        InMemoryTableClient::new(),
        RecordingNotifier::new(),
    )
}

fn harness_with(
    source: InMemorySource,
    resolver: InMemoryResolver,
    predictor: ScriptedPredictor,
    config: RunConfig,
    client: InMemoryTableClient,
    notifier: RecordingNotifier,
) -> Harness {
    let source_log = source.log();
    let tables = client.tables();
    let writer = TableWriter::new(client, TableWriterConfig::from_run_config(&config));
    let notified = notifier.sent();
    Harness {
        executor: RunExecutor::new(source, resolver, writer, notifier, predictor, config),
        source_log,
        tables,
        notified,
    }
}

#[tokio::test]
async fn clean_run_sinks_rows_and_acks_messages() {
    let source = InMemorySource::new([request_body(&[
        ("r1", "s3://bkt/r1.bin"),
        ("r2", "s3://bkt/r2.bin"),
    ])]);
    let h = harness(
        source,
        store_for(&["r1", "r2"]),
        ScriptedPredictor::default(),
        RunConfig::default(),
    );

    let summary = h.executor.run().await.unwrap();

    assert_eq!(summary.requests, 2);
    assert_eq!(summary.predictions, 2);
    assert_eq!(summary.errors, 0);
    assert!(summary.per_prediction_duration.is_some());

    let tables = h.tables.lock().unwrap();
    assert_eq!(tables.requests.len(), 2);
    assert_eq!(tables.requests["r1"]["state"], json!("completed"));
    assert_eq!(tables.details.len(), 2);

    let log = h.source_log.lock().unwrap();
    assert_eq!(log.acked, vec!["msg-0".to_string()]);
    assert!(log.released.is_empty());
}

#[tokio::test]
async fn source_failure_releases_consumed_messages_instead_of_acking() {
    // first fetch succeeds, second errors mid-drain
    let source = InMemorySource::new([body(&[request("r1")]), body(&[request("r2")])])
        .failing_after(1);
    let h = harness(
        source,
        store_for(&["r1", "r2"]),
        ScriptedPredictor::default(),
        RunConfig::default(),
    );

    let result = h.executor.run().await;
    assert!(result.is_err());

    let log = h.source_log.lock().unwrap();
    assert!(log.acked.is_empty());
    assert_eq!(log.released.len(), 1);
    assert_eq!(log.released[0].0, "msg-0");
    assert_eq!(log.released[0].1, Duration::from_secs(5));
}

#[tokio::test]
async fn one_failing_unit_does_not_stop_its_siblings() {
    let requests: Vec<Value> = (1..=5).map(|i| request(&format!("r{i}"))).collect();
    let source = InMemorySource::new([body(&requests)]);
    let h = harness(
        source,
        store_for(&["r1", "r2", "r3", "r4", "r5"]),
        ScriptedPredictor::failing_on(&["r3"]),
        RunConfig::default(),
    );

    let summary = h.executor.run().await.unwrap();

    assert_eq!(summary.predictions, 5);
    assert_eq!(summary.errors, 1);

    let tables = h.tables.lock().unwrap();
    assert_eq!(tables.requests.len(), 5);
    assert_eq!(tables.requests["r3"]["state"], json!("error"));
    assert_eq!(tables.requests["r2"]["state"], json!("completed"));
    let errors = tables.requests["r3"]["errors"].as_str().unwrap();
    assert!(errors.contains("scripted failure for r3"));
}

#[tokio::test(start_paused = true)]
async fn stalled_prediction_times_out_and_the_run_proceeds() {
    let source = InMemorySource::new([body(&[request("r1"), request("r2")])]);
    let h = harness(
        source,
        store_for(&["r1", "r2"]),
        ScriptedPredictor::stalling_on(&["r1"], Duration::from_millis(50)),
        RunConfig::default(),
    );

    let summary = h.executor.run().await.unwrap();

    assert_eq!(summary.predictions, 2);
    assert_eq!(summary.errors, 1);

    let tables = h.tables.lock().unwrap();
    assert_eq!(tables.requests["r1"]["state"], json!("error"));
    assert!(tables.requests["r1"]["errors"]
        .as_str()
        .unwrap()
        .contains("deadline"));
    assert_eq!(tables.requests["r2"]["state"], json!("completed"));

    // clean exit still acks
    assert_eq!(h.source_log.lock().unwrap().acked.len(), 1);
}

#[tokio::test]
async fn empty_source_completes_with_an_empty_summary() {
    let h = harness(
        InMemorySource::empty(),
        InMemoryResolver::new(),
        ScriptedPredictor::default(),
        RunConfig::default(),
    );

    let summary = h.executor.run().await.unwrap();

    assert_eq!(summary.requests, 0);
    assert_eq!(summary.predictions, 0);
    assert_eq!(summary.per_prediction_duration, None);
    assert_eq!(h.tables.lock().unwrap().requests.len(), 0);
}

#[tokio::test]
async fn invalid_units_skip_prediction_but_are_still_sunk() {
    // r2 has no payload uri field at all
    let source = InMemorySource::new([body(&[
        request("r1"),
        json!({"request_id": "r2"}),
    ])]);
    let h = harness(
        source,
        store_for(&["r1"]),
        ScriptedPredictor::default(),
        RunConfig::default(),
    );

    let summary = h.executor.run().await.unwrap();

    // only r1 reaches the predictor
    assert_eq!(summary.predictions, 1);
    assert_eq!(summary.errors, 1);

    let tables = h.tables.lock().unwrap();
    assert_eq!(tables.requests["r2"]["state"], json!("error"));
    assert_eq!(tables.requests["r1"]["state"], json!("completed"));
}

#[tokio::test]
async fn notifications_are_grouped_by_address() {
    let source = InMemorySource::new([body(&[
        json!({"request_id": "r1", "s3_uri": "s3://bkt/r1.bin", "notify_address": "topic-a"}),
        json!({"request_id": "r2", "s3_uri": "s3://bkt/r2.bin", "notify_address": "topic-a"}),
        json!({"request_id": "r3", "s3_uri": "s3://bkt/r3.bin", "notify_address": "topic-b"}),
    ])]);
    let h = harness(
        source,
        store_for(&["r1", "r2", "r3"]),
        ScriptedPredictor::default(),
        RunConfig::default(),
    );

    let summary = h.executor.run().await.unwrap();
    assert_eq!(summary.notifications_published, 2);
    assert_eq!(summary.notification_failures, 0);

    let notified = h.notified.lock().unwrap();
    assert_eq!(notified.len(), 2);
    assert_eq!(notified[0].0, "topic-a");
    assert_eq!(notified[0].1, r#"["r1","r2"]"#);
    assert_eq!(notified[1].0, "topic-b");
    assert_eq!(notified[1].1, r#"["r3"]"#);
}

#[tokio::test]
async fn failed_units_still_notify_their_address() {
    let source = InMemorySource::new([body(&[json!({
        "request_id": "r1",
        "s3_uri": "s3://bkt/r1.bin",
        "notify_address": "topic-a",
    })])]);
    let h = harness(
        source,
        store_for(&["r1"]),
        ScriptedPredictor::failing_on(&["r1"]),
        RunConfig::default(),
    );

    let summary = h.executor.run().await.unwrap();
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.notifications_published, 1);
    assert_eq!(h.notified.lock().unwrap()[0].1, r#"["r1"]"#);
}

#[tokio::test]
async fn small_chunk_size_flushes_during_the_run() {
    let requests: Vec<Value> = (1..=7).map(|i| request(&format!("r{i}"))).collect();
    let ids: Vec<String> = (1..=7).map(|i| format!("r{i}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let source = InMemorySource::new([body(&requests)]);
    let config = RunConfig {
        result_record_chunk_size: 3,
        ..RunConfig::default()
    };
    let h = harness(
        source,
        store_for(&id_refs),
        ScriptedPredictor::default(),
        config,
    );

    let summary = h.executor.run().await.unwrap();
    assert_eq!(summary.write.request_updates, 7);
    assert_eq!(h.tables.lock().unwrap().requests.len(), 7);
}

#[tokio::test]
async fn failing_notify_address_is_counted_and_the_run_still_completes() {
    let source = InMemorySource::new([body(&[
        json!({"request_id": "r1", "s3_uri": "s3://bkt/r1.bin", "notify_address": "topic-a"}),
        json!({"request_id": "r2", "s3_uri": "s3://bkt/r2.bin", "notify_address": "topic-b"}),
    ])]);
    let h = harness_with(
        source,
        store_for(&["r1", "r2"]),
        ScriptedPredictor::default(),
        RunConfig::default(),
        InMemoryTableClient::new(),
        RecordingNotifier::failing_for(["topic-a"]),
    );

    let summary = h.executor.run().await.unwrap();

    assert_eq!(summary.notification_failures, 1);
    assert_eq!(summary.notifications_published, 1);

    let notified = h.notified.lock().unwrap();
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].0, "topic-b");
}

#[tokio::test]
async fn table_update_failures_are_counted_and_messages_still_ack() {
    let source = InMemorySource::new([request_body(&[
        ("r1", "s3://bkt/r1.bin"),
        ("r2", "s3://bkt/r2.bin"),
    ])]);
    let h = harness_with(
        source,
        store_for(&["r1", "r2"]),
        ScriptedPredictor::default(),
        RunConfig::default(),
        InMemoryTableClient::failing_updates(),
        RecordingNotifier::new(),
    );

    let summary = h.executor.run().await.unwrap();

    // update failures stay inside the write summary; the run itself
    // completed, so the messages are acked rather than redelivered
    assert_eq!(summary.write.failed, 2);
    assert_eq!(summary.write.request_updates, 0);
    assert_eq!(h.tables.lock().unwrap().requests.len(), 0);
    assert_eq!(h.source_log.lock().unwrap().acked.len(), 1);
}

#[tokio::test]
async fn queue_destination_sends_one_message_per_record() {
    let source = InMemorySource::new([request_body(&[
        ("r1", "s3://bkt/r1.bin"),
        ("r2", "s3://bkt/r2.bin"),
    ])]);
    let source_log = source.log();
    let client = RecordingQueueClient::new();
    let sent = client.sent();
    let config = RunConfig::default();
    let writer = QueueWriter::new(client, config.max_queue_record_bytes);
    let executor = RunExecutor::new(
        source,
        store_for(&["r1", "r2"]),
        writer,
        RecordingNotifier::new(),
        ScriptedPredictor::default(),
        config,
    );

    let summary = executor.run().await.unwrap();

    assert_eq!(summary.write.written, 2);
    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    let first: Value = serde_json::from_str(&sent[0]).unwrap();
    assert_eq!(first["request_id"], json!("r1"));
    assert_eq!(source_log.lock().unwrap().acked.len(), 1);
}

#[tokio::test]
async fn queue_send_failures_land_in_the_write_summary() {
    let source = InMemorySource::new([request_body(&[("r1", "s3://bkt/r1.bin")])]);
    let config = RunConfig::default();
    let writer = QueueWriter::new(RecordingQueueClient::failing(), config.max_queue_record_bytes);
    let executor = RunExecutor::new(
        source,
        store_for(&["r1"]),
        writer,
        RecordingNotifier::new(),
        ScriptedPredictor::default(),
        config,
    );

    let summary = executor.run().await.unwrap();

    assert_eq!(summary.write.failed, 1);
    assert_eq!(summary.write.written, 0);
}
