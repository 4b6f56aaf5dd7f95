//! The per-run execution engine.
//!
//! Design principles:
//! - Collaborators injected as trait parameters, never constructed here
//! - run() consumes self - a run executes once (enforced at compile time)
//! - Per-unit failures degrade that unit to the error branch; the batch
//!   always continues
//! - Sink remainder is flushed and intake settled on both the success
//!   and the failure path, before any run-level error is surfaced

use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use kiln_intake::{BoundedIntake, MessageSource, ResourceResolver, SourceError};
use kiln_protocol::defaults::ERRORS_FIELD;
use kiln_protocol::{ResultRecord, RunConfig, RunOutcome, UnitInfo, WorkUnit};
use kiln_sinks::{BufferedSink, RecordWriter, WriteSummary};

use crate::notify::{dispatch_notifications, NotificationGroups, Notifier};
use crate::predictor::{PredictError, Predictor};
use crate::timeout::TimeoutGuard;

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Counters and timings for one run.
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    /// Requests pulled off the source.
    pub requests: usize,
    /// Messages acked undecoded.
    pub corrupt_messages: usize,
    /// Prediction attempts (errors included).
    pub predictions: usize,
    /// Units that degraded to the error branch.
    pub errors: usize,
    /// Notification chunks delivered / dropped.
    pub notifications_published: usize,
    pub notification_failures: usize,
    /// Cumulative sink outcome.
    pub write: WriteSummary,
    pub download_duration: Duration,
    pub preprocess_duration: Duration,
    pub predict_duration: Duration,
    pub postprocess_duration: Duration,
    pub put_duration: Duration,
    /// Time spent flushing the sink and settling the intake.
    pub context_exit_duration: Duration,
    pub total_processing_duration: Duration,
    /// Mean processing time per prediction attempt; absent when nothing
    /// was predicted.
    pub per_prediction_duration: Option<Duration>,
}

impl RunSummary {
    fn finalize(&mut self) {
        self.total_processing_duration =
            self.preprocess_duration + self.predict_duration + self.postprocess_duration;
        if self.predictions > 0 {
            self.per_prediction_duration =
                Some(self.total_processing_duration / self.predictions as u32);
        }
    }
}

/// Drives one run: drain, resolve, predict per unit, sink, notify,
/// settle.
pub struct RunExecutor<S, R, W, N, P> {
    intake: BoundedIntake<S, R>,
    sink: BufferedSink<W>,
    notifier: N,
    predictor: P,
    guard: TimeoutGuard,
    config: RunConfig,
}

impl<S, R, W, N, P> RunExecutor<S, R, W, N, P>
where
    S: MessageSource,
    R: ResourceResolver,
    W: RecordWriter,
    N: Notifier,
    P: Predictor,
{
    pub fn new(source: S, resolver: R, writer: W, notifier: N, predictor: P, config: RunConfig) -> Self {
        info!(version = predictor.version(), "predictor loaded");
        Self {
            intake: BoundedIntake::new(source, resolver, config.clone()),
            sink: BufferedSink::new(writer, config.result_record_chunk_size),
            notifier,
            predictor,
            guard: TimeoutGuard::new(),
            config,
        }
    }

    /// Execute one full run.
    ///
    /// On a source-level failure the error is surfaced only after the
    /// sink remainder is flushed and the consumed messages released,
    /// so nothing processed so far is lost and nothing consumed is
    /// stranded invisible.
    pub async fn run(mut self) -> Result<RunSummary, RunError> {
        let mut summary = RunSummary::default();
        let mut notifications = NotificationGroups::new();

        let run_error = match self.intake.drain().await {
            Ok(drained) => {
                summary.requests = drained.requests.len();
                summary.corrupt_messages = drained.corrupt_messages;
                let units = self.intake.resolve_units(drained.requests).await;
                for (unit, info) in units {
                    self.process_unit(unit, info, &mut summary, &mut notifications)
                        .await;
                }
                None
            }
            Err(err) => {
                error!(%err, "drain failed, aborting run");
                Some(err)
            }
        };

        let outcome = match run_error {
            None => RunOutcome::Completed,
            Some(_) => RunOutcome::Failed,
        };

        // exit phase: flush and settle on both paths
        let exit_start = Instant::now();
        let Self {
            intake,
            sink,
            mut notifier,
            config,
            ..
        } = self;
        let (_writer, write_summary) = sink.finish().await;
        summary.write = write_summary;
        let finish_result = intake.finish(outcome).await;
        summary.context_exit_duration = exit_start.elapsed();

        let (published, failed) = dispatch_notifications(
            &mut notifier,
            notifications,
            config.max_notify_payload_bytes,
        )
        .await;
        summary.notifications_published = published;
        summary.notification_failures = failed;

        summary.finalize();
        info!(
            requests = summary.requests,
            predictions = summary.predictions,
            errors = summary.errors,
            written = summary.write.written,
            "run complete"
        );

        if let Some(err) = run_error {
            return Err(RunError::Source(err));
        }
        finish_result?;
        Ok(summary)
    }

    async fn process_unit(
        &mut self,
        unit: WorkUnit,
        mut info: UnitInfo,
        summary: &mut RunSummary,
        notifications: &mut NotificationGroups,
    ) {
        self.predictor.pre_predict_hook(&unit, &mut info);

        let record = if !info.is_valid {
            info.push_error("unit invalid, prediction skipped");
            warn!(errors = ?info.errors, "skipping invalid unit");
            summary.errors += 1;
            error_record(&info)
        } else if unit.is_empty() {
            info.push_error("no payload resolved, prediction skipped");
            error!(errors = ?info.errors, "skipping unit with empty payloads");
            summary.errors += 1;
            error_record(&info)
        } else {
            summary.download_duration += Duration::from_secs_f64(info.download_time.max(0.0));
            self.predict_unit(unit, &mut info, summary).await
        };

        let put_start = Instant::now();
        let flushed = self.sink.put(record).await;
        summary.put_duration += put_start.elapsed();
        if flushed > 0 {
            debug!(flushed, "sink flushed during put");
        }

        if let (Some(request_id), Some(address)) = (
            info.request_str(&self.config.request_id_field),
            info.request_str(&self.config.notify_address_field),
        ) {
            notifications
                .entry(address.to_string())
                .or_default()
                .push(request_id.to_string());
        }

        self.predictor.post_predict_hook(&info);
    }

    /// The prediction path: preprocess, timed predict, merge, postprocess.
    ///
    /// Every failure lands the unit in the error branch whose record
    /// (request fields + errors) is still returned for sinking.
    async fn predict_unit(
        &mut self,
        unit: WorkUnit,
        info: &mut UnitInfo,
        summary: &mut RunSummary,
    ) -> ResultRecord {
        let preprocess_start = Instant::now();
        let unit = match self.predictor.preprocess(unit, info) {
            Ok(unit) => unit,
            Err(err) => {
                error!(%err, "preprocess failed");
                info.push_error(err.to_string());
                summary.errors += 1;
                return error_record(info);
            }
        };
        summary.preprocess_duration += preprocess_start.elapsed();

        let predict_start = Instant::now();
        let limit = self.predictor.timeout();
        let outcome = self
            .guard
            .run(limit, self.predictor.predict(&unit, info))
            .await;
        summary.predict_duration += predict_start.elapsed();
        summary.predictions += 1;

        let mut record = match outcome {
            Ok(Ok(Value::Object(result))) => result,
            Ok(Ok(other)) => {
                let err = PredictError::InvalidResult(value_kind(&other).to_string());
                error!(%err, "discarding prediction result");
                info.push_error(err.to_string());
                summary.errors += 1;
                return error_record(info);
            }
            Ok(Err(err)) | Err(err) => {
                error!(%err, "prediction failed");
                info.push_error(err.to_string());
                summary.errors += 1;
                return error_record(info);
            }
        };

        // request fields win over predictor-provided values
        for (key, value) in &info.request_fields {
            record.insert(key.clone(), value.clone());
        }
        if !info.errors.is_empty() {
            record.insert(ERRORS_FIELD.to_string(), errors_value(info));
        }

        let postprocess_start = Instant::now();
        match self.predictor.postprocess(record, info) {
            Ok(record) => {
                summary.postprocess_duration += postprocess_start.elapsed();
                record
            }
            Err(err) => {
                error!(%err, "postprocess failed");
                info.push_error(err.to_string());
                summary.errors += 1;
                error_record(info)
            }
        }
    }
}

fn errors_value(info: &UnitInfo) -> Value {
    Value::Array(
        info.errors
            .iter()
            .map(|e| Value::String(e.clone()))
            .collect(),
    )
}

/// The record sunk for a unit that never produced a prediction: its
/// request fields plus the accumulated errors.
fn error_record(info: &UnitInfo) -> ResultRecord {
    let mut record = info.request_fields.clone();
    record.insert(ERRORS_FIELD.to_string(), errors_value(info));
    record
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
