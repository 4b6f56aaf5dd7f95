//! Bounded queue drain with lease-based visibility.
//!
//! Design principles:
//! - Source and resolver injected, never constructed here
//! - Lease computed once per drain, before the first fetch
//! - One message per fetch; a message that crosses the capacity ceiling
//!   still contributes all of its requests (soft ceiling)
//! - finish() consumes self - ack and release cannot both happen
//!   (enforced at compile time)

use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use kiln_protocol::{
    MessageId, RawMessage, RunConfig, RunOutcome, SourceDetail, StorageUri, UnitInfo, WorkRequest,
    WorkUnit,
};

use crate::source::{MessageSource, ResourceResolver, SourceError};

/// What one drain pass pulled off the source. Each request stays tagged
/// with the message that carried it.
#[derive(Debug, Default)]
pub struct Drained {
    pub requests: Vec<(MessageId, WorkRequest)>,
    /// Messages whose body failed to decode; acked, never retried.
    pub corrupt_messages: usize,
}

/// Drains a message source up to a capacity ceiling, resolves external
/// payloads, and settles consumed messages according to the run outcome.
pub struct BoundedIntake<S, R> {
    source: S,
    resolver: R,
    config: RunConfig,
    /// Successfully decoded messages, settled by `finish`.
    consumed: Vec<RawMessage>,
}

impl<S: MessageSource, R: ResourceResolver> BoundedIntake<S, R> {
    pub fn new(source: S, resolver: R, config: RunConfig) -> Self {
        Self {
            source,
            resolver,
            config,
            consumed: Vec::new(),
        }
    }

    /// Pull messages until the source is empty or the accumulated request
    /// count reaches the configured capacity.
    ///
    /// Every fetch leases the message for the whole run's worst-case
    /// budget (capacity x per-request seconds), computed once up front.
    /// A message whose body does not decode is acked immediately:
    /// corruption does not resolve on redelivery.
    pub async fn drain(&mut self) -> Result<Drained, SourceError> {
        let capacity = self.config.max_processing_requests;
        let lease = self.config.lease();
        info!(capacity, lease_seconds = lease.as_secs(), "draining source");

        let mut drained = Drained::default();
        while drained.requests.len() < capacity {
            let message = match self.source.fetch_one(lease).await? {
                Some(message) => message,
                None => {
                    debug!("source empty, stopping drain");
                    break;
                }
            };
            match decode_body(&message.body) {
                Ok(requests) => {
                    debug!(
                        message_id = %message.id,
                        count = requests.len(),
                        "adding requests"
                    );
                    drained
                        .requests
                        .extend(requests.into_iter().map(|r| (message.id.clone(), r)));
                    self.consumed.push(message);
                }
                Err(err) => {
                    error!(
                        message_id = %message.id,
                        %err,
                        "undecodable message body, acking without processing"
                    );
                    drained.corrupt_messages += 1;
                    self.source.ack(&message).await?;
                }
            }
        }
        info!(
            requests = drained.requests.len(),
            messages = self.consumed.len(),
            corrupt = drained.corrupt_messages,
            "drain complete"
        );
        Ok(drained)
    }

    /// Resolve the configured payload URI fields for each request.
    ///
    /// Failures are isolated per unit: a missing field or a bad URI
    /// invalidates that unit only, and a resolver failure leaves the
    /// unit's payload empty with the error recorded. Siblings are never
    /// affected.
    pub async fn resolve_units(
        &self,
        requests: Vec<(MessageId, WorkRequest)>,
    ) -> Vec<(WorkUnit, UnitInfo)> {
        let mut units = Vec::with_capacity(requests.len());
        for (message_id, request) in requests {
            let mut info = UnitInfo {
                request_fields: request.clone(),
                ..UnitInfo::default()
            };
            info.source.message_id = Some(message_id);
            let mut unit = WorkUnit::from_request(request);

            for uri_field in &self.config.payload_uri_fields {
                let raw_uri = match unit.request.get(uri_field).and_then(Value::as_str) {
                    Some(raw) => raw.to_string(),
                    None => {
                        info.invalidate(format!("request missing payload uri field: {uri_field}"));
                        continue;
                    }
                };
                let uri = match StorageUri::parse(&raw_uri) {
                    Ok(uri) => uri,
                    Err(err) => {
                        info.invalidate(err.to_string());
                        continue;
                    }
                };
                info.source = SourceDetail {
                    bucket: Some(uri.bucket.clone()),
                    key: Some(uri.key.clone()),
                    uri_field: Some(uri_field.clone()),
                    message_id: info.source.message_id.clone(),
                };
                let started = Instant::now();
                let payload = match self.resolver.resolve(&uri).await {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        error!(%uri, %err, "payload resolution failed");
                        info.push_error(err.to_string());
                        Vec::new()
                    }
                };
                info.download_time += started.elapsed().as_secs_f64();
                unit.payloads.insert(uri_field.clone(), payload);
            }
            units.push((unit, info));
        }
        units
    }

    /// Settle every consumed message according to the run outcome.
    ///
    /// A completed run acks; a failed run releases with the configured
    /// short delay so another consumer can retry promptly. Consuming
    /// `self` guarantees each message is settled exactly one way.
    pub async fn finish(mut self, outcome: RunOutcome) -> Result<(), SourceError> {
        let mut first_error = None;
        match outcome {
            RunOutcome::Completed => {
                debug!(messages = self.consumed.len(), "acking consumed messages");
                for message in &self.consumed {
                    if let Err(err) = self.source.ack(message).await {
                        error!(message_id = %message.id, %err, "ack failed");
                        first_error.get_or_insert(err);
                    }
                }
            }
            RunOutcome::Failed => {
                let delay = self.config.release_delay();
                warn!(
                    messages = self.consumed.len(),
                    delay_seconds = delay.as_secs(),
                    "run failed, releasing messages for retry"
                );
                for message in &self.consumed {
                    if let Err(err) = self.source.release(message, delay).await {
                        error!(message_id = %message.id, %err, "release failed");
                        first_error.get_or_insert(err);
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Number of messages consumed so far (decoded, pending settlement).
    pub fn consumed_messages(&self) -> usize {
        self.consumed.len()
    }
}

#[derive(Debug, thiserror::Error)]
enum BodyError {
    #[error("body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("body is not a JSON array or object")]
    Shape,
    #[error("body array holds a non-object element")]
    NonObjectElement,
}

/// A body is expected to be a JSON array of request objects. A bare
/// object is tolerated and normalized to a one-element array.
fn decode_body(body: &[u8]) -> Result<Vec<WorkRequest>, BodyError> {
    match serde_json::from_slice::<Value>(body)? {
        Value::Array(elements) => elements
            .into_iter()
            .map(|element| match element {
                Value::Object(request) => Ok(request),
                _ => Err(BodyError::NonObjectElement),
            })
            .collect(),
        Value::Object(request) => {
            warn!("message body is a bare object, wrapping in a list");
            Ok(vec![request])
        }
        _ => Err(BodyError::Shape),
    }
}
