//! Queue destination: one JSON message per result record.

use std::time::Instant;

use tracing::error;

use kiln_protocol::ResultRecord;

use crate::buffer::{RecordWriter, WriteSummary};
use crate::SinkError;

/// Transport for the queue destination.
pub trait QueueClient {
    fn send(
        &mut self,
        body: String,
    ) -> impl std::future::Future<Output = Result<(), SinkError>> + Send;
}

/// Serializes each record to JSON and sends it as its own message.
///
/// A record whose encoding exceeds `max_record_bytes` is counted failed
/// and never sent; the destination would reject or truncate it anyway.
pub struct QueueWriter<Q> {
    client: Q,
    max_record_bytes: usize,
}

impl<Q: QueueClient> QueueWriter<Q> {
    pub fn new(client: Q, max_record_bytes: usize) -> Self {
        Self {
            client,
            max_record_bytes,
        }
    }

    pub fn into_client(self) -> Q {
        self.client
    }
}

impl<Q: QueueClient + Send> RecordWriter for QueueWriter<Q> {
    async fn write_batch(&mut self, records: Vec<ResultRecord>) -> WriteSummary {
        let start = Instant::now();
        let mut summary = WriteSummary::default();
        for record in records {
            let body = match serde_json::to_string(&record) {
                Ok(body) => body,
                Err(err) => {
                    error!(%err, "record failed to serialize, skipping");
                    summary.failed += 1;
                    continue;
                }
            };
            if body.len() > self.max_record_bytes {
                error!(
                    size = body.len(),
                    max = self.max_record_bytes,
                    "record exceeds queue message size, skipping"
                );
                summary.failed += 1;
                continue;
            }
            match self.client.send(body).await {
                Ok(()) => summary.written += 1,
                Err(err) => {
                    error!(%err, "queue send failed");
                    summary.failed += 1;
                }
            }
        }
        summary.elapsed = start.elapsed();
        summary
    }
}
