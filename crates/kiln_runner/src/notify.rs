//! Completion notifications, grouped by address and chunked by bytes.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{error, info};

use kiln_protocol::serialize_chunks;

#[derive(Debug, Error)]
#[error("notification to {address} failed: {message}")]
pub struct NotifyError {
    pub address: String,
    pub message: String,
}

/// Outbound channel for completion notifications.
pub trait Notifier {
    fn send(
        &mut self,
        address: &str,
        payload: String,
    ) -> impl std::future::Future<Output = Result<(), NotifyError>> + Send;
}

/// Request ids accumulated per notification address during a run.
pub type NotificationGroups = BTreeMap<String, Vec<String>>;

/// Send each address its request ids, chunked under the byte limit.
///
/// One send per chunk. Failures (send errors and ids too large to fit
/// a chunk) are logged and counted, never fatal: a broken notification
/// channel must not fail an otherwise completed run.
///
/// Returns `(published, failed)` chunk counts.
pub async fn dispatch_notifications<N: Notifier>(
    notifier: &mut N,
    groups: NotificationGroups,
    max_payload_bytes: usize,
) -> (usize, usize) {
    let mut published = 0;
    let mut failed = 0;
    for (address, request_ids) in groups {
        info!(%address, count = request_ids.len(), "sending completion notifications");
        let chunks: Vec<_> = serialize_chunks(request_ids.iter(), max_payload_bytes).collect();
        for chunk in chunks {
            match chunk {
                Ok(payload) => match notifier.send(&address, payload).await {
                    Ok(()) => published += 1,
                    Err(err) => {
                        error!(%err, "notification send failed");
                        failed += 1;
                    }
                },
                Err(err) => {
                    error!(%address, %err, "notification payload could not be chunked");
                    failed += 1;
                }
            }
        }
    }
    (published, failed)
}
