//! Recording notifier.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use kiln_runner::{Notifier, NotifyError};

/// Captures `(address, payload)` sends; named addresses can be
/// scripted to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    failing_addresses: HashSet<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(addresses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            failing_addresses: addresses.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Arc<Mutex<Vec<(String, String)>>> {
        self.sent.clone()
    }
}

impl Notifier for RecordingNotifier {
    async fn send(&mut self, address: &str, payload: String) -> Result<(), NotifyError> {
        if self.failing_addresses.contains(address) {
            return Err(NotifyError {
                address: address.to_string(),
                message: "scripted notify failure".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((address.to_string(), payload));
        Ok(())
    }
}
