//! Recording queue client.

use std::sync::{Arc, Mutex};

use kiln_sinks::{QueueClient, SinkError};

/// Captures sent message bodies; sends can be scripted to fail.
#[derive(Default)]
pub struct RecordingQueueClient {
    sent: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl RecordingQueueClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Arc<Mutex<Vec<String>>> {
        self.sent.clone()
    }
}

impl QueueClient for RecordingQueueClient {
    async fn send(&mut self, body: String) -> Result<(), SinkError> {
        if self.fail {
            return Err(SinkError::Queue("scripted send failure".to_string()));
        }
        self.sent.lock().unwrap().push(body);
        Ok(())
    }
}
