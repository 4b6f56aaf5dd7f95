//! Scripted in-memory message source.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kiln_intake::{MessageSource, SourceError};
use kiln_protocol::RawMessage;

/// Everything an [`InMemorySource`] was asked to do.
#[derive(Debug, Default)]
pub struct SourceCallLog {
    /// Visibility passed to each fetch, in order.
    pub fetch_visibilities: Vec<Duration>,
    pub acked: Vec<String>,
    pub released: Vec<(String, Duration)>,
}

/// Message source backed by a queue of scripted messages.
///
/// Optionally fails fetches after a scripted count so run-level error
/// paths can be exercised.
pub struct InMemorySource {
    queue: VecDeque<RawMessage>,
    log: Arc<Mutex<SourceCallLog>>,
    fail_fetch_after: Option<usize>,
    fetches: usize,
}

impl InMemorySource {
    pub fn new(bodies: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let queue = bodies
            .into_iter()
            .enumerate()
            .map(|(i, body)| RawMessage::new(format!("msg-{i}"), body.as_ref().as_bytes().to_vec()))
            .collect();
        Self {
            queue,
            log: Arc::new(Mutex::new(SourceCallLog::default())),
            fail_fetch_after: None,
            fetches: 0,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::<String>::new())
    }

    /// Fail every fetch after `count` successful ones.
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_fetch_after = Some(count);
        self
    }

    /// Shared handle to the call log, usable after the source moves
    /// into an intake.
    pub fn log(&self) -> Arc<Mutex<SourceCallLog>> {
        self.log.clone()
    }
}

impl MessageSource for InMemorySource {
    async fn fetch_one(&mut self, visibility: Duration) -> Result<Option<RawMessage>, SourceError> {
        if let Some(limit) = self.fail_fetch_after {
            if self.fetches >= limit {
                return Err(SourceError::Fetch("scripted fetch failure".to_string()));
            }
        }
        self.fetches += 1;
        self.log.lock().unwrap().fetch_visibilities.push(visibility);
        Ok(self.queue.pop_front())
    }

    async fn ack(&mut self, message: &RawMessage) -> Result<(), SourceError> {
        self.log.lock().unwrap().acked.push(message.id.0.clone());
        Ok(())
    }

    async fn release(&mut self, message: &RawMessage, delay: Duration) -> Result<(), SourceError> {
        self.log
            .lock()
            .unwrap()
            .released
            .push((message.id.0.clone(), delay));
        Ok(())
    }
}
