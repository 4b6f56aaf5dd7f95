//! Intake collaborator traits.
//!
//! Sources and resolvers are injected into [`crate::BoundedIntake`] so
//! the drain logic stays independent of any particular queue or object
//! store. Implementations own their transport, retries, and backoff.

use std::time::Duration;

use thiserror::Error;

use kiln_protocol::{RawMessage, StorageUri};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source fetch failed: {0}")]
    Fetch(String),
    #[error("source ack failed for message {id}: {message}")]
    Ack { id: String, message: String },
    #[error("source release failed for message {id}: {message}")]
    Release { id: String, message: String },
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("payload not found at {0}")]
    NotFound(StorageUri),
    #[error("payload fetch failed for {uri}: {message}")]
    Fetch { uri: StorageUri, message: String },
}

/// A message queue the intake drains.
///
/// `fetch_one` leases a single message: the message stays invisible to
/// other consumers for `visibility`, then reappears unless acked.
pub trait MessageSource {
    fn fetch_one(
        &mut self,
        visibility: Duration,
    ) -> impl std::future::Future<Output = Result<Option<RawMessage>, SourceError>> + Send;

    /// Permanently remove a delivered message.
    fn ack(
        &mut self,
        message: &RawMessage,
    ) -> impl std::future::Future<Output = Result<(), SourceError>> + Send;

    /// Hand a delivered message back to the source, visible again after
    /// `delay`.
    fn release(
        &mut self,
        message: &RawMessage,
        delay: Duration,
    ) -> impl std::future::Future<Output = Result<(), SourceError>> + Send;
}

/// Fetches external payloads referenced by request URI fields.
pub trait ResourceResolver {
    fn resolve(
        &self,
        uri: &StorageUri,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, ResolveError>> + Send;
}
