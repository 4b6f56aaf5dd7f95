//! Queue intake for the Kiln prediction harness.
//!
//! [`BoundedIntake`] drains a [`MessageSource`] up to a capacity
//! ceiling, resolves payload URIs through a [`ResourceResolver`], and
//! settles consumed messages (ack on success, short-delay release on
//! failure) for at-least-once delivery.

pub mod intake;
pub mod source;

pub use intake::{BoundedIntake, Drained};
pub use source::{MessageSource, ResolveError, ResourceResolver, SourceError};
