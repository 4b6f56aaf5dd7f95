//! Shared types for the Kiln prediction harness.
//!
//! Everything the intake, sink, and runner crates exchange lives here:
//! work units and their mutable info side channel, raw source messages,
//! storage URIs, the byte-bounded JSON chunker used for notification
//! payloads, and the flatten/dedup helpers used by table writers.

pub mod chunk;
pub mod config;
pub mod defaults;
pub mod flatten;
pub mod types;

pub use chunk::{serialize_chunks, ChunkError};
pub use config::RunConfig;
pub use flatten::{dedup_key, derive_request_id, flatten, flatten_with};
pub use types::{
    MessageId, RawMessage, ResultRecord, RunOutcome, RunState, SourceDetail, StorageUri,
    StorageUriError, UnitInfo, WorkRequest, WorkUnit,
};
