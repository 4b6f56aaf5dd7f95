//! Result-record destinations for the Kiln prediction harness.
//!
//! [`BufferedSink`] buffers records and flushes them in fixed-size
//! batches to a [`RecordWriter`]. Two writers ship here: a two-table
//! destination ([`TableWriter`]) and a per-record queue destination
//! ([`QueueWriter`]). Storage clients are injected through the
//! [`TableClient`] and [`QueueClient`] traits.

pub mod buffer;
pub mod queue;
pub mod table;

use thiserror::Error;

pub use buffer::{BufferedSink, RecordWriter, WriteSummary};
pub use queue::{QueueClient, QueueWriter};
pub use table::{prepare_record, TableClient, TableWriter, TableWriterConfig};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("table operation failed: {0}")]
    Table(String),
    #[error("queue send failed: {0}")]
    Queue(String),
}
