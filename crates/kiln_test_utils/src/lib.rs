//! Kiln Test Utilities
//!
//! In-memory doubles for every injected collaborator: a scripted
//! message source, table and queue clients backed by hash maps, and a
//! recording notifier. All of them log the calls they receive so tests
//! can assert on interaction order and arguments.

pub mod fixtures;
pub mod notify;
pub mod queue;
pub mod source;
pub mod store;
pub mod table;

pub use fixtures::{request, request_body};
pub use notify::RecordingNotifier;
pub use queue::RecordingQueueClient;
pub use source::{InMemorySource, SourceCallLog};
pub use store::InMemoryResolver;
pub use table::InMemoryTableClient;
