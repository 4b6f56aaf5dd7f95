//! Run orchestration for the Kiln prediction harness.
//!
//! A run drains a bounded batch from the intake, executes the injected
//! [`Predictor`] per unit under a cooperative deadline, sinks every
//! unit's record (error branch included), dispatches completion
//! notifications, and settles the source messages according to the
//! outcome.

pub mod executor;
pub mod local;
pub mod notify;
pub mod predictor;
pub mod timeout;

pub use executor::{RunError, RunExecutor, RunSummary};
pub use notify::{dispatch_notifications, NotificationGroups, Notifier, NotifyError};
pub use predictor::{PredictError, Predictor};
pub use timeout::TimeoutGuard;
