//! Cooperative prediction deadline.

use std::future::Future;
use std::time::Duration;

use tracing::error;

use crate::predictor::PredictError;

/// Bounds one prediction at a time with `tokio::time::timeout`.
///
/// On expiry the wrapped future is dropped, so a runaway prediction's
/// effects are abandoned rather than interrupted mid-write. The guard
/// disarms on return and can never fire late. Arming while a deadline
/// is armed is a caller bug and fails fast.
#[derive(Debug, Default)]
pub struct TimeoutGuard {
    armed: bool,
}

impl TimeoutGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<F, T>(
        &mut self,
        limit: Option<Duration>,
        future: F,
    ) -> Result<T, PredictError>
    where
        F: Future<Output = T>,
    {
        if self.armed {
            error!("deadline armed twice, rejecting");
            return Err(PredictError::DeadlineAlreadyArmed);
        }
        self.armed = true;
        let result = match limit {
            Some(limit) => tokio::time::timeout(limit, future)
                .await
                .map_err(|_| PredictError::Timeout(limit)),
            None => Ok(future.await),
        };
        self.armed = false;
        result
    }
}
