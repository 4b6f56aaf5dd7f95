//! The pluggable prediction interface.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use kiln_protocol::{ResultRecord, UnitInfo, WorkUnit};

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("prediction exceeded the {0:?} deadline")]
    Timeout(Duration),
    #[error("a prediction deadline is already armed")]
    DeadlineAlreadyArmed,
    #[error("prediction result is not a JSON object: {0}")]
    InvalidResult(String),
    #[error("prediction failed: {0}")]
    Failed(String),
}

/// A prediction implementation run by the executor.
///
/// Only `predict` is required. The hooks and the pre/post transforms
/// default to no-ops, so an implementation opts into exactly the
/// capabilities it needs. `timeout` bounds each `predict` call; on
/// expiry the future is dropped and the unit degrades to the error
/// branch.
pub trait Predictor: Send {
    fn version(&self) -> &str {
        "not defined"
    }

    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Runs before the unit's validity check. Intended for signaling
    /// and bookkeeping, not transformation.
    fn pre_predict_hook(&mut self, _unit: &WorkUnit, _info: &mut UnitInfo) {}

    /// Transform the unit before prediction. Identity by default.
    fn preprocess(&mut self, unit: WorkUnit, _info: &UnitInfo) -> Result<WorkUnit, PredictError> {
        Ok(unit)
    }

    /// Produce a prediction result for one unit. The result must be a
    /// JSON object.
    fn predict(
        &mut self,
        unit: &WorkUnit,
        info: &UnitInfo,
    ) -> impl std::future::Future<Output = Result<Value, PredictError>> + Send;

    /// Transform the merged result record before it is sunk. Identity
    /// by default; skipped when the unit is already in error.
    fn postprocess(
        &mut self,
        record: ResultRecord,
        _info: &UnitInfo,
    ) -> Result<ResultRecord, PredictError> {
        Ok(record)
    }

    /// Runs after the unit's record has been handed to the sink.
    fn post_predict_hook(&mut self, _info: &UnitInfo) {}
}
