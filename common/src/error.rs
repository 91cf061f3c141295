use thiserror::Error;

use crate::{JobId, ModelId, WorkerId};

/// Error kinds surfaced across the engine's public and internal call
/// boundaries (spec section 7). Synchronous engine calls return the first
/// terminal error they hit; asynchronous calls instead attach an equivalent
/// `JobStatus` to the job and deliver it through `Wait`/the completion
/// callback -- `EngineError` is reserved for call-level failures, not
/// per-job outcomes.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to register model {model_id:?}: {reason}")]
    Registration { model_id: ModelId, reason: String },

    #[error("no such model: {0:?}")]
    NoSuchModel(ModelId),

    #[error("no such worker: {0:?}")]
    NoSuchWorker(WorkerId),

    #[error("no such job: {0:?}")]
    NoSuchJob(JobId),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("input tensor copy failed: {0}")]
    InputCopyFailure(String),

    #[error("output tensor copy failed: {0}")]
    OutputCopyFailure(String),

    #[error("SLO violated for job {0:?}")]
    SloViolation(JobId),

    #[error("engine is shutting down")]
    ShuttingDown,
}

pub type EngineResult<T> = Result<T, EngineError>;
