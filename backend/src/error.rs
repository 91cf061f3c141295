use std::path::PathBuf;

use common::SubgraphKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to load model file {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    #[error("subgraph {0:?} was never prepared on this executor")]
    SubgraphNotPrepared(SubgraphKey),

    #[error("op {op_index} references unknown tensor {tensor_index}")]
    UnknownTensor { op_index: usize, tensor_index: usize },

    #[error("op {op_index} has an unsupported kind for this backend")]
    UnsupportedOp { op_index: usize },

    #[error("model passed to this executor was not produced by the same backend")]
    ModelTypeMismatch,

    #[error("expected {expected} inputs for op {op_index}, got {actual}")]
    ArityMismatch {
        op_index: usize,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Tensor(#[from] tensor::TensorError),
}

pub type BackendResult<T> = Result<T, BackendError>;
