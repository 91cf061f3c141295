use thiserror::Error;

#[derive(Debug, Error)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("dtype mismatch: expected {expected:?}, got {actual:?}")]
    DtypeMismatch {
        expected: common::DataType,
        actual: common::DataType,
    },

    #[error("buffer of {actual} bytes too small for {expected} bytes of tensor data")]
    BufferTooSmall { expected: usize, actual: usize },

    #[error("data type {0:?} has no fixed byte width and cannot back a raw tensor buffer")]
    UnrepresentableDtype(common::DataType),
}

pub type TensorResult<T> = Result<T, TensorError>;
