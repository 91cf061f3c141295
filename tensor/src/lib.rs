//! Tensor views and owned tensor snapshots. Grounded in the teacher's
//! `tensor/src/primitives/tensor` module: a small internals struct behind a
//! cheaply-cloneable handle type, plus a view describing shape/stride
//! independent of storage.

mod error;
mod tensor;
mod view;

pub use common::DataType;
pub use error::{TensorError, TensorResult};
pub use tensor::Tensor;
pub use view::{TensorView, ViewType};
