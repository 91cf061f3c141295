//! Public facade for the multi-backend inference engine: wires together
//! `model_analyzer`'s subgraph partitioning, `estimator`'s latency tracking,
//! `scheduler`'s planner/policies, and `worker`'s thread-per-device
//! execution loop behind one `Engine` type. Downstream code links only
//! against this crate; the others are internal implementation detail, the
//! same relationship the teacher's `runtime` crate had to `tensor`/`nn`.

mod engine;
mod model_registry;
mod ring_buffer;
mod scheduling_context;
mod worker_context;

pub use engine::{Engine, RequestOptions};
pub use ring_buffer::TensorRingBuffer;
pub use worker_context::EndRequestCallback;
