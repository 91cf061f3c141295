//! One OS thread per device, draining a job deque and handing execution off
//! to whatever the engine wires in as its `WorkerContext`. Grounded in
//! `original_source/band/worker.cc`'s state machine; the thread/mutex/condvar
//! mechanics follow that file directly rather than an async runtime, since
//! this layer is explicitly OS-thread and CPU-affinity bound.

mod context;
mod cpu;
mod handle;
mod worker;

pub use context::WorkerContext;
pub use cpu::CpuSet;
pub use handle::{PopOutcome, SharedQueue, WorkerHandle};
pub use worker::{Worker, WorkerSpec};
