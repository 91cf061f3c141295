//! Shared identifiers, wire-level enums, configuration, and error types used
//! across every crate in the engine. Every other crate in the workspace
//! depends on this one; it depends on nothing in the workspace itself.

mod bitmask;
mod config;
mod device;
mod error;
mod ids;
mod job;
mod model_spec;
mod subgraph_key;

pub use bitmask::BitMask;
pub use config::{
    PlannerConfig, ProfileConfig, ResourceMonitorConfig, RuntimeConfig, RuntimeConfigBuilder,
    SubgraphConfig, SubgraphPreparationType, WorkerConfig,
};
pub use device::{
    BackendType, CpuMaskFlag, DataType, DeviceFlag, QuantizationType, SchedulerType, WorkerType,
};
pub use error::{EngineError, EngineResult};
pub use ids::{CallbackId, JobId, ModelId, WorkerId};
pub use job::{Job, JobQueue, JobStatus, TensorHandle, WorkerWaitingTime};
pub use model_spec::{ModelSpec, SubgraphDef};
pub use subgraph_key::SubgraphKey;
