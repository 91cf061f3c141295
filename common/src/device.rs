use serde::{Deserialize, Serialize};

/// Processor kind a worker thread is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceFlag {
    Cpu,
    Gpu,
    Dsp,
    Npu,
}

impl DeviceFlag {
    pub const ALL: [DeviceFlag; 4] = [
        DeviceFlag::Cpu,
        DeviceFlag::Gpu,
        DeviceFlag::Dsp,
        DeviceFlag::Npu,
    ];

    pub const fn enum_length() -> usize {
        Self::ALL.len()
    }
}

/// The backend runtime used to parse a model and execute its subgraphs.
/// `Reference` is this workspace's own interpreter, used by tests and as a
/// worked example of the backend contract; it is not part of the original
/// ABI's named set but slots into the same open-ended enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendType {
    TfLite,
    Grpc,
    Reference,
}

/// Numeric representation of a tensor's elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Float32,
    Int32,
    Uint8,
    Int8,
    Int64,
    Bool,
    Complex64,
    String,
    Float16,
    Float64,
    Int16,
}

impl DataType {
    /// Per-element byte width for the fixed-width numeric types. `String` has
    /// no fixed width and is not representable as a contiguous byte buffer by
    /// this engine's tensor views; callers that need it must special-case it.
    pub const fn fixed_byte_size(self) -> Option<usize> {
        match self {
            DataType::Int8 | DataType::Uint8 | DataType::Bool => Some(1),
            DataType::Int16 | DataType::Float16 => Some(2),
            DataType::Int32 | DataType::Float32 => Some(4),
            DataType::Int64 | DataType::Float64 | DataType::Complex64 => Some(8),
            DataType::String => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuantizationType {
    None,
    Affine,
}

/// Which pool a scheduler pulls jobs from; `IScheduler::GetWorkerType` in
/// the original. All schedulers installed on one planner must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerType {
    DeviceQueue,
    GlobalQueue,
}

/// CPU core subset a worker or the planner thread may run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CpuMaskFlag {
    All,
    Little,
    Big,
    Primary,
}

/// Selects which `IScheduler` policy implementation the planner installs.
/// A `PlannerConfig` may list more than one; the planner requires they all
/// report the same `WorkerType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulerType {
    FixedWorker,
    FixedWorkerGlobalQueue,
    RoundRobin,
    ShortestExpectedLatency,
    HeterogeneousEarliestFinishTime { reserve: bool },
    LeastSlackTimeFirst,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_flag_enum_length_matches_variant_count() {
        assert_eq!(DeviceFlag::enum_length(), 4);
    }
}
