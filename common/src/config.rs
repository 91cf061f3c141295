use serde::{Deserialize, Serialize};

use crate::{CpuMaskFlag, DeviceFlag, SchedulerType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub online: bool,
    pub num_warmups: u32,
    pub num_runs: u32,
    pub profile_data_path: String,
    pub smoothing_factor: f32,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        ProfileConfig {
            online: true,
            num_warmups: 1,
            num_runs: 1,
            profile_data_path: String::new(),
            smoothing_factor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    pub schedule_window_size: usize,
    pub schedulers: Vec<SchedulerType>,
    pub cpu_mask: CpuMaskFlag,
    pub log_path: String,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            schedule_window_size: usize::MAX,
            schedulers: vec![SchedulerType::FixedWorker],
            cpu_mask: CpuMaskFlag::All,
            log_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub workers: Vec<DeviceFlag>,
    pub cpu_masks: Vec<CpuMaskFlag>,
    pub num_threads: Vec<u32>,
    pub allow_worksteal: bool,
    pub availability_check_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        // One default worker per device, mirroring the original's
        // `WorkerConfig()` constructor.
        let workers = DeviceFlag::ALL.to_vec();
        let n = workers.len();
        WorkerConfig {
            workers,
            cpu_masks: vec![CpuMaskFlag::All; n],
            num_threads: vec![1; n],
            allow_worksteal: false,
            availability_check_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubgraphPreparationType {
    NoFallback,
    Unit,
    MergedUnit,
    FallbackPerWorker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgraphConfig {
    pub minimum_subgraph_size: usize,
    pub subgraph_preparation_type: SubgraphPreparationType,
}

impl Default for SubgraphConfig {
    fn default() -> Self {
        SubgraphConfig {
            minimum_subgraph_size: 7,
            subgraph_preparation_type: SubgraphPreparationType::MergedUnit,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceMonitorConfig {
    pub log_path: String,
    pub device_freq_paths: std::collections::HashMap<DeviceFlag, String>,
    pub monitor_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub cpu_mask: CpuMaskFlag,
    pub subgraph_config: SubgraphConfig,
    pub profile_config: ProfileConfig,
    pub planner_config: PlannerConfig,
    pub worker_config: WorkerConfig,
    pub resource_monitor_config: ResourceMonitorConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            cpu_mask: CpuMaskFlag::All,
            subgraph_config: SubgraphConfig::default(),
            profile_config: ProfileConfig::default(),
            planner_config: PlannerConfig::default(),
            worker_config: WorkerConfig::default(),
            resource_monitor_config: ResourceMonitorConfig::default(),
        }
    }
}

/// Builder for `RuntimeConfig`, the only sanctioned way to construct one --
/// mirrors the original's `RuntimeConfigBuilder` friend-class pattern without
/// needing C++'s access-control trick.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    pub fn new() -> Self {
        RuntimeConfigBuilder {
            config: RuntimeConfig::default(),
        }
    }

    pub fn cpu_mask(mut self, cpu_mask: CpuMaskFlag) -> Self {
        self.config.cpu_mask = cpu_mask;
        self
    }

    pub fn subgraph_config(mut self, subgraph_config: SubgraphConfig) -> Self {
        self.config.subgraph_config = subgraph_config;
        self
    }

    pub fn profile_config(mut self, profile_config: ProfileConfig) -> Self {
        self.config.profile_config = profile_config;
        self
    }

    pub fn planner_config(mut self, planner_config: PlannerConfig) -> Self {
        self.config.planner_config = planner_config;
        self
    }

    pub fn worker_config(mut self, worker_config: WorkerConfig) -> Self {
        self.config.worker_config = worker_config;
        self
    }

    pub fn resource_monitor_config(mut self, resource_monitor_config: ResourceMonitorConfig) -> Self {
        self.config.resource_monitor_config = resource_monitor_config;
        self
    }

    /// Validates the assembled config and returns it, or a
    /// `EngineError::Configuration` describing the first violation found.
    pub fn build(self) -> crate::EngineResult<RuntimeConfig> {
        let config = self.config;
        let wc = &config.worker_config;
        if wc.workers.len() != wc.cpu_masks.len() || wc.workers.len() != wc.num_threads.len() {
            return Err(crate::EngineError::Configuration(
                "worker_config.workers, cpu_masks, and num_threads must have equal length".into(),
            ));
        }
        if !(0.0..=1.0).contains(&config.profile_config.smoothing_factor)
            || config.profile_config.smoothing_factor <= 0.0
        {
            return Err(crate::EngineError::Configuration(
                "profile_config.smoothing_factor must be in (0, 1]".into(),
            ));
        }
        if config.planner_config.schedulers.is_empty() {
            return Err(crate::EngineError::Configuration(
                "planner_config.schedulers must name at least one scheduler".into(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_worker_config_has_one_worker_per_device() {
        let wc = WorkerConfig::default();
        assert_eq!(wc.workers.len(), DeviceFlag::enum_length());
        assert_eq!(wc.cpu_masks.len(), wc.workers.len());
        assert_eq!(wc.num_threads.len(), wc.workers.len());
    }

    #[test]
    fn builder_rejects_mismatched_worker_vectors() {
        let mut worker_config = WorkerConfig::default();
        worker_config.cpu_masks.pop();
        let result = RuntimeConfigBuilder::new().worker_config(worker_config).build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_rejects_zero_smoothing_factor() {
        let mut profile_config = ProfileConfig::default();
        profile_config.smoothing_factor = 0.0;
        let result = RuntimeConfigBuilder::new().profile_config(profile_config).build();
        assert!(result.is_err());
    }
}
