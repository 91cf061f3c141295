//! Scheduling policies and the background planner that runs them. This
//! crate knows nothing about `estimator`, `backend`, or `model_analyzer`
//! directly -- it reaches their data only through the `SchedulingContext`
//! trait the engine implements, so a new policy can be added here without
//! pulling in the rest of the engine's dependency graph.

mod context;
mod planner;
mod policies;
mod traits;

pub use context::{is_slo_violated, return_window, take_window, SchedulingContext, SchedulingDecision};
pub use planner::Planner;
pub use policies::{
    FixedWorkerGlobalQueueScheduler, FixedWorkerScheduler, HeterogeneousEarliestFinishTimeScheduler,
    LeastSlackTimeFirstScheduler, RoundRobinScheduler, ShortestExpectedLatencyScheduler,
};
pub use traits::IScheduler;

/// Builds the configured policy for a `common::SchedulerType`, mirroring the
/// original's scheduler factory switch. `window_size` is `PlannerConfig::schedule_window_size`.
pub fn build_scheduler(kind: common::SchedulerType, window_size: usize) -> Box<dyn IScheduler> {
    match kind {
        common::SchedulerType::FixedWorker => Box::new(FixedWorkerScheduler),
        common::SchedulerType::FixedWorkerGlobalQueue => Box::new(FixedWorkerGlobalQueueScheduler),
        common::SchedulerType::RoundRobin => Box::new(RoundRobinScheduler::default()),
        common::SchedulerType::ShortestExpectedLatency => Box::new(ShortestExpectedLatencyScheduler::new(window_size)),
        common::SchedulerType::HeterogeneousEarliestFinishTime { reserve } => {
            Box::new(HeterogeneousEarliestFinishTimeScheduler::new(window_size, reserve))
        }
        common::SchedulerType::LeastSlackTimeFirst => Box::new(LeastSlackTimeFirstScheduler::new(window_size)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_scheduler_matches_worker_type_to_policy() {
        let fixed = build_scheduler(common::SchedulerType::FixedWorker, 4);
        assert_eq!(fixed.worker_type(), common::WorkerType::DeviceQueue);

        let global = build_scheduler(common::SchedulerType::FixedWorkerGlobalQueue, 4);
        assert_eq!(global.worker_type(), common::WorkerType::GlobalQueue);
    }
}
