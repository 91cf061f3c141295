mod fixed_worker;
mod heft;
mod least_slack_time_first;
mod round_robin;
mod shortest_expected_latency;

pub use fixed_worker::{FixedWorkerGlobalQueueScheduler, FixedWorkerScheduler};
pub use heft::HeterogeneousEarliestFinishTimeScheduler;
pub use least_slack_time_first::LeastSlackTimeFirstScheduler;
pub use round_robin::RoundRobinScheduler;
pub use shortest_expected_latency::ShortestExpectedLatencyScheduler;
