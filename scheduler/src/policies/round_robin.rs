use common::{JobQueue, WorkerType, WorkerWaitingTime};
use tracing::trace;

use crate::context::{is_slo_violated, SchedulingContext, SchedulingDecision};
use crate::traits::IScheduler;

/// Assigns each job to the next idle worker (`worker_waiting[w] == 0`)
/// whose largest subgraph for the job's model is valid, cycling through
/// the full worker list (spec section 4.5's `roundRobin` row).
#[derive(Debug, Default)]
pub struct RoundRobinScheduler {
    next_index: usize,
}

impl IScheduler for RoundRobinScheduler {
    fn schedule(
        &mut self,
        context: &dyn SchedulingContext,
        worker_waiting: &mut WorkerWaitingTime,
        requests: &mut JobQueue,
        dispatch: &mut dyn FnMut(SchedulingDecision),
    ) -> bool {
        let workers = context.all_workers();
        if workers.is_empty() {
            return false;
        }

        let mut progressed = false;
        let mut remaining = JobQueue::new();

        while let Some(mut job) = requests.pop_front() {
            let mut assigned = None;
            for _ in 0..workers.len() {
                let candidate = workers[self.next_index % workers.len()];
                self.next_index = self.next_index.wrapping_add(1);

                let idle = worker_waiting.get(&candidate).copied().unwrap_or(0) == 0;
                if !idle {
                    continue;
                }
                if let Some(key) = context.subgraph_for_worker(&job, candidate) {
                    assigned = Some(key);
                    break;
                }
            }

            match assigned {
                Some(key) => {
                    job.subgraph_key = key;
                    job.expected_latency = context.expected_latency(key);
                    progressed = true;

                    if is_slo_violated(context.now_micros(), &job) {
                        trace!(job_id = ?job.job_id, "round robin job violates its slo");
                        dispatch(SchedulingDecision::SloViolation(job));
                    } else {
                        *worker_waiting.entry(key.worker_id).or_insert(0) += job.expected_latency;
                        dispatch(SchedulingDecision::Dispatch { job, worker_id: key.worker_id });
                    }
                }
                None => remaining.push_back(job),
            }
        }

        *requests = remaining;
        progressed
    }

    fn worker_type(&self) -> WorkerType {
        WorkerType::DeviceQueue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{BitMask, Job, JobId, ModelId, SubgraphKey, WorkerId};

    struct FakeContext;
    impl SchedulingContext for FakeContext {
        fn all_workers(&self) -> Vec<WorkerId> {
            vec![WorkerId::new(0), WorkerId::new(1)]
        }
        fn fixed_worker_for(&self, _model_id: ModelId) -> Option<WorkerId> {
            None
        }
        fn subgraph_for_worker(&self, job: &Job, worker_id: WorkerId) -> Option<SubgraphKey> {
            Some(SubgraphKey::new(job.model_id, worker_id, BitMask::empty()))
        }
        fn shortest_latency_subgraph(&self, _job: &Job, _w: &WorkerWaitingTime) -> Option<(SubgraphKey, i64)> {
            None
        }
        fn expected_latency(&self, _key: SubgraphKey) -> i64 {
            10
        }
        fn is_final_step(&self, _model_id: ModelId, _resolved_after: BitMask) -> bool {
            true
        }
        fn now_micros(&self) -> i64 {
            0
        }
    }

    #[test]
    fn two_jobs_go_to_two_different_idle_workers() {
        let context = FakeContext;
        let mut requests = JobQueue::from([
            Job::new(ModelId::new(0), JobId::new(0), 0),
            Job::new(ModelId::new(0), JobId::new(1), 0),
        ]);
        let mut waiting = WorkerWaitingTime::new();
        let mut assigned_workers = Vec::new();

        let mut scheduler = RoundRobinScheduler::default();
        scheduler.schedule(&context, &mut waiting, &mut requests, &mut |decision| {
            if let SchedulingDecision::Dispatch { worker_id, .. } = decision {
                assigned_workers.push(worker_id);
            }
        });

        assert_eq!(assigned_workers, vec![WorkerId::new(0), WorkerId::new(1)]);
        assert!(requests.is_empty());
    }
}
