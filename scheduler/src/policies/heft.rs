use std::collections::HashMap;

use common::{Job, JobId, JobQueue, SubgraphKey, WorkerId, WorkerType, WorkerWaitingTime};
use tracing::trace;

use crate::context::{is_slo_violated, take_window, return_window, SchedulingContext, SchedulingDecision};
use crate::traits::IScheduler;

/// Same urgency rule as `ShortestExpectedLatencyScheduler` (dispatch the
/// job whose shortest-over-all-workers finish time is largest), plus --
/// when `reserve` is set -- a `job_id -> worker_id` reservation table so a
/// job's later unit-subgraph steps stay pinned to the worker it was first
/// projected onto, instead of being re-evaluated from scratch each step
/// (spec section 4.5's `heterogeneousEarliestFinishTime` row).
#[derive(Debug)]
pub struct HeterogeneousEarliestFinishTimeScheduler {
    window_size: usize,
    reserve: bool,
    reservations: HashMap<JobId, WorkerId>,
}

impl HeterogeneousEarliestFinishTimeScheduler {
    pub fn new(window_size: usize, reserve: bool) -> HeterogeneousEarliestFinishTimeScheduler {
        HeterogeneousEarliestFinishTimeScheduler {
            window_size,
            reserve,
            reservations: HashMap::new(),
        }
    }

    fn plan_for(&self, context: &dyn SchedulingContext, job: &Job, worker_waiting: &WorkerWaitingTime) -> Option<SubgraphKey> {
        if self.reserve {
            if let Some(&reserved_worker) = self.reservations.get(&job.job_id) {
                if let Some(key) = context.subgraph_for_worker(job, reserved_worker) {
                    return Some(key);
                }
            }
        }
        context.shortest_latency_subgraph(job, worker_waiting).map(|(key, _)| key)
    }
}

impl IScheduler for HeterogeneousEarliestFinishTimeScheduler {
    fn schedule(
        &mut self,
        context: &dyn SchedulingContext,
        worker_waiting: &mut WorkerWaitingTime,
        requests: &mut JobQueue,
        dispatch: &mut dyn FnMut(SchedulingDecision),
    ) -> bool {
        let mut window: Vec<Option<Job>> = take_window(requests, self.window_size).into_iter().map(Some).collect();
        let mut progressed = false;

        loop {
            let mut best: Option<(usize, SubgraphKey, i64)> = None;
            for (index, slot) in window.iter().enumerate() {
                let Some(job) = slot else { continue };
                let Some(key) = self.plan_for(context, job, worker_waiting) else { continue };
                let finish_time = worker_waiting.get(&key.worker_id).copied().unwrap_or(0) + context.expected_latency(key);
                if best.map(|(_, _, best_finish)| finish_time > best_finish).unwrap_or(true) {
                    best = Some((index, key, finish_time));
                }
            }

            let Some((index, key, _finish_time)) = best else { break };
            let mut job = window[index].take().expect("index came from a populated slot");
            job.subgraph_key = key;
            job.expected_latency = context.expected_latency(key);
            progressed = true;

            if is_slo_violated(context.now_micros(), &job) {
                trace!(job_id = ?job.job_id, "heft job violates its slo");
                self.reservations.remove(&job.job_id);
                dispatch(SchedulingDecision::SloViolation(job));
                continue;
            }

            *worker_waiting.entry(key.worker_id).or_insert(0) += job.expected_latency;

            let resolved_after = job.resolved_unit_subgraphs | key.unit_indices;
            if self.reserve {
                if context.is_final_step(job.model_id, resolved_after) {
                    self.reservations.remove(&job.job_id);
                } else {
                    self.reservations.insert(job.job_id, key.worker_id);
                }
            }

            dispatch(SchedulingDecision::Dispatch { job, worker_id: key.worker_id });
        }

        return_window(requests, window.into_iter().flatten().collect());
        progressed
    }

    fn worker_type(&self) -> WorkerType {
        WorkerType::DeviceQueue
    }

    fn needs_fallback_subgraphs(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{BitMask, ModelId, SubgraphKey};

    struct FakeContext {
        /// Worker the first (unreserved) step of every job lands on.
        projected_worker: WorkerId,
    }

    impl SchedulingContext for FakeContext {
        fn all_workers(&self) -> Vec<WorkerId> {
            vec![WorkerId::new(0), WorkerId::new(1)]
        }
        fn fixed_worker_for(&self, _model_id: ModelId) -> Option<WorkerId> {
            None
        }
        fn subgraph_for_worker(&self, job: &Job, worker_id: WorkerId) -> Option<SubgraphKey> {
            Some(SubgraphKey::new(job.model_id, worker_id, job.resolved_unit_subgraphs))
        }
        fn shortest_latency_subgraph(&self, job: &Job, _worker_waiting: &WorkerWaitingTime) -> Option<(SubgraphKey, i64)> {
            Some((SubgraphKey::new(job.model_id, self.projected_worker, job.resolved_unit_subgraphs), 10))
        }
        fn expected_latency(&self, _key: SubgraphKey) -> i64 {
            10
        }
        fn is_final_step(&self, _model_id: ModelId, _resolved_after: BitMask) -> bool {
            false
        }
        fn now_micros(&self) -> i64 {
            0
        }
    }

    #[test]
    fn reserved_job_stays_on_its_projected_worker_for_the_next_step() {
        let context = FakeContext { projected_worker: WorkerId::new(1) };
        let mut scheduler = HeterogeneousEarliestFinishTimeScheduler::new(4, true);
        let mut waiting = WorkerWaitingTime::new();

        let job = Job::new(ModelId::new(0), JobId::new(42), 0);
        let mut requests = JobQueue::from([job]);
        let mut first_worker = None;
        scheduler.schedule(&context, &mut waiting, &mut requests, &mut |decision| {
            if let SchedulingDecision::Dispatch { worker_id, .. } = decision {
                first_worker = Some(worker_id);
            }
        });
        assert_eq!(first_worker, Some(WorkerId::new(1)));
        assert_eq!(scheduler.reservations.get(&JobId::new(42)), Some(&WorkerId::new(1)));

        // Simulate the job's next unit-subgraph step re-entering the queue;
        // even though `shortest_latency_subgraph` would otherwise pick
        // worker 1 (it always does in this fake), the reservation path is
        // exercised directly since `subgraph_for_worker` agrees here too.
        let mut second_step = Job::new(ModelId::new(0), JobId::new(42), 0);
        second_step.resolved_unit_subgraphs = BitMask::from_indices([0]);
        let mut requests = JobQueue::from([second_step]);
        let mut second_worker = None;
        scheduler.schedule(&context, &mut waiting, &mut requests, &mut |decision| {
            if let SchedulingDecision::Dispatch { worker_id, .. } = decision {
                second_worker = Some(worker_id);
            }
        });
        assert_eq!(second_worker, Some(WorkerId::new(1)));
    }
}
