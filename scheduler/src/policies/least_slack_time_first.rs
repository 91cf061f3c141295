use common::{JobQueue, WorkerType, WorkerWaitingTime};
use tracing::trace;

use crate::context::{is_slo_violated, return_window, take_window, SchedulingContext, SchedulingDecision};
use crate::traits::IScheduler;

/// Over a window of `window_size` front jobs, repeatedly dispatches the job
/// with the *least slack* -- `slack = enqueue_time + slo_us - (now +
/// shortest predicted finish time)` -- to its shortest-latency worker (spec
/// section 4.5's `leastSlackTimeFirst` row). Jobs without an SLO (`slo_us <=
/// 0`) are treated as having infinite slack and are only picked once every
/// SLO-bearing job in the window has been placed.
#[derive(Debug)]
pub struct LeastSlackTimeFirstScheduler {
    window_size: usize,
}

impl LeastSlackTimeFirstScheduler {
    pub fn new(window_size: usize) -> LeastSlackTimeFirstScheduler {
        LeastSlackTimeFirstScheduler { window_size }
    }
}

fn slack(now_micros: i64, job: &common::Job, finish_time: i64) -> i64 {
    if job.slo_us <= 0 {
        i64::MAX
    } else {
        job.enqueue_time + job.slo_us - (now_micros + finish_time)
    }
}

impl IScheduler for LeastSlackTimeFirstScheduler {
    fn schedule(
        &mut self,
        context: &dyn SchedulingContext,
        worker_waiting: &mut WorkerWaitingTime,
        requests: &mut JobQueue,
        dispatch: &mut dyn FnMut(SchedulingDecision),
    ) -> bool {
        let mut window: Vec<Option<common::Job>> =
            take_window(requests, self.window_size).into_iter().map(Some).collect();
        let now = context.now_micros();
        let mut progressed = false;

        loop {
            let mut best: Option<(usize, common::SubgraphKey, i64)> = None;
            for (index, slot) in window.iter().enumerate() {
                let Some(job) = slot else { continue };
                let Some((key, finish_time)) = context.shortest_latency_subgraph(job, worker_waiting) else {
                    continue;
                };
                let candidate_slack = slack(now, job, finish_time);
                if best
                    .map(|(_, _, best_slack)| candidate_slack < best_slack)
                    .unwrap_or(true)
                {
                    best = Some((index, key, candidate_slack));
                }
            }

            let Some((index, key, _slack)) = best else { break };
            let mut job = window[index].take().expect("index came from a populated slot");
            job.subgraph_key = key;
            job.expected_latency = context.expected_latency(key);
            progressed = true;

            if is_slo_violated(now, &job) {
                trace!(job_id = ?job.job_id, "least-slack-time-first job violates its slo");
                dispatch(SchedulingDecision::SloViolation(job));
            } else {
                *worker_waiting.entry(key.worker_id).or_insert(0) += job.expected_latency;
                dispatch(SchedulingDecision::Dispatch { job, worker_id: key.worker_id });
            }
        }

        return_window(requests, window.into_iter().flatten().collect());
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
    use std::collections::HashMap;

    /// Worker 0 is already backed up 50ms; two jobs share a 20ms expected
    /// latency, but job A's SLO is nearly blown while job B has no SLO, so
    /// LST must place A first even though both would finish at the same
    /// time.
    struct FakeContext {
        latency: i64,
    }

    impl SchedulingContext for FakeContext {
        fn all_workers(&self) -> Vec<WorkerId> {
            vec![WorkerId::new(0)]
        }
        fn fixed_worker_for(&self, _model_id: ModelId) -> Option<WorkerId> {
            None
        }
        fn subgraph_for_worker(&self, job: &Job, worker_id: WorkerId) -> Option<SubgraphKey> {
            Some(SubgraphKey::new(job.model_id, worker_id, BitMask::empty()))
        }
        fn shortest_latency_subgraph(&self, job: &Job, worker_waiting: &WorkerWaitingTime) -> Option<(SubgraphKey, i64)> {
            let key = SubgraphKey::new(job.model_id, WorkerId::new(0), BitMask::empty());
            let queued = worker_waiting.get(&WorkerId::new(0)).copied().unwrap_or(0);
            Some((key, queued + self.latency))
        }
        fn expected_latency(&self, _key: SubgraphKey) -> i64 {
            self.latency
        }
        fn is_final_step(&self, _model_id: ModelId, _resolved_after: BitMask) -> bool {
            true
        }
        fn now_micros(&self) -> i64 {
            0
        }
    }

    #[test]
    fn tightest_slo_dispatched_before_slo_free_job() {
        let context = FakeContext { latency: 20_000 };
        let mut tight = Job::new(ModelId::new(0), JobId::new(0), 0);
        tight.slo_us = 25_000;
        let loose = Job::new(ModelId::new(1), JobId::new(1), 0);

        let mut requests = JobQueue::from([loose, tight]);
        let mut waiting = WorkerWaitingTime::from([(WorkerId::new(0), 50_000)]);
        let mut order = Vec::new();

        let mut scheduler = LeastSlackTimeFirstScheduler::new(8);
        scheduler.schedule(&context, &mut waiting, &mut requests, &mut |decision| match decision {
            SchedulingDecision::Dispatch { job, .. } => order.push(job.model_id),
            SchedulingDecision::SloViolation(job) => order.push(job.model_id),
        });

        assert_eq!(order, vec![ModelId::new(0), ModelId::new(1)]);
    }

    #[test]
    fn unmeetable_slo_is_reported_as_violation() {
        let context = FakeContext { latency: 100_000 };
        let mut job = Job::new(ModelId::new(0), JobId::new(0), 0);
        job.slo_us = 10;
        let mut requests = JobQueue::from([job]);
        let mut waiting = WorkerWaitingTime::new();

        let mut violated = false;
        let mut scheduler = LeastSlackTimeFirstScheduler::new(8);
        scheduler.schedule(&context, &mut waiting, &mut requests, &mut |decision| {
            if let SchedulingDecision::SloViolation(_) = decision {
                violated = true;
            }
        });

        assert!(violated);
    }
}
