use common::{JobQueue, WorkerType, WorkerWaitingTime};
use tracing::trace;

use crate::context::{is_slo_violated, SchedulingContext, SchedulingDecision};
use crate::traits::IScheduler;

/// Routes every job to `job.target_worker_id` if set, else the engine's
/// cached `model_worker_map[model_id]`, and dispatches the largest
/// `SubgraphKey` registered for the model on that worker (spec section
/// 4.5's `fixedWorker` row). Each worker pulls from its own deque.
#[derive(Debug, Default)]
pub struct FixedWorkerScheduler;

/// Identical decision rule to `FixedWorkerScheduler`; differs only in
/// `worker_type`, which tells the planner to give every worker a shared
/// pool instead of a private deque.
#[derive(Debug, Default)]
pub struct FixedWorkerGlobalQueueScheduler;

fn schedule_fixed(
    context: &dyn SchedulingContext,
    worker_waiting: &mut WorkerWaitingTime,
    requests: &mut JobQueue,
    dispatch: &mut dyn FnMut(SchedulingDecision),
) -> bool {
    let mut progressed = false;
    let mut remaining = JobQueue::new();

    while let Some(mut job) = requests.pop_front() {
        let worker_id = job.target_worker_id.or_else(|| context.fixed_worker_for(job.model_id));
        let plan = worker_id.and_then(|worker_id| context.subgraph_for_worker(&job, worker_id).map(|key| (worker_id, key)));

        match plan {
            Some((worker_id, key)) => {
                job.subgraph_key = key;
                job.expected_latency = context.expected_latency(key);
                progressed = true;

                if is_slo_violated(context.now_micros(), &job) {
                    trace!(job_id = ?job.job_id, "fixed worker job violates its slo");
                    dispatch(SchedulingDecision::SloViolation(job));
                } else {
                    *worker_waiting.entry(worker_id).or_insert(0) += job.expected_latency;
                    dispatch(SchedulingDecision::Dispatch { job, worker_id });
                }
            }
            None => remaining.push_back(job),
        }
    }

    *requests = remaining;
    progressed
}

impl IScheduler for FixedWorkerScheduler {
    fn schedule(
        &mut self,
        context: &dyn SchedulingContext,
        worker_waiting: &mut WorkerWaitingTime,
        requests: &mut JobQueue,
        dispatch: &mut dyn FnMut(SchedulingDecision),
    ) -> bool {
        schedule_fixed(context, worker_waiting, requests, dispatch)
    }

    fn worker_type(&self) -> WorkerType {
        WorkerType::DeviceQueue
    }
}

impl IScheduler for FixedWorkerGlobalQueueScheduler {
    fn schedule(
        &mut self,
        context: &dyn SchedulingContext,
        worker_waiting: &mut WorkerWaitingTime,
        requests: &mut JobQueue,
        dispatch: &mut dyn FnMut(SchedulingDecision),
    ) -> bool {
        schedule_fixed(context, worker_waiting, requests, dispatch)
    }

    fn worker_type(&self) -> WorkerType {
        WorkerType::GlobalQueue
    }
}
