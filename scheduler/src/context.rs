use common::{BitMask, Job, JobQueue, ModelId, SubgraphKey, WorkerId, WorkerWaitingTime};

/// What a scheduler decided to do with one job, handed back to the planner
/// through the `dispatch` callback passed into `IScheduler::schedule`.
/// Keeping this an enum (rather than letting policies enqueue to a worker
/// directly) is what lets `scheduler` stay ignorant of how a job actually
/// reaches a worker's deque -- the planner owns that wiring.
pub enum SchedulingDecision {
    Dispatch { job: Job, worker_id: WorkerId },
    SloViolation(Job),
}

/// The engine-provided read path a scheduler policy needs to make a
/// decision, without this crate depending on `estimator`, `backend`, or
/// `model_analyzer` directly. One implementation (owned by the engine) is
/// shared across every installed policy.
pub trait SchedulingContext: Send + Sync {
    /// Every worker the planner can dispatch to, in `WorkerId` order.
    fn all_workers(&self) -> Vec<WorkerId>;

    /// The engine's cached `ModelId -> WorkerId` assignment, used by
    /// `FixedWorker`/`FixedWorkerGlobalQueue` when a job carries no
    /// explicit `target_worker_id`.
    fn fixed_worker_for(&self, model_id: ModelId) -> Option<WorkerId>;

    /// The largest (by unit-subgraph count) `SubgraphKey` registered for
    /// `model_id` on `worker_id`, honoring whatever unit subgraphs `job`
    /// has already resolved -- `None` if the model has no subgraph on that
    /// worker compatible with `job`'s current progress.
    fn subgraph_for_worker(&self, job: &Job, worker_id: WorkerId) -> Option<SubgraphKey>;

    /// `GetSubgraphWithShortestLatency`: evaluates every eligible worker's
    /// next step for `job` and returns the one with the shortest predicted
    /// finish time, plus that finish time (`now + queued wait + expected
    /// latency`), given the current tentative `worker_waiting` snapshot.
    fn shortest_latency_subgraph(&self, job: &Job, worker_waiting: &WorkerWaitingTime) -> Option<(SubgraphKey, i64)>;

    fn expected_latency(&self, key: SubgraphKey) -> i64;

    /// Whether resolving `key`'s unit indices on top of `job`'s already-
    /// resolved set would complete the model -- i.e. whether this would be
    /// the job's last unit-subgraph step.
    fn is_final_step(&self, model_id: ModelId, resolved_after: BitMask) -> bool;

    fn now_micros(&self) -> i64;

    /// `GetSubgraphIdxSatisfyingSLO`: left unimplemented per spec section 9
    /// (the original never implements it either); kept as a trait point so
    /// an SLO-aware policy can be added later without an interface change.
    fn subgraph_satisfying_slo(&self, _job: &Job, _worker_waiting: &WorkerWaitingTime) -> Option<BitMask> {
        None
    }
}

/// Returns whether dispatching `job` (with `job.expected_latency` already
/// set to its predicted cost) would blow its deadline: `enqueue_time +
/// slo_us < now + expected_latency`. A job with `slo_us <= 0` has no SLO
/// and can never violate one.
pub fn is_slo_violated(now_micros: i64, job: &Job) -> bool {
    job.slo_us > 0 && job.enqueue_time + job.slo_us < now_micros + job.expected_latency
}

/// Drains up to `window` jobs from the front of `requests`, in order.
pub fn take_window(requests: &mut JobQueue, window: usize) -> Vec<Job> {
    let n = requests.len().min(window);
    requests.drain(..n).collect()
}

/// Pushes `jobs` back onto the front of `requests`, preserving their
/// relative order -- used to return a window's unassigned leftovers.
pub fn return_window(requests: &mut JobQueue, jobs: Vec<Job>) {
    for job in jobs.into_iter().rev() {
        requests.push_front(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{JobId, ModelId as MId};

    fn job(enqueue_time: i64, slo_us: i64, expected_latency: i64) -> Job {
        let mut job = Job::new(MId::new(0), JobId::new(0), enqueue_time);
        job.slo_us = slo_us;
        job.expected_latency = expected_latency;
        job
    }

    #[test]
    fn no_slo_never_violates() {
        assert!(!is_slo_violated(1_000_000, &job(0, 0, 1_000_000)));
    }

    #[test]
    fn exceeding_deadline_violates() {
        assert!(is_slo_violated(100, &job(0, 50, 60)));
    }

    #[test]
    fn within_deadline_does_not_violate() {
        assert!(!is_slo_violated(10, &job(0, 100, 20)));
    }
}
