use std::collections::{HashMap, VecDeque};

use crate::{BitMask, JobId, ModelId, SubgraphKey, WorkerId};

/// Opaque index into a `TensorRingBuffer` slot. `None` (in `Job::input_handle`
/// / `Job::output_handle`) means "compute-only, no tensor handoff", replacing
/// the original's `-1` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorHandle(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    SloViolation,
    EnqueueFailure,
    InvokeFailure,
    InputCopyFailure,
    OutputCopyFailure,
}

impl JobStatus {
    /// Whether the job has reached a terminal state a `Wait` caller can
    /// observe in the finished-jobs record.
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

/// The runtime unit the planner schedules. Created by `Engine::request_async`
/// (or derived mid-flight when a multi-step job is re-enqueued), and
/// exclusively owned at any moment by whichever structure currently holds it
/// (the request queue, a worker's deque, a scheduler local, or the finished
/// ring) -- moves, not copies, transfer ownership in the Rust port, so `Job`
/// does not implement `Copy`.
#[derive(Debug, Clone)]
pub struct Job {
    pub model_id: ModelId,
    pub job_id: JobId,
    pub sched_id: i64,

    pub enqueue_time: i64,
    pub invoke_time: i64,
    pub end_time: i64,

    pub expected_latency: i64,
    pub profiled_execution_time: i64,
    pub slo_us: i64,

    pub target_worker_id: Option<WorkerId>,
    pub require_callback: bool,

    pub input_handle: Option<TensorHandle>,
    pub output_handle: Option<TensorHandle>,

    pub subgraph_key: SubgraphKey,
    pub previous_subgraph_keys: Vec<SubgraphKey>,
    pub resolved_unit_subgraphs: BitMask,

    pub status: JobStatus,
}

impl Job {
    pub fn new(model_id: ModelId, job_id: JobId, enqueue_time: i64) -> Self {
        Job {
            model_id,
            job_id,
            sched_id: -1,
            enqueue_time,
            invoke_time: 0,
            end_time: 0,
            expected_latency: 0,
            profiled_execution_time: 0,
            slo_us: 0,
            target_worker_id: None,
            require_callback: false,
            input_handle: None,
            output_handle: None,
            subgraph_key: SubgraphKey::default(),
            previous_subgraph_keys: Vec::new(),
            resolved_unit_subgraphs: BitMask::empty(),
            status: JobStatus::Queued,
        }
    }

    /// Folds `key`'s unit indices into the job's resolved set and records the
    /// completed key, in preparation for re-enqueuing the next unit-subgraph
    /// step. Mirrors `EnqueueFinishedJob`'s "more unit subgraphs remain"
    /// branch in the original planner.
    pub fn advance_past(&mut self, key: SubgraphKey) {
        self.previous_subgraph_keys.push(key);
        self.resolved_unit_subgraphs |= key.unit_indices;
        self.subgraph_key = SubgraphKey::default();
    }
}

/// The request queue / per-priority local queue / worker deque -- a
/// `std::deque<Job>` in the original, used both FIFO and with front-inserts
/// for job re-enqueue.
pub type JobQueue = VecDeque<Job>;

/// `WorkerId -> microseconds`, refreshed by the engine before each
/// scheduling iteration: the sum of `expected_latency` across jobs currently
/// queued at that worker.
pub type WorkerWaitingTime = HashMap<WorkerId, i64>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_past_clears_current_key_and_accumulates_resolved_mask() {
        let mut job = Job::new(ModelId::new(0), JobId::new(0), 0);
        let key = SubgraphKey::new(ModelId::new(0), WorkerId::new(0), BitMask::from_indices([0, 1]));
        job.advance_past(key);
        assert_eq!(job.resolved_unit_subgraphs, BitMask::from_indices([0, 1]));
        assert_eq!(job.previous_subgraph_keys, vec![key]);
        assert!(!job.subgraph_key.is_valid());
    }

    #[test]
    fn terminal_status_excludes_queued_and_running() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::SloViolation.is_terminal());
    }
}
