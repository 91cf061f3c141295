use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use common::{DeviceFlag, Job, JobStatus, WorkerId};
use tracing::{debug, warn};

use crate::context::WorkerContext;
use crate::cpu::CpuSet;
use crate::handle::{PopOutcome, SharedQueue, WorkerHandle};

/// How often a worksteal-enabled worker re-checks its own (empty) deque
/// before scanning siblings. Small enough to feel immediate, large enough
/// that it is not a busy-wait.
const WORKSTEAL_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Per-worker construction parameters, a lowered slice of `common::WorkerConfig`.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub worker_id: WorkerId,
    pub device_flag: DeviceFlag,
    pub cpu_set: CpuSet,
    pub allow_worksteal: bool,
}

/// A single OS thread bound to one device. Owns the join handle and the
/// queue the planner/sibling workers enqueue into or steal from; `end()`
/// signals shutdown and blocks until the thread has actually exited,
/// mirroring the original's destructor-joins-the-thread lifetime.
pub struct Worker {
    handle: WorkerHandle,
    queue: Arc<SharedQueue>,
    join_handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns the worker thread against `own_queue`. `siblings` is the set
    /// of other workers' queues this worker may steal from when
    /// `allow_worksteal` is set and its own deque is empty; the engine is
    /// responsible for only listing devices it considers "compatible"
    /// (matching `DeviceFlag`) here. `own_queue` is supplied rather than
    /// created internally so the engine can pre-allocate every worker's
    /// queue before spawning any thread -- each worker's sibling list then
    /// already includes queues for workers that haven't started yet.
    pub fn spawn(spec: WorkerSpec, context: Arc<dyn WorkerContext>, own_queue: Arc<SharedQueue>, siblings: Vec<Arc<SharedQueue>>) -> Worker {
        let queue = own_queue;
        let handle = WorkerHandle::new(spec.worker_id, spec.device_flag, Arc::clone(&queue));

        let thread_queue = Arc::clone(&queue);
        let worker_id = spec.worker_id;
        let cpu_set = spec.cpu_set;
        let allow_worksteal = spec.allow_worksteal;

        let join_handle = std::thread::Builder::new()
            .name(format!("worker-{}", worker_id.get()))
            .spawn(move || {
                if let Err(err) = cpu_set.apply_to_current_thread() {
                    warn!(?worker_id, error = %err, "failed to apply cpu affinity");
                }
                run_loop(worker_id, &thread_queue, &siblings, allow_worksteal, context.as_ref());
            })
            .expect("failed to spawn worker thread");

        Worker {
            handle,
            queue,
            join_handle: Some(join_handle),
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    pub fn queue(&self) -> Arc<SharedQueue> {
        Arc::clone(&self.queue)
    }

    pub fn pause(&self) {
        self.queue.pause();
    }

    pub fn resume(&self) {
        self.queue.resume();
    }

    /// Requests thread exit and blocks until it has actually stopped.
    pub fn end(&mut self) {
        self.queue.kill();
        if let Some(join_handle) = self.join_handle.take() {
            let _ = join_handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.end();
    }
}

fn run_loop(
    worker_id: WorkerId,
    queue: &SharedQueue,
    siblings: &[Arc<SharedQueue>],
    allow_worksteal: bool,
    context: &dyn WorkerContext,
) {
    let poll_timeout = if allow_worksteal && !siblings.is_empty() {
        Some(WORKSTEAL_POLL_INTERVAL)
    } else {
        None
    };

    loop {
        match queue.pop_or_wait(poll_timeout) {
            PopOutcome::Job(job) => execute_one(worker_id, job, context, false),
            PopOutcome::Killed => return,
            PopOutcome::TimedOut => {
                if let Some(job) = siblings.iter().find_map(|sibling| sibling.try_steal()) {
                    debug!(?worker_id, job_id = ?job.job_id, "stole job from sibling worker");
                    execute_one(worker_id, job, context, true);
                }
            }
        }
    }
}

fn execute_one(worker_id: WorkerId, mut job: Job, context: &dyn WorkerContext, stolen: bool) {
    job.invoke_time = now_micros();

    let outcome: Result<(), JobStatus> = (|| {
        if stolen {
            context.resolve_stolen_subgraph(&mut job, worker_id).map_err(|err| {
                warn!(?worker_id, job_id = ?job.job_id, error = %err, "failed to resolve stolen subgraph");
                JobStatus::InvokeFailure
            })?;
        }

        context.try_copy_input_tensors(&job).map_err(|err| {
            warn!(?worker_id, job_id = ?job.job_id, error = %err, "input tensor copy failed");
            JobStatus::InputCopyFailure
        })?;

        let start = Instant::now();
        context.execute_subgraph(&job).map_err(|err| {
            warn!(?worker_id, job_id = ?job.job_id, error = %err, "subgraph execution failed");
            JobStatus::InvokeFailure
        })?;
        let elapsed_micros = start.elapsed().as_micros() as i64;
        job.profiled_execution_time = elapsed_micros;
        context.record_latency(job.subgraph_key, elapsed_micros);

        context.try_copy_output_tensors(&job).map_err(|err| {
            warn!(?worker_id, job_id = ?job.job_id, error = %err, "output tensor copy failed");
            JobStatus::OutputCopyFailure
        })
    })();

    job.end_time = now_micros();
    job.status = outcome.err().unwrap_or(JobStatus::Success);
    debug!(?worker_id, job_id = ?job.job_id, status = ?job.status, "job finished");
    context.enqueue_finished_job(job);
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_micros() as i64
}
