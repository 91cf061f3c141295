//! Background scheduling loop: drains newly-enqueued jobs through whichever
//! scheduler policies are installed, dispatches decisions onto worker
//! deques, and keeps a fixed-size record of finished jobs for `wait`/
//! `wait_all` to poll. Grounded in `original_source/band/planner.cc`'s state
//! machine; the thread/mutex/condvar plumbing follows `worker::Worker`'s
//! style, since this layer is explicitly OS-thread bound.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use common::{EngineError, EngineResult, Job, JobId, JobQueue, JobStatus, WorkerId, WorkerWaitingTime};
use tracing::{debug, warn};
use worker::WorkerHandle;

use crate::context::{SchedulingContext, SchedulingDecision};
use crate::traits::IScheduler;

/// Size of the finished-jobs ring, mirroring the original's fixed-size
/// `finished_jobs_record_`.
const NUM_FINISHED_RECORDS: usize = 1000;

struct FinishedRecord {
    ring: Vec<Option<Job>>,
    next: usize,
}

impl FinishedRecord {
    fn new() -> FinishedRecord {
        FinishedRecord {
            ring: vec![None; NUM_FINISHED_RECORDS],
            next: 0,
        }
    }

    fn push(&mut self, job: Job) {
        self.ring[self.next] = Some(job);
        self.next = (self.next + 1) % NUM_FINISHED_RECORDS;
    }

    fn find(&self, job_id: JobId) -> Option<&Job> {
        self.ring.iter().flatten().find(|job| job.job_id == job_id)
    }

    fn all_terminal(&self, job_ids: &[JobId]) -> bool {
        job_ids
            .iter()
            .all(|id| self.find(*id).map(|job| job.status.is_terminal()).unwrap_or(false))
    }
}

struct Shared {
    requests: Mutex<JobQueue>,
    gate: Condvar,
    finished: Mutex<FinishedRecord>,
    end_invoke: Condvar,
    shutting_down: AtomicBool,
}

impl Shared {
    fn record_finished(&self, job: Job) {
        debug!(job_id = ?job.job_id, status = ?job.status, "job finished");
        let mut finished = self.finished.lock().expect("finished mutex poisoned");
        finished.push(job);
        drop(finished);
        self.end_invoke.notify_all();
    }
}

/// Owns the background scheduling thread. The thread runs until `shutdown`
/// is called (also triggered by `Drop`), at which point it finishes
/// whatever pass is in flight and exits.
pub struct Planner {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Planner {
    /// `workers` is the full `WorkerId -> WorkerHandle` map the engine
    /// wired up; whether two entries share one `SharedQueue` (global-queue
    /// scheduling) or each own one (device-queue scheduling) is decided by
    /// the engine when it built those handles, not by the planner.
    pub fn new(
        context: Arc<dyn SchedulingContext>,
        schedulers: Vec<Box<dyn IScheduler>>,
        workers: HashMap<WorkerId, WorkerHandle>,
    ) -> Planner {
        let shared = Arc::new(Shared {
            requests: Mutex::new(JobQueue::new()),
            gate: Condvar::new(),
            finished: Mutex::new(FinishedRecord::new()),
            end_invoke: Condvar::new(),
            shutting_down: AtomicBool::new(false),
        });

        let loop_shared = shared.clone();
        let thread = std::thread::spawn(move || run_loop(loop_shared, context, schedulers, workers));

        Planner {
            shared,
            thread: Some(thread),
        }
    }

    pub fn enqueue_request(&self, job: Job) -> EngineResult<()> {
        self.enqueue_batch(vec![job])
    }

    /// Rejects new work once `shutdown` has been called (spec section 7's
    /// `shuttingDown` error kind) instead of silently queuing jobs the
    /// planner thread is about to stop servicing.
    pub fn enqueue_batch(&self, jobs: Vec<Job>) -> EngineResult<()> {
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }
        let mut requests = self.shared.requests.lock().expect("requests mutex poisoned");
        requests.extend(jobs);
        drop(requests);
        self.shared.gate.notify_one();
        Ok(())
    }

    /// Called by the engine's `WorkerContext::enqueue_finished_job` once a
    /// worker finishes executing one unit-subgraph step of `job`.
    /// Re-enqueues the job (front of the request queue, so partially-done
    /// work gets priority) only when it succeeded and more unit subgraphs
    /// remain; any other outcome -- success on the final step, or a failure
    /// status on any step -- is recorded as finished and wakes any
    /// `wait`/`wait_all` callers, preserving whatever status the worker set.
    pub fn enqueue_finished_job(&self, mut job: Job, completed_key: common::SubgraphKey, is_final_step: bool) {
        job.advance_past(completed_key);
        if job.status == JobStatus::Success && !is_final_step {
            job.status = JobStatus::Queued;
            let mut requests = self.shared.requests.lock().expect("requests mutex poisoned");
            requests.push_front(job);
            drop(requests);
            self.shared.gate.notify_one();
            return;
        }

        self.shared.record_finished(job);
    }

    /// Records a job as finished without running it -- used by the engine
    /// for `EnqueueFailure`/copy-failure outcomes that never reach a worker.
    pub fn record_finished_without_dispatch(&self, job: Job) {
        self.shared.record_finished(job);
    }

    pub fn wait(&self, job_id: JobId) -> Option<JobStatus> {
        self.wait_all(&[job_id]).into_iter().next().flatten()
    }

    pub fn wait_all(&self, job_ids: &[JobId]) -> Vec<Option<JobStatus>> {
        let mut finished = self.shared.finished.lock().expect("finished mutex poisoned");
        while !finished.all_terminal(job_ids) {
            finished = self.shared.end_invoke.wait(finished).expect("finished mutex poisoned");
        }
        job_ids.iter().map(|id| finished.find(*id).map(|job| job.status)).collect()
    }

    pub fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        self.shared.gate.notify_all();
        self.shared.end_invoke.notify_all();
    }
}

impl Drop for Planner {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_loop(shared: Arc<Shared>, context: Arc<dyn SchedulingContext>, mut schedulers: Vec<Box<dyn IScheduler>>, workers: HashMap<WorkerId, WorkerHandle>) {
    loop {
        let mut requests = shared.requests.lock().expect("requests mutex poisoned");
        while requests.is_empty() && !shared.shutting_down.load(Ordering::SeqCst) {
            requests = shared.gate.wait(requests).expect("requests mutex poisoned");
        }
        if requests.is_empty() && shared.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let mut local: JobQueue = std::mem::take(&mut *requests);
        drop(requests);

        let mut worker_waiting: WorkerWaitingTime =
            workers.values().map(|handle| (handle.worker_id, handle.waiting_time())).collect();

        loop {
            let mut progressed = false;
            for scheduler in schedulers.iter_mut() {
                let made_progress = scheduler.schedule(context.as_ref(), &mut worker_waiting, &mut local, &mut |decision| {
                    dispatch_decision(&shared, &workers, context.as_ref(), decision);
                });
                progressed |= made_progress;
            }
            if !progressed {
                break;
            }
        }

        if !local.is_empty() {
            let mut requests = shared.requests.lock().expect("requests mutex poisoned");
            for job in local.into_iter().rev() {
                requests.push_front(job);
            }
        }

        if shared.shutting_down.load(Ordering::SeqCst) {
            return;
        }
    }
}

fn dispatch_decision(shared: &Arc<Shared>, workers: &HashMap<WorkerId, WorkerHandle>, context: &dyn SchedulingContext, decision: SchedulingDecision) {
    match decision {
        SchedulingDecision::Dispatch { mut job, worker_id } => {
            job.status = JobStatus::Running;
            job.invoke_time = context.now_micros();
            match workers.get(&worker_id) {
                Some(handle) => handle.enqueue(job),
                None => warn!(worker_id = ?worker_id, job_id = ?job.job_id, "scheduler dispatched to an unknown worker"),
            }
        }
        SchedulingDecision::SloViolation(mut job) => {
            job.status = JobStatus::SloViolation;
            shared.record_finished(job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{BitMask, ModelId, SubgraphKey};
    use std::time::Duration;

    struct FixedContext {
        worker_id: WorkerId,
    }

    impl SchedulingContext for FixedContext {
        fn all_workers(&self) -> Vec<WorkerId> {
            vec![self.worker_id]
        }
        fn fixed_worker_for(&self, _model_id: ModelId) -> Option<WorkerId> {
            Some(self.worker_id)
        }
        fn subgraph_for_worker(&self, job: &Job, worker_id: WorkerId) -> Option<SubgraphKey> {
            Some(SubgraphKey::whole_model(job.model_id, worker_id))
        }
        fn shortest_latency_subgraph(&self, job: &Job, _worker_waiting: &WorkerWaitingTime) -> Option<(SubgraphKey, i64)> {
            Some((SubgraphKey::whole_model(job.model_id, self.worker_id), 0))
        }
        fn expected_latency(&self, _key: SubgraphKey) -> i64 {
            0
        }
        fn is_final_step(&self, _model_id: ModelId, _resolved_after: BitMask) -> bool {
            true
        }
        fn now_micros(&self) -> i64 {
            0
        }
    }

    #[test]
    fn enqueued_job_reaches_its_fixed_worker_queue() {
        let worker_id = WorkerId::new(0);
        let queue = worker::SharedQueue::new();
        let handle = WorkerHandle::new(worker_id, common::DeviceFlag::Cpu, queue.clone());
        let workers = HashMap::from([(worker_id, handle)]);

        let context: Arc<dyn SchedulingContext> = Arc::new(FixedContext { worker_id });
        let schedulers: Vec<Box<dyn IScheduler>> = vec![Box::new(crate::policies::FixedWorkerScheduler::default())];
        let planner = Planner::new(context, schedulers, workers);

        planner.enqueue_request(Job::new(ModelId::new(0), JobId::new(1), 0)).unwrap();

        let mut tries = 0;
        while queue.is_empty() && tries < 200 {
            std::thread::sleep(Duration::from_millis(5));
            tries += 1;
        }
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn wait_all_blocks_until_job_finishes() {
        let worker_id = WorkerId::new(0);
        let queue = worker::SharedQueue::new();
        let handle = WorkerHandle::new(worker_id, common::DeviceFlag::Cpu, queue.clone());
        let workers = HashMap::from([(worker_id, handle)]);

        let context: Arc<dyn SchedulingContext> = Arc::new(FixedContext { worker_id });
        let schedulers: Vec<Box<dyn IScheduler>> = vec![Box::new(crate::policies::FixedWorkerScheduler::default())];
        let planner = Arc::new(Planner::new(context, schedulers, workers));

        let job_id = JobId::new(7);
        planner.enqueue_request(Job::new(ModelId::new(0), job_id, 0)).unwrap();

        let finisher = planner.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let mut job = Job::new(ModelId::new(0), job_id, 0);
            job.status = JobStatus::Success;
            finisher.enqueue_finished_job(job, SubgraphKey::whole_model(ModelId::new(0), worker_id), true);
        });

        let statuses = planner.wait_all(&[job_id]);
        assert_eq!(statuses, vec![Some(JobStatus::Success)]);
    }
}
