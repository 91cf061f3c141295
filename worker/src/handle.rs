use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use common::{DeviceFlag, Job, WorkerId};

struct QueueState {
    jobs: VecDeque<Job>,
    paused: bool,
    killed: bool,
}

/// Outcome of a bounded wait on a `SharedQueue`.
pub enum PopOutcome {
    Job(Job),
    /// The wait timed out with nothing to pop; only returned when a
    /// `timeout` was given, so a worker can go scan sibling queues for
    /// work-stealing before blocking again.
    TimedOut,
    /// `kill()` was called and the deque is now empty; the worker thread
    /// should exit.
    Killed,
}

/// Mutex+condvar guarded job deque. Shared (as an `Arc`) either as one
/// worker's own deque (device-queue scheduling) or as a common pool several
/// workers draw from (global-queue scheduling) -- the two variants from
/// spec section 4.3 differ only in how many `WorkerHandle`s hold a clone of
/// the same `SharedQueue`, not in the queue's own behavior.
pub struct SharedQueue {
    state: Mutex<QueueState>,
    condvar: Condvar,
}

impl SharedQueue {
    pub fn new() -> Arc<SharedQueue> {
        Arc::new(SharedQueue {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                paused: false,
                killed: false,
            }),
            condvar: Condvar::new(),
        })
    }

    pub fn push_back(&self, job: Job) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        state.jobs.push_back(job);
        self.condvar.notify_one();
    }

    pub fn push_front(&self, job: Job) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        state.jobs.push_front(job);
        self.condvar.notify_one();
    }

    /// Waits for a job, blocking indefinitely when `timeout` is `None`
    /// (the no-worksteal path -- never busy-waits) or returning
    /// `PopOutcome::TimedOut` after `timeout` elapses with nothing queued
    /// (the worksteal path, which then gets a chance to scan siblings).
    pub fn pop_or_wait(&self, timeout: Option<Duration>) -> PopOutcome {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        loop {
            if !state.paused {
                if let Some(job) = state.jobs.pop_front() {
                    return PopOutcome::Job(job);
                }
            }
            if state.killed {
                return PopOutcome::Killed;
            }
            state = match timeout {
                None => self.condvar.wait(state).expect("queue mutex poisoned"),
                Some(duration) => {
                    let (next_state, wait_result) =
                        self.condvar.wait_timeout(state, duration).expect("queue mutex poisoned");
                    if wait_result.timed_out() {
                        return PopOutcome::TimedOut;
                    }
                    next_state
                }
            };
        }
    }

    /// Non-blocking steal: only ever takes a job with no `target_worker_id`,
    /// per spec section 9's conservative rule for work-stealing against
    /// fixed-worker scheduling, and never steals from a paused worker.
    pub fn try_steal(&self) -> Option<Job> {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        if state.paused {
            return None;
        }
        let index = state.jobs.iter().position(|job| job.target_worker_id.is_none())?;
        state.jobs.remove(index)
    }

    pub fn waiting_time(&self) -> i64 {
        let state = self.state.lock().expect("queue mutex poisoned");
        state.jobs.iter().map(|job| job.expected_latency).sum()
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("queue mutex poisoned").jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pause(&self) {
        self.state.lock().expect("queue mutex poisoned").paused = true;
    }

    pub fn resume(&self) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        state.paused = false;
        self.condvar.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().expect("queue mutex poisoned").paused
    }

    pub fn kill(&self) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        state.killed = true;
        self.condvar.notify_all();
    }
}

/// Non-owning, cloneable reference to a running `Worker`'s queue -- what the
/// planner and sibling workers hold instead of the thread itself.
#[derive(Clone)]
pub struct WorkerHandle {
    pub worker_id: WorkerId,
    pub device_flag: DeviceFlag,
    queue: Arc<SharedQueue>,
}

impl WorkerHandle {
    pub fn new(worker_id: WorkerId, device_flag: DeviceFlag, queue: Arc<SharedQueue>) -> WorkerHandle {
        WorkerHandle {
            worker_id,
            device_flag,
            queue,
        }
    }

    pub fn enqueue(&self, job: Job) {
        self.queue.push_back(job);
    }

    pub fn waiting_time(&self) -> i64 {
        self.queue.waiting_time()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn pause(&self) {
        self.queue.pause();
    }

    pub fn resume(&self) {
        self.queue.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.queue.is_paused()
    }
}
