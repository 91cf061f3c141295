use common::{EngineResult, Job, SubgraphKey, WorkerId};

/// The engine-provided operations a worker thread needs without knowing
/// about tensors, backends, or the planner directly. One implementation is
/// shared (as an `Arc<dyn WorkerContext>`) across every worker in an
/// engine instance.
pub trait WorkerContext: Send + Sync {
    /// Re-resolves `job.subgraph_key` for `new_worker_id` after a work-
    /// stealing move (spec section 4.3): the job's subgraph was chosen for
    /// whichever worker originally queued it, so the thief needs its own
    /// `SubgraphKey` before it can execute. Only ever called for jobs whose
    /// `target_worker_id` is unset.
    fn resolve_stolen_subgraph(&self, job: &mut Job, new_worker_id: WorkerId) -> EngineResult<()>;

    /// Copies the job's input tensors into the backend-owned buffers its
    /// target subgraph expects.
    fn try_copy_input_tensors(&self, job: &Job) -> EngineResult<()>;

    /// Runs `job.subgraph_key` to completion. The worker measures wall
    /// clock around this call itself; the context only executes.
    fn execute_subgraph(&self, job: &Job) -> EngineResult<()>;

    /// Copies outputs back out of backend-owned buffers into the job's
    /// output tensor handle.
    fn try_copy_output_tensors(&self, job: &Job) -> EngineResult<()>;

    /// Records an observed execution latency against `job.subgraph_key`,
    /// feeding the engine's `LatencyEstimator`.
    fn record_latency(&self, key: SubgraphKey, elapsed_micros: i64);

    /// Hands a finished job (in whatever status it ended up in) to the
    /// planner, which decides whether to re-enqueue the next unit-subgraph
    /// step or record it as done.
    fn enqueue_finished_job(&self, job: Job);
}
