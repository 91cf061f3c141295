use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use backend::ModelExecutor;
use common::{CallbackId, EngineError, EngineResult, Job, JobId, JobStatus, ModelId, SubgraphKey, WorkerId};
use tensor::Tensor;
use tracing::{trace, warn};

use crate::model_registry::ModelRegistry;
use crate::scheduling_context::EngineSchedulingContext;

/// A user-registered `OnEndRequest` handler, invoked with the finished job's
/// id and terminal status. Boxed rather than generic so `Engine` can hold an
/// arbitrary number of them behind one field.
pub type EndRequestCallback = Box<dyn Fn(JobId, JobStatus) + Send + Sync>;

/// One executor per `(model, worker)` the model was partitioned onto.
/// Not internally locked by convention -- after registration completes a
/// given entry is only ever touched by its owning worker thread -- but each
/// gets its own `Mutex` so the type checker doesn't need to take that on
/// faith (spec section 5).
pub type ExecutorTable = HashMap<(ModelId, WorkerId), Mutex<Box<dyn ModelExecutor>>>;

/// The engine's implementation of `worker::WorkerContext`. One instance is
/// shared (as an `Arc<dyn WorkerContext>`) across every worker thread the
/// engine owns.
pub struct EngineWorkerContext {
    registry: Arc<RwLock<ModelRegistry>>,
    executors: Arc<RwLock<ExecutorTable>>,
    scheduling: Arc<EngineSchedulingContext>,
    estimator: Arc<estimator::LatencyEstimator>,
    planner: OnceLock<Arc<scheduler::Planner>>,
    pending_inputs: Mutex<HashMap<JobId, Vec<Tensor>>>,
    pending_outputs: Mutex<HashMap<JobId, Vec<Tensor>>>,
    callbacks: Arc<RwLock<HashMap<CallbackId, EndRequestCallback>>>,
}

impl EngineWorkerContext {
    pub fn new(
        registry: Arc<RwLock<ModelRegistry>>,
        executors: Arc<RwLock<ExecutorTable>>,
        scheduling: Arc<EngineSchedulingContext>,
        estimator: Arc<estimator::LatencyEstimator>,
        callbacks: Arc<RwLock<HashMap<CallbackId, EndRequestCallback>>>,
    ) -> EngineWorkerContext {
        EngineWorkerContext {
            registry,
            executors,
            scheduling,
            estimator,
            planner: OnceLock::new(),
            pending_inputs: Mutex::new(HashMap::new()),
            pending_outputs: Mutex::new(HashMap::new()),
            callbacks,
        }
    }

    /// Wired in once, right after the planner is constructed -- the planner
    /// needs worker handles that only exist once the workers (which in turn
    /// need this context) have been spawned, so the two can't be built in a
    /// single step.
    pub fn set_planner(&self, planner: Arc<scheduler::Planner>) {
        self.planner
            .set(planner)
            .unwrap_or_else(|_| panic!("worker context planner already wired"));
    }

    fn planner(&self) -> &scheduler::Planner {
        self.planner.get().expect("worker context used before planner was wired").as_ref()
    }
}

impl worker::WorkerContext for EngineWorkerContext {
    fn resolve_stolen_subgraph(&self, job: &mut Job, new_worker_id: WorkerId) -> EngineResult<()> {
        let key = self
            .scheduling
            .subgraph_for_worker(job, new_worker_id)
            .ok_or(EngineError::NoSuchWorker(new_worker_id))?;
        job.subgraph_key = key;
        Ok(())
    }

    fn try_copy_input_tensors(&self, job: &Job) -> EngineResult<()> {
        let inputs = match job.input_handle {
            None => Vec::new(),
            Some(handle) => {
                let registry = self.registry.read().expect("model registry lock poisoned");
                let model = registry.get(&job.model_id).ok_or(EngineError::NoSuchModel(job.model_id))?;
                model
                    .input_ring
                    .get(handle)
                    .ok_or_else(|| EngineError::InputCopyFailure(format!("stale input handle {handle:?}")))?
            }
        };
        self.pending_inputs.lock().expect("pending inputs mutex poisoned").insert(job.job_id, inputs);
        Ok(())
    }

    fn execute_subgraph(&self, job: &Job) -> EngineResult<()> {
        let key = job.subgraph_key;
        let inputs = self
            .pending_inputs
            .lock()
            .expect("pending inputs mutex poisoned")
            .remove(&job.job_id)
            .unwrap_or_default();

        let executors = self.executors.read().expect("executor table lock poisoned");
        let slot = executors
            .get(&(key.model_id, key.worker_id))
            .ok_or(EngineError::NoSuchWorker(key.worker_id))?;
        let mut executor = slot.lock().expect("model executor mutex poisoned");
        let outputs = executor
            .execute_subgraph(key, &inputs)
            .map_err(|err| EngineError::Backend(err.to_string()))?;

        trace!(?key, outputs = outputs.len(), "subgraph executed");
        self.pending_outputs.lock().expect("pending outputs mutex poisoned").insert(job.job_id, outputs);
        Ok(())
    }

    fn try_copy_output_tensors(&self, job: &Job) -> EngineResult<()> {
        let outputs = self
            .pending_outputs
            .lock()
            .expect("pending outputs mutex poisoned")
            .remove(&job.job_id)
            .unwrap_or_default();

        let Some(handle) = job.output_handle else {
            return Ok(());
        };
        if outputs.is_empty() {
            return Err(EngineError::OutputCopyFailure(format!("no output produced for handle {handle:?}")));
        }

        let registry = self.registry.read().expect("model registry lock poisoned");
        let model = registry.get(&job.model_id).ok_or(EngineError::NoSuchModel(job.model_id))?;
        model.output_ring.set(handle, outputs);
        Ok(())
    }

    fn record_latency(&self, key: SubgraphKey, elapsed_micros: i64) {
        let registry = self.registry.read().expect("model registry lock poisoned");
        if let Some(model) = registry.get(&key.model_id) {
            self.estimator.update_latency(&model.model_path, key, elapsed_micros);
        }
    }

    fn enqueue_finished_job(&self, job: Job) {
        let key = job.subgraph_key;
        let resolved_after = job.resolved_unit_subgraphs.union(key.unit_indices);
        let is_final_step = self.scheduling.is_final_step(job.model_id, resolved_after);
        let (job_id, require_callback, status) = (job.job_id, job.require_callback, job.status);

        // The job only actually finished if it either failed or completed its
        // last step; the planner silently re-enqueues a successful
        // intermediate step instead of recording it.
        let actually_finished = status != JobStatus::Success || is_final_step;

        self.planner().enqueue_finished_job(job, key, is_final_step);

        if actually_finished && require_callback {
            let callbacks = self.callbacks.read().expect("callback registry lock poisoned");
            for callback in callbacks.values() {
                // A user callback must never unwind through the worker thread
                // (spec section 9): a panicking callback is caught, logged,
                // and swallowed so the next callback and the worker's own
                // loop keep running.
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(job_id, status)));
                if outcome.is_err() {
                    warn!(?job_id, "on-end-request callback panicked; ignoring");
                }
            }
        }
    }
}
