use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use backend::BackendFactory;
use common::{
    BackendType, CallbackId, DataType, EngineError, EngineResult, Job, JobId, JobStatus, ModelId,
    RuntimeConfig, SubgraphKey, TensorHandle, WorkerId,
};
use model_analyzer::{ModelAnalyzer, WorkerDescriptor};
use scheduler::SchedulingContext;
use tensor::Tensor;
use tracing::{info, warn};
use worker::{CpuSet, SharedQueue, Worker, WorkerHandle, WorkerSpec};

use crate::model_registry::{ModelRegistry, RegisteredModel};
use crate::ring_buffer::TensorRingBuffer;
use crate::scheduling_context::EngineSchedulingContext;
use crate::worker_context::{EndRequestCallback, EngineWorkerContext, ExecutorTable};

/// Default capacity of a model's input/output `TensorRingBuffer` -- large
/// enough to cover several in-flight requests per model without the client
/// having to reason about ring wraparound in the common case. Distinct from
/// the planner's `NUM_FINISHED_RECORDS`, which bounds a different ring.
const DEFAULT_TENSOR_RING_CAPACITY: usize = 16;

/// Per-job options shared by every job created in one `request_sync`/
/// `request_async` call -- `target_worker_id`, `slo_us`, `require_callback`
/// from spec section 3's `Job` fields, lifted out to a request-level
/// argument the way spec section 4.6's `RequestSync`/`RequestAsync` take a
/// single `options` parameter for the whole batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    pub target_worker_id: Option<WorkerId>,
    pub slo_us: i64,
    pub require_callback: bool,
}

/// Bookkeeping kept for a job between `request_async` and `wait`: which
/// model's output ring the job will write into, and which handle names the
/// slot. The engine needs this because the planner only hands back a
/// `JobId`/`JobStatus` pair, never the tensors themselves.
struct InFlightJob {
    model_id: ModelId,
    output_handle: Option<TensorHandle>,
}

/// Public facade (spec section 4.6): the only type a downstream binding or
/// test links against. Owns every model, executor, worker, and the planner;
/// all of their lifetimes equal `Engine`'s.
pub struct Engine {
    config: RuntimeConfig,
    backend_factory: BackendFactory,
    registry: Arc<RwLock<ModelRegistry>>,
    executors: Arc<RwLock<ExecutorTable>>,
    estimator: Arc<estimator::LatencyEstimator>,
    scheduling: Arc<EngineSchedulingContext>,
    callbacks: Arc<RwLock<HashMap<CallbackId, EndRequestCallback>>>,
    worker_descriptors: Vec<WorkerDescriptor>,
    worker_handles: HashMap<WorkerId, WorkerHandle>,
    // Kept alive only to join worker threads on drop; never read otherwise.
    _workers: Vec<Worker>,
    planner: Arc<scheduler::Planner>,
    in_flight: Mutex<HashMap<JobId, InFlightJob>>,
    next_model_id: AtomicU32,
    next_job_id: AtomicU64,
    next_callback_id: AtomicU32,
    start: Instant,
}

impl Engine {
    /// `Create`: spawns one worker thread per `worker_config.workers` entry,
    /// pre-allocating every worker's queue up front so each worker's
    /// work-steal sibling list can name queues for workers that start after
    /// it, then builds the scheduling context, worker context, and planner
    /// around them.
    pub fn create(config: RuntimeConfig, backend_factory: BackendFactory) -> EngineResult<Engine> {
        let wc = &config.worker_config;
        let worker_descriptors: Vec<WorkerDescriptor> = wc
            .workers
            .iter()
            .enumerate()
            .map(|(index, &device_flag)| WorkerDescriptor {
                worker_id: WorkerId::new(index),
                device_flag,
            })
            .collect();

        let num_cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let queues: Vec<Arc<SharedQueue>> = (0..worker_descriptors.len()).map(|_| SharedQueue::new()).collect();

        let registry: Arc<RwLock<ModelRegistry>> = Arc::new(RwLock::new(HashMap::new()));
        let executors: Arc<RwLock<ExecutorTable>> = Arc::new(RwLock::new(HashMap::new()));
        let estimator = Arc::new(estimator::LatencyEstimator::new(&config.profile_config));
        let callbacks = Arc::new(RwLock::new(HashMap::new()));

        let scheduling = Arc::new(EngineSchedulingContext::new(
            Arc::clone(&registry),
            Arc::clone(&estimator),
            worker_descriptors.iter().map(|d| d.worker_id).collect(),
        ));

        let worker_context = Arc::new(EngineWorkerContext::new(
            Arc::clone(&registry),
            Arc::clone(&executors),
            Arc::clone(&scheduling),
            Arc::clone(&estimator),
            Arc::clone(&callbacks),
        ));

        let mut workers = Vec::with_capacity(worker_descriptors.len());
        let mut worker_handles = HashMap::with_capacity(worker_descriptors.len());
        for (index, descriptor) in worker_descriptors.iter().enumerate() {
            let cpu_set = CpuSet::from_flag(wc.cpu_masks[index], num_cores);
            let spec = WorkerSpec {
                worker_id: descriptor.worker_id,
                device_flag: descriptor.device_flag,
                cpu_set,
                allow_worksteal: wc.allow_worksteal,
            };
            let siblings: Vec<Arc<SharedQueue>> = if wc.allow_worksteal {
                worker_descriptors
                    .iter()
                    .enumerate()
                    .filter(|&(sibling_index, sibling)| sibling_index != index && sibling.device_flag == descriptor.device_flag)
                    .map(|(sibling_index, _)| Arc::clone(&queues[sibling_index]))
                    .collect()
            } else {
                Vec::new()
            };

            let context: Arc<dyn worker::WorkerContext> = worker_context.clone();
            let spawned = Worker::spawn(spec, context, Arc::clone(&queues[index]), siblings);
            worker_handles.insert(descriptor.worker_id, spawned.handle());
            workers.push(spawned);
        }

        let mut schedulers = Vec::with_capacity(config.planner_config.schedulers.len());
        let mut worker_type = None;
        for &kind in &config.planner_config.schedulers {
            let policy = scheduler::build_scheduler(kind, config.planner_config.schedule_window_size);
            match worker_type {
                None => worker_type = Some(policy.worker_type()),
                Some(expected) if expected != policy.worker_type() => {
                    return Err(EngineError::Configuration(
                        "all installed schedulers must agree on worker type".into(),
                    ));
                }
                Some(_) => {}
            }
            schedulers.push(policy);
        }

        let planner = Arc::new(scheduler::Planner::new(
            scheduling.clone() as Arc<dyn SchedulingContext>,
            schedulers,
            worker_handles.clone(),
        ));
        worker_context.set_planner(Arc::clone(&planner));

        Ok(Engine {
            config,
            backend_factory,
            registry,
            executors,
            estimator,
            scheduling,
            callbacks,
            worker_descriptors,
            worker_handles,
            _workers: workers,
            planner,
            in_flight: Mutex::new(HashMap::new()),
            next_model_id: AtomicU32::new(0),
            next_job_id: AtomicU64::new(0),
            next_callback_id: AtomicU32::new(0),
            start: Instant::now(),
        })
    }

    pub fn register_model(&self, path: &Path, backend_type: BackendType) -> EngineResult<ModelId> {
        let model_id = ModelId::new(self.next_model_id.fetch_add(1, Ordering::SeqCst));
        match self.try_register_model(model_id, path, backend_type) {
            Ok(()) => Ok(model_id),
            Err(err) => {
                self.unregister_model(model_id);
                Err(err)
            }
        }
    }

    fn try_register_model(&self, model_id: ModelId, path: &Path, backend_type: BackendType) -> EngineResult<()> {
        let registration_error = |reason: String| EngineError::Registration { model_id, reason };

        // Step 1: analyze.
        let model = self
            .backend_factory
            .load_model(backend_type, path)
            .map_err(|err| registration_error(err.to_string()))?;
        let raw_spec = model.analyze();

        let valid_workers: Vec<WorkerDescriptor> = self
            .worker_descriptors
            .iter()
            .copied()
            .filter(|w| !raw_spec.unavailable_devices.contains(&w.device_flag))
            .collect();
        if valid_workers.is_empty() {
            return Err(registration_error("no worker is available for this model".into()));
        }

        let analyzer = ModelAnalyzer::new(&valid_workers, &self.config.subgraph_config);
        let (model_spec, subgraphs) = analyzer
            .create_subgraphs(raw_spec)
            .map_err(|err| registration_error(err.to_string()))?;

        // Step 2: one executor per valid worker.
        let mut executors_for_model: HashMap<WorkerId, Box<dyn backend::ModelExecutor>> = HashMap::new();
        for w in &valid_workers {
            let executor = self
                .backend_factory
                .create_executor(backend_type, w.device_flag)
                .map_err(|err| registration_error(err.to_string()))?;
            executors_for_model.insert(w.worker_id, executor);
        }

        // Step 3: prepare + verify every subgraph def.
        for def in &subgraphs {
            if !def.has_contiguous_unit_indices() {
                return Err(registration_error("subgraph def has non-contiguous unit indices".into()));
            }
            let key = SubgraphKey::new(model_id, def.worker_id, def.as_bitmask());
            let executor = executors_for_model
                .get_mut(&def.worker_id)
                .ok_or_else(|| registration_error(format!("no executor for worker {:?}", def.worker_id)))?;
            executor
                .prepare_subgraph(model.as_ref(), key, &def.op_indices)
                .map_err(|err| registration_error(err.to_string()))?;
            if !executor.is_subgraph_ready(key) {
                return Err(registration_error(format!(
                    "executor did not report {key:?} ready after prepare_subgraph"
                )));
            }
        }

        // Step 4: cross-worker tensor compatibility. A single `Model` backs
        // every worker this registration call spans, so two defs never
        // disagree about a shared tensor's shape/dtype by construction;
        // what can still be wrong is an analyzer bug naming a tensor index
        // the model doesn't have.
        verify_tensor_indices_in_range(&model_spec, &subgraphs).map_err(registration_error)?;

        {
            let mut executors = self.executors.write().expect("executor table lock poisoned");
            for (worker_id, executor) in executors_for_model {
                executors.insert((model_id, worker_id), Mutex::new(executor));
            }
        }

        // Step 5: ring buffers sized to the full model's tensor views.
        let input_ring = TensorRingBuffer::new(DEFAULT_TENSOR_RING_CAPACITY);
        let output_ring = TensorRingBuffer::new(DEFAULT_TENSOR_RING_CAPACITY);

        let model_path = path.display().to_string();
        let registered = RegisteredModel {
            model_path: model_path.clone(),
            model,
            spec: model_spec,
            subgraphs,
            input_ring,
            output_ring,
        };

        {
            let mut registry = self.registry.write().expect("model registry lock poisoned");
            registry.insert(model_id, registered);
        }

        // The model→worker map used by FixedWorker/FixedWorkerGlobalQueue:
        // pin to the lowest-numbered valid worker. Open Question, resolved
        // in DESIGN.md -- the source leaves the selection rule unspecified.
        if let Some(primary) = valid_workers.iter().map(|w| w.worker_id).min() {
            self.scheduling.set_fixed_worker(model_id, primary);
        }

        // Step 6: profile.
        if self.config.profile_config.online {
            if let Err(err) = self.profile_registered_model(model_id) {
                warn!(?model_id, error = %err, "online profiling failed; model remains registered but unprofiled");
            }
        }

        info!(?model_id, path = %model_path, workers = valid_workers.len(), "model registered");
        Ok(())
    }

    fn profile_registered_model(&self, model_id: ModelId) -> EngineResult<()> {
        let (model_path, keys, inputs_by_key) = {
            let registry = self.registry.read().expect("model registry lock poisoned");
            let registered = registry.get(&model_id).ok_or(EngineError::NoSuchModel(model_id))?;

            let mut keys = Vec::with_capacity(registered.subgraphs.len());
            let mut inputs_by_key = HashMap::with_capacity(registered.subgraphs.len());
            for def in &registered.subgraphs {
                let key = SubgraphKey::new(model_id, def.worker_id, def.as_bitmask());
                let pure_inputs = registered.spec.pure_input_tensors(&def.op_indices);
                let inputs = pure_inputs
                    .iter()
                    .map(|&tensor_index| placeholder_tensor(registered.model.as_ref(), &registered.spec, tensor_index))
                    .collect::<EngineResult<Vec<_>>>()?;
                keys.push(key);
                inputs_by_key.insert(key, inputs);
            }
            (registered.model_path.clone(), keys, inputs_by_key)
        };

        let executors = Arc::clone(&self.executors);
        self.estimator.profile_model(
            &model_path,
            &keys,
            self.config.profile_config.num_warmups,
            self.config.profile_config.num_runs,
            |key| {
                let inputs = inputs_by_key.get(&key).cloned().unwrap_or_default();
                let executors = executors.read().expect("executor table lock poisoned");
                let slot = executors
                    .get(&(key.model_id, key.worker_id))
                    .ok_or(EngineError::NoSuchWorker(key.worker_id))?;
                let mut executor = slot.lock().expect("model executor mutex poisoned");
                let start = Instant::now();
                executor
                    .execute_subgraph(key, &inputs)
                    .map_err(|err| EngineError::Backend(err.to_string()))?;
                Ok(start.elapsed().as_micros() as i64)
            },
        )
    }

    /// `UnregisterModel`: drops the model's registry entry and executors.
    /// Already-queued jobs for this model are not cancelled; they fail at
    /// dispatch/copy time once the registry lookup misses.
    pub fn unregister_model(&self, model_id: ModelId) {
        self.registry.write().expect("model registry lock poisoned").remove(&model_id);
        self.executors
            .write()
            .expect("executor table lock poisoned")
            .retain(|(mid, _), _| *mid != model_id);
        self.scheduling.clear_model(model_id);
    }

    pub fn create_tensor(&self, model_id: ModelId, tensor_index: usize) -> EngineResult<Tensor> {
        let registry = self.registry.read().expect("model registry lock poisoned");
        let registered = registry.get(&model_id).ok_or(EngineError::NoSuchModel(model_id))?;
        placeholder_tensor(registered.model.as_ref(), &registered.spec, tensor_index)
    }

    pub fn get_input_tensor_indices(&self, model_id: ModelId) -> EngineResult<Vec<usize>> {
        let registry = self.registry.read().expect("model registry lock poisoned");
        registry
            .get(&model_id)
            .map(|m| m.spec.input_tensors.clone())
            .ok_or(EngineError::NoSuchModel(model_id))
    }

    pub fn get_output_tensor_indices(&self, model_id: ModelId) -> EngineResult<Vec<usize>> {
        let registry = self.registry.read().expect("model registry lock poisoned");
        registry
            .get(&model_id)
            .map(|m| m.spec.output_tensors.clone())
            .ok_or(EngineError::NoSuchModel(model_id))
    }

    /// `RequestAsync`: validates `options.target_worker_id` up front (so an
    /// invalid worker id never reaches the request queue, spec section 8
    /// scenario 3), allocates input ring handles for each model's tensors,
    /// and hands the resulting jobs to the planner as one batch so they get
    /// contiguous ascending `JobId`s.
    pub fn request_async(
        &self,
        model_ids: &[ModelId],
        options: &RequestOptions,
        inputs_per_model: Vec<Vec<Tensor>>,
    ) -> EngineResult<Vec<JobId>> {
        if model_ids.len() != inputs_per_model.len() {
            return Err(EngineError::Configuration(
                "model_ids and inputs_per_model must have equal length".into(),
            ));
        }
        if let Some(target) = options.target_worker_id {
            if !self.worker_handles.contains_key(&target) {
                return Err(EngineError::NoSuchWorker(target));
            }
        }

        let now = self.scheduling.now_micros();
        let mut jobs = Vec::with_capacity(model_ids.len());
        let mut job_ids = Vec::with_capacity(model_ids.len());
        let mut in_flight_entries = Vec::with_capacity(model_ids.len());

        {
            let registry = self.registry.read().expect("model registry lock poisoned");
            for (&model_id, inputs) in model_ids.iter().zip(inputs_per_model) {
                let registered = registry.get(&model_id).ok_or(EngineError::NoSuchModel(model_id))?;

                let input_handle = if inputs.is_empty() { None } else { Some(registered.input_ring.alloc(inputs)) };
                let output_handle = Some(registered.output_ring.alloc(Vec::new()));

                let job_id = JobId::new(self.next_job_id.fetch_add(1, Ordering::SeqCst));
                let mut job = Job::new(model_id, job_id, now);
                job.target_worker_id = options.target_worker_id;
                job.slo_us = options.slo_us;
                job.require_callback = options.require_callback;
                job.input_handle = input_handle;
                job.output_handle = output_handle;

                job_ids.push(job_id);
                in_flight_entries.push((job_id, InFlightJob { model_id, output_handle }));
                jobs.push(job);
            }
        }

        {
            let mut in_flight = self.in_flight.lock().expect("in-flight jobs mutex poisoned");
            in_flight.extend(in_flight_entries);
        }

        self.planner.enqueue_batch(jobs)?;
        Ok(job_ids)
    }

    /// `RequestSync`: issues one `request_async` batch and blocks for every
    /// job to finish, surfacing the first terminal error it finds (spec
    /// section 7's synchronous propagation policy) or the collected outputs
    /// in model order.
    pub fn request_sync(
        &self,
        model_ids: &[ModelId],
        options: &RequestOptions,
        inputs_per_model: Vec<Vec<Tensor>>,
    ) -> EngineResult<Vec<Vec<Tensor>>> {
        let job_ids = self.request_async(model_ids, options, inputs_per_model)?;
        self.wait(&job_ids)
    }

    /// `Wait`: blocks until every job in `job_ids` reaches a terminal
    /// status, then returns each job's output tensors in request order, or
    /// the first non-success status translated into an `EngineError`.
    pub fn wait(&self, job_ids: &[JobId]) -> EngineResult<Vec<Vec<Tensor>>> {
        let statuses = self.planner.wait_all(job_ids);

        let mut outputs = Vec::with_capacity(job_ids.len());
        for (&job_id, status) in job_ids.iter().zip(statuses) {
            let status = status.ok_or(EngineError::NoSuchJob(job_id))?;
            let entry = self
                .in_flight
                .lock()
                .expect("in-flight jobs mutex poisoned")
                .remove(&job_id)
                .ok_or(EngineError::NoSuchJob(job_id))?;

            if status != JobStatus::Success {
                return Err(status_to_error(job_id, status));
            }

            let job_outputs = match entry.output_handle {
                None => Vec::new(),
                Some(handle) => {
                    let registry = self.registry.read().expect("model registry lock poisoned");
                    registry
                        .get(&entry.model_id)
                        .and_then(|model| model.output_ring.get(handle))
                        .unwrap_or_default()
                }
            };
            outputs.push(job_outputs);
        }
        Ok(outputs)
    }

    pub fn set_on_end_request(&self, callback: EndRequestCallback) -> CallbackId {
        let callback_id = CallbackId::new(self.next_callback_id.fetch_add(1, Ordering::SeqCst));
        self.callbacks
            .write()
            .expect("callback registry lock poisoned")
            .insert(callback_id, callback);
        callback_id
    }

    pub fn unset_on_end_request(&self, callback_id: CallbackId) {
        self.callbacks.write().expect("callback registry lock poisoned").remove(&callback_id);
    }

    pub fn uptime_micros(&self) -> i64 {
        self.start.elapsed().as_micros() as i64
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.planner.shutdown();
    }
}

fn status_to_error(job_id: JobId, status: JobStatus) -> EngineError {
    match status {
        JobStatus::Success => unreachable!("status_to_error called on a successful job"),
        JobStatus::SloViolation => EngineError::SloViolation(job_id),
        JobStatus::InputCopyFailure => EngineError::InputCopyFailure(format!("job {job_id:?}")),
        JobStatus::OutputCopyFailure => EngineError::OutputCopyFailure(format!("job {job_id:?}")),
        JobStatus::InvokeFailure | JobStatus::EnqueueFailure | JobStatus::Queued | JobStatus::Running => {
            EngineError::Backend(format!("job {job_id:?} ended in status {status:?}"))
        }
    }
}

/// Builds a zero-filled probe tensor for `tensor_index`: the backend's own
/// shape when it can report one (`Model::tensor_shape`), else a one-element
/// fallback shape. Used both by `Engine::create_tensor` (a real client-
/// facing allocation) and by online profiling (a throwaway timing probe) --
/// `ModelSpec` itself carries no per-tensor shape or dtype, by design.
fn placeholder_tensor(model: &dyn backend::Model, spec: &common::ModelSpec, tensor_index: usize) -> EngineResult<Tensor> {
    if tensor_index >= spec.num_tensors {
        return Err(EngineError::Backend(format!("tensor index {tensor_index} out of range")));
    }
    let shape = model.tensor_shape(tensor_index).unwrap_or_else(|| vec![1]);
    let dtype = spec.tensor_types.iter().next().copied().unwrap_or(DataType::Float32);
    Tensor::zeroed(dtype, &shape).map_err(|err| EngineError::Backend(err.to_string()))
}

fn verify_tensor_indices_in_range(spec: &common::ModelSpec, subgraphs: &[common::SubgraphDef]) -> Result<(), String> {
    let mut touched: BTreeSet<usize> = BTreeSet::new();
    for def in subgraphs {
        touched.extend(spec.pure_input_tensors(&def.op_indices));
        touched.extend(spec.output_tensors_of(&def.op_indices));
    }
    match touched.iter().find(|&&index| index >= spec.num_tensors) {
        Some(&bad_index) => Err(format!("subgraph references out-of-range tensor index {bad_index}")),
        None => Ok(()),
    }
}
