use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use common::{BitMask, Job, ModelId, SubgraphKey, WorkerId, WorkerWaitingTime};
use scheduler::SchedulingContext;

use crate::model_registry::ModelRegistry;

/// `GetSubgraphWithShortestLatency`'s memoization entry: the chosen key, its
/// predicted finish time, and a snapshot of `worker_waiting` at the moment
/// it was computed. Reused verbatim when every worker's current waiting
/// time is no greater than what was recorded here -- nothing got busier
/// since, so the old answer is still the shortest one (spec section 4.6).
struct CacheEntry {
    key: SubgraphKey,
    end_time: i64,
    waiting_snapshot: WorkerWaitingTime,
}

fn snapshot_is_stale(current: &WorkerWaitingTime, snapshot: &WorkerWaitingTime) -> bool {
    current
        .iter()
        .all(|(worker_id, &waiting)| snapshot.get(worker_id).copied().unwrap_or(0) >= waiting)
}

/// The engine's implementation of `scheduler::SchedulingContext`, backed by
/// the model registry, the latency estimator, and the engine's fixed
/// `ModelId -> WorkerId` map. One instance is shared (via `Arc`) across
/// every installed scheduler policy and the planner's background thread.
pub struct EngineSchedulingContext {
    registry: Arc<RwLock<ModelRegistry>>,
    estimator: Arc<estimator::LatencyEstimator>,
    workers: Vec<WorkerId>,
    fixed_worker_map: Mutex<HashMap<ModelId, WorkerId>>,
    shortest_latency_cache: Mutex<HashMap<(ModelId, BitMask), CacheEntry>>,
    start: Instant,
}

impl EngineSchedulingContext {
    pub fn new(
        registry: Arc<RwLock<ModelRegistry>>,
        estimator: Arc<estimator::LatencyEstimator>,
        workers: Vec<WorkerId>,
    ) -> EngineSchedulingContext {
        EngineSchedulingContext {
            registry,
            estimator,
            workers,
            fixed_worker_map: Mutex::new(HashMap::new()),
            shortest_latency_cache: Mutex::new(HashMap::new()),
            start: Instant::now(),
        }
    }

    /// Pins `model_id` to `worker_id` for `FixedWorker`/`FixedWorkerGlobalQueue`;
    /// called once at the end of a successful `register_model`.
    pub fn set_fixed_worker(&self, model_id: ModelId, worker_id: WorkerId) {
        self.fixed_worker_map
            .lock()
            .expect("fixed worker map mutex poisoned")
            .insert(model_id, worker_id);
    }

    pub fn clear_model(&self, model_id: ModelId) {
        self.fixed_worker_map.lock().expect("fixed worker map mutex poisoned").remove(&model_id);
        self.shortest_latency_cache
            .lock()
            .expect("shortest latency cache mutex poisoned")
            .retain(|(cached_model, _), _| *cached_model != model_id);
    }

    fn expected_latency_of(&self, model_path: &str, key: SubgraphKey) -> i64 {
        self.estimator.get_expected(model_path, key).unwrap_or(0)
    }
}

impl SchedulingContext for EngineSchedulingContext {
    fn all_workers(&self) -> Vec<WorkerId> {
        self.workers.clone()
    }

    fn fixed_worker_for(&self, model_id: ModelId) -> Option<WorkerId> {
        self.fixed_worker_map.lock().expect("fixed worker map mutex poisoned").get(&model_id).copied()
    }

    fn subgraph_for_worker(&self, job: &Job, worker_id: WorkerId) -> Option<SubgraphKey> {
        let registry = self.registry.read().expect("model registry lock poisoned");
        let model = registry.get(&job.model_id)?;
        let def = model.next_def_on(worker_id, job.resolved_unit_subgraphs)?;
        Some(SubgraphKey::new(job.model_id, worker_id, def.as_bitmask()))
    }

    fn shortest_latency_subgraph(&self, job: &Job, worker_waiting: &WorkerWaitingTime) -> Option<(SubgraphKey, i64)> {
        let cache_key = (job.model_id, job.resolved_unit_subgraphs);
        if let Some(entry) = self.shortest_latency_cache.lock().expect("shortest latency cache mutex poisoned").get(&cache_key) {
            if snapshot_is_stale(worker_waiting, &entry.waiting_snapshot) {
                return Some((entry.key, entry.end_time));
            }
        }

        let registry = self.registry.read().expect("model registry lock poisoned");
        let model = registry.get(&job.model_id)?;

        let mut best: Option<(SubgraphKey, i64)> = None;
        for &worker_id in &self.workers {
            let Some(def) = model.next_def_on(worker_id, job.resolved_unit_subgraphs) else {
                continue;
            };
            let key = SubgraphKey::new(job.model_id, worker_id, def.as_bitmask());
            let queued = worker_waiting.get(&worker_id).copied().unwrap_or(0);
            let end_time = queued + self.expected_latency_of(&model.model_path, key);
            if best.map(|(_, best_end)| end_time < best_end).unwrap_or(true) {
                best = Some((key, end_time));
            }
        }

        if let Some((key, end_time)) = best {
            self.shortest_latency_cache.lock().expect("shortest latency cache mutex poisoned").insert(
                cache_key,
                CacheEntry { key, end_time, waiting_snapshot: worker_waiting.clone() },
            );
        }
        best
    }

    fn expected_latency(&self, key: SubgraphKey) -> i64 {
        let registry = self.registry.read().expect("model registry lock poisoned");
        registry
            .get(&key.model_id)
            .map(|model| self.expected_latency_of(&model.model_path, key))
            .unwrap_or(0)
    }

    fn is_final_step(&self, model_id: ModelId, resolved_after: BitMask) -> bool {
        self.registry
            .read()
            .expect("model registry lock poisoned")
            .get(&model_id)
            .map(|model| model.is_final_step(resolved_after))
            .unwrap_or(true)
    }

    fn now_micros(&self) -> i64 {
        self.start.elapsed().as_micros() as i64
    }
}
