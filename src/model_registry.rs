use std::collections::HashMap;

use backend::Model;
use common::{BitMask, ModelId, ModelSpec, SubgraphDef, WorkerId};

/// Everything the engine keeps for one registered model: the parsed `Model`
/// (kept alive so a same-backend `ModelExecutor` can recover backend-
/// specific fields later), the derived `ModelSpec`, the `SubgraphDef`s the
/// analyzer produced, and the input/output ring buffers sized to the
/// CPU full-model tensor views (spec section 4.6 step 5).
pub struct RegisteredModel {
    pub model_path: String,
    pub model: Box<dyn Model>,
    pub spec: ModelSpec,
    pub subgraphs: Vec<SubgraphDef>,
    pub input_ring: crate::TensorRingBuffer,
    pub output_ring: crate::TensorRingBuffer,
}

impl RegisteredModel {
    /// The `SubgraphDef`s prepared on `worker_id`, in no particular order.
    pub fn defs_on(&self, worker_id: WorkerId) -> impl Iterator<Item = &SubgraphDef> {
        self.subgraphs.iter().filter(move |def| def.worker_id == worker_id)
    }

    /// The def on `worker_id` that both (a) doesn't overlap `resolved` and
    /// (b) has every unit subgraph it depends on already in `resolved`,
    /// preferring the one covering the most unit subgraphs -- "the largest
    /// SubgraphKey registered for model_id on worker_id honoring whatever
    /// unit subgraphs job has already resolved" (spec section 4.6).
    pub fn next_def_on(&self, worker_id: WorkerId, resolved: BitMask) -> Option<&SubgraphDef> {
        self.defs_on(worker_id)
            .filter(|def| {
                let covered = def.as_bitmask();
                if !covered.intersection(resolved).is_empty() {
                    return false;
                }
                def.unit_subgraph_indices
                    .iter()
                    .all(|&unit| self.spec.unit_subgraph_dependencies[unit].is_subset_of(resolved.union(covered)))
            })
            .max_by_key(|def| def.as_bitmask().count_ones())
    }

    pub fn is_final_step(&self, resolved_after: BitMask) -> bool {
        (0..self.spec.unit_subgraphs.len()).all(|unit| resolved_after.contains(unit))
    }
}

/// `ModelId -> RegisteredModel`, the engine's single source of truth once
/// `register_model` succeeds.
pub type ModelRegistry = HashMap<ModelId, RegisteredModel>;
