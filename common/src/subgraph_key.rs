use crate::{BitMask, ModelId, WorkerId};

/// Identity of an executable fragment: a model, the worker it runs on, and
/// the set of unit subgraphs it covers. An empty `unit_indices` denotes the
/// full model on that worker.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubgraphKey {
    pub model_id: ModelId,
    pub worker_id: WorkerId,
    pub unit_indices: BitMask,
}

impl SubgraphKey {
    pub const fn new(model_id: ModelId, worker_id: WorkerId, unit_indices: BitMask) -> Self {
        SubgraphKey {
            model_id,
            worker_id,
            unit_indices,
        }
    }

    /// A key naming the full model (no unit-subgraph restriction) on `worker_id`.
    pub const fn whole_model(model_id: ModelId, worker_id: WorkerId) -> Self {
        SubgraphKey::new(model_id, worker_id, BitMask::empty())
    }

    pub fn is_whole_model(self) -> bool {
        self.unit_indices.is_empty()
    }

    /// Matches the original's `SubgraphKey::IsValid()`: the default,
    /// never-assigned key is not a valid scheduling target.
    pub fn is_valid(self) -> bool {
        self != SubgraphKey::default()
    }
}

impl Default for SubgraphKey {
    fn default() -> Self {
        SubgraphKey {
            model_id: ModelId::new(u32::MAX),
            worker_id: WorkerId::new(usize::MAX),
            unit_indices: BitMask::empty(),
        }
    }
}

impl std::fmt::Debug for SubgraphKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SubgraphKey(model={:?}, worker={:?}, units={:?})",
            self.model_id, self.worker_id, self.unit_indices
        )
    }
}
