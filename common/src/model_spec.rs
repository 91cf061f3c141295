use std::collections::{BTreeSet, HashMap, HashSet};

use crate::{BitMask, DeviceFlag, WorkerId};

/// Static description of a registered model, derived once during
/// `Engine::register_model` and otherwise immutable. `unit_subgraphs` and
/// `unit_subgraph_dependencies` start empty and are filled in by
/// `ModelAnalyzer::create_subgraphs` -- they are the one part of `ModelSpec`
/// assigned after construction, per spec section 3.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub num_ops: usize,
    pub num_tensors: usize,
    pub tensor_types: HashSet<crate::DataType>,
    pub input_tensors: Vec<usize>,
    pub output_tensors: Vec<usize>,
    pub op_input_tensors: Vec<BTreeSet<usize>>,
    pub op_output_tensors: Vec<BTreeSet<usize>>,
    pub unsupported_ops: HashMap<DeviceFlag, HashSet<usize>>,
    pub unavailable_devices: HashSet<DeviceFlag>,
    pub unit_subgraphs: Vec<BTreeSet<usize>>,
    pub unit_subgraph_dependencies: Vec<BitMask>,
    /// Bitmask of workers each unit subgraph is eligible to run on, parallel
    /// to `unit_subgraphs`. Filled in alongside it by the analyzer.
    pub unit_subgraph_support: Vec<BitMask>,
}

impl ModelSpec {
    pub fn new(
        num_tensors: usize,
        tensor_types: HashSet<crate::DataType>,
        input_tensors: Vec<usize>,
        output_tensors: Vec<usize>,
        op_input_tensors: Vec<BTreeSet<usize>>,
        op_output_tensors: Vec<BTreeSet<usize>>,
        unsupported_ops: HashMap<DeviceFlag, HashSet<usize>>,
        unavailable_devices: HashSet<DeviceFlag>,
    ) -> ModelSpec {
        let num_ops = op_input_tensors.len();
        ModelSpec {
            num_ops,
            num_tensors,
            tensor_types,
            input_tensors,
            output_tensors,
            op_input_tensors,
            op_output_tensors,
            unsupported_ops,
            unavailable_devices,
            unit_subgraphs: Vec::new(),
            unit_subgraph_dependencies: Vec::new(),
            unit_subgraph_support: Vec::new(),
        }
    }

    pub fn is_op_supported(&self, op_index: usize, device: DeviceFlag) -> bool {
        if self.unavailable_devices.contains(&device) {
            return false;
        }
        !self
            .unsupported_ops
            .get(&device)
            .map(|ops| ops.contains(&op_index))
            .unwrap_or(false)
    }

    /// Tensors consumed by `op_indices` but not produced by any op inside
    /// that same set -- the subgraph's externally-supplied inputs.
    pub fn pure_input_tensors(&self, op_indices: &BTreeSet<usize>) -> BTreeSet<usize> {
        let produced: BTreeSet<usize> = op_indices
            .iter()
            .flat_map(|&op| self.op_output_tensors[op].iter().copied())
            .collect();
        op_indices
            .iter()
            .flat_map(|&op| self.op_input_tensors[op].iter().copied())
            .filter(|tensor| !produced.contains(tensor))
            .collect()
    }

    /// Tensors produced by `op_indices` that are either a model output or
    /// consumed by an op outside the set -- the subgraph's externally
    /// visible outputs.
    pub fn output_tensors_of(&self, op_indices: &BTreeSet<usize>) -> BTreeSet<usize> {
        let produced: BTreeSet<usize> = op_indices
            .iter()
            .flat_map(|&op| self.op_output_tensors[op].iter().copied())
            .collect();

        let consumed_outside: BTreeSet<usize> = (0..self.num_ops)
            .filter(|op| !op_indices.contains(op))
            .flat_map(|op| self.op_input_tensors[op].iter().copied())
            .collect();

        produced
            .into_iter()
            .filter(|tensor| {
                self.output_tensors.contains(tensor) || consumed_outside.contains(tensor)
            })
            .collect()
    }
}

/// One executable fragment produced by the analyzer: a worker plus the ops
/// (and the unit-subgraph indices those ops came from) it is responsible
/// for. `unit_subgraph_indices` must be contiguous under the unit
/// subgraphs' topological order -- checked by the analyzer, not enforced by
/// the type.
#[derive(Debug, Clone)]
pub struct SubgraphDef {
    pub worker_id: WorkerId,
    pub op_indices: BTreeSet<usize>,
    pub unit_subgraph_indices: BTreeSet<usize>,
}

impl SubgraphDef {
    pub fn new(worker_id: WorkerId, op_indices: BTreeSet<usize>, unit_subgraph_indices: BTreeSet<usize>) -> Self {
        SubgraphDef {
            worker_id,
            op_indices,
            unit_subgraph_indices,
        }
    }

    /// True when `unit_subgraph_indices`, sorted, forms one contiguous run
    /// (`max - min + 1 == size`) -- the invariant spec section 8 tests.
    pub fn has_contiguous_unit_indices(&self) -> bool {
        match (self.unit_subgraph_indices.iter().min(), self.unit_subgraph_indices.iter().max()) {
            (Some(&min), Some(&max)) => max - min + 1 == self.unit_subgraph_indices.len(),
            _ => true,
        }
    }

    pub fn as_bitmask(&self) -> BitMask {
        BitMask::from_indices(self.unit_subgraph_indices.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataType;

    fn spec_with_chain() -> ModelSpec {
        // op0: in {0} -> out {1}; op1: in {1} -> out {2}
        ModelSpec::new(
            3,
            HashSet::from([DataType::Float32]),
            vec![0],
            vec![2],
            vec![BTreeSet::from([0]), BTreeSet::from([1])],
            vec![BTreeSet::from([1]), BTreeSet::from([2])],
            HashMap::new(),
            HashSet::new(),
        )
    }

    #[test]
    fn pure_input_tensors_excludes_internally_produced() {
        let spec = spec_with_chain();
        let both_ops = BTreeSet::from([0, 1]);
        assert_eq!(spec.pure_input_tensors(&both_ops), BTreeSet::from([0]));
    }

    #[test]
    fn output_tensors_of_includes_model_output_and_externally_consumed() {
        let spec = spec_with_chain();
        let op0_only = BTreeSet::from([0]);
        // tensor 1 is consumed by op1 (outside the set) so it's an output of {op0}
        assert_eq!(spec.output_tensors_of(&op0_only), BTreeSet::from([1]));

        let op1_only = BTreeSet::from([1]);
        // tensor 2 is a model output
        assert_eq!(spec.output_tensors_of(&op1_only), BTreeSet::from([2]));
    }

    #[test]
    fn contiguous_unit_indices_detects_gaps() {
        let contiguous = SubgraphDef::new(WorkerId::new(0), BTreeSet::new(), BTreeSet::from([1, 2, 3]));
        assert!(contiguous.has_contiguous_unit_indices());

        let gapped = SubgraphDef::new(WorkerId::new(0), BTreeSet::new(), BTreeSet::from([1, 3]));
        assert!(!gapped.has_contiguous_unit_indices());
    }
}
