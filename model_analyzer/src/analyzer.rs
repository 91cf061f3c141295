use std::collections::{BTreeSet, HashMap};

use common::{BitMask, DeviceFlag, EngineError, EngineResult, ModelSpec, SubgraphDef, SubgraphConfig, WorkerId};
use tracing::debug;

use crate::preparation;

/// The bit of worker information the analyzer needs: which device a worker
/// sits behind, indexed by the worker's position so its bit in a `BitMask`
/// lines up with `WorkerId::get()`.
#[derive(Debug, Clone, Copy)]
pub struct WorkerDescriptor {
    pub worker_id: WorkerId,
    pub device_flag: DeviceFlag,
}

pub struct ModelAnalyzer<'a> {
    workers: &'a [WorkerDescriptor],
    config: &'a SubgraphConfig,
}

impl<'a> ModelAnalyzer<'a> {
    pub fn new(workers: &'a [WorkerDescriptor], config: &'a SubgraphConfig) -> ModelAnalyzer<'a> {
        ModelAnalyzer { workers, config }
    }

    /// Partitions `model_spec` into unit subgraphs, then expands those into
    /// `SubgraphDef`s under `self.config.subgraph_preparation_type`. Returns
    /// `model_spec` with `unit_subgraphs`/`unit_subgraph_support`/
    /// `unit_subgraph_dependencies` filled in, alongside the subgraph defs.
    pub fn create_subgraphs(&self, mut model_spec: ModelSpec) -> EngineResult<(ModelSpec, Vec<SubgraphDef>)> {
        if self.workers.is_empty() {
            return Err(EngineError::Configuration("no workers available to the analyzer".into()));
        }

        self.derive_unit_subgraphs(&mut model_spec)?;
        self.derive_dependencies(&mut model_spec);
        self.verify_invariants(&model_spec)?;

        let subgraphs = preparation::build(&model_spec, self.workers, self.config)?;
        Ok((model_spec, subgraphs))
    }

    fn cpu_bitmask(&self) -> BitMask {
        BitMask::from_indices(
            self.workers
                .iter()
                .filter(|w| w.device_flag == DeviceFlag::Cpu)
                .map(|w| w.worker_id.get()),
        )
    }

    fn raw_support_bitmask(&self, model_spec: &ModelSpec, op_index: usize) -> BitMask {
        BitMask::from_indices(
            self.workers
                .iter()
                .filter(|w| model_spec.is_op_supported(op_index, w.device_flag))
                .map(|w| w.worker_id.get()),
        )
    }

    /// One pass's effective bitmask per ready op: the raw per-device support
    /// bitmask, except a non-CPU-only group smaller than
    /// `minimum_subgraph_size` falls back to the CPU bitmask entirely.
    fn effective_bitmasks(&self, model_spec: &ModelSpec, ready_ops: &[usize]) -> HashMap<usize, BitMask> {
        let cpu_mask = self.cpu_bitmask();
        let mut groups: HashMap<BitMask, Vec<usize>> = HashMap::new();
        for &op in ready_ops {
            groups.entry(self.raw_support_bitmask(model_spec, op)).or_default().push(op);
        }

        let mut effective = HashMap::new();
        for (raw_mask, ops) in &groups {
            let is_cpu_reachable = raw_mask.intersection(cpu_mask) == cpu_mask && !cpu_mask.is_empty();
            let too_small = ops.len() < self.config.minimum_subgraph_size;
            let falls_back = !is_cpu_reachable && too_small;
            let assigned = if falls_back { cpu_mask } else { *raw_mask };
            for &op in ops {
                effective.insert(op, assigned);
            }
        }
        effective
    }

    fn derive_unit_subgraphs(&self, model_spec: &mut ModelSpec) -> EngineResult<()> {
        let mut resolved: BTreeSet<usize> = model_spec.input_tensors.iter().copied().collect();
        let mut remaining: BTreeSet<usize> = (0..model_spec.num_ops).collect();

        while !remaining.is_empty() {
            let ready_ops: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&op| model_spec.op_input_tensors[op].is_subset(&resolved))
                .collect();

            if ready_ops.is_empty() {
                return Err(EngineError::Configuration(
                    "model graph has unresolved tensor dependencies (cycle or missing producer)".into(),
                ));
            }

            let effective = self.effective_bitmasks(model_spec, &ready_ops);
            let first_op = *ready_ops.iter().min().expect("ready_ops is non-empty");
            let target_mask = effective[&first_op];

            if target_mask.is_empty() {
                return Err(EngineError::Configuration(format!(
                    "no worker can run op {first_op}"
                )));
            }

            let collected: BTreeSet<usize> = ready_ops
                .iter()
                .copied()
                .filter(|op| effective[op] == target_mask)
                .collect();

            for &op in &collected {
                resolved.extend(model_spec.op_output_tensors[op].iter().copied());
                remaining.remove(&op);
            }

            debug!(unit_index = model_spec.unit_subgraphs.len(), ops = collected.len(), "collected unit subgraph");
            model_spec.unit_subgraphs.push(collected);
            model_spec.unit_subgraph_support.push(target_mask);
        }

        Ok(())
    }

    fn derive_dependencies(&self, model_spec: &mut ModelSpec) {
        let mut producer_of: HashMap<usize, usize> = HashMap::new();
        for (unit_index, ops) in model_spec.unit_subgraphs.iter().enumerate() {
            for &op in ops {
                for &tensor in &model_spec.op_output_tensors[op] {
                    producer_of.insert(tensor, unit_index);
                }
            }
        }

        let mut dependencies = Vec::with_capacity(model_spec.unit_subgraphs.len());
        for ops in &model_spec.unit_subgraphs {
            let mut mask = BitMask::empty();
            for &op in ops {
                for &tensor in &model_spec.op_input_tensors[op] {
                    if let Some(&producer_unit) = producer_of.get(&tensor) {
                        mask.set(producer_unit);
                    }
                }
            }
            dependencies.push(mask);
        }
        model_spec.unit_subgraph_dependencies = dependencies;
    }

    fn verify_invariants(&self, model_spec: &ModelSpec) -> EngineResult<()> {
        let mut seen = BTreeSet::new();
        for ops in &model_spec.unit_subgraphs {
            if !seen.is_disjoint(ops) {
                return Err(EngineError::Configuration("unit subgraphs share an op".into()));
            }
            seen.extend(ops.iter().copied());
        }
        if seen.len() != model_spec.num_ops {
            return Err(EngineError::Configuration(
                "not every op was assigned to a unit subgraph".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{DataType, SubgraphPreparationType};
    use std::collections::{HashMap as StdHashMap, HashSet};

    fn two_device_workers() -> Vec<WorkerDescriptor> {
        vec![
            WorkerDescriptor { worker_id: WorkerId::new(0), device_flag: DeviceFlag::Cpu },
            WorkerDescriptor { worker_id: WorkerId::new(1), device_flag: DeviceFlag::Gpu },
        ]
    }

    fn chain_spec() -> ModelSpec {
        // op0 (gpu-only) -> tensor1 -> op1 (cpu+gpu) -> tensor2
        let mut unsupported = StdHashMap::new();
        unsupported.insert(DeviceFlag::Cpu, HashSet::from([0usize]));
        ModelSpec::new(
            3,
            HashSet::from([DataType::Float32]),
            vec![0],
            vec![2],
            vec![BTreeSet::from([0]), BTreeSet::from([1])],
            vec![BTreeSet::from([1]), BTreeSet::from([2])],
            unsupported,
            HashSet::new(),
        )
    }

    #[test]
    fn splits_into_two_unit_subgraphs_on_device_boundary() {
        let workers = two_device_workers();
        let config = SubgraphConfig {
            minimum_subgraph_size: 1,
            subgraph_preparation_type: SubgraphPreparationType::Unit,
        };
        let analyzer = ModelAnalyzer::new(&workers, &config);
        let (spec, _) = analyzer.create_subgraphs(chain_spec()).unwrap();

        assert_eq!(spec.unit_subgraphs.len(), 2);
        assert_eq!(spec.unit_subgraphs[0], BTreeSet::from([0]));
        assert!(!spec.unit_subgraph_support[0].contains(0));
        assert!(spec.unit_subgraph_support[0].contains(1));
    }

    #[test]
    fn small_gpu_only_group_falls_back_to_cpu() {
        let workers = two_device_workers();
        let config = SubgraphConfig {
            minimum_subgraph_size: 5,
            subgraph_preparation_type: SubgraphPreparationType::Unit,
        };
        let analyzer = ModelAnalyzer::new(&workers, &config);
        let (spec, _) = analyzer.create_subgraphs(chain_spec()).unwrap();

        // op0 would be gpu-only but the group (size 1) is below the
        // threshold, so it falls back to the cpu bitmask.
        assert!(spec.unit_subgraph_support[0].contains(0));
    }

    #[test]
    fn empty_worker_set_is_a_configuration_error() {
        let config = SubgraphConfig {
            minimum_subgraph_size: 1,
            subgraph_preparation_type: SubgraphPreparationType::Unit,
        };
        let analyzer = ModelAnalyzer::new(&[], &config);
        assert!(analyzer.create_subgraphs(chain_spec()).is_err());
    }
}
