use std::collections::BTreeSet;

use common::{DeviceFlag, EngineError, EngineResult, ModelSpec, SubgraphConfig, SubgraphDef, SubgraphPreparationType, WorkerId};

use crate::analyzer::WorkerDescriptor;

pub fn build(
    model_spec: &ModelSpec,
    workers: &[WorkerDescriptor],
    config: &SubgraphConfig,
) -> EngineResult<Vec<SubgraphDef>> {
    match config.subgraph_preparation_type {
        SubgraphPreparationType::NoFallback => no_fallback(model_spec, workers),
        SubgraphPreparationType::Unit => unit(model_spec, workers),
        SubgraphPreparationType::MergedUnit => merged_unit(model_spec, workers),
        SubgraphPreparationType::FallbackPerWorker => fallback_per_worker(model_spec, workers),
    }
}

fn all_ops(model_spec: &ModelSpec) -> BTreeSet<usize> {
    (0..model_spec.num_ops).collect()
}

fn all_units(model_spec: &ModelSpec) -> BTreeSet<usize> {
    (0..model_spec.unit_subgraphs.len()).collect()
}

fn no_fallback(model_spec: &ModelSpec, workers: &[WorkerDescriptor]) -> EngineResult<Vec<SubgraphDef>> {
    let ops = all_ops(model_spec);
    let units = all_units(model_spec);

    let defs: Vec<SubgraphDef> = workers
        .iter()
        .filter(|w| (0..model_spec.num_ops).all(|op| model_spec.is_op_supported(op, w.device_flag)))
        .map(|w| SubgraphDef::new(w.worker_id, ops.clone(), units.clone()))
        .collect();

    if defs.is_empty() {
        return Err(EngineError::Configuration(
            "no_fallback preparation found no worker able to run every op".into(),
        ));
    }
    Ok(defs)
}

fn unit(model_spec: &ModelSpec, workers: &[WorkerDescriptor]) -> EngineResult<Vec<SubgraphDef>> {
    let mut defs = Vec::new();
    for (unit_index, ops) in model_spec.unit_subgraphs.iter().enumerate() {
        let support = model_spec.unit_subgraph_support[unit_index];
        for worker in workers {
            if support.contains(worker.worker_id.get()) {
                defs.push(SubgraphDef::new(worker.worker_id, ops.clone(), BTreeSet::from([unit_index])));
            }
        }
    }
    if defs.is_empty() {
        return Err(EngineError::Configuration("unit preparation produced no valid subgraphs".into()));
    }
    Ok(defs)
}

/// Starts from the unit defs and repeatedly *adds* a merged def for every
/// adjacent same-worker pair whose outputs cover the next def's pure
/// inputs, same as the original's `MergeUnitSubgraphs`
/// (`result_subgraphs_ = unit_subgraphs_`, then only ever `push_back`s new
/// combinations). Unit defs and every intermediate-size merge all survive
/// in the returned set; only the final maximal merge is new on top of them.
fn merged_unit(model_spec: &ModelSpec, workers: &[WorkerDescriptor]) -> EngineResult<Vec<SubgraphDef>> {
    let mut defs = unit(model_spec, workers)?;

    loop {
        let mut to_add = None;
        'search: for i in 0..defs.len() {
            for j in 0..defs.len() {
                if i == j || defs[i].worker_id != defs[j].worker_id {
                    continue;
                }
                if !is_immediately_before(&defs[i], &defs[j]) {
                    continue;
                }
                let covers = model_spec
                    .output_tensors_of(&defs[i].op_indices)
                    .is_superset(&model_spec.pure_input_tensors(&defs[j].op_indices));
                if !covers {
                    continue;
                }
                let combined = SubgraphDef::new(
                    defs[i].worker_id,
                    defs[i].op_indices.union(&defs[j].op_indices).copied().collect(),
                    defs[i].unit_subgraph_indices.union(&defs[j].unit_subgraph_indices).copied().collect(),
                );
                let already_created = defs
                    .iter()
                    .any(|d| d.worker_id == combined.worker_id && d.op_indices == combined.op_indices);
                if already_created {
                    continue;
                }
                to_add = Some(combined);
                break 'search;
            }
        }

        match to_add {
            None => break,
            Some(combined) => defs.push(combined),
        }
    }

    Ok(defs)
}

fn is_immediately_before(left: &SubgraphDef, right: &SubgraphDef) -> bool {
    match (left.unit_subgraph_indices.iter().max(), right.unit_subgraph_indices.iter().min()) {
        (Some(&l_max), Some(&r_min)) => l_max + 1 == r_min,
        _ => false,
    }
}

fn fallback_per_worker(model_spec: &ModelSpec, workers: &[WorkerDescriptor]) -> EngineResult<Vec<SubgraphDef>> {
    let cpu_worker = workers
        .iter()
        .find(|w| w.device_flag == DeviceFlag::Cpu)
        .ok_or(EngineError::Configuration(
            "fallback_per_worker preparation requires at least one cpu worker".into(),
        ))?;

    let mut defs = Vec::new();
    for worker in workers {
        defs.extend(alternating_runs_for_worker(model_spec, worker.worker_id, cpu_worker.worker_id));
    }
    if defs.is_empty() {
        return Err(EngineError::Configuration("fallback_per_worker preparation produced no subgraphs".into()));
    }
    Ok(defs)
}

fn alternating_runs_for_worker(model_spec: &ModelSpec, worker_id: WorkerId, cpu_worker_id: WorkerId) -> Vec<SubgraphDef> {
    let mut runs = Vec::new();
    let mut current_native = None;
    let mut current_units: BTreeSet<usize> = BTreeSet::new();
    let mut current_ops: BTreeSet<usize> = BTreeSet::new();

    let flush = |native: Option<bool>, units: &mut BTreeSet<usize>, ops: &mut BTreeSet<usize>, runs: &mut Vec<SubgraphDef>| {
        if let Some(native) = native {
            if !units.is_empty() {
                let target = if native { worker_id } else { cpu_worker_id };
                runs.push(SubgraphDef::new(target, std::mem::take(ops), std::mem::take(units)));
            }
        }
    };

    for (unit_index, ops) in model_spec.unit_subgraphs.iter().enumerate() {
        let native = model_spec.unit_subgraph_support[unit_index].contains(worker_id.get());
        if current_native != Some(native) {
            flush(current_native, &mut current_units, &mut current_ops, &mut runs);
            current_native = Some(native);
        }
        current_units.insert(unit_index);
        current_ops.extend(ops.iter().copied());
    }
    flush(current_native, &mut current_units, &mut current_ops, &mut runs);

    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{BitMask, DataType, ModelSpec as MS};
    use std::collections::{HashMap, HashSet};

    fn spec_two_units(support: Vec<BitMask>) -> MS {
        let mut spec = MS::new(
            3,
            HashSet::from([DataType::Float32]),
            vec![0],
            vec![2],
            vec![BTreeSet::from([0]), BTreeSet::from([1])],
            vec![BTreeSet::from([1]), BTreeSet::from([2])],
            HashMap::new(),
            HashSet::new(),
        );
        spec.unit_subgraphs = vec![BTreeSet::from([0]), BTreeSet::from([1])];
        spec.unit_subgraph_support = support;
        spec
    }

    #[test]
    fn unit_mode_emits_one_def_per_unit_worker_pair() {
        let workers = vec![
            WorkerDescriptor { worker_id: WorkerId::new(0), device_flag: DeviceFlag::Cpu },
        ];
        let spec = spec_two_units(vec![BitMask::from_indices([0]), BitMask::from_indices([0])]);
        let defs = unit(&spec, &workers).unwrap();
        assert_eq!(defs.len(), 2);
    }

    #[test]
    fn merged_unit_combines_adjacent_same_worker_units() {
        let workers = vec![
            WorkerDescriptor { worker_id: WorkerId::new(0), device_flag: DeviceFlag::Cpu },
        ];
        let spec = spec_two_units(vec![BitMask::from_indices([0]), BitMask::from_indices([0])]);
        let defs = merged_unit(&spec, &workers).unwrap();
        // Both unit defs survive alongside the new merged def: {0}, {1}, {0,1}.
        assert_eq!(defs.len(), 3);
        assert!(defs.iter().any(|d| d.op_indices == BTreeSet::from([0])));
        assert!(defs.iter().any(|d| d.op_indices == BTreeSet::from([1])));
        assert!(defs.iter().any(|d| d.op_indices == BTreeSet::from([0, 1])));
    }

    #[test]
    fn no_fallback_requires_a_worker_supporting_every_op() {
        let workers = vec![
            WorkerDescriptor { worker_id: WorkerId::new(0), device_flag: DeviceFlag::Gpu },
        ];
        let mut unsupported = HashMap::new();
        unsupported.insert(DeviceFlag::Gpu, HashSet::from([1usize]));
        let spec = MS::new(
            3,
            HashSet::from([DataType::Float32]),
            vec![0],
            vec![2],
            vec![BTreeSet::from([0]), BTreeSet::from([1])],
            vec![BTreeSet::from([1]), BTreeSet::from([2])],
            unsupported,
            HashSet::new(),
        );
        assert!(no_fallback(&spec, &workers).is_err());
    }
}
