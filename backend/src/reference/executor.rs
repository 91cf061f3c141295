use std::collections::{BTreeSet, HashMap};

use common::{DeviceFlag, SubgraphKey};
use tensor::{DataType, Tensor};
use tracing::trace;

use crate::error::{BackendError, BackendResult};
use crate::reference::model::{ReferenceModel, ReferenceOpKind, ReferenceOpSpec};
use crate::traits::{Model, ModelExecutor};

struct PreparedSubgraph {
    ops: Vec<ReferenceOpSpec>,
    input_tensors: Vec<usize>,
    output_tensors: Vec<usize>,
}

/// CPU interpreter for `ReferenceModel`. Holds one `PreparedSubgraph` per
/// `SubgraphKey` it has been asked to prepare; `execute_subgraph` replays
/// that subgraph's ops over a scratch tensor environment keyed by the
/// model's own tensor indices.
pub struct ReferenceExecutor {
    device: DeviceFlag,
    subgraphs: HashMap<SubgraphKey, PreparedSubgraph>,
}

impl ReferenceExecutor {
    pub fn new(device: DeviceFlag) -> ReferenceExecutor {
        ReferenceExecutor {
            device,
            subgraphs: HashMap::new(),
        }
    }

    fn apply_op(op: &ReferenceOpSpec, env: &HashMap<usize, Tensor>, op_index: usize) -> BackendResult<Tensor> {
        let operand = |slot: usize| -> BackendResult<&Tensor> {
            let tensor_index = *op.inputs.get(slot).ok_or(BackendError::ArityMismatch {
                op_index,
                expected: slot + 1,
                actual: op.inputs.len(),
            })?;
            env.get(&tensor_index)
                .ok_or(BackendError::UnknownTensor { op_index, tensor_index })
        };

        match op.kind {
            ReferenceOpKind::Relu => {
                let input = operand(0)?;
                let values: &[f32] = input.as_slice(DataType::Float32)?;
                let result: Vec<f32> = values.iter().map(|v| v.max(0.0)).collect();
                Ok(Tensor::from_contiguous(DataType::Float32, &result, &input.view().shape)?)
            }
            ReferenceOpKind::Add | ReferenceOpKind::Mul => {
                let lhs = operand(0)?;
                let rhs = operand(1)?;
                let lhs_values: &[f32] = lhs.as_slice(DataType::Float32)?;
                let rhs_values: &[f32] = rhs.as_slice(DataType::Float32)?;
                if lhs_values.len() != rhs_values.len() {
                    return Err(BackendError::ArityMismatch {
                        op_index,
                        expected: lhs_values.len(),
                        actual: rhs_values.len(),
                    });
                }
                let result: Vec<f32> = lhs_values
                    .iter()
                    .zip(rhs_values.iter())
                    .map(|(l, r)| if op.kind == ReferenceOpKind::Add { l + r } else { l * r })
                    .collect();
                Ok(Tensor::from_contiguous(DataType::Float32, &result, &lhs.view().shape)?)
            }
        }
    }
}

impl ModelExecutor for ReferenceExecutor {
    fn backend_type(&self) -> common::BackendType {
        common::BackendType::Reference
    }

    fn device_flag(&self) -> DeviceFlag {
        self.device
    }

    fn prepare_subgraph(
        &mut self,
        model: &dyn Model,
        key: SubgraphKey,
        op_indices: &BTreeSet<usize>,
    ) -> BackendResult<()> {
        let reference_model = model
            .as_any()
            .downcast_ref::<ReferenceModel>()
            .ok_or(BackendError::ModelTypeMismatch)?;
        let spec = reference_model.analyze();

        let ops = op_indices
            .iter()
            .map(|&index| reference_model.ops[index].clone())
            .collect();
        let input_tensors = spec.pure_input_tensors(op_indices).into_iter().collect();
        let output_tensors = spec.output_tensors_of(op_indices).into_iter().collect();

        trace!(?key, op_count = op_indices.len(), "prepared reference subgraph");
        self.subgraphs.insert(
            key,
            PreparedSubgraph {
                ops,
                input_tensors,
                output_tensors,
            },
        );
        Ok(())
    }

    fn is_subgraph_ready(&self, key: SubgraphKey) -> bool {
        self.subgraphs.contains_key(&key)
    }

    fn execute_subgraph(&mut self, key: SubgraphKey, inputs: &[Tensor]) -> BackendResult<Vec<Tensor>> {
        let subgraph = self
            .subgraphs
            .get(&key)
            .ok_or(BackendError::SubgraphNotPrepared(key))?;

        if inputs.len() != subgraph.input_tensors.len() {
            return Err(BackendError::ArityMismatch {
                op_index: usize::MAX,
                expected: subgraph.input_tensors.len(),
                actual: inputs.len(),
            });
        }

        let mut env: HashMap<usize, Tensor> = subgraph
            .input_tensors
            .iter()
            .copied()
            .zip(inputs.iter().cloned())
            .collect();

        for (op_index, op) in subgraph.ops.iter().enumerate() {
            let result = Self::apply_op(op, &env, op_index)?;
            for &output in &op.outputs {
                env.insert(output, result.clone());
            }
        }

        subgraph
            .output_tensors
            .iter()
            .map(|index| {
                env.get(index)
                    .cloned()
                    .ok_or(BackendError::UnknownTensor {
                        op_index: usize::MAX,
                        tensor_index: *index,
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ModelId, SubgraphKey, WorkerId};

    fn add_then_relu() -> ReferenceModel {
        ReferenceModel {
            tensor_shapes: vec![vec![2], vec![2], vec![2], vec![2]],
            input_tensors: vec![0, 1],
            output_tensors: vec![3],
            ops: vec![
                ReferenceOpSpec {
                    kind: ReferenceOpKind::Add,
                    inputs: vec![0, 1],
                    outputs: vec![2],
                },
                ReferenceOpSpec {
                    kind: ReferenceOpKind::Relu,
                    inputs: vec![2],
                    outputs: vec![3],
                },
            ],
        }
    }

    #[test]
    fn executes_prepared_subgraph_end_to_end() {
        let model = add_then_relu();
        let mut executor = ReferenceExecutor::new(DeviceFlag::Cpu);
        let key = SubgraphKey::whole_model(ModelId::new(0), WorkerId::new(0));
        let op_indices = BTreeSet::from([0, 1]);

        executor.prepare_subgraph(&model, key, &op_indices).unwrap();
        assert!(executor.is_subgraph_ready(key));

        let a = Tensor::from_contiguous(DataType::Float32, &[-1.0f32, 2.0], &[2]).unwrap();
        let b = Tensor::from_contiguous(DataType::Float32, &[1.0f32, 1.0], &[2]).unwrap();
        let outputs = executor.execute_subgraph(key, &[a, b]).unwrap();

        assert_eq!(outputs.len(), 1);
        let values: &[f32] = outputs[0].as_slice(DataType::Float32).unwrap();
        assert_eq!(values, &[0.0, 3.0]);
    }

    #[test]
    fn execute_without_prepare_fails() {
        let mut executor = ReferenceExecutor::new(DeviceFlag::Cpu);
        let key = SubgraphKey::whole_model(ModelId::new(0), WorkerId::new(0));
        let err = executor.execute_subgraph(key, &[]).unwrap_err();
        assert!(matches!(err, BackendError::SubgraphNotPrepared(_)));
    }
}
