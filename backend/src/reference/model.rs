use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::path::Path;

use common::{BackendType, DataType, ModelSpec};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, BackendResult};
use crate::traits::Model;

/// The elementwise ops the reference interpreter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceOpKind {
    Add,
    Mul,
    Relu,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceOpSpec {
    pub kind: ReferenceOpKind,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
}

/// On-disk / in-memory description of a reference model: a flat op list in
/// topological order plus the shape of every tensor it touches. Serialized
/// as JSON and, when loaded from a path, read through a memory map rather
/// than a buffered read -- the model file format this workspace owns end to
/// end, in place of the flatbuffer/protobuf format a real backend would use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceModel {
    pub tensor_shapes: Vec<Vec<usize>>,
    pub input_tensors: Vec<usize>,
    pub output_tensors: Vec<usize>,
    pub ops: Vec<ReferenceOpSpec>,
}

impl ReferenceModel {
    pub fn from_json(json: &str) -> BackendResult<ReferenceModel> {
        serde_json::from_str(json).map_err(|err| BackendError::ModelLoad {
            path: Path::new("<in-memory>").to_path_buf(),
            reason: err.to_string(),
        })
    }

    pub fn from_path(path: &Path) -> BackendResult<ReferenceModel> {
        let file = File::open(path).map_err(|err| BackendError::ModelLoad {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        // SAFETY: the mapped file is only read, never written through this
        // mapping, for the lifetime of this call.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|err| BackendError::ModelLoad {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        serde_json::from_slice(&mmap[..]).map_err(|err| BackendError::ModelLoad {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }

    pub fn num_tensors(&self) -> usize {
        self.tensor_shapes.len()
    }
}

impl Model for ReferenceModel {
    fn backend_type(&self) -> BackendType {
        BackendType::Reference
    }

    fn analyze(&self) -> ModelSpec {
        let op_input_tensors: Vec<BTreeSet<usize>> = self
            .ops
            .iter()
            .map(|op| op.inputs.iter().copied().collect())
            .collect();
        let op_output_tensors: Vec<BTreeSet<usize>> = self
            .ops
            .iter()
            .map(|op| op.outputs.iter().copied().collect())
            .collect();

        ModelSpec::new(
            self.num_tensors(),
            HashSet::from([DataType::Float32]),
            self.input_tensors.clone(),
            self.output_tensors.clone(),
            op_input_tensors,
            op_output_tensors,
            HashMap::new(),
            HashSet::new(),
        )
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn tensor_shape(&self, tensor_index: usize) -> Option<Vec<usize>> {
        self.tensor_shapes.get(tensor_index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_op_chain() -> ReferenceModel {
        ReferenceModel {
            tensor_shapes: vec![vec![4], vec![4], vec![4]],
            input_tensors: vec![0],
            output_tensors: vec![2],
            ops: vec![
                ReferenceOpSpec {
                    kind: ReferenceOpKind::Relu,
                    inputs: vec![0],
                    outputs: vec![1],
                },
                ReferenceOpSpec {
                    kind: ReferenceOpKind::Relu,
                    inputs: vec![1],
                    outputs: vec![2],
                },
            ],
        }
    }

    #[test]
    fn analyze_derives_op_tensor_sets_from_op_list() {
        let model = two_op_chain();
        let spec = model.analyze();
        assert_eq!(spec.num_ops, 2);
        assert_eq!(spec.num_tensors, 3);
        assert_eq!(spec.op_input_tensors[1], BTreeSet::from([1]));
    }

    #[test]
    fn round_trips_through_json() {
        let model = two_op_chain();
        let json = serde_json::to_string(&model).unwrap();
        let parsed = ReferenceModel::from_json(&json).unwrap();
        assert_eq!(parsed.ops.len(), 2);
    }
}
