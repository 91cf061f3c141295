use std::path::Path;

use common::{BackendType, DeviceFlag};

use crate::error::BackendResult;
use crate::reference::executor::ReferenceExecutor;
use crate::reference::model::ReferenceModel;
use crate::traits::{BackendUtil, Model, ModelExecutor};

/// `BackendUtil` for the reference interpreter. Only ever targets the CPU --
/// there is no GPU/DSP/NPU kernel behind it, so `available_devices` reports
/// exactly one device and `create_executor` ignores the requested device
/// flag beyond that.
#[derive(Default)]
pub struct ReferenceBackendUtil;

impl ReferenceBackendUtil {
    pub fn new() -> ReferenceBackendUtil {
        ReferenceBackendUtil
    }
}

impl BackendUtil for ReferenceBackendUtil {
    fn backend_type(&self) -> BackendType {
        BackendType::Reference
    }

    fn available_devices(&self) -> Vec<DeviceFlag> {
        vec![DeviceFlag::Cpu]
    }

    fn load_model(&self, path: &Path) -> BackendResult<Box<dyn Model>> {
        Ok(Box::new(ReferenceModel::from_path(path)?))
    }

    fn create_executor(&self, device: DeviceFlag) -> BackendResult<Box<dyn ModelExecutor>> {
        Ok(Box::new(ReferenceExecutor::new(device)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_model_from_a_memory_mapped_file() {
        let json = r#"{
            "tensor_shapes": [[2], [2]],
            "input_tensors": [0],
            "output_tensors": [1],
            "ops": [{"kind": "relu", "inputs": [0], "outputs": [1]}]
        }"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let util = ReferenceBackendUtil::new();
        let model = util.load_model(file.path()).unwrap();
        let spec = model.analyze();
        assert_eq!(spec.num_ops, 1);
    }

    #[test]
    fn reference_backend_only_offers_cpu() {
        let util = ReferenceBackendUtil::new();
        assert_eq!(util.available_devices(), vec![DeviceFlag::Cpu]);
    }
}
