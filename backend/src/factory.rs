use std::collections::HashMap;
use std::path::Path;

use common::{BackendType, DeviceFlag};

use crate::error::{BackendError, BackendResult};
use crate::traits::{BackendUtil, Model, ModelExecutor};

/// Lookup table from `BackendType` to the `BackendUtil` that implements it.
/// Built fresh inside `Engine::create` from the set of backends the caller
/// registers -- deliberately not a global/lazy-static table, so a process
/// can run more than one engine with different backend sets (and so tests
/// don't leak state between each other).
#[derive(Default)]
pub struct BackendFactory {
    backends: HashMap<BackendType, Box<dyn BackendUtil>>,
}

impl BackendFactory {
    pub fn new() -> BackendFactory {
        BackendFactory::default()
    }

    pub fn register(&mut self, util: Box<dyn BackendUtil>) {
        self.backends.insert(util.backend_type(), util);
    }

    pub fn get(&self, backend_type: BackendType) -> Option<&dyn BackendUtil> {
        self.backends.get(&backend_type).map(|b| b.as_ref())
    }

    pub fn load_model(&self, backend_type: BackendType, path: &Path) -> BackendResult<Box<dyn Model>> {
        self.get(backend_type)
            .ok_or(BackendError::ModelLoad {
                path: path.to_path_buf(),
                reason: format!("no backend registered for {backend_type:?}"),
            })?
            .load_model(path)
    }

    pub fn create_executor(
        &self,
        backend_type: BackendType,
        device: DeviceFlag,
    ) -> BackendResult<Box<dyn ModelExecutor>> {
        self.get(backend_type)
            .ok_or(BackendError::ModelLoad {
                path: Path::new("<no path>").to_path_buf(),
                reason: format!("no backend registered for {backend_type:?}"),
            })?
            .create_executor(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferenceBackendUtil;

    #[test]
    fn unregistered_backend_type_is_reported_by_name() {
        let factory = BackendFactory::new();
        let err = factory.create_executor(BackendType::Grpc, DeviceFlag::Cpu).unwrap_err();
        assert!(matches!(err, BackendError::ModelLoad { .. }));
    }

    #[test]
    fn registered_backend_is_retrievable() {
        let mut factory = BackendFactory::new();
        factory.register(Box::new(ReferenceBackendUtil::new()));
        assert!(factory.get(BackendType::Reference).is_some());
    }
}
