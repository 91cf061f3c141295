use std::collections::BTreeSet;
use std::path::Path;

use common::{BackendType, DeviceFlag, ModelSpec, SubgraphKey};
use tensor::Tensor;

use crate::error::BackendResult;

/// A parsed model file. Implementations own whatever representation their
/// backend needs (an interpreter's flatbuffer, a gRPC service descriptor,
/// this crate's own `reference::ReferenceModel`) and expose the one thing
/// every layer above needs: the model's static shape, computed once and
/// cached by the engine.
pub trait Model: Send + Sync {
    fn backend_type(&self) -> BackendType;

    /// Equivalent to `InvestigateModelSpec` in the backend contract: derives
    /// tensor/op topology and per-device support bitmasks by inspecting the
    /// model, with no side effects on `self`.
    fn analyze(&self) -> ModelSpec;

    /// Lets a same-backend `ModelExecutor` recover the concrete model type
    /// to read backend-specific fields `ModelSpec` doesn't carry (e.g. op
    /// kinds). Executors for other backends never see this model.
    fn as_any(&self) -> &dyn std::any::Any;

    /// The concrete shape of one tensor, if the backend tracks per-tensor
    /// shapes statically. Backs `Engine::create_tensor`; `None` means the
    /// backend can't answer without running the model (`ModelSpec` itself
    /// is deliberately shape-agnostic, per spec section 3).
    fn tensor_shape(&self, _tensor_index: usize) -> Option<Vec<usize>> {
        None
    }
}

/// One (model, worker) execution context. `Engine::register_model` creates
/// one `ModelExecutor` per worker the model was partitioned onto;
/// `prepare_subgraph` is called once per `SubgraphDef` assigned to that
/// worker, and `execute_subgraph` is called on every request that lands on
/// an already-prepared key.
pub trait ModelExecutor: Send + Sync {
    fn backend_type(&self) -> BackendType;
    fn device_flag(&self) -> DeviceFlag;

    /// Compiles/caches whatever internal plan is needed to run `op_indices`
    /// of `model` as a single unit under `key`. Idempotent re-preparation of
    /// the same key is allowed; the executor decides whether to skip it.
    fn prepare_subgraph(
        &mut self,
        model: &dyn Model,
        key: SubgraphKey,
        op_indices: &BTreeSet<usize>,
    ) -> BackendResult<()>;

    fn is_subgraph_ready(&self, key: SubgraphKey) -> bool;

    /// Runs a previously-prepared subgraph against `inputs`, in the order
    /// `ModelSpec::pure_input_tensors` would enumerate them, and returns
    /// outputs in `ModelSpec::output_tensors_of` order.
    fn execute_subgraph(&mut self, key: SubgraphKey, inputs: &[Tensor]) -> BackendResult<Vec<Tensor>>;
}

/// Per-backend-type factory: knows which devices a backend can target and
/// how to produce the `Model`/`ModelExecutor` pair for one of them. One
/// `BackendUtil` implementation is registered per `BackendType` in a
/// `BackendFactory`.
pub trait BackendUtil: Send + Sync {
    fn backend_type(&self) -> BackendType;
    fn available_devices(&self) -> Vec<DeviceFlag>;
    fn load_model(&self, path: &Path) -> BackendResult<Box<dyn Model>>;
    fn create_executor(&self, device: DeviceFlag) -> BackendResult<Box<dyn ModelExecutor>>;
}
