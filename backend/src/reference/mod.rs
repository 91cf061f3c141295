//! A small CPU interpreter used as the engine's "always available" backend
//! and exercised by the integration tests in the root crate. Not meant to be
//! fast -- it exists so this workspace's scheduling core has something real
//! to schedule without depending on an actual inference runtime.

mod executor;
mod model;
mod util;

pub use executor::ReferenceExecutor;
pub use model::{ReferenceModel, ReferenceOpKind, ReferenceOpSpec};
pub use util::ReferenceBackendUtil;
