use common::{JobQueue, WorkerType, WorkerWaitingTime};

use crate::context::{SchedulingContext, SchedulingDecision};

/// Shared contract every scheduler policy implements (spec section 4.5).
/// The planner calls `schedule` in priority order and loops until a full
/// pass makes no progress; multiple policies may be installed but all must
/// report the same `worker_type`, since that determines whether the
/// planner gives each worker its own deque or pulls from one shared pool.
pub trait IScheduler: Send {
    /// Attempts to dispatch jobs out of `requests`, reporting each decision
    /// through `dispatch` and folding any tentative assignment's expected
    /// latency into `worker_waiting` immediately (spec section 4.5's "fair
    /// use of workerWaiting" rule). Returns whether at least one job was
    /// dispatched or short-circuited this call.
    fn schedule(
        &mut self,
        context: &dyn SchedulingContext,
        worker_waiting: &mut WorkerWaitingTime,
        requests: &mut JobQueue,
        dispatch: &mut dyn FnMut(SchedulingDecision),
    ) -> bool;

    /// Whether this policy needs the analyzer to have produced per-device
    /// fallback subgraphs (`fallback_per_worker` preparation) to function.
    fn needs_fallback_subgraphs(&self) -> bool {
        false
    }

    fn worker_type(&self) -> WorkerType;
}
