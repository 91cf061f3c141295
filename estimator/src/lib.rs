//! Per-`SubgraphKey` latency tracking: an exponential moving average kept
//! under a `Mutex`, read through cheap `Arc` clones so scheduler reads never
//! block on a concurrent profiling write. Grounded in
//! `original_source/band/latency_estimator.cc`'s profile table, with the
//! execution side inverted into a caller-supplied measurement closure so
//! this crate never has to depend on `backend` or `worker`.

mod key;
mod table;

pub use key::profile_key;
pub use table::LatencyEstimator;
