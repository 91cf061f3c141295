use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use common::{EngineResult, ProfileConfig, SubgraphKey, WorkerId};
use tracing::warn;

use crate::key::profile_key;

/// `model path -> "start/end" unit range -> worker -> moving-average
/// microseconds`. Exactly the nesting the original's JSON profile file
/// uses, keyed by path rather than `ModelId` so the same file stays valid
/// across runs that assign model ids differently.
pub type ProfileTable = HashMap<String, HashMap<String, HashMap<WorkerId, i64>>>;

/// Per-`SubgraphKey` latency tracker. Reads clone the current `Arc`
/// snapshot and never block; writes (`update_latency`, `profile_model`)
/// take the mutex, build a modified clone, and swap it in.
pub struct LatencyEstimator {
    smoothing_factor: f32,
    table: Mutex<Arc<ProfileTable>>,
}

impl LatencyEstimator {
    /// `Init`: loads `profile_config.profile_data_path` if set, falling
    /// back to an empty table (with a logged warning) if the file is
    /// missing or unparsable -- a profiling failure is never fatal.
    pub fn new(profile_config: &ProfileConfig) -> LatencyEstimator {
        let table = if profile_config.profile_data_path.is_empty() {
            ProfileTable::new()
        } else {
            match fs::read_to_string(&profile_config.profile_data_path) {
                Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                    warn!(error = %err, path = %profile_config.profile_data_path, "profile file is unreadable, starting empty");
                    ProfileTable::new()
                }),
                Err(err) => {
                    warn!(error = %err, path = %profile_config.profile_data_path, "profile file is unreadable, starting empty");
                    ProfileTable::new()
                }
            }
        };

        LatencyEstimator {
            smoothing_factor: profile_config.smoothing_factor,
            table: Mutex::new(Arc::new(table)),
        }
    }

    pub fn snapshot(&self) -> Arc<ProfileTable> {
        Arc::clone(&self.table.lock().expect("estimator mutex poisoned"))
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let snapshot = self.snapshot();
        let json = serde_json::to_string_pretty(&*snapshot)
            .map_err(|err| common::EngineError::Backend(err.to_string()))?;
        fs::write(path, json).map_err(|err| common::EngineError::Backend(err.to_string()))
    }

    /// `UpdateLatency`: `new = alpha * observed + (1 - alpha) * old`, or
    /// `observed` unchanged if there was no prior value.
    pub fn update_latency(&self, model_path: &str, key: SubgraphKey, observed_micros: i64) {
        let mut guard = self.table.lock().expect("estimator mutex poisoned");
        let mut next = (**guard).clone();
        let worker_table = next
            .entry(model_path.to_string())
            .or_default()
            .entry(profile_key(key))
            .or_default();

        let updated = match worker_table.get(&key.worker_id) {
            Some(&old) => {
                (self.smoothing_factor as f64 * observed_micros as f64
                    + (1.0 - self.smoothing_factor as f64) * old as f64)
                    .round() as i64
            }
            None => observed_micros,
        };
        worker_table.insert(key.worker_id, updated);
        *guard = Arc::new(next);
    }

    pub fn get_profiled(&self, model_path: &str, key: SubgraphKey) -> Option<i64> {
        self.snapshot()
            .get(model_path)
            .and_then(|ranges| ranges.get(&profile_key(key)))
            .and_then(|workers| workers.get(&key.worker_id))
            .copied()
    }

    /// As specified: `GetExpected` is an alias for `GetProfiled` until a
    /// richer latency model is layered on top.
    pub fn get_expected(&self, model_path: &str, key: SubgraphKey) -> Option<i64> {
        self.get_profiled(model_path, key)
    }

    /// `GetWorst`: the maximum profiled latency among `keys`, meant to be
    /// called with one whole-model key per eligible worker.
    pub fn get_worst(&self, model_path: &str, keys: &[SubgraphKey]) -> Option<i64> {
        keys.iter()
            .filter_map(|&key| self.get_profiled(model_path, key))
            .max()
    }

    /// `ProfileModel`: runs `num_warmups` unmeasured calls to `measure`
    /// followed by `num_runs` measured ones for every key in `keys`,
    /// storing the mean as that key's initial profile. `measure` is
    /// supplied by the caller (the engine, which owns the backend/worker
    /// machinery actually able to execute a subgraph) -- this crate only
    /// orchestrates the warmup/measure loop and bookkeeping.
    pub fn profile_model(
        &self,
        model_path: &str,
        keys: &[SubgraphKey],
        num_warmups: u32,
        num_runs: u32,
        mut measure: impl FnMut(SubgraphKey) -> EngineResult<i64>,
    ) -> EngineResult<()> {
        for &key in keys {
            for _ in 0..num_warmups {
                measure(key)?;
            }
            let mut total = 0i64;
            for _ in 0..num_runs.max(1) {
                total += measure(key)?;
            }
            let mean = total / num_runs.max(1) as i64;

            let mut guard = self.table.lock().expect("estimator mutex poisoned");
            let mut next = (**guard).clone();
            next.entry(model_path.to_string())
                .or_default()
                .entry(profile_key(key))
                .or_default()
                .insert(key.worker_id, mean);
            *guard = Arc::new(next);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{BitMask, ModelId};

    fn key(worker: usize) -> SubgraphKey {
        SubgraphKey::new(ModelId::new(0), WorkerId::new(worker), BitMask::empty())
    }

    #[test]
    fn update_latency_applies_exponential_moving_average() {
        let estimator = LatencyEstimator::new(&ProfileConfig { smoothing_factor: 0.5, ..ProfileConfig::default() });
        estimator.update_latency("model.bin", key(0), 100);
        estimator.update_latency("model.bin", key(0), 200);
        assert_eq!(estimator.get_profiled("model.bin", key(0)), Some(150));
    }

    #[test]
    fn get_worst_takes_the_max_across_keys() {
        let estimator = LatencyEstimator::new(&ProfileConfig::default());
        estimator.update_latency("model.bin", key(0), 100);
        estimator.update_latency("model.bin", key(1), 400);
        assert_eq!(estimator.get_worst("model.bin", &[key(0), key(1)]), Some(400));
    }

    #[test]
    fn profile_model_records_mean_of_measured_runs() {
        let estimator = LatencyEstimator::new(&ProfileConfig::default());
        let mut calls = vec![10i64, 20, 30].into_iter();
        estimator
            .profile_model("model.bin", &[key(0)], 0, 3, |_| Ok(calls.next().unwrap()))
            .unwrap();
        assert_eq!(estimator.get_profiled("model.bin", key(0)), Some(20));
    }

    #[test]
    fn unreadable_profile_path_starts_empty_instead_of_failing() {
        let config = ProfileConfig {
            profile_data_path: "/nonexistent/profile.json".into(),
            ..ProfileConfig::default()
        };
        let estimator = LatencyEstimator::new(&config);
        assert_eq!(estimator.get_profiled("model.bin", key(0)), None);
    }
}
