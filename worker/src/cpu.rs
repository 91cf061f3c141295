use common::CpuMaskFlag;
use tracing::warn;

/// Resolved set of core ids a worker thread should be pinned to. Built from
/// a `CpuMaskFlag` plus the host's core count; applying it is a no-op
/// outside `target_os = "linux"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuSet {
    core_ids: Vec<usize>,
}

impl CpuSet {
    pub fn from_flag(flag: CpuMaskFlag, num_cores: usize) -> CpuSet {
        let core_ids = match flag {
            CpuMaskFlag::All => (0..num_cores).collect(),
            // Without per-platform big.LITTLE topology info this workspace
            // treats "little"/"big"/"primary" as halves of the core range,
            // biased the way Android's typical core ordering is (low
            // indices are the efficiency cluster).
            CpuMaskFlag::Little => (0..num_cores / 2).collect(),
            CpuMaskFlag::Big => (num_cores / 2..num_cores).collect(),
            CpuMaskFlag::Primary => vec![0.min(num_cores.saturating_sub(1))],
        };
        CpuSet { core_ids }
    }

    pub fn core_ids(&self) -> &[usize] {
        &self.core_ids
    }

    #[cfg(target_os = "linux")]
    pub fn apply_to_current_thread(&self) -> std::io::Result<()> {
        use std::mem::{size_of, zeroed};

        unsafe {
            let mut set: libc::cpu_set_t = zeroed();
            for &core in &self.core_ids {
                libc::CPU_SET(core, &mut set);
            }
            let result = libc::sched_setaffinity(0, size_of::<libc::cpu_set_t>(), &set);
            if result != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn apply_to_current_thread(&self) -> std::io::Result<()> {
        warn!("cpu affinity is unsupported on this platform; ignoring cpu set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_flag_covers_every_core() {
        let set = CpuSet::from_flag(CpuMaskFlag::All, 4);
        assert_eq!(set.core_ids(), &[0, 1, 2, 3]);
    }

    #[test]
    fn little_and_big_partition_the_core_range() {
        let little = CpuSet::from_flag(CpuMaskFlag::Little, 8);
        let big = CpuSet::from_flag(CpuMaskFlag::Big, 8);
        assert_eq!(little.core_ids(), &[0, 1, 2, 3]);
        assert_eq!(big.core_ids(), &[4, 5, 6, 7]);
    }
}
