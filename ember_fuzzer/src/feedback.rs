//! Coverage feedback consumption.
//!
//! The engine does not compute coverage. Instrumented targets locate a
//! shared memory map through the `EMBER_COV_SHM` environment variable and
//! bump four monotonically increasing counters in it (edges, pcs,
//! comparisons, basic blocks). After every execution the worker samples the
//! counters and asks whether the run improved on the best-known vector;
//! the answer is the `[u64; 4]` the dynamic corpus orders by.

use shared_memory::{Shmem, ShmemConf, ShmemError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

pub const COV_SHM_ENV: &str = "EMBER_COV_SHM";
pub const NUM_COUNTERS: usize = 4;
const COV_MAP_SIZE: usize = NUM_COUNTERS * 8;

pub struct Feedback {
    shm: Shmem,
    best: RwLock<[u64; NUM_COUNTERS]>,
}

// The raw map is only ever touched through the AtomicU64 view below.
unsafe impl Send for Feedback {}
unsafe impl Sync for Feedback {}

impl Feedback {
    pub fn new() -> anyhow::Result<Feedback> {
        // Unique per map, not just per process: tests create several.
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::SeqCst);
        let id = format!("ember-cov-{}-{}", std::process::id(), seq);
        let shm = create_shm(&id, COV_MAP_SIZE)?;
        std::env::set_var(COV_SHM_ENV, &id);
        let feedback = Feedback {
            shm,
            best: RwLock::new([0; NUM_COUNTERS]),
        };
        feedback.reset();
        Ok(feedback)
    }

    fn counters(&self) -> &[AtomicU64; NUM_COUNTERS] {
        unsafe { &*(self.shm.as_ptr() as *const [AtomicU64; NUM_COUNTERS]) }
    }

    /// Zero the counters before the next execution.
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::SeqCst);
        }
    }

    /// Counters as published by the target after a run.
    pub fn sample(&self) -> [u64; NUM_COUNTERS] {
        let counters = self.counters();
        let mut cov = [0; NUM_COUNTERS];
        for (slot, counter) in cov.iter_mut().zip(counters) {
            *slot = counter.load(Ordering::SeqCst);
        }
        cov
    }

    /// Return the run's coverage vector if it beats the best-known one.
    pub fn check_new_coverage(&self) -> Option<[u64; NUM_COUNTERS]> {
        let cov = self.sample();
        {
            let best = self.best.read().unwrap();
            if !improves(&cov, &best) {
                return None;
            }
        }
        let mut best = self.best.write().unwrap();
        for (best, cur) in best.iter_mut().zip(cov.iter()) {
            *best = (*best).max(*cur);
        }
        Some(cov)
    }

    /// Forget the accumulated best, e.g. when a minimization walk starts
    /// re-validating every entry from scratch.
    pub fn clear(&self) {
        *self.best.write().unwrap() = [0; NUM_COUNTERS];
        self.reset();
    }
}

fn improves(cov: &[u64; NUM_COUNTERS], best: &[u64; NUM_COUNTERS]) -> bool {
    cov.iter().zip(best.iter()).any(|(c, b)| c > b)
}

fn create_shm(id: &str, sz: usize) -> anyhow::Result<Shmem> {
    match ShmemConf::new().os_id(id).size(sz).create() {
        Ok(mut shm) => {
            shm.set_owner(true);
            Ok(shm)
        }
        Err(ShmemError::MappingIdExists) => {
            let mut shm = ShmemConf::new().os_id(id).size(sz).open()?;
            shm.set_owner(true);
            Ok(shm)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn improvement_is_any_counter_above_best() {
        assert!(improves(&[1, 0, 0, 0], &[0, 0, 0, 0]));
        assert!(improves(&[0, 0, 0, 5], &[9, 9, 9, 4]));
        assert!(!improves(&[1, 1, 1, 1], &[1, 1, 1, 1]));
        assert!(!improves(&[0, 1, 1, 1], &[1, 1, 1, 1]));
    }

    #[test]
    fn best_vector_merges_per_counter() {
        let feedback = Feedback::new().unwrap();
        feedback.clear();

        let counters = feedback.counters();
        counters[0].store(3, Ordering::SeqCst);
        counters[2].store(1, Ordering::SeqCst);
        assert_eq!(feedback.check_new_coverage(), Some([3, 0, 1, 0]));

        // Same picture again: no improvement.
        assert_eq!(feedback.check_new_coverage(), None);

        counters[1].store(2, Ordering::SeqCst);
        assert_eq!(feedback.check_new_coverage(), Some([3, 2, 1, 0]));
    }
}
