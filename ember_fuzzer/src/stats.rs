use crate::util::stop_soon;
use ember_core::corpus::CorpusWrapper;
use std::thread::sleep;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

#[derive(Debug, Default)]
pub struct Stats {
    exec_total: AtomicU64,
    tested_file_cnt: AtomicU64,
    new_units_added: AtomicU64,
    last_cov_update: AtomicU64,
    crashes: AtomicU64,
    crashes_suppressed: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_exec_total(&self) {
        self.exec_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn exec_total(&self) -> u64 {
        self.exec_total.load(Ordering::Relaxed)
    }

    pub fn inc_tested_file_cnt(&self) {
        self.tested_file_cnt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tested_file_cnt(&self) -> u64 {
        self.tested_file_cnt.load(Ordering::Relaxed)
    }

    pub fn inc_new_units_added(&self) {
        self.new_units_added.fetch_add(1, Ordering::Relaxed);
    }

    /// Units accepted since the last dry run completed.
    pub fn new_units_added(&self) -> u64 {
        self.new_units_added.load(Ordering::Relaxed)
    }

    pub fn reset_new_units_added(&self) {
        self.new_units_added.store(0, Ordering::Relaxed);
    }

    /// Stamp the wall-clock second of the most recent corpus insertion.
    pub fn touch_cov_update(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.last_cov_update.store(now, Ordering::Relaxed);
    }

    pub fn last_cov_update(&self) -> u64 {
        self.last_cov_update.load(Ordering::Relaxed)
    }

    pub fn inc_crashes(&self) {
        self.crashes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_crashes_suppressed(&self) {
        self.crashes_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self, corpus: &CorpusWrapper, duration: Duration) {
        while !stop_soon() {
            sleep(duration);

            log::info!(
                "exec: {}, corpus: {} (max entry: {}B), new units: {}, tested files: {}, crashes: {} (suppressed: {})",
                self.exec_total.load(Ordering::Relaxed),
                corpus.len(),
                corpus.max_entry_size(),
                self.new_units_added.load(Ordering::Relaxed),
                self.tested_file_cnt.load(Ordering::Relaxed),
                self.crashes.load(Ordering::Relaxed),
                self.crashes_suppressed.load(Ordering::Relaxed),
            );
        }
    }
}
