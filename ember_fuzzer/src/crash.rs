//! Crash deduplication and persistence.

use anyhow::Context;
use ember_core::{blacklist::Blacklist, HashSet};
use std::fs::create_dir_all;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub struct CrashManager {
    out_dir: PathBuf,
    blacklist: Arc<Blacklist>,
    seen: Mutex<HashSet<u64>>,
}

impl CrashManager {
    pub fn new(out_dir: PathBuf, blacklist: Arc<Blacklist>) -> Self {
        Self {
            out_dir,
            blacklist,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Save the crashing input unless its report hash is blacklisted or was
    /// already seen. The hash comes from the caller; this module does not
    /// inspect the crash itself. Returns whether a new file was written.
    pub fn save_crash(&self, data: &[u8], signal: i32, report_hash: u64) -> anyhow::Result<bool> {
        if self.blacklist.contains(report_hash) {
            log::debug!("crash {:#018x} is blacklisted, suppressing", report_hash);
            return Ok(false);
        }
        {
            let mut seen = self.seen.lock().unwrap();
            if !seen.insert(report_hash) {
                return Ok(false);
            }
        }
        create_dir_all(&self.out_dir).context("failed to create the crashes dir")?;
        let fname = self
            .out_dir
            .join(format!("SIG{}.{:016x}.fuzz", signal, report_hash));
        match ember_io::fs::write_file_excl(&fname, data) {
            Ok(()) => {
                log::info!("new crash saved: {}", fname.display());
                Ok(true)
            }
            // Left over from an earlier run; nothing new to record.
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => {
                Err(e).with_context(|| format!("failed to write crash file {}", fname.display()))
            }
        }
    }

    pub fn unique_crashes(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}
