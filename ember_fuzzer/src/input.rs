//! The input-corpus engine: static corpus reading, dynamic corpus
//! integration and the per-phase input preparation workers consume.

use crate::{
    config::Config,
    fuzzer::{Fuzzer, SharedState},
    mangle, subproc,
};
use anyhow::Context;
use ember_core::{corpus::DynFile, phase::Phase};
use ember_io::{crc, fs as iofs};
use std::fs::{read_dir, ReadDir};
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

/// Input capacity floor when the corpus contains only small files.
pub const INPUT_DEFAULT_SIZE: usize = 8192;
/// Hard ceiling for the derived input capacity.
pub const INPUT_MAX_SIZE: usize = 1024 * 1024 * 1024;
/// First prefix length used by the dry-run geometric growth.
const INPUT_MIN_READ: usize = 1024;

/// Shared reader over the static input directory. One directory stream is
/// round-robined between all workers under a single mutex.
pub struct InputDir {
    dir: PathBuf,
    stream: Mutex<ReadDir>,
    file_cnt: AtomicUsize,
    max_input_sz: AtomicUsize,
    /// Operator ceiling for input sizes; 0 = unset.
    max_file_sz: usize,
}

impl InputDir {
    /// Open the input directory and take the initial scan. Fails when the
    /// directory cannot be read or holds no usable files.
    pub fn init(dir: &Path, max_file_sz: usize) -> anyhow::Result<InputDir> {
        let stream = read_dir(dir)
            .with_context(|| format!("failed to open input dir {}", dir.display()))?;
        let input = InputDir {
            dir: dir.to_path_buf(),
            stream: Mutex::new(stream),
            file_cnt: AtomicUsize::new(0),
            max_input_sz: AtomicUsize::new(0),
            max_file_sz,
        };
        {
            let mut stream = input.stream.lock().unwrap();
            input.stats_and_rewind(&mut stream)?;
        }
        if input.file_cnt() == 0 {
            anyhow::bail!("no usable files in the input directory {}", dir.display());
        }
        Ok(input)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_cnt(&self) -> usize {
        self.file_cnt.load(Ordering::SeqCst)
    }

    /// Capacity every worker buffer is sized to.
    pub fn max_input_sz(&self) -> usize {
        self.max_input_sz.load(Ordering::SeqCst)
    }

    /// Re-scan the directory: count the regular files, track the largest one
    /// and re-derive the input capacity. Leaves the stream rewound.
    fn stats_and_rewind(&self, stream: &mut ReadDir) -> anyhow::Result<()> {
        *stream = read_dir(&self.dir)
            .with_context(|| format!("failed to rewind input dir {}", self.dir.display()))?;

        let mut file_cnt = 0usize;
        let mut max_input_sz = self.max_input_sz.load(Ordering::SeqCst);
        for entry in stream.by_ref() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("readdir({}) failed: {}", self.dir.display(), e);
                    return Err(e)
                        .with_context(|| format!("readdir({}) failed", self.dir.display()));
                }
            };
            let path = entry.path();
            log::debug!("analyzing file {}", path.display());
            let meta = match std::fs::metadata(&path) {
                Ok(meta) => meta,
                Err(e) => {
                    log::warn!("couldn't stat the {} file: {}", path.display(), e);
                    continue;
                }
            };
            if !meta.is_file() {
                log::debug!("{} is not a regular file, skipping", path.display());
                continue;
            }
            let sz = meta.len() as usize;
            if self.max_file_sz != 0 && sz > self.max_file_sz {
                log::debug!(
                    "file {} is bigger than the maximal defined file size: {} > {}",
                    path.display(),
                    sz,
                    self.max_file_sz
                );
            }
            if sz > max_input_sz {
                max_input_sz = sz;
            }
            file_cnt += 1;
        }

        self.file_cnt.store(file_cnt, Ordering::SeqCst);
        if self.max_file_sz != 0 {
            max_input_sz = self.max_file_sz;
        } else if max_input_sz < INPUT_DEFAULT_SIZE {
            max_input_sz = INPUT_DEFAULT_SIZE;
        } else if max_input_sz > INPUT_MAX_SIZE {
            max_input_sz = INPUT_MAX_SIZE;
        }
        self.max_input_sz.store(max_input_sz, Ordering::SeqCst);

        if file_cnt == 0 {
            log::warn!(
                "no usable files in the input directory {}",
                self.dir.display()
            );
        }
        log::debug!(
            "analyzed {}: max input size: {}, usable files: {}",
            self.dir.display(),
            max_input_sz,
            file_cnt
        );

        *stream = read_dir(&self.dir)
            .with_context(|| format!("failed to rewind input dir {}", self.dir.display()))?;
        Ok(())
    }

    /// Next filename in the shared round-robin; at the end of the directory
    /// a rescan happens iff `rewind` is set, otherwise the walk is over.
    pub fn get_next(&self, rewind: bool) -> Option<String> {
        let mut stream = self.stream.lock().unwrap();
        if self.file_cnt() == 0 {
            log::warn!("no useful files in the input directory");
            return None;
        }
        loop {
            let entry = match stream.next() {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    log::warn!("readdir({}) failed: {}", self.dir.display(), e);
                    return None;
                }
                None if !rewind => return None,
                None => {
                    if let Err(e) = self.stats_and_rewind(&mut stream) {
                        log::error!("rescan of {} failed: {}", self.dir.display(), e);
                        return None;
                    }
                    continue;
                }
            };
            let path = entry.path();
            let meta = match std::fs::metadata(&path) {
                Ok(meta) => meta,
                Err(e) => {
                    log::warn!("couldn't stat the {} file: {}", path.display(), e);
                    continue;
                }
            };
            if !meta.is_file() {
                log::debug!("{} is not a regular file, skipping", path.display());
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => return Some(name),
                Err(_) => {
                    log::warn!("skipping a non-UTF-8 file name in {}", self.dir.display());
                    continue;
                }
            }
        }
    }
}

/// Persist `data` under its content-addressed name. An existing file with
/// the same identity makes the call a successful no-op.
pub fn write_cov_file(dir: &Path, data: &[u8]) -> bool {
    let crc64f = crc::crc64(data);
    let crc64r = crc::crc64_rev(data);
    let fname = dir.join(format!(
        "{:016x}{:016x}.{:08x}.honggfuzz.cov",
        crc64f,
        crc64r,
        data.len() as u32
    ));

    if iofs::file_exists(&fname) {
        log::debug!(
            "file {} already exists in the output corpus directory",
            fname.display()
        );
        return true;
    }

    log::debug!("adding file {} to the corpus directory", fname.display());
    if let Err(e) = iofs::write_file_excl(&fname, data) {
        log::warn!("couldn't write buffer to file {}: {}", fname.display(), e);
        return false;
    }
    true
}

/// Integrate a coverage-improving case: in-memory insert plus best-effort
/// persistence to the corpus directories.
pub fn add_dynamic_input(
    shared: &SharedState,
    config: &Config,
    data: &[u8],
    cov: [u64; 4],
    path: &str,
) {
    shared.stats.touch_cov_update();
    let phase = shared.phase.get();
    shared.corpus.add_file(DynFile::new(data, cov, path), phase);

    if config.socket_fuzzer {
        // Socket-fuzzer inputs never reach the corpus directories.
        return;
    }
    if config.minimize {
        // Minimization only ever deletes files.
        return;
    }

    let out_dir = config.cov_dir();
    if !write_cov_file(out_dir, data) {
        log::error!("couldn't save the coverage data to {}", out_dir.display());
    }

    if phase != Phase::DynamicMain {
        return;
    }
    shared.stats.inc_new_units_added();
    if let Some(new_dir) = config.covdir_new.as_ref() {
        if !write_cov_file(new_dir, data) {
            log::error!(
                "couldn't save the new coverage data to {}",
                new_dir.display()
            );
        }
    }
}

/// Delete a rejected case from `dir`.
pub fn remove_static_file(dir: &Path, name: &str) {
    let path = dir.join(name);
    if let Err(e) = std::fs::remove_file(&path) {
        log::error!("unlink({}) failed: {}", path.display(), e);
    }
}

impl Fuzzer {
    /// Copy the next dynamic-corpus selection into the buffer.
    pub(crate) fn prepare_dynamic_input(&mut self, needs_mangle: bool) -> bool {
        let snap = self.shared.corpus.select_input();
        self.buf.write_input(&snap.data);
        if needs_mangle {
            mangle::mangle_buffer(&mut self.rng, &mut self.buf, &self.shared.dict);
        }
        true
    }

    /// Decide between loading a fresh file and re-reading a longer prefix of
    /// the current one. Outside the dry run every read uses full capacity.
    fn should_read_new_file(&mut self) -> bool {
        if self.shared.phase.get() != Phase::DryRun || self.config.minimize {
            let cap = self.buf.capacity();
            self.buf.set_size(cap);
            return true;
        }

        if !self.static_file_try_more {
            self.static_file_try_more = true;
            // Start with a small prefix and double it on following passes.
            let sz = INPUT_MIN_READ.min(self.buf.capacity());
            self.buf.set_size(sz);
            return true;
        }

        let mut newsz = self.buf.size() * 2;
        if newsz >= self.buf.capacity() {
            // The largest prefix this file will ever be read at.
            newsz = self.buf.capacity();
            self.static_file_try_more = false;
        }
        self.buf.set_size(newsz);
        false
    }

    /// Load the next static-corpus file, or a longer prefix of the current
    /// one, into the buffer.
    pub(crate) fn prepare_static_file(&mut self, rewind: bool, needs_mangle: bool) -> bool {
        if self.should_read_new_file() {
            match self.shared.input.get_next(rewind) {
                Some(name) => self.orig_file_name = name,
                None => return false,
            }
            self.shared.stats.inc_tested_file_cnt();
        }

        let path = self.shared.input.dir().join(&self.orig_file_name);
        let want = self.buf.size();
        let read = match iofs::read_file_to_buf_max(&path, &mut self.buf.buf_mut()[..want]) {
            Ok(n) => n,
            Err(e) => {
                log::error!("couldn't read contents of {}: {}", path.display(), e);
                return false;
            }
        };

        if self.static_file_try_more && read < want {
            // The file is shorter than the requested prefix; done growing.
            self.static_file_try_more = false;
        }
        self.buf.set_size(read);

        if needs_mangle {
            mangle::mangle_buffer(&mut self.rng, &mut self.buf, &self.shared.dict);
        }
        true
    }

    /// Advance the minimization walk; false once every entry was replayed.
    pub(crate) fn prepare_dynamic_file_for_minimization(&mut self) -> bool {
        let snap = match self.shared.corpus.minimize_next() {
            Some(snap) => snap,
            None => return false,
        };
        self.buf.write_input(&snap.data);
        self.orig_file_name = snap.path;
        log::debug!(
            "cov: {}/{}/{}/{}",
            snap.cov[0],
            snap.cov[1],
            snap.cov[2],
            snap.cov[3]
        );
        true
    }

    /// Produce the input with the configured external command.
    pub(crate) fn prepare_external_file(&mut self) -> bool {
        self.orig_file_name = "[EXTERNAL]".to_string();
        let cmd = match self.config.external_command.clone() {
            Some(cmd) => cmd,
            None => {
                log::error!("no external command configured");
                return false;
            }
        };
        self.run_file_producer(&cmd, &[])
    }

    /// Feed the current buffer through an external post-processing command.
    pub(crate) fn post_process_file(&mut self, cmd: &str) -> bool {
        let seed = self.buf.input().to_vec();
        self.run_file_producer(cmd, &seed)
    }

    /// Hand a tmp file seeded with `seed` to `cmd`, then refill the buffer
    /// from the same descriptor.
    fn run_file_producer(&mut self, cmd: &str, seed: &[u8]) -> bool {
        let mut tmp = match iofs::write_buf_to_tmp_file(&self.config.work_dir, seed) {
            Ok(tmp) => tmp,
            Err(e) => {
                log::error!(
                    "couldn't write the input to a temporary file in {}: {}",
                    self.config.work_dir.display(),
                    e
                );
                return false;
            }
        };

        let argv = vec![cmd.to_string(), tmp.path().display().to_string()];
        match subproc::system(&argv) {
            Ok(0) => {}
            Ok(code) => {
                log::error!("subprocess '{}' returned abnormally: {}", cmd, code);
                return false;
            }
            Err(e) => {
                log::error!("subprocess '{}' failed: {}", cmd, e);
                return false;
            }
        }
        log::debug!("subprocess '{}' finished with success", cmd);

        let cap = self.buf.capacity();
        self.buf.set_size(cap);
        let sz = match iofs::read_from_fd_seek(tmp.as_file_mut(), &mut self.buf.buf_mut()[..cap]) {
            Ok(n) => n,
            Err(e) => {
                log::error!("couldn't read back from {}: {}", tmp.path().display(), e);
                return false;
            }
        };
        self.buf.set_size(sz);
        true
    }
}
