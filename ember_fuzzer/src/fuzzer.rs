//! Worker threads driving the corpus engine.

use crate::{
    config::Config,
    crash::CrashManager,
    feedback::Feedback,
    input::{self, InputDir},
    stats::Stats,
    subproc,
    util::{stop_req, stop_soon},
};
use ember_core::{
    blacklist::Blacklist,
    corpus::CorpusWrapper,
    dict::Dictionary,
    phase::{Phase, PhaseState},
    RngType,
};
use ember_io::InputBuffer;
use std::process::Output;
use std::sync::Arc;

/// Placeholder in the target argv replaced with the input path.
pub const FILE_PLACEHOLDER: &str = "___FILE___";

pub struct SharedState {
    pub corpus: Arc<CorpusWrapper>,
    pub input: Arc<InputDir>,
    pub stats: Arc<Stats>,
    pub feedback: Arc<Feedback>,
    pub phase: Arc<PhaseState>,
    pub dict: Arc<Dictionary>,
    pub blacklist: Arc<Blacklist>,
    pub crash: Arc<CrashManager>,
}

impl Clone for SharedState {
    fn clone(&self) -> Self {
        Self {
            corpus: Arc::clone(&self.corpus),
            input: Arc::clone(&self.input),
            stats: Arc::clone(&self.stats),
            feedback: Arc::clone(&self.feedback),
            phase: Arc::clone(&self.phase),
            dict: Arc::clone(&self.dict),
            blacklist: Arc::clone(&self.blacklist),
            crash: Arc::clone(&self.crash),
        }
    }
}

pub struct Fuzzer {
    pub shared: SharedState,

    // local
    pub id: usize,
    pub rng: RngType,
    pub buf: InputBuffer,
    pub static_file_try_more: bool,
    pub orig_file_name: String,
    pub config: Config,
}

impl Fuzzer {
    pub fn fuzz_loop(&mut self) -> anyhow::Result<()> {
        while !stop_soon() {
            let phase = self.shared.phase.get();
            if !self.fetch_input(phase) {
                match phase {
                    Phase::DryRun => {
                        self.dry_run_done();
                        continue;
                    }
                    Phase::Minimize => {
                        log::info!("fuzzer-{}: minimization walk finished", self.id);
                        stop_req();
                        break;
                    }
                    // A dropped case; move on to the next one.
                    Phase::DynamicMain => continue,
                }
            }
            self.run_target_once();
        }
        Ok(())
    }

    /// Phase-dependent input sourcing, plus the optional post-process hook.
    fn fetch_input(&mut self, phase: Phase) -> bool {
        let ok = match phase {
            Phase::DryRun => self.prepare_static_file(false, false),
            Phase::DynamicMain => {
                if self.config.external_command.is_some() {
                    self.prepare_external_file()
                } else if self.shared.corpus.is_empty() {
                    // No coverage-improving case yet; keep cycling the
                    // static corpus until the first one lands.
                    self.prepare_static_file(true, true)
                } else {
                    self.prepare_dynamic_input(true)
                }
            }
            Phase::Minimize => self.prepare_dynamic_file_for_minimization(),
        };
        if !ok {
            return false;
        }
        if let Some(cmd) = self.config.post_external_command.clone() {
            if !self.post_process_file(&cmd) {
                return false;
            }
        }
        true
    }

    /// One target execution plus feedback and crash bookkeeping.
    fn run_target_once(&mut self) {
        self.shared.feedback.reset();
        let output = match self.exec_target() {
            Ok(output) => output,
            Err(e) => {
                log::warn!("fuzzer-{}: target execution failed: {}", self.id, e);
                return;
            }
        };
        self.shared.stats.inc_exec_total();

        if let Some(signal) = subproc::signal_of(&output.status) {
            self.shared.stats.inc_crashes();
            let report_hash = ember_io::crc::crc64(&output.stderr);
            match self
                .shared
                .crash
                .save_crash(self.buf.input(), signal, report_hash)
            {
                Ok(true) => {}
                Ok(false) => self.shared.stats.inc_crashes_suppressed(),
                Err(e) => log::warn!("fuzzer-{}: failed to save a crash: {}", self.id, e),
            }
        }

        if self.shared.phase.get() == Phase::Minimize {
            if self.shared.feedback.check_new_coverage().is_none() {
                // The replay lost its coverage; drop the persisted case.
                input::remove_static_file(self.config.cov_dir(), &self.orig_file_name);
            }
            return;
        }

        if let Some(cov) = self.shared.feedback.check_new_coverage() {
            input::add_dynamic_input(
                &self.shared,
                &self.config,
                self.buf.input(),
                cov,
                &self.orig_file_name,
            );
        }
    }

    fn exec_target(&self) -> anyhow::Result<Output> {
        let mut argv = self.config.target.clone();
        let mut uses_file = false;
        for arg in argv.iter_mut() {
            if arg.contains(FILE_PLACEHOLDER) {
                *arg = arg.replace(FILE_PLACEHOLDER, &self.buf.path().display().to_string());
                uses_file = true;
            }
        }
        let stdin = (!uses_file).then(|| self.buf.input());
        subproc::system_capture(&argv, stdin)
    }

    /// The static corpus is exhausted: leave the dry run exactly once.
    fn dry_run_done(&mut self) {
        let to = if self.config.minimize {
            Phase::Minimize
        } else {
            Phase::DynamicMain
        };
        if self.shared.phase.transition(Phase::DryRun, to) {
            self.shared.corpus.renumerate();
            self.shared.stats.reset_new_units_added();
            if to == Phase::Minimize {
                // Re-validate every entry from a clean slate.
                self.shared.feedback.clear();
            }
            log::info!(
                "dry run finished: entering the {:?} phase with {} corpus entries",
                to,
                self.shared.corpus.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Stats;
    use ember_core::corpus::DynFile;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn make_fuzzer(minimize: bool) -> (Fuzzer, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let input_dir = dir.path().join("in");
        std::fs::create_dir(&input_dir).unwrap();
        std::fs::write(input_dir.join("seed"), b"seed").unwrap();

        let blacklist = Arc::new(Blacklist::default());
        let input = InputDir::init(&input_dir, 0).unwrap();
        let max_input_sz = input.max_input_sz();
        let shared = SharedState {
            corpus: Arc::new(CorpusWrapper::new()),
            input: Arc::new(input),
            stats: Arc::new(Stats::new()),
            feedback: Arc::new(Feedback::new().unwrap()),
            phase: Arc::new(PhaseState::new(Phase::DryRun)),
            dict: Arc::new(Dictionary::default()),
            blacklist: Arc::clone(&blacklist),
            crash: Arc::new(CrashManager::new(dir.path().join("crashes"), blacklist)),
        };
        let config = Config {
            input_dir,
            work_dir: dir.path().to_path_buf(),
            minimize,
            target: vec!["true".to_string()],
            ..Config::default()
        };
        let fuzzer = Fuzzer {
            shared,
            id: 0,
            rng: rand::SeedableRng::seed_from_u64(1),
            buf: InputBuffer::new(dir.path(), max_input_sz).unwrap(),
            static_file_try_more: false,
            orig_file_name: String::new(),
            config,
        };
        (fuzzer, dir)
    }

    #[test]
    fn dry_run_transition_renumerates_and_happens_once() {
        let (mut fuzzer, _dir) = make_fuzzer(false);
        fuzzer
            .shared
            .corpus
            .add_file(DynFile::new(b"a", [1, 0, 0, 0], "a"), Phase::DryRun);
        fuzzer
            .shared
            .corpus
            .add_file(DynFile::new(b"b", [2, 0, 0, 0], "b"), Phase::DryRun);

        fuzzer.dry_run_done();
        assert_eq!(fuzzer.shared.phase.get(), Phase::DynamicMain);
        let idxs: Vec<usize> = fuzzer
            .shared
            .corpus
            .entries()
            .iter()
            .map(|e| e.idx)
            .collect();
        assert_eq!(idxs, vec![2, 1]);

        // A second worker noticing the exhausted corpus must not re-enter.
        fuzzer.shared.phase.set(Phase::DynamicMain);
        fuzzer.dry_run_done();
        assert_eq!(fuzzer.shared.phase.get(), Phase::DynamicMain);
    }

    #[test]
    fn minimize_flag_routes_the_transition() {
        let (mut fuzzer, _dir) = make_fuzzer(true);
        fuzzer.dry_run_done();
        assert_eq!(fuzzer.shared.phase.get(), Phase::Minimize);
    }

    #[test]
    fn file_placeholder_is_substituted() {
        let (mut fuzzer, _dir) = make_fuzzer(false);
        fuzzer.config.target = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("test -e {}", FILE_PLACEHOLDER),
        ];
        fuzzer.buf.write_input(b"payload");
        let output = fuzzer.exec_target().unwrap();
        assert!(output.status.success());
    }

    #[test]
    fn stdin_targets_receive_the_input() {
        let (mut fuzzer, _dir) = make_fuzzer(false);
        fuzzer.config.target = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            // Reflect stdin to stderr so the test can observe it.
            "cat >&2".to_string(),
        ];
        fuzzer.buf.write_input(b"payload");
        let output = fuzzer.exec_target().unwrap();
        assert_eq!(output.stderr, b"payload");
    }
}
