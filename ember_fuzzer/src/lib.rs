//! Ember fuzz

pub mod config;
pub mod crash;
pub mod feedback;
pub mod fuzzer;
pub mod input;
pub mod mangle;
pub mod stats;
pub mod subproc;
pub mod util;

use crate::{
    config::Config,
    crash::CrashManager,
    feedback::Feedback,
    fuzzer::{Fuzzer, SharedState},
    input::InputDir,
    stats::Stats,
    util::stop_req,
};
use anyhow::Context;
use ember_core::{
    blacklist::Blacklist,
    corpus::CorpusWrapper,
    dict::Dictionary,
    phase::{Phase, PhaseState},
    RngType,
};
use ember_io::InputBuffer;
use rand::SeedableRng;
use std::{sync::Arc, thread, time::Duration};

pub fn boot(mut config: Config) -> anyhow::Result<()> {
    config.check().context("config error")?;
    println!("{}", EMBER);

    let dict = match config.dictionary.as_ref() {
        Some(path) => Dictionary::load(path).context("failed to load the dictionary")?,
        None => Dictionary::default(),
    };
    let blacklist = Arc::new(match config.blacklist.as_ref() {
        Some(path) => Blacklist::load(path).context("failed to load the blacklist")?,
        None => Blacklist::default(),
    });

    log::info!("scanning input corpus {}...", config.input_dir.display());
    let input = InputDir::init(&config.input_dir, config.max_file_sz)
        .context("failed to initialize the input corpus")?;
    log::info!(
        "{} input files, input capacity: {} bytes",
        input.file_cnt(),
        input.max_input_sz()
    );

    let stats = Arc::new(Stats::new());
    let shared = SharedState {
        corpus: Arc::new(CorpusWrapper::new()),
        input: Arc::new(input),
        stats: Arc::clone(&stats),
        feedback: Arc::new(Feedback::new().context("failed to set up the coverage map")?),
        phase: Arc::new(PhaseState::new(Phase::DryRun)),
        dict: Arc::new(dict),
        blacklist: Arc::clone(&blacklist),
        crash: Arc::new(CrashManager::new(config.crashes_dir(), blacklist)),
    };

    setup_signal_handler();

    {
        let stats = Arc::clone(&stats);
        let corpus = Arc::clone(&shared.corpus);
        thread::spawn(move || stats.report(&corpus, Duration::from_secs(10)));
    }

    let max_input_sz = shared.input.max_input_sz();
    let mut fuzzers = Vec::with_capacity(config.jobs);
    for id in 0..config.jobs {
        let shared = SharedState::clone(&shared);
        let config = config.clone();
        let buf = InputBuffer::new(&config.work_dir, max_input_sz)
            .with_context(|| format!("failed to create the input buffer for fuzzer-{}", id))?;
        let handle = thread::spawn(move || {
            let mut fuzzer = Fuzzer {
                shared,
                id,
                rng: RngType::from_entropy(),
                buf,
                static_file_try_more: false,
                orig_file_name: String::new(),
                config,
            };
            fuzzer.fuzz_loop()
        });
        fuzzers.push(handle);
    }

    let mut err = None;
    for (i, f) in fuzzers.into_iter().enumerate() {
        if let Ok(Err(e)) = f.join() {
            if err.is_none() {
                err = Some("fuzzer exits with errors:".to_string());
            }

            let mut info = format!("\n\tfuzzer-{}: {}", i, e);
            for (i, cause) in e.chain().enumerate() {
                let cause = format!("\n\t\t{}. {}", i, cause);
                info.push_str(&cause);
            }
            err.as_mut().unwrap().push_str(&info);
        }
    }
    if let Some(err) = err {
        Err(anyhow::anyhow!(err))
    } else {
        log::info!("all done");
        Ok(())
    }
}

fn setup_signal_handler() {
    use signal_hook::consts::TERM_SIGNALS;
    use signal_hook::iterator::Signals;

    thread::spawn(move || {
        let mut signals = Signals::new(TERM_SIGNALS).unwrap();
        if let Some(signal) = signals.forever().next() {
            log::info!("signal {} received, stopping", signal);
            println!("please wait for the fuzzers to exit...");
            stop_req();
        }
    });
}

const EMBER: &str = r"
   ___  ____ ___  ___  ___  ____
  / _ \/ __ `__ \/ _ \/ _ \/ __/
 /  __/ / / / / /  __/  __/ /
 \___/_/ /_/ /_/\___/\___/_/
";
