use clap::Parser;
use ember_fuzzer::{boot, config::Config};
use env_logger::Env;
use std::path::PathBuf;

/// Coverage-guided fuzzer built around an evolving input corpus.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Settings {
    /// Directory with the initial input corpus.
    #[arg(long, short = 'i')]
    input: PathBuf,
    /// Directory for coverage-improving inputs (defaults to the input dir).
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    /// Directory receiving only inputs found during the main phase.
    #[arg(long)]
    covdir_new: Option<PathBuf>,
    /// Work directory for buffers, tmp files and crash artifacts.
    #[arg(long, short = 'W', default_value = ".")]
    workspace: PathBuf,
    /// Maximal size of files processed by the fuzzer (0 = derive from corpus).
    #[arg(long, short = 'F', default_value_t = 0)]
    max_file_size: usize,
    /// Parallel fuzzing jobs.
    #[arg(long, short = 'j', default_value_t = 4)]
    jobs: usize,
    /// Walk the corpus once and keep only coverage-retaining entries.
    #[arg(long, short = 'M')]
    minimize: bool,
    /// Dictionary file with tokens for the mutation engine.
    #[arg(long, short = 'w')]
    dict: Option<PathBuf>,
    /// Stack-hash blacklist file for crash suppression.
    #[arg(long, short = 'B')]
    blacklist: Option<PathBuf>,
    /// External command producing inputs instead of the dynamic corpus.
    #[arg(long, short = 'c')]
    ext_cmd: Option<String>,
    /// External command post-processing every prepared input.
    #[arg(long, short = 'p')]
    post_cmd: Option<String>,
    /// Fuzz a socket client; coverage inputs are not persisted.
    #[arg(long)]
    socket_fuzzer: bool,
    /// Target command line; `___FILE___` is replaced with the input path.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    target: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let settings = Settings::parse();

    let log_env = Env::new()
        .filter_or("EMBER_LOG", "info")
        .default_write_style_or("auto");
    env_logger::Builder::from_env(log_env)
        .format_timestamp(Some(env_logger::fmt::TimestampPrecision::Seconds))
        .init();

    let config = Config {
        input_dir: settings.input,
        output_dir: settings.output,
        covdir_new: settings.covdir_new,
        work_dir: settings.workspace,
        max_file_sz: settings.max_file_size,
        jobs: settings.jobs,
        minimize: settings.minimize,
        socket_fuzzer: settings.socket_fuzzer,
        external_command: settings.ext_cmd,
        post_external_command: settings.post_cmd,
        dictionary: settings.dict,
        blacklist: settings.blacklist,
        target: settings.target,
    };

    boot(config)
}
