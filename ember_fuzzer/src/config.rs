use anyhow::Context;
use std::env::current_dir;
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory with the initial input corpus.
    pub input_dir: PathBuf,
    /// Where coverage-improving inputs are written; input dir when unset.
    pub output_dir: Option<PathBuf>,
    /// Secondary directory receiving only finds made during the main phase.
    pub covdir_new: Option<PathBuf>,
    /// Work directory for input buffers, tmp files and crash artifacts.
    pub work_dir: PathBuf,
    /// Operator ceiling for input sizes; 0 leaves sizing to the corpus scan.
    pub max_file_sz: usize,
    /// Parallel fuzzing jobs.
    pub jobs: usize,
    /// Walk the corpus once and keep only coverage-retaining entries.
    pub minimize: bool,
    /// Socket-fuzzer mode never persists coverage inputs.
    pub socket_fuzzer: bool,
    /// External command producing inputs instead of the dynamic corpus.
    pub external_command: Option<String>,
    /// External command post-processing every prepared input.
    pub post_external_command: Option<String>,
    pub dictionary: Option<PathBuf>,
    pub blacklist: Option<PathBuf>,
    /// Target argv; `___FILE___` is replaced with the input path.
    pub target: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("in"),
            output_dir: None,
            covdir_new: None,
            work_dir: current_dir().unwrap(),
            max_file_sz: 0,
            jobs: 1,
            minimize: false,
            socket_fuzzer: false,
            external_command: None,
            post_external_command: None,
            dictionary: None,
            blacklist: None,
            target: Vec::new(),
        }
    }
}

impl Config {
    pub fn check(&mut self) -> anyhow::Result<()> {
        if !self.input_dir.is_dir() {
            anyhow::bail!("bad input dir: {}", self.input_dir.display());
        }
        if self.target.is_empty() && self.external_command.is_none() {
            anyhow::bail!("no target command given");
        }
        if self.jobs == 0 {
            anyhow::bail!("at least one fuzzing job is required");
        }
        if let Some(d) = self.dictionary.as_ref() {
            if !d.is_file() {
                anyhow::bail!("bad dictionary file: {}", d.display());
            }
        }
        if let Some(b) = self.blacklist.as_ref() {
            if !b.is_file() {
                anyhow::bail!("bad blacklist file: {}", b.display());
            }
        }
        if let Some(o) = self.output_dir.as_ref() {
            create_dir_all(o)
                .with_context(|| format!("failed to create output dir {}", o.display()))?;
        }
        if let Some(o) = self.covdir_new.as_ref() {
            create_dir_all(o)
                .with_context(|| format!("failed to create new-coverage dir {}", o.display()))?;
        }
        create_dir_all(&self.work_dir).with_context(|| {
            format!("failed to create work dir {}", self.work_dir.display())
        })?;
        Ok(())
    }

    /// Directory receiving coverage files.
    pub fn cov_dir(&self) -> &Path {
        self.output_dir.as_deref().unwrap_or(&self.input_dir)
    }

    pub fn crashes_dir(&self) -> PathBuf {
        self.work_dir.join("crashes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn check_creates_the_output_dirs() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in");
        std::fs::create_dir(&input).unwrap();

        let mut config = Config {
            input_dir: input.clone(),
            output_dir: Some(dir.path().join("out")),
            covdir_new: Some(dir.path().join("new")),
            work_dir: dir.path().join("work"),
            target: vec!["cat".to_string(), "___FILE___".to_string()],
            ..Config::default()
        };
        config.check().unwrap();
        assert!(dir.path().join("out").is_dir());
        assert!(dir.path().join("new").is_dir());
        assert!(dir.path().join("work").is_dir());
        assert_eq!(config.cov_dir(), dir.path().join("out"));
    }

    #[test]
    fn cov_dir_falls_back_to_the_input_dir() {
        let config = Config {
            input_dir: PathBuf::from("corpus"),
            ..Config::default()
        };
        assert_eq!(config.cov_dir(), Path::new("corpus"));
    }

    #[test]
    fn check_rejects_a_missing_input_dir() {
        let mut config = Config {
            input_dir: PathBuf::from("/nonexistent/corpus"),
            target: vec!["cat".to_string()],
            ..Config::default()
        };
        assert!(config.check().is_err());
    }
}
