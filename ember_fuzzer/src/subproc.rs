//! Synchronous execution of helper commands and targets.

use anyhow::Context;
use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Output, Stdio};

/// Run `argv` to completion with inherited stdio; returns the exit code
/// (negative when the child died on a signal).
pub fn system(argv: &[String]) -> anyhow::Result<i32> {
    anyhow::ensure!(!argv.is_empty(), "empty command line");
    let status = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .status()
        .with_context(|| format!("failed to spawn '{}'", argv[0]))?;
    Ok(exit_code(&status))
}

/// Run `argv` with stderr captured; `stdin_data`, when given, is piped into
/// the child.
pub fn system_capture(argv: &[String], stdin_data: Option<&[u8]>) -> anyhow::Result<Output> {
    anyhow::ensure!(!argv.is_empty(), "empty command line");
    let mut child = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(if stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn '{}'", argv[0]))?;
    if let Some(data) = stdin_data {
        if let Some(mut stdin) = child.stdin.take() {
            // The child may exit without draining its stdin.
            let _ = stdin.write_all(data);
        }
    }
    child
        .wait_with_output()
        .with_context(|| format!("failed to wait for '{}'", argv[0]))
}

pub fn exit_code(status: &ExitStatus) -> i32 {
    status.code().unwrap_or_else(|| -status.signal().unwrap_or(0))
}

/// The signal that killed the child, if any.
pub fn signal_of(status: &ExitStatus) -> Option<i32> {
    status.signal()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(cmd: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), cmd.to_string()]
    }

    #[test]
    fn exit_codes_are_reported() {
        assert_eq!(system(&sh("exit 0")).unwrap(), 0);
        assert_eq!(system(&sh("exit 7")).unwrap(), 7);
    }

    #[test]
    fn signal_death_is_visible() {
        let out = system_capture(&sh("kill -SEGV $$"), None).unwrap();
        assert_eq!(signal_of(&out.status), Some(11)); // SIGSEGV
        assert!(exit_code(&out.status) < 0);
    }

    #[test]
    fn stdin_reaches_the_child() {
        let out = system_capture(&sh("cat >&2"), Some(b"ping")).unwrap();
        assert_eq!(out.stderr, b"ping");
    }
}
