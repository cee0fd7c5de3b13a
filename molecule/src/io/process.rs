//! Child-process helper with a wall-clock timeout and bounded output capture.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// What a finished (or killed) child left behind.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Lossy stderr, trimmed, for log and error messages.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Run `argv` with no stdin, killing it after `timeout`.
///
/// Both pipes are drained on reader threads while the child runs so a chatty
/// child cannot deadlock on a full pipe. At most `limit` bytes of each stream are
/// kept.
#[instrument(skip_all, fields(program = %argv.first().map(String::as_str).unwrap_or(""), timeout_secs = timeout.as_secs()))]
pub fn run_argv(argv: &[String], timeout: Duration, limit: usize) -> Result<CommandOutput> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = cmd.spawn().with_context(|| format!("spawn {program}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_reader = thread::spawn(move || drain_limited(stdout, limit));
    let stderr_reader = thread::spawn(move || drain_limited(stderr, limit));

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!("command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("wait command after kill")?, true)
        }
    };

    let stdout = join_reader(stdout_reader).context("join stdout")?;
    let stderr = join_reader(stderr_reader).context("join stderr")?;

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<Vec<u8>>>) -> Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn drain_limited<R: Read>(mut reader: R, limit: usize) -> Result<Vec<u8>> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 4096];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len()).min(n);
        kept.extend_from_slice(&chunk[..room]);
        dropped += n - room;
    }
    if dropped > 0 {
        debug!(dropped, "discarded output beyond limit");
    }
    Ok(kept)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn captures_stdout_and_status() {
        let out = run_argv(&argv(&["sh", "-c", "printf hello"]), Duration::from_secs(5), 1024)
            .expect("run");
        assert!(out.succeeded());
        assert_eq!(out.stdout, b"hello");
    }

    #[test]
    fn bounds_captured_output() {
        let out = run_argv(
            &argv(&["sh", "-c", "printf 0123456789"]),
            Duration::from_secs(5),
            4,
        )
        .expect("run");
        assert_eq!(out.stdout, b"0123");
    }

    #[test]
    fn kills_on_timeout() {
        let out = run_argv(&argv(&["sleep", "5"]), Duration::from_millis(100), 1024).expect("run");
        assert!(out.timed_out);
        assert!(!out.succeeded());
    }

    #[test]
    fn empty_argv_is_an_error() {
        assert!(run_argv(&[], Duration::from_secs(1), 16).is_err());
    }
}
