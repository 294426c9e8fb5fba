//! Running build-tool commands with a deadline and bounded output.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// What a finished (or killed) build command left behind.
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes dropped across both streams once the limit was reached.
    pub truncated: usize,
    pub timed_out: bool,
}

impl CapturedOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Combined stdout then stderr, lossily decoded, with a trailing note
    /// when the command was killed or its output clipped.
    pub fn log(&self) -> String {
        let mut log = String::from_utf8_lossy(&self.stdout).into_owned();
        if !self.stderr.is_empty() {
            if !log.is_empty() && !log.ends_with('\n') {
                log.push('\n');
            }
            log.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        if self.truncated > 0 {
            log.push_str(&format!("\n[output truncated {} bytes]\n", self.truncated));
        }
        if self.timed_out {
            log.push_str("\n[ERROR] command timed out and was killed\n");
        }
        log
    }
}

/// Run `cmd` to completion or until `timeout` elapses.
///
/// Both pipes are drained on their own threads while the child runs so a
/// chatty build cannot deadlock on a full pipe. At most `output_limit_bytes`
/// of each stream is kept.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_captured(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CapturedOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(program = ?cmd.get_program(), "spawning build command");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_reader = thread::spawn(move || drain_limited(stdout, output_limit_bytes));
    let stderr_reader = thread::spawn(move || drain_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_dropped) = join_reader(stdout_reader).context("join stdout")?;
    let (stderr, stderr_dropped) = join_reader(stderr_reader).context("join stderr")?;
    let truncated = stdout_dropped + stderr_dropped;
    if truncated > 0 {
        warn!(truncated, "command output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CapturedOutput {
        status,
        stdout,
        stderr,
        truncated,
        timed_out,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn drain_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        let keep = n.min(room);
        kept.extend_from_slice(&chunk[..keep]);
        dropped += n - keep;
    }

    Ok((kept, dropped))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_both_streams_in_order() {
        let out = run_captured(
            sh("echo out; echo err 1>&2"),
            Duration::from_secs(10),
            1024,
        )
        .expect("run");
        assert!(out.succeeded());
        assert_eq!(out.log(), "out\nerr\n");
    }

    #[test]
    fn non_zero_exit_is_not_success() {
        let out = run_captured(sh("exit 3"), Duration::from_secs(10), 1024).expect("run");
        assert!(!out.succeeded());
        assert_eq!(out.status.code(), Some(3));
    }

    #[test]
    fn output_beyond_limit_is_dropped_and_noted() {
        let out = run_captured(sh("printf 'abcdefghij'"), Duration::from_secs(10), 4)
            .expect("run");
        assert_eq!(out.stdout, b"abcd");
        assert_eq!(out.truncated, 6);
        assert!(out.log().contains("[output truncated 6 bytes]"));
    }

    #[test]
    fn slow_command_is_killed() {
        let out = run_captured(sh("sleep 5"), Duration::from_millis(100), 1024).expect("run");
        assert!(out.timed_out);
        assert!(!out.succeeded());
        assert!(out.log().contains("timed out"));
    }

    #[test]
    fn missing_program_is_an_error() {
        let err = run_captured(
            Command::new("definitely-not-a-real-program-xyz"),
            Duration::from_secs(1),
            16,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("spawn"));
    }
}
