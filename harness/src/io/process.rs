//! Helpers for running child processes with timeouts and bounded output.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_truncated_notice(&self, label: &str) -> String {
        if self.stdout_truncated > 0 {
            format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            )
        } else {
            String::new()
        }
    }

    pub fn stderr_truncated_notice(&self, label: &str) -> String {
        if self.stderr_truncated > 0 {
            format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            )
        } else {
            String::new()
        }
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking
/// pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes`
/// bounds the amount of stdout/stderr stored in memory; bytes beyond the
/// limit are discarded while still draining the pipe. On timeout the child
/// is killed and `timed_out` is set.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().context("spawn child process")?;

    let stdout_reader = spawn_capped_reader(child.stdout.take(), output_limit_bytes);
    let stderr_reader = spawn_capped_reader(child.stderr.take(), output_limit_bytes);

    let (status, timed_out) = match child
        .wait_timeout(timeout)
        .context("wait for child process")?
    {
        Some(status) => (status, false),
        None => {
            warn!("child exceeded timeout, killing");
            kill_and_wait(&mut child)?
        }
    };

    let (stdout, stdout_truncated) = join_reader(stdout_reader);
    let (stderr, stderr_truncated) = join_reader(stderr_reader);

    debug!(exit_code = ?status.code(), timed_out, "child finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn kill_and_wait(child: &mut Child) -> Result<(ExitStatus, bool)> {
    child.kill().context("kill timed-out child")?;
    let status = child.wait().context("reap timed-out child")?;
    Ok((status, true))
}

type ReaderHandle = Option<thread::JoinHandle<(Vec<u8>, usize)>>;

fn spawn_capped_reader<R: Read + Send + 'static>(source: Option<R>, limit: usize) -> ReaderHandle {
    let mut source = source?;
    Some(thread::spawn(move || {
        let mut kept = Vec::new();
        let mut discarded = 0usize;
        let mut buf = [0u8; 8192];
        loop {
            match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let room = limit.saturating_sub(kept.len());
                    let take = room.min(n);
                    kept.extend_from_slice(&buf[..take]);
                    discarded += n - take;
                }
                Err(_) => break,
            }
        }
        (kept, discarded)
    }))
}

fn join_reader(handle: ReaderHandle) -> (Vec<u8>, usize) {
    match handle {
        Some(handle) => handle.join().unwrap_or_default(),
        None => (Vec::new(), 0),
    }
}
