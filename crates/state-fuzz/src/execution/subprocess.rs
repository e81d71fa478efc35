//! Plain subprocess execution backend.
//!
//! Feeds the input over stdin, merges stdout and stderr into one capture
//! pipe, enforces the per-run timeout with a kill signal, and maps
//! death-by-signal (or a configured crash exit code) to a crash outcome.
//! Produces no coverage artifacts; instrumented backends provide those
//! through the same [`Executor`] trait.

use std::{
    io::{self, Read, Write},
    os::unix::process::ExitStatusExt,
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use derive_new::new as New;
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tracing::debug;

use super::{ExecutionOutcome, Executor, ExecutorError, RawExecutionResult};
use crate::config::RunConfig;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, New)]
pub struct SubprocessExecutor {
    kill_signal: Signal,
}

impl Default for SubprocessExecutor {
    fn default() -> Self {
        Self::new(Signal::SIGKILL)
    }
}

impl Executor for SubprocessExecutor {
    fn run(
        &mut self,
        input: &[u8],
        config: &RunConfig,
    ) -> Result<RawExecutionResult, ExecutorError> {
        let timeout = config.per_run_timeout();

        let (mut reader, writer) = os_pipe::pipe().map_err(ExecutorError::Capture)?;
        let writer_clone = writer.try_clone().map_err(ExecutorError::Capture)?;

        let start = Instant::now();
        let mut child = Command::new(&config.target.binary_path)
            .args(&config.target.args)
            .stdin(Stdio::piped())
            .stdout(writer)
            .stderr(writer_clone)
            .spawn()
            .map_err(ExecutorError::Spawn)?;

        // Both pipe writers were moved into the child; our reader sees EOF
        // once the child exits.
        {
            let mut stdin = child.stdin.take().expect("stdin was piped");
            match stdin.write_all(input) {
                Ok(()) => {}
                Err(error) if error.kind() == io::ErrorKind::BrokenPipe => {
                    // The target died before consuming its input.
                }
                Err(error) => {
                    reap(&mut child, self.kill_signal);
                    return Err(ExecutorError::Stdin(error));
                }
            }
        }

        // Drain the capture pipe off-thread so a chatty target cannot fill
        // the pipe buffer and wedge the wait loop below.
        let capture = thread::spawn(move || {
            let mut buffer = Vec::new();
            reader.read_to_end(&mut buffer).map(|_| buffer)
        });

        let (status, timed_out) = self.wait_with_timeout(&mut child, timeout)?;
        let execution_time = start.elapsed();

        let stdout = capture
            .join()
            .expect("capture thread does not panic")
            .map_err(ExecutorError::Capture)?;

        let (outcome, crash_info) = if timed_out {
            (
                ExecutionOutcome::Timeout,
                Some(format!("timed out after {:.3}s", timeout.as_secs_f64())),
            )
        } else if let Some(reason) = crash_reason(status, config.target.crash_exit_code) {
            (ExecutionOutcome::Crash, Some(reason))
        } else {
            (ExecutionOutcome::Normal, None)
        };
        debug!(%outcome, ?execution_time, stdout_len = stdout.len(), "target finished");

        Ok(RawExecutionResult {
            outcome,
            execution_time,
            crash_info,
            stdout,
            ..RawExecutionResult::default()
        })
    }
}

impl SubprocessExecutor {
    fn wait_with_timeout(
        &self,
        child: &mut Child,
        timeout: Duration,
    ) -> Result<(ExitStatus, bool), ExecutorError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait().map_err(ExecutorError::Wait)? {
                return Ok((status, false));
            }
            if Instant::now() >= deadline {
                let pid = Pid::from_raw(child.id() as i32);
                match signal::kill(pid, self.kill_signal) {
                    // ESRCH: the child exited between try_wait and kill.
                    Ok(()) | Err(Errno::ESRCH) => {}
                    Err(source) => return Err(ExecutorError::Kill(source)),
                }
                let status = child.wait().map_err(ExecutorError::Wait)?;
                return Ok((status, true));
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }
}

fn crash_reason(status: ExitStatus, crash_exit_code: Option<i32>) -> Option<String> {
    if let Some(signal) = status.signal() {
        return Some(format!("terminated by signal {signal}"));
    }
    match (status.code(), crash_exit_code) {
        (Some(code), Some(crash)) if code == crash => {
            Some(format!("exited with crash exit code {code}"))
        }
        _ => None,
    }
}

fn reap(child: &mut Child, kill_signal: Signal) {
    let pid = Pid::from_raw(child.id() as i32);
    let _ = signal::kill(pid, kill_signal);
    let _ = child.wait();
}
