use std::fmt::Display;
use std::process::ExitStatus;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use nix::sys::signal::Signal;

use crate::context::ExecutionContext;
use crate::error::GraderError;
use crate::launcher::{launch, Command, ProcessHandle};
use crate::reader::{OutputReader, Pump};

/// Why an execution did not run to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
  TimedOut,
  LaunchError(String),
  Cancelled,
}

/// Outcome of one launched process. Exactly one is produced per launch.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
  stdout: String,
  stderr: String,
  failure: Option<FailureReason>,
  exit_status: Option<ExitStatus>,
  truncated: bool,
  elapsed: Duration,
}

enum Stop {
  Exited(ExitStatus),
  Deadline,
  Cancelled,
}

impl Display for FailureReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      FailureReason::TimedOut => f.write_str("Execution timed out."),
      FailureReason::LaunchError(msg) => f.write_str(msg),
      FailureReason::Cancelled => f.write_str("Execution cancelled."),
    }
  }
}

impl ExecutionResult {
  /// A finished result, for callers that ran the process some other way
  pub fn new<SO: Into<String>, SE: Into<String>>(stdout: SO, stderr: SE, failure: Option<FailureReason>) -> Self {
    ExecutionResult {
      stdout: stdout.into(),
      stderr: stderr.into(),
      failure,
      exit_status: None,
      truncated: false,
      elapsed: Duration::ZERO,
    }
  }

  pub(crate) fn launch_error<MS: Into<String>>(msg: MS, elapsed: Duration) -> Self {
    ExecutionResult {
      stdout: String::new(),
      stderr: String::new(),
      failure: Some(FailureReason::LaunchError(msg.into())),
      exit_status: None,
      truncated: false,
      elapsed,
    }
  }

  pub fn stdout(&self) -> &str {
    &self.stdout
  }

  pub fn stderr(&self) -> &str {
    &self.stderr
  }

  pub fn failure(&self) -> Option<&FailureReason> {
    self.failure.as_ref()
  }

  pub fn is_completed(&self) -> bool {
    self.failure.is_none()
  }

  pub fn is_timed_out(&self) -> bool {
    self.failure == Some(FailureReason::TimedOut)
  }

  pub fn exit_status(&self) -> Option<ExitStatus> {
    self.exit_status
  }

  pub fn truncated(&self) -> bool {
    self.truncated
  }

  pub fn elapsed(&self) -> Duration {
    self.elapsed
  }
}

/// Run `command` with incremental output capture and a wall-clock deadline.
///
/// On deadline or cancellation the process group gets SIGINT, then SIGKILL
/// after the grace period, and is always reaped. Output captured so far is
/// kept. Spawn or read errors yield `LaunchError` with no output.
pub fn run_with_timeout(ctx: &ExecutionContext, command: &Command, timeout: Duration) -> ExecutionResult {
  let start = Instant::now();
  let mut handle = match launch(command) {
    Ok(handle) => handle,
    Err(err) => {
      error!("Error running {}: {}", command.display(), err);
      return ExecutionResult::launch_error(err.to_string(), start.elapsed());
    }
  };

  match supervise(ctx, &mut handle, start, timeout) {
    Ok((stop, reader)) => {
      let truncated = reader.truncated();
      let (stdout, stderr) = reader.into_output();
      let (failure, exit_status) = match stop {
        Stop::Exited(status) => {
          info!("Completed {} with PID: {} ({})", command.display(), handle.pid(), status);
          (None, Some(status))
        }
        Stop::Deadline => {
          info!("Terminated {} due to timeout.", command.display());
          (Some(FailureReason::TimedOut), handle.exit_status())
        }
        Stop::Cancelled => {
          info!("Terminated {} due to cancellation.", command.display());
          (Some(FailureReason::Cancelled), handle.exit_status())
        }
      };
      ExecutionResult {
        stdout,
        stderr,
        failure,
        exit_status,
        truncated,
        elapsed: start.elapsed(),
      }
    }
    Err(err) => {
      error!("Error running {}: {}", command.display(), err);
      if let Err(err) = handle.kill() {
        warn!("Killing {} fails: {}", handle.pid(), err);
      }
      ExecutionResult::launch_error(err.to_string(), start.elapsed())
    }
  }
}

fn supervise(
  ctx: &ExecutionContext,
  handle: &mut ProcessHandle,
  start: Instant,
  timeout: Duration,
) -> Result<(Stop, OutputReader), GraderError> {
  let mut reader = OutputReader::attach(handle, ctx.output_limit())?;
  loop {
    if start.elapsed() > timeout {
      warn!("Timeout expired running {}, attempting to terminate...", handle.label());
      terminate(ctx, handle)?;
      return Ok((Stop::Deadline, reader));
    }
    if ctx.is_cancelled() {
      warn!("Cancellation requested while running {}", handle.label());
      terminate(ctx, handle)?;
      return Ok((Stop::Cancelled, reader));
    }

    let remaining = timeout.saturating_sub(start.elapsed());
    if let Pump::Exited(status) = reader.pump(handle, ctx.poll_interval().min(remaining))? {
      return Ok((Stop::Exited(status), reader));
    }
  }
}

/// SIGINT to the group, wait out the grace period, then SIGKILL and reap
fn terminate(ctx: &ExecutionContext, handle: &mut ProcessHandle) -> Result<(), GraderError> {
  handle.signal_group(Signal::SIGINT)?;

  let deadline = Instant::now() + ctx.grace_period();
  while Instant::now() < deadline {
    if handle.try_wait()?.is_some() {
      break;
    }
    thread::sleep(ctx.poll_interval().min(deadline.saturating_duration_since(Instant::now())));
  }

  // Stragglers in the group are killed even when the leader already left.
  handle.signal_group(Signal::SIGKILL)?;
  handle.wait()?;
  Ok(())
}

/// Blocking run used for the memory checker: no incremental reads, just
/// wait for full output with a deadline.
///
/// On timeout the leader gets SIGINT and one more grace period; if it is
/// still hung it gets SIGTERM and is left to the waiting thread to reap.
pub fn run_leak_check(ctx: &ExecutionContext, command: &Command, timeout: Duration) -> ExecutionResult {
  let start = Instant::now();
  let handle = match launch(command) {
    Ok(handle) => handle,
    Err(err) => {
      error!("Error running {}: {}", command.display(), err);
      return ExecutionResult::launch_error(err.to_string(), start.elapsed());
    }
  };
  let pid = handle.pid();
  let label = command.display();
  info!("Running leak check {} with PID: {}", label, pid);

  let child = match handle.into_child() {
    Some(child) => child,
    None => return ExecutionResult::launch_error(format!("{}: no child process", label), start.elapsed()),
  };

  let (tx, rx) = mpsc::channel();
  let spawned = thread::Builder::new()
    .name(format!("leak-check-{}", pid))
    .spawn(move || {
      let _ = tx.send(child.wait_with_output());
    });
  if let Err(err) = spawned {
    error!("Can not start waiter for {}: {}", label, err);
    let _ = nix::sys::signal::kill(pid, Signal::SIGKILL);
    return ExecutionResult::launch_error(err.to_string(), start.elapsed());
  }

  let completed = |output: std::process::Output, failure: Option<FailureReason>| ExecutionResult {
    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    failure,
    exit_status: Some(output.status),
    truncated: false,
    elapsed: start.elapsed(),
  };

  match rx.recv_timeout(timeout) {
    Ok(Ok(output)) => {
      info!("Leak check {} finished with {}", label, output.status);
      completed(output, None)
    }
    Ok(Err(err)) => {
      error!("Error running {}: {}", label, err);
      ExecutionResult::launch_error(err.to_string(), start.elapsed())
    }
    Err(_) => {
      warn!("Timeout expired running {}, attempting to terminate with SIGINT...", label);
      let _ = nix::sys::signal::kill(pid, Signal::SIGINT);
      match rx.recv_timeout(ctx.grace_period()) {
        Ok(Ok(output)) => completed(output, Some(FailureReason::TimedOut)),
        _ => {
          warn!("Process {} did not terminate after SIGINT, sending SIGTERM", pid);
          let _ = nix::sys::signal::kill(pid, Signal::SIGTERM);
          ExecutionResult {
            stdout: String::new(),
            stderr: String::new(),
            failure: Some(FailureReason::TimedOut),
            exit_status: None,
            truncated: false,
            elapsed: start.elapsed(),
          }
        }
      }
    }
  }
}
