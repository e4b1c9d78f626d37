use std::io::{ErrorKind, Write};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ExitStatus, Stdio};
use std::thread;

use log::{debug, info, warn};
use nix::errno::Errno;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

use crate::context::ResourceLimits;
use crate::error::GraderError;
use crate::pipe::OutputPipe;

/// One program invocation: executable, arguments and what to feed it
#[derive(Debug, Clone)]
pub struct Command {
  program: PathBuf,
  arguments: Vec<String>,
  input: Option<String>,
  limits: Option<ResourceLimits>,
  cwd: Option<PathBuf>,
}

/// A running child that leads its own process group.
///
/// Owned by exactly one supervisor. Dropping a handle that was never reaped
/// kills the whole group and waits for the leader.
pub struct ProcessHandle {
  child: Option<Child>,
  pid: Pid,
  label: String,
  status: Option<ExitStatus>,
}

impl Command {
  pub fn new<P: Into<PathBuf>, AS: Into<String>>(program: P, arguments: Vec<AS>) -> Self {
    Command {
      program: program.into(),
      arguments: arguments.into_iter().map(|a| a.into()).collect(),
      input: None,
      limits: None,
      cwd: None,
    }
  }

  /// Text written to the child's stdin before it is closed
  pub fn input<S: Into<String>>(mut self, text: S) -> Self {
    self.input = Some(text.into());
    self
  }

  pub fn set_input(mut self, text: Option<String>) -> Self {
    self.input = text;
    self
  }

  /// Apply CPU time and address space limits before exec
  pub fn limits(mut self, limits: ResourceLimits) -> Self {
    self.limits = Some(limits);
    self
  }

  pub fn cwd<P: Into<PathBuf>>(mut self, path: P) -> Self {
    self.cwd = Some(path.into());
    self
  }

  pub fn program(&self) -> &Path {
    &self.program
  }

  pub fn arguments(&self) -> &Vec<String> {
    &self.arguments
  }

  pub fn get_input(&self) -> Option<&str> {
    self.input.as_deref()
  }

  pub fn get_limits(&self) -> Option<ResourceLimits> {
    self.limits
  }

  /// Program followed by its arguments, for logs and reports
  pub fn display(&self) -> String {
    let mut parts = vec![self.program.to_string_lossy().to_string()];
    parts.extend(self.arguments.iter().cloned());
    parts.join(" ")
  }
}

/// Start `command` as a new process group leader with all stdio piped.
pub fn launch(command: &Command) -> Result<ProcessHandle, GraderError> {
  let mut cmd = std::process::Command::new(&command.program);
  cmd
    .args(&command.arguments)
    .stdin(Stdio::piped())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .process_group(0);
  if let Some(cwd) = &command.cwd {
    cmd.current_dir(cwd);
  }

  if let Some(limits) = command.limits {
    unsafe {
      cmd.pre_exec(move || {
        setrlimit(Resource::RLIMIT_CPU, limits.cpu_seconds, limits.cpu_seconds)
          .map_err(std::io::Error::from)?;
        setrlimit(Resource::RLIMIT_AS, limits.address_space, limits.address_space)
          .map_err(std::io::Error::from)?;
        Ok(())
      });
    }
  }

  let mut child = cmd
    .spawn()
    .map_err(|err| GraderError::launch(format!("{}: {}", command.display(), err)))?;
  let pid = Pid::from_raw(child.id() as i32);
  info!("Starting {} with PID: {}", command.display(), pid);

  if let Some(stdin) = child.stdin.take() {
    match &command.input {
      Some(text) => feed_stdin(stdin, text.clone(), pid),
      None => drop(stdin),
    }
  }

  Ok(ProcessHandle {
    child: Some(child),
    pid,
    label: command.display(),
    status: None,
  })
}

/// Write staged input on a side thread so a child that never reads cannot
/// stall the supervisor. The pipe closes when the thread finishes.
fn feed_stdin(mut stdin: ChildStdin, text: String, pid: Pid) {
  let spawned = thread::Builder::new()
    .name(format!("stdin-{}", pid))
    .spawn(move || match stdin.write_all(text.as_bytes()) {
      Ok(()) => debug!("Wrote {} bytes to stdin of {}", text.len(), pid),
      Err(err) if err.kind() == ErrorKind::BrokenPipe => {
        debug!("Process {} closed stdin before reading all input", pid)
      }
      Err(err) => warn!("Writing stdin of {} fails: {}", pid, err),
    });
  if let Err(err) = spawned {
    warn!("Can not start stdin writer for {}: {}", pid, err);
  }
}

impl ProcessHandle {
  pub fn pid(&self) -> Pid {
    self.pid
  }

  /// Equal to the pid, the child leads its own group
  pub fn pgid(&self) -> Pid {
    self.pid
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn exit_status(&self) -> Option<ExitStatus> {
    self.status
  }

  pub fn is_reaped(&self) -> bool {
    self.status.is_some() || self.child.is_none()
  }

  /// Move the stdout and stderr pipes out of the child in non-blocking mode
  pub(crate) fn take_output_pipes(&mut self) -> Result<(Option<OutputPipe>, Option<OutputPipe>), GraderError> {
    let child = match self.child.as_mut() {
      Some(child) => child,
      None => return Ok((None, None)),
    };
    let stdout = match child.stdout.take() {
      Some(fd) => Some(OutputPipe::new("stdout", fd)?),
      None => None,
    };
    let stderr = match child.stderr.take() {
      Some(fd) => Some(OutputPipe::new("stderr", fd)?),
      None => None,
    };
    Ok((stdout, stderr))
  }

  /// Non-blocking check for exit; reaps the child when it has exited
  pub fn try_wait(&mut self) -> Result<Option<ExitStatus>, GraderError> {
    if self.status.is_some() {
      return Ok(self.status);
    }
    match self.child.as_mut() {
      Some(child) => {
        let status = child.try_wait()?;
        if status.is_some() {
          self.status = status;
        }
        Ok(status)
      }
      None => Ok(None),
    }
  }

  /// Block until the child exits and reap it
  pub fn wait(&mut self) -> Result<ExitStatus, GraderError> {
    if let Some(status) = self.status {
      return Ok(status);
    }
    match self.child.as_mut() {
      Some(child) => {
        let status = child.wait()?;
        self.status = Some(status);
        Ok(status)
      }
      None => Err(GraderError::launch(format!("{} was handed off", self.label))),
    }
  }

  /// Signal the whole process group. A group that is already gone is not an error.
  pub fn signal_group(&self, signal: Signal) -> Result<(), GraderError> {
    match killpg(self.pid, signal) {
      Ok(()) | Err(Errno::ESRCH) => Ok(()),
      Err(errno) => Err(errno.into()),
    }
  }

  /// Signal only the group leader
  pub fn signal(&self, signal: Signal) -> Result<(), GraderError> {
    if self.status.is_some() {
      return Ok(());
    }
    match kill(self.pid, signal) {
      Ok(()) | Err(Errno::ESRCH) => Ok(()),
      Err(errno) => Err(errno.into()),
    }
  }

  /// SIGKILL the group and reap the leader
  pub fn kill(&mut self) -> Result<ExitStatus, GraderError> {
    self.signal_group(Signal::SIGKILL)?;
    self.wait()
  }

  /// Give up ownership of the raw child, for callers that wait on it elsewhere
  pub(crate) fn into_child(mut self) -> Option<Child> {
    self.child.take()
  }
}

impl Drop for ProcessHandle {
  fn drop(&mut self) {
    if self.status.is_some() {
      return;
    }
    if let Some(child) = self.child.as_mut() {
      warn!("Reaping abandoned process {} ({})", self.pid, self.label);
      if let Err(errno) = killpg(self.pid, Signal::SIGKILL) {
        debug!("killpg {} on drop: {}", self.pid, errno);
      }
      if let Err(err) = child.wait() {
        warn!("Waiting abandoned process {} fails: {}", self.pid, err);
      }
    }
  }
}
