use std::process::ExitStatus;
use std::time::Duration;

use log::{debug, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};

use crate::error::GraderError;
use crate::launcher::ProcessHandle;
use crate::pipe::{Chunk, OutputPipe};

const CHUNK_SIZE: usize = 1024;

/// Accumulates a child's stdout and stderr up to a combined byte ceiling.
///
/// Bytes past the ceiling are still read from the pipes, so the child never
/// blocks on a full pipe, but they are thrown away.
pub struct OutputReader {
  stdout_pipe: Option<OutputPipe>,
  stderr_pipe: Option<OutputPipe>,
  stdout: Vec<u8>,
  stderr: Vec<u8>,
  limit: usize,
  truncated: bool,
}

/// Result of one bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pump {
  Running,
  Exited(ExitStatus),
}

impl OutputReader {
  /// Take over the output pipes of `handle`
  pub fn attach(handle: &mut ProcessHandle, limit: usize) -> Result<Self, GraderError> {
    let (stdout_pipe, stderr_pipe) = handle.take_output_pipes()?;
    Ok(OutputReader {
      stdout_pipe,
      stderr_pipe,
      stdout: vec![],
      stderr: vec![],
      limit,
      truncated: false,
    })
  }

  /// Wait at most `wait` for output, read what is there, then check for exit.
  pub fn pump(&mut self, handle: &mut ProcessHandle, wait: Duration) -> Result<Pump, GraderError> {
    self.wait_and_read(wait)?;

    if let Some(status) = handle.try_wait()? {
      self.drain()?;
      debug!(
        "Process {} exited, captured {} + {} bytes",
        handle.pid(),
        self.stdout.len(),
        self.stderr.len()
      );
      return Ok(Pump::Exited(status));
    }
    Ok(Pump::Running)
  }

  /// Pump until the child exits, without any deadline
  pub fn read_to_exit(&mut self, handle: &mut ProcessHandle, wait: Duration) -> Result<ExitStatus, GraderError> {
    loop {
      if let Pump::Exited(status) = self.pump(handle, wait)? {
        return Ok(status);
      }
    }
  }

  fn wait_and_read(&mut self, wait: Duration) -> Result<(), GraderError> {
    let mut fds = vec![];
    let mut owners = vec![];
    for (index, pipe) in [&self.stdout_pipe, &self.stderr_pipe].into_iter().enumerate() {
      if let Some(pipe) = pipe {
        if pipe.is_open() {
          fds.push(PollFd::new(pipe.raw_fd(), PollFlags::POLLIN));
          owners.push(index);
        }
      }
    }

    let timeout = wait.as_millis().min(i32::MAX as u128) as i32;
    let ready = match poll(&mut fds, timeout) {
      Ok(ready) => ready,
      Err(Errno::EINTR) => 0,
      Err(errno) => return Err(errno.into()),
    };
    if ready <= 0 {
      return Ok(());
    }

    let readable = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
    for (fd, index) in fds.iter().zip(owners) {
      let hit = fd.revents().map_or(false, |r| r.intersects(readable));
      if hit {
        self.read_one(index)?;
      }
    }
    Ok(())
  }

  /// Read everything still buffered after the child exited
  fn drain(&mut self) -> Result<(), GraderError> {
    for index in 0..2 {
      while !self.truncated {
        if self.read_one(index)? == Chunk::Empty {
          break;
        }
        if !self.pipe_open(index) {
          break;
        }
      }
    }
    Ok(())
  }

  fn pipe_open(&self, index: usize) -> bool {
    let pipe = if index == 0 { &self.stdout_pipe } else { &self.stderr_pipe };
    pipe.as_ref().map_or(false, |p| p.is_open())
  }

  fn read_one(&mut self, index: usize) -> Result<Chunk, GraderError> {
    let mut buf = [0u8; CHUNK_SIZE];
    let pipe = if index == 0 { &mut self.stdout_pipe } else { &mut self.stderr_pipe };
    let pipe = match pipe.as_mut() {
      Some(pipe) => pipe,
      None => return Ok(Chunk::Closed),
    };
    let was_open = pipe.is_open();
    let chunk = pipe.read_chunk(&mut buf)?;
    if was_open && chunk == Chunk::Closed {
      debug!("Child closed its {}", pipe.name());
    }
    if let Chunk::Data(size) = chunk {
      self.append(index, &buf[..size]);
    }
    Ok(chunk)
  }

  fn append(&mut self, index: usize, bytes: &[u8]) {
    let used = self.stdout.len() + self.stderr.len();
    let room = self.limit.saturating_sub(used);
    if bytes.len() > room && !self.truncated {
      self.truncated = true;
      warn!("Maximum output size reached. Further output will be discarded.");
    }
    let keep = &bytes[..bytes.len().min(room)];
    if index == 0 {
      self.stdout.extend_from_slice(keep);
    } else {
      self.stderr.extend_from_slice(keep);
    }
  }

  pub fn truncated(&self) -> bool {
    self.truncated
  }

  pub fn captured(&self) -> usize {
    self.stdout.len() + self.stderr.len()
  }

  /// Hand back the accumulated `(stdout, stderr)`, decoded lossily
  pub fn into_output(self) -> (String, String) {
    (
      String::from_utf8_lossy(&self.stdout).to_string(),
      String::from_utf8_lossy(&self.stderr).to_string(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::launcher::{launch, Command};

  const WAIT: Duration = Duration::from_millis(100);

  fn sh(script: &str) -> Command {
    Command::new("/bin/sh", vec!["-c", script])
  }

  #[test]
  fn it_should_capture_both_streams() {
    let mut handle = launch(&sh("echo out; echo err 1>&2")).unwrap();
    let mut reader = OutputReader::attach(&mut handle, 1024).unwrap();
    let status = reader.read_to_exit(&mut handle, WAIT).unwrap();
    assert!(status.success());
    let (stdout, stderr) = reader.into_output();
    assert_eq!(stdout, "out\n");
    assert_eq!(stderr, "err\n");
  }

  #[test]
  fn it_should_not_hang_when_one_stream_closes_early() {
    let mut handle = launch(&sh("exec 2>&-; sleep 0.3; echo late")).unwrap();
    let mut reader = OutputReader::attach(&mut handle, 1024).unwrap();
    reader.read_to_exit(&mut handle, WAIT).unwrap();
    let (stdout, stderr) = reader.into_output();
    assert_eq!(stdout, "late\n");
    assert_eq!(stderr, "");
  }

  #[test]
  fn it_should_stop_accumulating_at_limit() {
    let mut handle = launch(&sh("head -c 10000 /dev/zero")).unwrap();
    let mut reader = OutputReader::attach(&mut handle, 4000).unwrap();
    let status = reader.read_to_exit(&mut handle, WAIT).unwrap();
    assert!(status.success());
    assert!(reader.truncated());
    assert_eq!(reader.captured(), 4000);
  }

  #[test]
  fn it_should_return_running_while_child_is_alive() {
    let mut handle = launch(&sh("sleep 5")).unwrap();
    let mut reader = OutputReader::attach(&mut handle, 1024).unwrap();
    assert_eq!(reader.pump(&mut handle, Duration::from_millis(20)).unwrap(), Pump::Running);
    handle.kill().unwrap();
  }
}
