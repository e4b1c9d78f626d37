use std::fs::File;
use std::io::{ErrorKind, Read};
use std::os::fd::OwnedFd;
use std::os::unix::prelude::{AsRawFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};

use crate::error::GraderError;

/// Read side of a child's stdout or stderr, switched to non-blocking mode
pub struct OutputPipe {
  name: &'static str,
  file: File,
  open: bool,
}

/// What a single non-blocking read produced
#[derive(Debug, PartialEq, Eq)]
pub enum Chunk {
  Data(usize),
  Empty,
  Closed,
}

impl OutputPipe {
  pub fn new<F: Into<OwnedFd>>(name: &'static str, fd: F) -> Result<Self, GraderError> {
    let file = File::from(fd.into());
    let flags = OFlag::from_bits_truncate(fcntl(file.as_raw_fd(), FcntlArg::F_GETFL)?);
    fcntl(file.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(OutputPipe {
      name,
      file,
      open: true,
    })
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn is_open(&self) -> bool {
    self.open
  }

  pub fn raw_fd(&self) -> RawFd {
    self.file.as_raw_fd()
  }

  /// Read whatever is available right now, never blocks
  pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<Chunk, GraderError> {
    if !self.open {
      return Ok(Chunk::Closed);
    }
    loop {
      match self.file.read(buf) {
        Ok(0) => {
          self.open = false;
          return Ok(Chunk::Closed);
        }
        Ok(size) => return Ok(Chunk::Data(size)),
        Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(Chunk::Empty),
        Err(err) if err.kind() == ErrorKind::Interrupted => continue,
        Err(err) => {
          self.open = false;
          return Err(GraderError::read(format!("{}: {}", self.name, err)));
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;
  use std::os::unix::net::UnixStream;

  use super::*;

  #[test]
  fn it_should_report_empty_then_data_then_closed() {
    let (mut writer, reader) = UnixStream::pair().unwrap();
    let mut pipe = OutputPipe::new("stdout", reader).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(pipe.name(), "stdout");

    assert_eq!(pipe.read_chunk(&mut buf).unwrap(), Chunk::Empty);

    writer.write_all(b"hello").unwrap();
    assert_eq!(pipe.read_chunk(&mut buf).unwrap(), Chunk::Data(5));
    assert_eq!(&buf[..5], b"hello");

    drop(writer);
    assert_eq!(pipe.read_chunk(&mut buf).unwrap(), Chunk::Closed);
    assert!(!pipe.is_open());
    assert_eq!(pipe.read_chunk(&mut buf).unwrap(), Chunk::Closed);
  }
}
