use std::{
  error::Error,
  fmt::{Debug, Display},
  process::{ExitCode, Termination},
};

use flexi_logger::FlexiLoggerError;
use nix::{errno::Errno, libc::STDERR_FILENO, unistd::isatty};

pub enum GraderError {
  Launch(String),
  Read(String),
  Compile(String),
  Nix(Errno),
  Fs(String),
  Cli(String),
  Logger(FlexiLoggerError),
}

pub enum GraderExit {
  Ok,
  Err(GraderError),
}

impl GraderError {
  pub fn launch<MS: Into<String>>(msg: MS) -> GraderError {
    GraderError::Launch(msg.into())
  }

  pub fn read<MS: Into<String>>(msg: MS) -> GraderError {
    GraderError::Read(msg.into())
  }

  pub fn compile<MS: Into<String>>(msg: MS) -> GraderError {
    GraderError::Compile(msg.into())
  }

  pub fn fs<MS: Into<String>>(msg: MS) -> GraderError {
    GraderError::Fs(msg.into())
  }

  pub fn cli<MS: Into<String>>(msg: MS) -> GraderError {
    GraderError::Cli(msg.into())
  }
}

impl Debug for GraderError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    std::fmt::Display::fmt(&self, f)
  }
}

impl Display for GraderError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match &self {
      GraderError::Launch(msg) => f.write_fmt(format_args!("Launch Error: {}", msg)),
      GraderError::Read(msg) => f.write_fmt(format_args!("Read Error: {}", msg)),
      GraderError::Compile(msg) => f.write_fmt(format_args!("Compile Error: {}", msg)),
      GraderError::Nix(errno) => f.write_fmt(format_args!("Nix Error: {}", errno)),
      GraderError::Fs(msg) => f.write_fmt(format_args!("File System Error: {}", msg)),
      GraderError::Cli(msg) => f.write_fmt(format_args!("CLI Error: {}", msg)),
      GraderError::Logger(err) => f.write_fmt(format_args!("Logger Error: {}", err)),
    }
  }
}

impl From<Errno> for GraderError {
  fn from(errno: Errno) -> Self {
    GraderError::Nix(errno)
  }
}

impl From<std::io::Error> for GraderError {
  fn from(err: std::io::Error) -> Self {
    GraderError::Fs(err.to_string())
  }
}

impl From<FlexiLoggerError> for GraderError {
  fn from(err: FlexiLoggerError) -> Self {
    GraderError::Logger(err)
  }
}

impl Error for GraderError {}

impl From<Result<(), GraderError>> for GraderExit {
  fn from(result: Result<(), GraderError>) -> Self {
    match result {
      Ok(()) => GraderExit::Ok,
      Err(err) => GraderExit::Err(err),
    }
  }
}

impl Termination for GraderExit {
  fn report(self) -> ExitCode {
    match self {
      GraderExit::Ok => ExitCode::SUCCESS.report(),
      GraderExit::Err(err) => {
        let text = format!("{}", err);
        let text = match text.split_once(": ") {
          Some((prefix, message)) if isatty(STDERR_FILENO).unwrap_or(false) => {
            format!("\x1b[1m\x1b[91m{}\x1b[39m\x1b[22m  {}", prefix, message)
          }
          _ => text,
        };
        eprintln!("{}", text);
        ExitCode::FAILURE.report()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn it_should_prefix_error_kind() {
    let err = GraderError::launch("No such file or directory");
    assert_eq!(format!("{}", err), "Launch Error: No such file or directory");

    let err: GraderError = Errno::ESRCH.into();
    assert!(format!("{}", err).starts_with("Nix Error: "));
  }

  #[test]
  fn it_should_convert_io_error() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
    let err: GraderError = io.into();
    assert_eq!(format!("{:?}", err), "File System Error: missing");
  }
}
