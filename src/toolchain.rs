use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::{debug, info};

use crate::context::ExecutionContext;
use crate::error::GraderError;
use crate::launcher::Command;
use crate::supervisor::{run_leak_check, ExecutionResult};

const CLEAN_RUN_MARKER: &str = "no leaks are possible";

/// Compiler exit and diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
  pub success: bool,
  pub stderr: String,
}

/// Leak check conclusion drawn from the memory checker's stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeakVerdict {
  Clean,
  Leaking,
}

/// External tools a subject's sources go through
pub trait Toolchain: Sync {
  /// Compile `sources` into `executable` with warnings and debug symbols
  fn compile(&self, sources: &[PathBuf], executable: &Path) -> Result<CompileOutput, GraderError>;

  /// Run `executable` under the memory checker
  fn check_memory(&self, ctx: &ExecutionContext, executable: &Path) -> ExecutionResult;
}

/// `gcc -Wall -g` and `valgrind --leak-check=summary`
#[derive(Debug, Clone)]
pub struct GccValgrind {
  compiler: PathBuf,
  checker: PathBuf,
}

impl GccValgrind {
  pub fn new() -> Self {
    GccValgrind {
      compiler: PathBuf::from("gcc"),
      checker: PathBuf::from("valgrind"),
    }
  }

  pub fn compiler<P: Into<PathBuf>>(mut self, path: P) -> Self {
    self.compiler = path.into();
    self
  }

  pub fn checker<P: Into<PathBuf>>(mut self, path: P) -> Self {
    self.checker = path.into();
    self
  }
}

impl Default for GccValgrind {
  fn default() -> Self {
    Self::new()
  }
}

impl Toolchain for GccValgrind {
  fn compile(&self, sources: &[PathBuf], executable: &Path) -> Result<CompileOutput, GraderError> {
    let mut cmd = std::process::Command::new(&self.compiler);
    cmd.arg("-Wall").arg("-g");
    for source in sources {
      cmd.arg(source);
    }
    cmd.arg("-o").arg(executable).stdin(Stdio::null());

    debug!("Compile {:?}", cmd);
    let output = cmd
      .output()
      .map_err(|err| GraderError::compile(format!("{}: {}", self.compiler.to_string_lossy(), err)))?;
    Ok(CompileOutput {
      success: output.status.success(),
      stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
  }

  fn check_memory(&self, ctx: &ExecutionContext, executable: &Path) -> ExecutionResult {
    info!("Running Valgrind on {}", executable.to_string_lossy());
    let command = Command::new(
      &self.checker,
      vec!["--leak-check=summary".to_string(), executable.to_string_lossy().to_string()],
    )
    .limits(ctx.leak_check_limits())
    .cwd(ctx.work_dir());
    run_leak_check(ctx, &command, ctx.leak_check_timeout())
  }
}

impl LeakVerdict {
  /// Read valgrind's leak summary.
  ///
  /// Prefers the numeric `definitely lost` / `indirectly lost` /
  /// `possibly lost` lines and falls back to the "no leaks are possible"
  /// phrase. Empty stderr means there is nothing to judge and counts as clean.
  pub fn from_stderr(stderr: &str) -> Self {
    if stderr.trim().is_empty() || stderr.contains(CLEAN_RUN_MARKER) {
      return LeakVerdict::Clean;
    }

    let lost = ["definitely lost:", "indirectly lost:", "possibly lost:"]
      .iter()
      .map(|label| lost_bytes(stderr, label))
      .collect::<Vec<Option<u64>>>();
    match lost.as_slice() {
      [Some(0), Some(0), Some(0)] => LeakVerdict::Clean,
      _ => LeakVerdict::Leaking,
    }
  }

  pub fn is_leaking(&self) -> bool {
    *self == LeakVerdict::Leaking
  }
}

/// Byte count after `label`, e.g. `==1== definitely lost: 1,024 bytes in 2 blocks`
fn lost_bytes(stderr: &str, label: &str) -> Option<u64> {
  let line = stderr.lines().find(|line| line.contains(label))?;
  let (_, rest) = line.split_once(label)?;
  let number = rest.trim_start().split_whitespace().next()?;
  number.replace(',', "").parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn it_should_accept_clean_marker() {
    let stderr = "==42== HEAP SUMMARY:\n==42==     in use at exit: 0 bytes in 0 blocks\n==42== All heap blocks were freed -- no leaks are possible\n";
    assert_eq!(LeakVerdict::from_stderr(stderr), LeakVerdict::Clean);
  }

  #[test]
  fn it_should_treat_empty_stderr_as_clean() {
    assert_eq!(LeakVerdict::from_stderr(""), LeakVerdict::Clean);
  }

  #[test]
  fn it_should_read_leak_summary_numbers() {
    let leaking = "==7== LEAK SUMMARY:\n==7==    definitely lost: 1,024 bytes in 2 blocks\n==7==    indirectly lost: 0 bytes in 0 blocks\n==7==      possibly lost: 0 bytes in 0 blocks\n";
    assert!(LeakVerdict::from_stderr(leaking).is_leaking());

    let reachable_only = "==7== LEAK SUMMARY:\n==7==    definitely lost: 0 bytes in 0 blocks\n==7==    indirectly lost: 0 bytes in 0 blocks\n==7==      possibly lost: 0 bytes in 0 blocks\n==7==    still reachable: 72 bytes in 1 blocks\n";
    assert_eq!(LeakVerdict::from_stderr(reachable_only), LeakVerdict::Clean);
  }

  #[test]
  fn it_should_flag_unrecognised_output() {
    assert!(LeakVerdict::from_stderr("valgrind: failed to start tool 'memcheck'\n").is_leaking());
  }
}
