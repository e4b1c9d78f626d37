use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use builder::ExecutionContextBuilder;

mod builder;

/// Shared stop flag, set by the process-wide signal handler
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

/// CPU time and address space caps applied to a child before exec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
  /// Seconds of CPU time
  pub cpu_seconds: u64,
  /// Bytes of virtual address space
  pub address_space: u64,
}

/// Configuration threaded through launcher, supervisor, coordinator and reclaimer.
///
/// Built once by the driver and cloned into every worker; nothing in the
/// execution core mutates it afterwards except through [`Cancellation`].
#[derive(Debug, Clone)]
pub struct ExecutionContext {
  /// Directory student programs run in; their FIFOs are created here
  work_dir: PathBuf,
  timeout: Duration,
  short_timeout: Duration,
  short_timeout_programs: Vec<String>,
  output_limit: usize,
  poll_interval: Duration,
  grace_period: Duration,
  creator_delay: Duration,
  leak_check_timeout: Duration,
  leak_check_limits: ResourceLimits,
  fifo_names: Vec<String>,
  cancellation: Cancellation,
}

impl Cancellation {
  pub fn new() -> Self {
    Cancellation(Arc::new(AtomicBool::new(false)))
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }

  pub(crate) fn flag(&self) -> Arc<AtomicBool> {
    self.0.clone()
  }
}

impl ResourceLimits {
  pub fn new(cpu_seconds: u64, address_space: u64) -> Self {
    ResourceLimits {
      cpu_seconds,
      address_space,
    }
  }
}

impl Default for ResourceLimits {
  fn default() -> Self {
    ResourceLimits::new(30, 256 * 1024 * 1024)
  }
}

impl ExecutionContext {
  pub fn builder() -> ExecutionContextBuilder {
    ExecutionContextBuilder::new()
  }

  pub fn work_dir(&self) -> &Path {
    &self.work_dir
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  pub fn short_timeout(&self) -> Duration {
    self.short_timeout
  }

  /// Deadline for a program, matched on its file name.
  pub fn deadline_for<P: AsRef<Path>>(&self, program: P) -> Duration {
    let name = program
      .as_ref()
      .file_name()
      .map(|n| n.to_string_lossy().to_string())
      .unwrap_or_default();
    if self.short_timeout_programs.iter().any(|p| *p == name) {
      self.short_timeout
    } else {
      self.timeout
    }
  }

  /// Combined stdout + stderr bytes kept per execution
  pub fn output_limit(&self) -> usize {
    self.output_limit
  }

  pub fn poll_interval(&self) -> Duration {
    self.poll_interval
  }

  pub fn grace_period(&self) -> Duration {
    self.grace_period
  }

  pub fn creator_delay(&self) -> Duration {
    self.creator_delay
  }

  pub fn leak_check_timeout(&self) -> Duration {
    self.leak_check_timeout
  }

  pub fn leak_check_limits(&self) -> ResourceLimits {
    self.leak_check_limits
  }

  pub fn fifo_names(&self) -> &Vec<String> {
    &self.fifo_names
  }

  pub fn cancellation(&self) -> &Cancellation {
    &self.cancellation
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancellation.is_cancelled()
  }
}

impl Default for ExecutionContext {
  fn default() -> Self {
    ExecutionContextBuilder::new().build()
  }
}
