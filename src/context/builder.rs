use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::context::{Cancellation, ExecutionContext, ResourceLimits};

/// Build ExecutionContext
pub struct ExecutionContextBuilder {
  work_dir: Option<PathBuf>,
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
  cancellation: Option<Cancellation>,
}

impl ExecutionContextBuilder {
  pub fn new() -> Self {
    ExecutionContextBuilder {
      work_dir: None,
      timeout: Duration::from_secs(120),
      short_timeout: Duration::from_secs(12),
      short_timeout_programs: vec!["ex4c1".into(), "ex4c2".into(), "ex4c3".into()],
      output_limit: 1024 * 1024,
      poll_interval: Duration::from_millis(100),
      grace_period: Duration::from_secs(2),
      creator_delay: Duration::from_secs(5),
      leak_check_timeout: Duration::from_secs(30),
      leak_check_limits: ResourceLimits::default(),
      fifo_names: vec!["fifom".into(), "fifo1".into(), "fifo2".into()],
      cancellation: None,
    }
  }

  /// Build ExecutionContext after setting all the options
  pub fn build(self) -> ExecutionContext {
    let work_dir = self
      .work_dir
      .unwrap_or_else(|| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    ExecutionContext {
      work_dir,
      timeout: self.timeout,
      short_timeout: self.short_timeout,
      short_timeout_programs: self.short_timeout_programs,
      output_limit: self.output_limit,
      poll_interval: self.poll_interval,
      grace_period: self.grace_period,
      creator_delay: self.creator_delay,
      leak_check_timeout: self.leak_check_timeout,
      leak_check_limits: self.leak_check_limits,
      fifo_names: self.fifo_names,
      cancellation: self.cancellation.unwrap_or_default(),
    }
  }

  /// Set the directory student programs run in
  pub fn work_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
    self.work_dir = Some(path.into());
    self
  }

  /// Set default deadline
  pub fn timeout(mut self, value: Duration) -> Self {
    self.timeout = value;
    self
  }

  /// Set deadline for short interactive programs
  pub fn short_timeout(mut self, value: Duration) -> Self {
    self.short_timeout = value;
    self
  }

  /// Replace the programs that get the short deadline
  pub fn short_timeout_programs<S: Into<String>>(mut self, names: Vec<S>) -> Self {
    self.short_timeout_programs = names.into_iter().map(|n| n.into()).collect();
    self
  }

  /// Add one program that gets the short deadline
  pub fn short_timeout_program<S: Into<String>>(mut self, name: S) -> Self {
    self.short_timeout_programs.push(name.into());
    self
  }

  /// Set output ceiling (unit: bytes)
  pub fn output_limit(mut self, value: usize) -> Self {
    self.output_limit = value;
    self
  }

  pub fn poll_interval(mut self, value: Duration) -> Self {
    self.poll_interval = value;
    self
  }

  /// Set how long an interrupted process may take to exit
  pub fn grace_period(mut self, value: Duration) -> Self {
    self.grace_period = value;
    self
  }

  /// Set pause after starting a creator program
  pub fn creator_delay(mut self, value: Duration) -> Self {
    self.creator_delay = value;
    self
  }

  pub fn leak_check_timeout(mut self, value: Duration) -> Self {
    self.leak_check_timeout = value;
    self
  }

  pub fn leak_check_limits(mut self, limits: ResourceLimits) -> Self {
    self.leak_check_limits = limits;
    self
  }

  /// Replace the named pipe names removed by the reclaimer
  pub fn fifo_names<S: Into<String>>(mut self, names: Vec<S>) -> Self {
    self.fifo_names = names.into_iter().map(|n| n.into()).collect();
    self
  }

  /// Share an existing cancellation flag
  pub fn cancellation(mut self, cancellation: Cancellation) -> Self {
    self.cancellation = Some(cancellation);
    self
  }
}

impl Default for ExecutionContextBuilder {
  fn default() -> Self {
    Self::new()
  }
}
