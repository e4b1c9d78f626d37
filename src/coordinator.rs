use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::context::ExecutionContext;
use crate::launcher::Command;
use crate::supervisor::{run_with_timeout, ExecutionResult};

/// One program run inside a test group
#[derive(Debug, Clone)]
pub struct Invocation {
  command: Command,
  creator: bool,
  timeout: Duration,
}

/// Invocations that share FIFOs and message queues and run side by side
#[derive(Debug, Clone)]
pub struct TestGroup {
  name: String,
  invocations: Vec<Invocation>,
}

/// An invocation paired with what its run produced
#[derive(Debug, Clone)]
pub struct InvocationResult {
  invocation: Invocation,
  result: ExecutionResult,
}

impl Invocation {
  pub fn new(command: Command, timeout: Duration) -> Self {
    Invocation {
      command,
      creator: false,
      timeout,
    }
  }

  /// Mark as the program that sets up the group's shared resources
  pub fn creator(mut self) -> Self {
    self.creator = true;
    self
  }

  pub fn command(&self) -> &Command {
    &self.command
  }

  pub fn is_creator(&self) -> bool {
    self.creator
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  /// File name of the executable
  pub fn program_name(&self) -> String {
    self
      .command
      .program()
      .file_name()
      .map(|n| n.to_string_lossy().to_string())
      .unwrap_or_else(|| self.command.program().to_string_lossy().to_string())
  }
}

impl TestGroup {
  pub fn new<S: Into<String>>(name: S) -> Self {
    TestGroup {
      name: name.into(),
      invocations: vec![],
    }
  }

  pub fn invocation(mut self, invocation: Invocation) -> Self {
    self.invocations.push(invocation);
    self
  }

  /// Keep only the invocations `keep` accepts, in their original order
  pub fn retain<F: FnMut(&Invocation) -> bool>(mut self, keep: F) -> Self {
    self.invocations.retain(keep);
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn invocations(&self) -> &Vec<Invocation> {
    &self.invocations
  }
}

impl InvocationResult {
  pub fn invocation(&self) -> &Invocation {
    &self.invocation
  }

  pub fn result(&self) -> &ExecutionResult {
    &self.result
  }
}

/// Run every invocation of `group` on its own worker thread and join them all.
///
/// Launch order follows the group order. After a creator is started the next
/// launch waits `creator_delay`. A failing worker never stops its siblings.
/// Results come back in launch order; invocations skipped because of
/// cancellation are absent.
pub fn run_group(ctx: &ExecutionContext, group: &TestGroup) -> Vec<InvocationResult> {
  info!("Running test group {} ({} programs)", group.name, group.invocations.len());

  let results = thread::scope(|scope| {
    let mut workers = vec![];
    for (index, invocation) in group.invocations.iter().enumerate() {
      if ctx.is_cancelled() {
        warn!("Cancelled before launching {}", invocation.command.display());
        break;
      }
      info!("Running {}", invocation.command.display());

      let spawned = thread::Builder::new()
        .name(format!("{}-{}", group.name, index))
        .spawn_scoped(scope, move || {
          debug!("Thread {:?} executing command: {}", thread::current().id(), invocation.command.display());
          run_with_timeout(ctx, &invocation.command, invocation.timeout)
        });
      match spawned {
        Ok(worker) => workers.push((invocation, Some(worker))),
        Err(err) => {
          error!("Can not start worker for {}: {}", invocation.command.display(), err);
          workers.push((invocation, None));
          continue;
        }
      }

      let is_last = index + 1 == group.invocations.len();
      if invocation.creator && !is_last {
        info!("Waiting after starting creator program {}", invocation.program_name());
        pause(ctx, ctx.creator_delay());
      }
    }

    workers
      .into_iter()
      .map(|(invocation, worker)| {
        let result = match worker {
          Some(worker) => worker.join().unwrap_or_else(|_| {
            error!("Worker for {} panicked", invocation.command.display());
            ExecutionResult::launch_error("worker panicked", Duration::ZERO)
          }),
          None => ExecutionResult::launch_error("worker thread could not be started", Duration::ZERO),
        };
        InvocationResult {
          invocation: invocation.clone(),
          result,
        }
      })
      .collect::<Vec<_>>()
  });

  info!("Test group {} finished", group.name);
  results
}

/// Sleep that wakes early on cancellation
fn pause(ctx: &ExecutionContext, delay: Duration) {
  let deadline = Instant::now() + delay;
  while !ctx.is_cancelled() {
    let now = Instant::now();
    if now >= deadline {
      break;
    }
    thread::sleep(ctx.poll_interval().min(deadline - now));
  }
}
