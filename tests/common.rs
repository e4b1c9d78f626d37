#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard, Once};
use std::time::Duration;

use flexi_logger::Logger;
use ipcgrade::ExecutionContext;

static INIT: Once = Once::new();
static QUEUE_LOCK: Mutex<()> = Mutex::new(());

/// Held by every test that creates or reclaims message queues, since
/// reclaiming removes all queues of the user
pub fn queue_lock() -> MutexGuard<'static, ()> {
  QUEUE_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn setup() {
  INIT.call_once(|| {
    Logger::try_with_str("ipcgrade=debug,info")
      .unwrap()
      .start()
      .unwrap();
  });
}

/// Context with timings short enough for tests
pub fn quick_context() -> ExecutionContext {
  ExecutionContext::builder()
    .timeout(Duration::from_secs(1))
    .short_timeout(Duration::from_secs(1))
    .grace_period(Duration::from_millis(300))
    .poll_interval(Duration::from_millis(20))
    .creator_delay(Duration::from_millis(50))
    .build()
}

/// First line of `text` parsed as a pid
pub fn first_pid(text: &str) -> Option<i32> {
  text.lines().next()?.trim().parse().ok()
}

/// Whether `pid` names a live process; zombies waiting for a reaper count as gone
pub fn is_running(pid: i32) -> bool {
  if nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_err() {
    return false;
  }
  match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
    Ok(stat) => stat
      .rsplit_once(") ")
      .and_then(|(_, rest)| rest.chars().next())
      .map_or(false, |state| state != 'Z'),
    Err(_) => false,
  }
}

/// Poll until `pid` is gone; signals are delivered asynchronously
pub fn gone_within(pid: i32, limit: Duration) -> bool {
  let deadline = std::time::Instant::now() + limit;
  while std::time::Instant::now() < deadline {
    if !is_running(pid) {
      return true;
    }
    std::thread::sleep(Duration::from_millis(20));
  }
  !is_running(pid)
}
