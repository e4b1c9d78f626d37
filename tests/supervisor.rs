use std::time::Duration;

use log::info;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

use ipcgrade::{run_with_timeout, Command, ExecutionContext, FailureReason};

mod common;

fn sh(script: &str) -> Command {
  Command::new("/bin/sh", vec!["-c", script])
}

#[test]
fn it_should_time_out_and_kill_hanging_program() {
  common::setup();
  let ctx = common::quick_context();

  let result = run_with_timeout(&ctx, &sh("echo $$; exec sleep 30"), Duration::from_millis(500));
  info!("Hanging program result: {:?}", result);

  assert_eq!(result.failure(), Some(&FailureReason::TimedOut));
  let pid = common::first_pid(result.stdout()).expect("partial output should hold the pid");
  assert_eq!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH));
  assert!(result.elapsed() < Duration::from_secs(5));
}

#[test]
fn it_should_escalate_when_interrupt_is_ignored() {
  common::setup();
  let ctx = common::quick_context();

  let result = run_with_timeout(&ctx, &sh("trap '' INT; echo $$; exec sleep 30"), Duration::from_millis(300));

  assert!(result.is_timed_out());
  let pid = common::first_pid(result.stdout()).unwrap();
  assert_eq!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH));
}

#[test]
fn it_should_kill_background_children_of_timed_out_program() {
  common::setup();
  let ctx = common::quick_context();

  let result = run_with_timeout(&ctx, &sh("sleep 30 & echo $!; wait"), Duration::from_millis(300));

  assert!(result.is_timed_out());
  let pid = common::first_pid(result.stdout()).unwrap();
  assert!(common::gone_within(pid, Duration::from_secs(2)));
}

#[test]
fn it_should_truncate_output_at_ceiling() {
  common::setup();
  let ctx = ExecutionContext::builder().output_limit(1024 * 1024).build();

  let result = run_with_timeout(&ctx, &sh("head -c 2097152 /dev/zero"), Duration::from_secs(30));

  assert!(result.is_completed());
  assert!(result.truncated());
  assert!(result.stdout().len() + result.stderr().len() <= 1024 * 1024);
  assert_eq!(result.exit_status().and_then(|s| s.code()), Some(0));
}

#[test]
fn it_should_feed_staged_input() {
  common::setup();
  let ctx = common::quick_context();
  let command = Command::new("/bin/cat", Vec::<String>::new()).input("p 1 2 3 0\nq 121\n");

  let result = run_with_timeout(&ctx, &command, Duration::from_secs(5));

  assert!(result.is_completed());
  assert_eq!(result.stdout(), "p 1 2 3 0\nq 121\n");
}

#[test]
fn it_should_give_eof_to_programs_without_input() {
  common::setup();
  let ctx = common::quick_context();

  let result = run_with_timeout(&ctx, &Command::new("/bin/cat", Vec::<String>::new()), Duration::from_secs(5));

  assert!(result.is_completed());
  assert_eq!(result.stdout(), "");
}

#[test]
fn it_should_keep_stderr_of_failing_program_without_failure() {
  common::setup();
  let ctx = common::quick_context();

  let result = run_with_timeout(&ctx, &sh("echo boom 1>&2; exit 4"), Duration::from_secs(5));

  assert!(result.is_completed());
  assert_eq!(result.stderr(), "boom\n");
  assert_eq!(result.exit_status().and_then(|s| s.code()), Some(4));
}
