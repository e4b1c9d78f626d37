use std::time::{Duration, Instant};

use log::info;

use ipcgrade::{run_group, Command, FailureReason, Invocation, TestGroup};

mod common;

fn sh(script: &str) -> Command {
  Command::new("/bin/sh", vec!["-c", script])
}

#[test]
fn it_should_join_all_workers_when_one_times_out() {
  common::setup();
  let ctx = common::quick_context();
  let group = TestGroup::new("mixed")
    .invocation(Invocation::new(sh("echo $$; exec sleep 30"), Duration::from_millis(400)).creator())
    .invocation(Invocation::new(sh("echo zero"), Duration::from_secs(5)))
    .invocation(Invocation::new(sh("echo one 1>&2"), Duration::from_secs(5)));

  let results = run_group(&ctx, &group);
  info!("Group results: {:?}", results);

  assert_eq!(results.len(), 3);
  assert_eq!(results[0].result().failure(), Some(&FailureReason::TimedOut));
  let pid = common::first_pid(results[0].result().stdout()).unwrap();
  assert!(common::gone_within(pid, Duration::from_secs(2)));

  assert!(results[1].result().is_completed());
  assert_eq!(results[1].result().stdout(), "zero\n");
  assert!(results[2].result().is_completed());
  assert_eq!(results[2].result().stderr(), "one\n");
}

#[test]
fn it_should_run_producer_and_consumer_side_by_side() {
  common::setup();
  let dir = tempfile::tempdir().unwrap();
  let ctx = ipcgrade::ExecutionContext::builder()
    .work_dir(dir.path())
    .creator_delay(Duration::from_millis(100))
    .poll_interval(Duration::from_millis(20))
    .build();

  // The creator makes the fifo and reads from it; the sibling writes into it.
  let group = TestGroup::new("fifo")
    .invocation(Invocation::new(sh("mkfifo fifom && cat fifom").cwd(dir.path()), Duration::from_secs(10)).creator())
    .invocation(Invocation::new(sh("echo hello > fifom").cwd(dir.path()), Duration::from_secs(10)));

  let results = run_group(&ctx, &group);

  assert_eq!(results.len(), 2);
  assert!(results.iter().all(|r| r.result().is_completed()));
  assert_eq!(results[0].result().stdout(), "hello\n");
}

#[test]
fn it_should_pause_after_creator_only() {
  common::setup();
  let ctx = ipcgrade::ExecutionContext::builder()
    .creator_delay(Duration::from_millis(400))
    .poll_interval(Duration::from_millis(20))
    .build();
  let group = TestGroup::new("timing")
    .invocation(Invocation::new(sh("true"), Duration::from_secs(5)).creator())
    .invocation(Invocation::new(sh("true"), Duration::from_secs(5)))
    .invocation(Invocation::new(sh("true"), Duration::from_secs(5)));

  let start = Instant::now();
  let results = run_group(&ctx, &group);

  assert_eq!(results.len(), 3);
  assert!(start.elapsed() >= Duration::from_millis(400));
  assert!(start.elapsed() < Duration::from_millis(800) + Duration::from_secs(2));
}
