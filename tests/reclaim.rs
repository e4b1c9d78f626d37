use std::mem::MaybeUninit;

use nix::libc;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

use ipcgrade::reclaim::{remove_fifos, remove_message_queues};
use ipcgrade::{reclaim, ExecutionContext};

mod common;

#[test]
fn it_should_reclaim_empty_directory() {
  common::setup();
  let _guard = common::queue_lock();
  let dir = tempfile::tempdir().unwrap();
  let ctx = ExecutionContext::builder().work_dir(dir.path()).build();
  let report = reclaim(&ctx);
  assert_eq!(report.fifos, 0);
}

#[test]
fn it_should_remove_named_pipes() {
  common::setup();
  let dir = tempfile::tempdir().unwrap();
  for name in ["fifom", "fifo1"] {
    mkfifo(&dir.path().join(name), Mode::S_IRWXU).unwrap();
  }
  std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();

  let removed = remove_fifos(dir.path(), &["fifom", "fifo1", "fifo2"][..]);

  assert_eq!(removed, 2);
  assert!(!dir.path().join("fifom").exists());
  assert!(!dir.path().join("fifo1").exists());
  assert!(dir.path().join("notes.txt").exists());
}

#[test]
fn it_should_remove_owned_message_queues() {
  common::setup();
  let _guard = common::queue_lock();
  let id = unsafe { libc::msgget(libc::IPC_PRIVATE, libc::IPC_CREAT | 0o600) };
  if id < 0 {
    // No System V IPC in this environment
    return;
  }
  if std::fs::metadata("/proc/sysvipc/msg").is_err() {
    unsafe { libc::msgctl(id, libc::IPC_RMID, std::ptr::null_mut()) };
    return;
  }

  assert!(remove_message_queues() >= 1);

  let mut stat = MaybeUninit::<libc::msqid_ds>::uninit();
  let ret = unsafe { libc::msgctl(id, libc::IPC_STAT, stat.as_mut_ptr()) };
  assert_eq!(ret, -1);
}
