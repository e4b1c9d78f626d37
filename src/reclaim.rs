use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::libc;
use nix::unistd::{getuid, Uid};

use crate::context::ExecutionContext;

const SYSV_MSG_TABLE: &str = "/proc/sysvipc/msg";

/// What one reclaim pass removed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimReport {
  pub fifos: usize,
  pub queues: usize,
}

/// Remove the known named pipes and every message queue owned by this user.
///
/// Never fails: problems are logged and the pass carries on. Must not run
/// while any worker of a test group is still alive.
pub fn reclaim(ctx: &ExecutionContext) -> ReclaimReport {
  let report = ReclaimReport {
    fifos: remove_fifos(ctx.work_dir(), ctx.fifo_names().as_slice()),
    queues: remove_message_queues(),
  };
  debug!("Reclaimed {:?}", report);
  report
}

/// Remove `names` under `dir`. Entries that do not exist are skipped.
pub fn remove_fifos<S: AsRef<str>>(dir: &Path, names: &[S]) -> usize {
  let mut removed = 0;
  for name in names {
    let path = dir.join(name.as_ref());
    match fs::remove_file(&path) {
      Ok(()) => {
        info!("Removed named pipe: {}", path.to_string_lossy());
        removed += 1;
      }
      Err(err) if err.kind() == ErrorKind::NotFound => {}
      Err(err) => error!("Error removing named pipe {}: {}", path.to_string_lossy(), err),
    }
  }
  removed
}

/// Remove every System V message queue owned by the current user
pub fn remove_message_queues() -> usize {
  let table = match fs::read_to_string(SYSV_MSG_TABLE) {
    Ok(table) => table,
    Err(err) => {
      warn!("Can not list message queues from {}: {}", SYSV_MSG_TABLE, err);
      return 0;
    }
  };

  let mut removed = 0;
  for msqid in owned_queue_ids(&table, getuid()) {
    match remove_queue(msqid) {
      Ok(()) => {
        debug!("Removed message queue {}", msqid);
        removed += 1;
      }
      // Gone between listing and removal
      Err(Errno::EINVAL) | Err(Errno::EIDRM) => {}
      Err(errno) => error!("Failed to remove message queue {}: {}", msqid, errno),
    }
  }
  if removed > 0 {
    info!("Successfully removed {} message queues", removed);
  }
  removed
}

fn remove_queue(msqid: i32) -> Result<(), Errno> {
  let rc = unsafe { libc::msgctl(msqid, libc::IPC_RMID, std::ptr::null_mut()) };
  Errno::result(rc).map(drop)
}

/// Parse the kernel's message queue table, keeping queues whose owner is `uid`
fn owned_queue_ids(table: &str, uid: Uid) -> Vec<i32> {
  let mut lines = table.lines();
  let header = match lines.next() {
    Some(header) => header.split_whitespace().collect::<Vec<&str>>(),
    None => return vec![],
  };
  let column = |name: &str| header.iter().position(|h| *h == name);
  let (id_col, uid_col) = match (column("msqid"), column("uid")) {
    (Some(id_col), Some(uid_col)) => (id_col, uid_col),
    _ => {
      warn!("Unexpected header in {}: {}", SYSV_MSG_TABLE, header.join(" "));
      return vec![];
    }
  };

  lines
    .filter_map(|line| {
      let fields = line.split_whitespace().collect::<Vec<&str>>();
      let msqid = fields.get(id_col)?.parse::<i32>().ok()?;
      let owner = fields.get(uid_col)?.parse::<u32>().ok()?;
      if owner == uid.as_raw() {
        Some(msqid)
      } else {
        None
      }
    })
    .collect()
}
