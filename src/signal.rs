use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use log::info;
use nix::libc;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::context::Cancellation;
use crate::error::GraderError;

static CANCEL_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Only touches an atomic, no allocation or locking in here
extern "C" fn handle_stop_signal(_signal: libc::c_int) {
  if let Some(flag) = CANCEL_FLAG.get() {
    flag.store(true, Ordering::SeqCst);
  }
}

/// Route SIGINT and SIGTERM of the grader itself into `cancellation`.
///
/// Must be called from the main thread before any worker is spawned. Only the
/// first installed flag is used; later calls keep the original one.
pub fn install_signal_handler(cancellation: &Cancellation) -> Result<(), GraderError> {
  if CANCEL_FLAG.set(cancellation.flag()).is_err() {
    info!("Signal handler already installed");
    return Ok(());
  }

  let action = SigAction::new(
    SigHandler::Handler(handle_stop_signal),
    SaFlags::SA_RESTART,
    SigSet::empty(),
  );
  unsafe {
    signal::sigaction(Signal::SIGINT, &action)?;
    signal::sigaction(Signal::SIGTERM, &action)?;
  }

  info!("Signal handlers installed (SIGINT, SIGTERM)");
  Ok(())
}
