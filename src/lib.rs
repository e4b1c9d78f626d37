pub use context::{Cancellation, ExecutionContext, ExecutionContextBuilder, ResourceLimits};
pub use coordinator::{run_group, Invocation, InvocationResult, TestGroup};
pub use error::{GraderError, GraderExit};
pub use launcher::{launch, Command, ProcessHandle};
pub use reclaim::{reclaim, ReclaimReport};
pub use signal::install_signal_handler;
pub use student::Subject;
pub use supervisor::{run_leak_check, run_with_timeout, ExecutionResult, FailureReason};
pub use toolchain::{CompileOutput, GccValgrind, LeakVerdict, Toolchain};

pub mod assignment;
mod context;
mod coordinator;
mod error;
mod launcher;
mod pipe;
pub mod reader;
pub mod reclaim;
pub mod report;
mod signal;
pub mod student;
mod supervisor;
mod toolchain;
pub mod utils;
