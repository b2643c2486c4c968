//! Process management for the scheduler command-line tools
//!
//! Every read spawns exactly one short-lived child, captures its stdout and
//! waits for it to exit under a timeout. Nothing is retried.

mod command;
mod error;

pub use command::{Command, ProcessHandle};
pub use error::{ProcessError, ProcessResult};
