use std::process::Stdio;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::process::{Child, Command as TokioCommand};
use tokio::time::timeout;

use crate::process::{ProcessError, ProcessResult};

/// Command wrapper for process execution
#[derive(Debug, Clone)]
pub struct Command {
    /// Program to execute
    program: String,

    /// Arguments to pass to the program
    args: Vec<String>,
}

impl Command {
    /// Create a new command
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for arg in args {
            self.args.push(arg.into());
        }
        self
    }

    /// Program name
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments as they will be passed to the program
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Spawn the command with stdout and stderr piped
    pub fn spawn(&self) -> ProcessResult<ProcessHandle> {
        debug!("Spawning command: {} {:?}", self.program, self.args);

        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(ProcessError::SpawnError)?;

        Ok(ProcessHandle {
            child,
            program: self.program.clone(),
        })
    }

    /// Run the command to completion and return everything it wrote to stdout
    pub async fn output(&self, timeout_duration: Duration) -> ProcessResult<String> {
        self.spawn()?.wait_for_stdout(timeout_duration).await
    }
}

/// Handle to a running process
pub struct ProcessHandle {
    /// Child process
    child: Child,

    /// Program name
    program: String,
}

impl ProcessHandle {
    /// Wait for the process to exit and collect its stdout.
    ///
    /// The child is killed if it does not exit within `timeout_duration`.
    /// A non-zero exit is an error; stderr is only kept for the error message.
    pub async fn wait_for_stdout(self, timeout_duration: Duration) -> ProcessResult<String> {
        let program = self.program;

        let output = match timeout(timeout_duration, self.child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ProcessError::ReadError(e)),
            Err(_) => {
                // Dropping the wait future drops the child, which kills it
                warn!("[{}] timed out after {:?}", program, timeout_duration);
                return Err(ProcessError::Timeout(timeout_duration));
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.is_empty() {
            debug!("[{}] stderr: {}", program, stderr);
        }

        if !output.status.success() {
            return Err(ProcessError::NonZeroExit {
                program,
                status: output.status,
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        trace!("[{}] read {} bytes of stdout", program, stdout.len());

        Ok(stdout)
    }
}
