use std::fmt;
use std::time::Duration;

use log::debug;
use tokio::runtime::Handle;

use crate::config::ExporterConfig;
use crate::process::{Command, ProcessResult};

/// Arguments for squeue ahead of the `--states` filter
const SQUEUE_ARGS: &[&str] = &["-a", "-r", "-h", "-o", "%P"];

/// Job queue states the exporter counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    Running,
}

impl JobState {
    /// Both queue states, in exposition order
    pub const ALL: [JobState; 2] = [JobState::Pending, JobState::Running];

    /// Lowercase name used in metric names
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
        }
    }

    /// Name understood by `squeue --states`
    pub fn as_squeue_state(self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw text from the scheduler tools.
///
/// Every call is one complete read; any failure fails the scrape.
pub trait PartitionSource: Send + Sync + 'static {
    /// One line per (partition, resource-state bucket)
    fn read_partition_state(&self) -> ProcessResult<String>;

    /// One line per job in `state`, naming its partition(s)
    fn read_jobs_by_state(&self, state: JobState) -> ProcessResult<String>;
}

/// Reads partition and job state by running `sinfo` and `squeue`.
///
/// The calls block the current thread while the runtime behind `runtime`
/// drives the child process, so they must not be made from an async task.
/// Calling them from a `spawn_blocking` worker is fine.
pub struct SlurmSource {
    sinfo: Command,
    squeue: Command,
    timeout: Duration,
    runtime: Handle,
}

impl SlurmSource {
    /// Create a source from prepared commands
    pub fn new(sinfo: Command, squeue: Command, timeout: Duration, runtime: Handle) -> Self {
        Self {
            sinfo,
            squeue,
            timeout,
            runtime,
        }
    }

    /// Create a source from the exporter configuration
    pub fn from_config(config: &ExporterConfig, runtime: Handle) -> Self {
        let sinfo_args = config.sinfo.args.clone().unwrap_or_else(|| {
            vec![
                "-h".to_string(),
                "-o".to_string(),
                config.layout.sinfo_format().to_string(),
            ]
        });
        let squeue_args = config
            .squeue
            .args
            .clone()
            .unwrap_or_else(|| SQUEUE_ARGS.iter().map(|arg| arg.to_string()).collect());

        Self::new(
            Command::new(config.sinfo.program.as_str()).args(sinfo_args),
            Command::new(config.squeue.program.as_str()).args(squeue_args),
            config.command_timeout(),
            runtime,
        )
    }

    fn run(&self, command: &Command) -> ProcessResult<String> {
        self.runtime.block_on(command.output(self.timeout))
    }
}

impl PartitionSource for SlurmSource {
    fn read_partition_state(&self) -> ProcessResult<String> {
        self.run(&self.sinfo)
    }

    fn read_jobs_by_state(&self, state: JobState) -> ProcessResult<String> {
        let command = self
            .squeue
            .clone()
            .arg(format!("--states={}", state.as_squeue_state()));
        debug!("Reading {} jobs", state);
        self.run(&command)
    }
}
