//! Prometheus exporter for Slurm partition state
//!
//! Each scrape runs `sinfo` and `squeue`, folds their output into one record
//! per partition and exposes the counters as gauges labelled by partition.

pub mod collector;
pub mod config;
pub mod error;
pub mod partition;
pub mod process;
pub mod server;
pub mod source;
pub mod util;

/// Re-export of commonly used types for convenience
pub mod prelude {
    pub use crate::collector::{MetricDescriptor, PartitionCollector};
    pub use crate::config::{ConfigBuilder, ExporterConfig, LogLevel};
    pub use crate::error::{ExporterError, Result};
    pub use crate::partition::{
        Aggregator, PartitionLayout, PartitionMetrics, PartitionRecord, StateCategory,
    };
    pub use crate::server::MetricsServer;
    pub use crate::source::{JobState, PartitionSource, SlurmSource};
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
