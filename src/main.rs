use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use prometheus::Registry;
use std::path::PathBuf;

use slurm_partition_exporter::config::ENV_PREFIX;
use slurm_partition_exporter::prelude::*;
use slurm_partition_exporter::util::logging;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "slurm-partition-exporter", version, about = "Prometheus exporter for Slurm partitions")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overrides the configuration file
    #[arg(short, long)]
    listen_address: Option<String>,

    /// Log level, overrides the configuration file
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ConfigBuilder::new()
        .add_optional_file(args.config.as_ref())
        .add_env(ENV_PREFIX)
        .build()
        .context("Failed to load configuration")?;

    if let Some(listen_address) = args.listen_address {
        config.listen_address = listen_address;
    }
    if let Some(log_level) = args.log_level {
        config.log_level = log_level;
    }
    config.validate()?;

    logging::init(config.log_level);
    info!("Starting slurm-partition-exporter {}", slurm_partition_exporter::VERSION);

    let source = SlurmSource::from_config(&config, tokio::runtime::Handle::current());
    let collector = PartitionCollector::new(Aggregator::new(source, config.layout))?;

    let registry = Registry::new();
    collector.register(&registry)?;

    MetricsServer::new(registry, config.metrics_path.clone())
        .serve(config.socket_addr()?, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
