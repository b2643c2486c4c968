//! Prometheus collector for Slurm partitions
//!
//! The descriptor table is built once; every scrape rebuilds the partition
//! map from the sources and turns it into gauge families. A failed read emits
//! no partition families at all, only the scrape self-metrics.

use std::collections::HashMap;
use std::time::Instant;

use log::{debug, error};
use prometheus::core::{Collector, Desc};
use prometheus::proto::{Gauge, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::Registry;

use crate::error::Result;
use crate::partition::{Aggregator, PartitionMetrics, PartitionRecord, StateCategory};
use crate::source::{JobState, PartitionSource};

/// Label carrying the partition name
pub const PARTITION_LABEL: &str = "partition";

const SCRAPE_SUCCESS: (&str, &str) = (
    "slurm_partition_scrape_success",
    "Whether the last partition scrape read every source successfully",
);
const SCRAPE_DURATION: (&str, &str) = (
    "slurm_partition_scrape_duration_seconds",
    "Time spent reading and aggregating partition state",
);

/// Which partition counter a metric reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionField {
    Nodes(StateCategory),
    Cpus(StateCategory),
    NodesOther,
    CpusOther,
    NodesTotal,
    CpusTotal,
    Jobs(JobState),
}

impl PartitionField {
    /// Every field, in exposition order
    pub fn all() -> Vec<PartitionField> {
        let mut fields = Vec::with_capacity(2 * StateCategory::COUNT + 6);
        for category in StateCategory::ALL {
            fields.push(PartitionField::Cpus(category));
        }
        fields.push(PartitionField::CpusOther);
        fields.push(PartitionField::CpusTotal);
        for category in StateCategory::ALL {
            fields.push(PartitionField::Nodes(category));
        }
        fields.push(PartitionField::NodesOther);
        fields.push(PartitionField::NodesTotal);
        for state in JobState::ALL {
            fields.push(PartitionField::Jobs(state));
        }
        fields
    }

    /// Read the field from a record
    pub fn value(self, record: &PartitionRecord) -> u64 {
        match self {
            PartitionField::Nodes(category) => record.nodes(category),
            PartitionField::Cpus(category) => record.cpus(category),
            PartitionField::NodesOther => record.other_nodes(),
            PartitionField::CpusOther => record.other_cpus(),
            PartitionField::NodesTotal => record.total_nodes,
            PartitionField::CpusTotal => record.total_cpus,
            PartitionField::Jobs(state) => record.jobs(state),
        }
    }

    fn name(self) -> String {
        match self {
            PartitionField::Nodes(category) => format!("slurm_partition_nodes_{}", category.as_str()),
            PartitionField::Cpus(category) => format!("slurm_partition_cpus_{}", category.as_str()),
            PartitionField::NodesOther => "slurm_partition_nodes_other".to_string(),
            PartitionField::CpusOther => "slurm_partition_cpus_other".to_string(),
            PartitionField::NodesTotal => "slurm_partition_nodes_total".to_string(),
            PartitionField::CpusTotal => "slurm_partition_cpus_total".to_string(),
            PartitionField::Jobs(state) => format!("slurm_partition_jobs_{}", state.as_str()),
        }
    }

    fn help(self) -> String {
        match self {
            PartitionField::Nodes(category) => {
                format!("{} nodes for partition", capitalize(category.as_str()))
            }
            PartitionField::Cpus(category) => {
                format!("{} CPUs for partition", capitalize(category.as_str()))
            }
            PartitionField::NodesOther => "Nodes in unclassified states for partition".to_string(),
            PartitionField::CpusOther => "CPUs in unclassified states for partition".to_string(),
            PartitionField::NodesTotal => "Total nodes for partition".to_string(),
            PartitionField::CpusTotal => "Total CPUs for partition".to_string(),
            PartitionField::Jobs(state) => {
                format!("{} jobs for partition", capitalize(state.as_str()))
            }
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Static description of one exported metric
#[derive(Debug, Clone)]
pub struct MetricDescriptor {
    /// Fully qualified metric name
    pub name: String,
    /// Help text
    pub help: String,
    /// Counter the metric reads
    pub field: PartitionField,
    desc: Desc,
}

impl MetricDescriptor {
    fn new(field: PartitionField) -> Result<Self> {
        let name = field.name();
        let help = field.help();
        let desc = Desc::new(
            name.clone(),
            help.clone(),
            vec![PARTITION_LABEL.to_string()],
            HashMap::new(),
        )?;

        Ok(Self {
            name,
            help,
            field,
            desc,
        })
    }
}

/// Exposes partition node, CPU and job counts as gauges
pub struct PartitionCollector<S> {
    aggregator: Aggregator<S>,
    descriptors: Vec<MetricDescriptor>,
    scrape_success: Desc,
    scrape_duration: Desc,
}

impl<S: PartitionSource> PartitionCollector<S> {
    /// Build the collector and its descriptor table
    pub fn new(aggregator: Aggregator<S>) -> Result<Self> {
        let descriptors = PartitionField::all()
            .into_iter()
            .map(MetricDescriptor::new)
            .collect::<Result<Vec<_>>>()?;

        let unlabelled = |(name, help): (&str, &str)| {
            Desc::new(name.to_string(), help.to_string(), Vec::new(), HashMap::new())
        };

        Ok(Self {
            aggregator,
            descriptors,
            scrape_success: unlabelled(SCRAPE_SUCCESS)?,
            scrape_duration: unlabelled(SCRAPE_DURATION)?,
        })
    }

    /// The per-partition metric descriptors
    pub fn descriptors(&self) -> &[MetricDescriptor] {
        &self.descriptors
    }

    /// Register this collector with a `prometheus::Registry`
    pub fn register(self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self))?;
        Ok(())
    }

    /// One gauge family per descriptor, one sample per partition
    fn partition_families(&self, partitions: &PartitionMetrics) -> Vec<MetricFamily> {
        if partitions.is_empty() {
            return Vec::new();
        }

        self.descriptors
            .iter()
            .map(|descriptor| {
                let metrics = partitions
                    .iter()
                    .map(|(name, record)| {
                        gauge_metric(descriptor.field.value(record) as f64, Some(name))
                    })
                    .collect();
                gauge_family(&descriptor.name, &descriptor.help, metrics)
            })
            .collect()
    }
}

impl<S: PartitionSource> Collector for PartitionCollector<S> {
    fn desc(&self) -> Vec<&Desc> {
        self.descriptors
            .iter()
            .map(|descriptor| &descriptor.desc)
            .chain([&self.scrape_success, &self.scrape_duration])
            .collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let start = Instant::now();

        let (mut families, success) = match self.aggregator.build_metrics() {
            Ok(partitions) => (self.partition_families(&partitions), true),
            Err(e) => {
                error!("Partition scrape failed, no partition metrics emitted: {}", e);
                (Vec::new(), false)
            }
        };

        let elapsed = start.elapsed().as_secs_f64();
        debug!("Partition scrape finished in {:.3}s (success: {})", elapsed, success);

        families.push(gauge_family(
            SCRAPE_SUCCESS.0,
            SCRAPE_SUCCESS.1,
            vec![gauge_metric(if success { 1.0 } else { 0.0 }, None)],
        ));
        families.push(gauge_family(
            SCRAPE_DURATION.0,
            SCRAPE_DURATION.1,
            vec![gauge_metric(elapsed, None)],
        ));

        families
    }
}

fn gauge_metric(value: f64, partition: Option<&str>) -> Metric {
    let mut m = Metric::default();
    if let Some(partition) = partition {
        let mut lp = LabelPair::default();
        lp.set_name(PARTITION_LABEL.to_string());
        lp.set_value(partition.to_string());
        m.set_label(vec![lp]);
    }
    let mut g = Gauge::default();
    g.set_value(value);
    m.set_gauge(g);
    m
}

fn gauge_family(name: &str, help: &str, metrics: Vec<Metric>) -> MetricFamily {
    let mut mf = MetricFamily::default();
    mf.set_name(name.to_string());
    mf.set_help(help.to_string());
    mf.set_field_type(MetricType::GAUGE);
    mf.set_metric(metrics);
    mf
}
