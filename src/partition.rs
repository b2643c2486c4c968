//! Per-partition aggregation of scheduler output
//!
//! The partition-state text is folded into one [`PartitionRecord`] per
//! partition, then the pending and running job queues are credited onto the
//! partitions already seen. Every call builds a fresh map; nothing carries
//! over between scrapes.

use std::collections::BTreeMap;

use log::{debug, trace};
use serde::Deserialize;

use crate::error::Result;
use crate::source::{JobState, PartitionSource};

/// Aggregated counters for every partition, ordered by partition name
pub type PartitionMetrics = BTreeMap<String, PartitionRecord>;

/// Fixed taxonomy that scheduler node states are bucketed into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateCategory {
    Allocated,
    Completing,
    Down,
    Draining,
    Idle,
    Maintenance,
    Mixed,
    Reserved,
    Error,
    Failed,
}

/// Ordered prefix table; the first match wins.
///
/// Both the long (`%T`) and compact (`%t`) sinfo spellings are covered.
/// Suffix annotations such as `*`, `~` or `#` are ignored by construction.
const STATE_PREFIXES: &[(&str, StateCategory)] = &[
    ("alloc", StateCategory::Allocated),
    ("comp", StateCategory::Completing),
    ("down", StateCategory::Down),
    ("drain", StateCategory::Draining),
    ("drng", StateCategory::Draining),
    ("idle", StateCategory::Idle),
    ("maint", StateCategory::Maintenance),
    ("mix", StateCategory::Mixed),
    ("resv", StateCategory::Reserved),
    ("reserved", StateCategory::Reserved),
    ("err", StateCategory::Error),
    ("fail", StateCategory::Failed),
];

impl StateCategory {
    /// Number of categories
    pub const COUNT: usize = 10;

    /// Every category, in exposition order
    pub const ALL: [StateCategory; StateCategory::COUNT] = [
        StateCategory::Allocated,
        StateCategory::Completing,
        StateCategory::Down,
        StateCategory::Draining,
        StateCategory::Idle,
        StateCategory::Maintenance,
        StateCategory::Mixed,
        StateCategory::Reserved,
        StateCategory::Error,
        StateCategory::Failed,
    ];

    /// Lowercase name used in metric names
    pub fn as_str(self) -> &'static str {
        match self {
            StateCategory::Allocated => "allocated",
            StateCategory::Completing => "completing",
            StateCategory::Down => "down",
            StateCategory::Draining => "draining",
            StateCategory::Idle => "idle",
            StateCategory::Maintenance => "maintenance",
            StateCategory::Mixed => "mixed",
            StateCategory::Reserved => "reserved",
            StateCategory::Error => "error",
            StateCategory::Failed => "failed",
        }
    }

    /// Bucket a scheduler state token, or `None` if no prefix matches.
    ///
    /// Matching ignores ASCII case and surrounding whitespace.
    pub fn classify(state: &str) -> Option<StateCategory> {
        let state = state.trim();
        STATE_PREFIXES
            .iter()
            .find(|(prefix, _)| {
                state
                    .get(..prefix.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
            })
            .map(|&(_, category)| category)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Column layout requested from sinfo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionLayout {
    /// `partition,nodes,cpus_per_node,state`, one line per state bucket
    #[default]
    NodeState,
    /// `partition,A/I/O/T cpus,A/I/O/T nodes`, one line per partition
    Occupancy,
}

impl PartitionLayout {
    /// The `-o` format string that makes sinfo print this layout
    pub fn sinfo_format(self) -> &'static str {
        match self {
            PartitionLayout::NodeState => "%R,%D,%c,%T",
            PartitionLayout::Occupancy => "%R,%C,%F",
        }
    }
}

/// Counters for a single partition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionRecord {
    nodes: [u64; StateCategory::COUNT],
    cpus: [u64; StateCategory::COUNT],
    /// Nodes reported for the partition, classified or not
    pub total_nodes: u64,
    /// CPUs reported for the partition, classified or not
    pub total_cpus: u64,
    /// Jobs waiting in the queue for this partition
    pub pending_jobs: u64,
    /// Jobs running in this partition
    pub running_jobs: u64,
}

impl PartitionRecord {
    /// Nodes in the given state category
    pub fn nodes(&self, category: StateCategory) -> u64 {
        self.nodes[category.index()]
    }

    /// CPUs in the given state category
    pub fn cpus(&self, category: StateCategory) -> u64 {
        self.cpus[category.index()]
    }

    /// Nodes whose state fell into some category
    pub fn classified_nodes(&self) -> u64 {
        self.nodes.iter().sum()
    }

    /// CPUs whose state fell into some category
    pub fn classified_cpus(&self) -> u64 {
        self.cpus.iter().sum()
    }

    /// Nodes counted in the total but in no category
    pub fn other_nodes(&self) -> u64 {
        self.total_nodes.saturating_sub(self.classified_nodes())
    }

    /// CPUs counted in the total but in no category
    pub fn other_cpus(&self) -> u64 {
        self.total_cpus.saturating_sub(self.classified_cpus())
    }

    /// Jobs in the given queue state
    pub fn jobs(&self, state: JobState) -> u64 {
        match state {
            JobState::Pending => self.pending_jobs,
            JobState::Running => self.running_jobs,
        }
    }

    fn add_category(&mut self, category: StateCategory, nodes: u64, cpus: u64) {
        let i = category.index();
        self.nodes[i] = self.nodes[i].saturating_add(nodes);
        self.cpus[i] = self.cpus[i].saturating_add(cpus);
    }

    fn add_total(&mut self, nodes: u64, cpus: u64) {
        self.total_nodes = self.total_nodes.saturating_add(nodes);
        self.total_cpus = self.total_cpus.saturating_add(cpus);
    }

    fn credit_job(&mut self, state: JobState) {
        match state {
            JobState::Pending => self.pending_jobs += 1,
            JobState::Running => self.running_jobs += 1,
        }
    }
}

/// Parse a count field; anything unparsable counts as zero
fn parse_count(field: Option<&str>, line: &str) -> u64 {
    let field = field.unwrap_or("").trim();
    match field.parse() {
        Ok(value) => value,
        Err(_) => {
            debug!("Unparsable count {:?} in line {:?}, using 0", field, line);
            0
        }
    }
}

/// Parse an `A/I/O/T` occupancy field into its four counts
fn parse_occupancy(field: Option<&str>, line: &str) -> [u64; 4] {
    let mut parts = field.unwrap_or("").split('/');
    [
        parse_count(parts.next(), line),
        parse_count(parts.next(), line),
        parse_count(parts.next(), line),
        parse_count(parts.next(), line),
    ]
}

/// Fold partition-state text into a fresh partition map.
///
/// Lines without a comma are skipped. Malformed numbers contribute zero
/// and never abort the pass.
pub fn parse_partition_state(text: &str, layout: PartitionLayout) -> PartitionMetrics {
    let mut partitions = PartitionMetrics::new();

    for line in text.lines() {
        if !line.contains(',') {
            continue;
        }

        let mut fields = line.split(',');
        let name = fields.next().unwrap_or("");
        if name.is_empty() {
            debug!("Skipping line without partition name: {:?}", line);
            continue;
        }

        let record = partitions.entry(name.to_string()).or_default();

        match layout {
            PartitionLayout::NodeState => {
                let nodes = parse_count(fields.next(), line);
                let cpus_per_node = parse_count(fields.next(), line);
                let state = fields.next().unwrap_or("");
                let cpus = nodes.saturating_mul(cpus_per_node);

                match StateCategory::classify(state) {
                    Some(category) => record.add_category(category, nodes, cpus),
                    None => trace!("Unclassified state {:?} for partition {}", state, name),
                }
                record.add_total(nodes, cpus);
            }
            PartitionLayout::Occupancy => {
                let [cpus_alloc, cpus_idle, _, cpus_total] = parse_occupancy(fields.next(), line);
                let [nodes_alloc, nodes_idle, _, nodes_total] =
                    parse_occupancy(fields.next(), line);

                record.add_category(StateCategory::Allocated, nodes_alloc, cpus_alloc);
                record.add_category(StateCategory::Idle, nodes_idle, cpus_idle);
                record.add_total(nodes_total, cpus_total);
            }
        }
    }

    partitions
}

/// Credit one job per listed partition onto the known partitions.
///
/// Each line is one job; a comma-joined line credits every partition it
/// names. Names with no record are ignored. Returns the number of credits.
pub fn credit_jobs(partitions: &mut PartitionMetrics, text: &str, state: JobState) -> usize {
    let mut credited = 0;

    for line in text.lines() {
        for name in line.split(',') {
            if name.is_empty() {
                continue;
            }
            match partitions.get_mut(name) {
                Some(record) => {
                    record.credit_job(state);
                    credited += 1;
                }
                None => trace!("{} job for unknown partition {:?}", state.as_str(), name),
            }
        }
    }

    credited
}

/// Builds a partition map from a [`PartitionSource`]
pub struct Aggregator<S> {
    source: S,
    layout: PartitionLayout,
}

impl<S: PartitionSource> Aggregator<S> {
    /// Create a new aggregator reading from `source`
    pub fn new(source: S, layout: PartitionLayout) -> Self {
        Self { source, layout }
    }

    /// Read all sources and build the current partition map.
    ///
    /// Any source failure fails the whole call; no partial map is returned.
    pub fn build_metrics(&self) -> Result<PartitionMetrics> {
        let state = self.source.read_partition_state()?;
        let mut partitions = parse_partition_state(&state, self.layout);

        for job_state in JobState::ALL {
            let jobs = self.source.read_jobs_by_state(job_state)?;
            let credited = credit_jobs(&mut partitions, &jobs, job_state);
            trace!("Credited {} {} jobs", credited, job_state.as_str());
        }

        debug!("Aggregated {} partitions", partitions.len());
        Ok(partitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExporterError;
    use crate::source::testing::StaticSource;

    #[test]
    fn test_classify_prefixes() {
        assert_eq!(StateCategory::classify("idle"), Some(StateCategory::Idle));
        assert_eq!(StateCategory::classify("allocated+"), Some(StateCategory::Allocated));
        assert_eq!(StateCategory::classify("drain*"), Some(StateCategory::Draining));
        assert_eq!(StateCategory::classify("drained"), Some(StateCategory::Draining));
        assert_eq!(StateCategory::classify("drng"), Some(StateCategory::Draining));
        assert_eq!(StateCategory::classify("MIXED"), Some(StateCategory::Mixed));
        assert_eq!(StateCategory::classify("maint"), Some(StateCategory::Maintenance));
        assert_eq!(StateCategory::classify("reserved"), Some(StateCategory::Reserved));
        assert_eq!(StateCategory::classify("resv"), Some(StateCategory::Reserved));
        assert_eq!(StateCategory::classify("failing"), Some(StateCategory::Failed));
        assert_eq!(StateCategory::classify("error"), Some(StateCategory::Error));
        assert_eq!(StateCategory::classify("completing"), Some(StateCategory::Completing));
        assert_eq!(StateCategory::classify(" down~ "), Some(StateCategory::Down));
    }

    #[test]
    fn test_classify_unmatched() {
        assert_eq!(StateCategory::classify("planned"), None);
        assert_eq!(StateCategory::classify("unknown"), None);
        assert_eq!(StateCategory::classify("dr"), None);
        assert_eq!(StateCategory::classify(""), None);
    }

    #[test]
    fn test_single_idle_line() {
        let partitions = parse_partition_state("gpu,4,16,idle", PartitionLayout::NodeState);
        let gpu = &partitions["gpu"];

        assert_eq!(gpu.nodes(StateCategory::Idle), 4);
        assert_eq!(gpu.cpus(StateCategory::Idle), 64);
        assert_eq!(gpu.total_nodes, 4);
        assert_eq!(gpu.total_cpus, 64);
        assert_eq!(gpu.other_nodes(), 0);
    }

    #[test]
    fn test_lines_accumulate_per_partition() {
        let text = "\
batch,10,32,allocated
batch,2,32,idle
batch,1,64,mixed
batch,3,32,planned
gpu,4,16,drain*

";
        let partitions = parse_partition_state(text, PartitionLayout::NodeState);
        assert_eq!(partitions.len(), 2);

        let batch = &partitions["batch"];
        assert_eq!(batch.nodes(StateCategory::Allocated), 10);
        assert_eq!(batch.cpus(StateCategory::Allocated), 320);
        assert_eq!(batch.nodes(StateCategory::Idle), 2);
        assert_eq!(batch.cpus(StateCategory::Mixed), 64);
        assert_eq!(batch.total_nodes, 16);
        assert_eq!(batch.total_cpus, 320 + 64 + 64 + 96);
        assert_eq!(batch.classified_nodes(), 13);
        assert_eq!(batch.other_nodes(), 3);
        assert_eq!(batch.other_cpus(), 96);

        let gpu = &partitions["gpu"];
        assert_eq!(gpu.nodes(StateCategory::Draining), 4);
        assert_eq!(gpu.cpus(StateCategory::Draining), 64);
    }

    #[test]
    fn test_classified_never_exceeds_total() {
        let text = "a,3,8,idle\na,2,8,weird\nb,1,4,mix\nb,7,2,down*\nc,5,1,unknown";
        let partitions = parse_partition_state(text, PartitionLayout::NodeState);

        for (name, record) in &partitions {
            assert!(
                record.classified_nodes() <= record.total_nodes,
                "partition {name}"
            );
            for category in StateCategory::ALL {
                assert!(record.cpus(category) <= record.total_cpus);
            }
        }
        assert_eq!(partitions["b"].classified_nodes(), partitions["b"].total_nodes);
    }

    #[test]
    fn test_malformed_fields_contribute_zero() {
        let text = "gpu,x,16,idle\ngpu,2,y,alloc\ngpu,3\nnoseparator\n";
        let partitions = parse_partition_state(text, PartitionLayout::NodeState);
        let gpu = &partitions["gpu"];

        assert_eq!(gpu.nodes(StateCategory::Idle), 0);
        assert_eq!(gpu.nodes(StateCategory::Allocated), 2);
        assert_eq!(gpu.cpus(StateCategory::Allocated), 0);
        assert_eq!(gpu.total_nodes, 5);
        assert_eq!(gpu.total_cpus, 0);
        assert!(!partitions.contains_key("noseparator"));
    }

    #[test]
    fn test_partition_names_are_verbatim() {
        let partitions =
            parse_partition_state("GPU,1,1,idle\ngpu,1,1,idle\n,1,1,idle", PartitionLayout::NodeState);

        assert_eq!(partitions.len(), 2);
        assert!(partitions.contains_key("GPU"));
        assert!(partitions.contains_key("gpu"));
    }

    #[test]
    fn test_occupancy_layout() {
        let text = "batch,100/20/8/128,10/3/1/14\ngpu,0/64/0/64,0/4/0/4\n";
        let partitions = parse_partition_state(text, PartitionLayout::Occupancy);

        let batch = &partitions["batch"];
        assert_eq!(batch.cpus(StateCategory::Allocated), 100);
        assert_eq!(batch.cpus(StateCategory::Idle), 20);
        assert_eq!(batch.other_cpus(), 8);
        assert_eq!(batch.total_cpus, 128);
        assert_eq!(batch.nodes(StateCategory::Allocated), 10);
        assert_eq!(batch.nodes(StateCategory::Idle), 3);
        assert_eq!(batch.other_nodes(), 1);
        assert_eq!(batch.total_nodes, 14);

        assert_eq!(partitions["gpu"].nodes(StateCategory::Idle), 4);
    }

    #[test]
    fn test_occupancy_layout_short_fields() {
        let partitions = parse_partition_state("debug,5/x,", PartitionLayout::Occupancy);
        let debug = &partitions["debug"];

        assert_eq!(debug.cpus(StateCategory::Allocated), 5);
        assert_eq!(debug.cpus(StateCategory::Idle), 0);
        assert_eq!(debug.total_cpus, 0);
        assert_eq!(debug.total_nodes, 0);
    }

    #[test]
    fn test_credit_multi_partition_jobs() {
        let mut partitions =
            parse_partition_state("gpu,1,1,idle\ncpu,1,1,idle\nionly,1,1,idle", PartitionLayout::NodeState);

        let credited = credit_jobs(&mut partitions, "gpu,cpu\nionly\n", JobState::Pending);

        assert_eq!(credited, 3);
        assert_eq!(partitions["gpu"].pending_jobs, 1);
        assert_eq!(partitions["cpu"].pending_jobs, 1);
        assert_eq!(partitions["ionly"].pending_jobs, 1);
        assert_eq!(partitions["gpu"].running_jobs, 0);
    }

    #[test]
    fn test_credit_ignores_unknown_partitions() {
        let mut partitions = parse_partition_state("gpu,1,1,idle", PartitionLayout::NodeState);

        let credited = credit_jobs(&mut partitions, "gpu\nghost\ngpu,ghost\n\n", JobState::Running);

        assert_eq!(credited, 2);
        assert_eq!(partitions["gpu"].running_jobs, 2);
        assert!(!partitions.contains_key("ghost"));
    }

    #[test]
    fn test_build_metrics_merges_all_sources() {
        let source = StaticSource::new(
            "gpu,4,16,idle\ngpu,2,16,alloc\ncpu,8,64,mixed\n",
            "gpu\ngpu,cpu\n",
            "cpu\ncpu\ncpu\nlost\n",
        );
        let aggregator = Aggregator::new(source, PartitionLayout::NodeState);

        let partitions = aggregator.build_metrics().unwrap();

        let gpu = &partitions["gpu"];
        assert_eq!(gpu.total_nodes, 6);
        assert_eq!(gpu.cpus(StateCategory::Allocated), 32);
        assert_eq!(gpu.jobs(JobState::Pending), 2);
        assert_eq!(gpu.jobs(JobState::Running), 0);

        let cpu = &partitions["cpu"];
        assert_eq!(cpu.cpus(StateCategory::Mixed), 512);
        assert_eq!(cpu.jobs(JobState::Pending), 1);
        assert_eq!(cpu.jobs(JobState::Running), 3);
    }

    #[test]
    fn test_build_metrics_is_idempotent() {
        let source = StaticSource::new("gpu,4,16,idle\n", "gpu\n", "gpu\n");
        let aggregator = Aggregator::new(source, PartitionLayout::NodeState);

        let first = aggregator.build_metrics().unwrap();
        let second = aggregator.build_metrics().unwrap();

        assert_eq!(first, second);
        assert_eq!(second["gpu"].pending_jobs, 1);
    }

    #[test]
    fn test_build_metrics_fails_on_any_source_failure() {
        let healthy = || StaticSource::new("gpu,4,16,idle\n", "gpu\n", "gpu\n");
        let sources = [
            healthy().fail_partition_state(),
            healthy().fail_jobs(JobState::Pending),
            healthy().fail_jobs(JobState::Running),
        ];

        for source in sources {
            let aggregator = Aggregator::new(source, PartitionLayout::NodeState);

            let err = aggregator.build_metrics().unwrap_err();
            assert!(matches!(err, ExporterError::Source(_)));
        }
    }
}
