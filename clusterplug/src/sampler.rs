//! Per-core utilization sampling and load aggregation

use crate::error::{ClusterPlugError, Result};
use crate::topology::{CoreId, Topology};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Cumulative time counters for one core, in ticks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    /// All accounted time
    pub wall: u64,
    /// Idle time, IO wait included
    pub idle: u64,
}

/// Source of per-core busy/idle counters
pub trait CpuTimeSource: Send + Sync {
    /// Take a fresh snapshot; called once before each aggregation pass
    fn refresh(&self) -> Result<()> {
        Ok(())
    }

    /// Counters for `cpu`, or None when the core is not reporting
    fn cpu_times(&self, cpu: CoreId) -> Option<CpuTimes>;
}

/// Reads per-cpu lines from /proc/stat
pub struct ProcStatSource {
    path: PathBuf,
    snapshot: Mutex<Vec<Option<CpuTimes>>>,
}

impl ProcStatSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            snapshot: Mutex::new(Vec::new()),
        }
    }
}

impl CpuTimeSource for ProcStatSource {
    fn refresh(&self) -> Result<()> {
        let content = fs::read_to_string(&self.path)?;
        let parsed = parse_proc_stat(&content)?;
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = parsed;
        Ok(())
    }

    fn cpu_times(&self, cpu: CoreId) -> Option<CpuTimes> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(cpu)
            .copied()
            .flatten()
    }
}

/// Parse the `cpuN` lines of /proc/stat, indexed by N.
/// Offline cores have no line and come back as None.
pub fn parse_proc_stat(content: &str) -> Result<Vec<Option<CpuTimes>>> {
    let mut out: Vec<Option<CpuTimes>> = Vec::new();

    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let Some(label) = fields.next() else {
            continue;
        };
        let Some(index) = label.strip_prefix("cpu") else {
            continue;
        };
        // aggregate "cpu" line
        if index.is_empty() {
            continue;
        }
        let cpu: usize = index
            .parse()
            .map_err(|_| ClusterPlugError::Parse(format!("bad cpu label: {}", label)))?;

        let values: Vec<u64> = fields
            .take(8)
            .map(|v| v.parse::<u64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| ClusterPlugError::Parse(format!("{}: {}", label, e)))?;
        if values.len() < 4 {
            return Err(ClusterPlugError::Parse(format!("{}: too few fields", label)));
        }

        // user nice system idle iowait irq softirq steal
        let idle = values[3] + values.get(4).copied().unwrap_or(0);
        let wall = values.iter().sum();

        if out.len() <= cpu {
            out.resize(cpu + 1, None);
        }
        out[cpu] = Some(CpuTimes { wall, idle });
    }

    Ok(out)
}

/// Previous counters for one core
#[derive(Debug, Default)]
struct CoreSample {
    prev_wall: AtomicU64,
    prev_idle: AtomicU64,
}

/// Aggregate load over the online cores
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    /// Mean load of online cores (percent)
    pub average: u32,
    /// Number of online cores
    pub online: usize,
    /// Summed load of online big cores
    pub big_sum: u32,
    /// Summed load of online LITTLE cores
    pub little_sum: u32,
}

/// Turns cumulative counters into load percentages
pub struct LoadSampler {
    source: Arc<dyn CpuTimeSource>,
    samples: Vec<CoreSample>,
}

impl LoadSampler {
    pub fn new(source: Arc<dyn CpuTimeSource>, topology: &Topology) -> Self {
        Self {
            source,
            samples: topology.cores().map(|_| CoreSample::default()).collect(),
        }
    }

    /// Load of `cpu` since the previous call, 0..=100
    pub fn sample_and_update(&self, cpu: CoreId) -> u32 {
        let (Some(now), Some(sample)) = (self.source.cpu_times(cpu), self.samples.get(cpu)) else {
            return 0;
        };

        let prev_wall = sample.prev_wall.swap(now.wall, Ordering::Relaxed);
        let prev_idle = sample.prev_idle.swap(now.idle, Ordering::Relaxed);

        load_percent(
            now.wall.wrapping_sub(prev_wall),
            now.idle.wrapping_sub(prev_idle),
        )
    }

    /// Sample every core and average the online ones
    pub fn aggregate(
        &self,
        topology: &Topology,
        is_online: impl Fn(CoreId) -> bool,
    ) -> Result<LoadReport> {
        self.source.refresh()?;

        let mut report = LoadReport::default();
        let mut sum: u32 = 0;

        for cpu in topology.cores() {
            let load = self.sample_and_update(cpu);
            let online = is_online(cpu);
            debug!("cpu{} online={} load={}", cpu, online, load);

            if online {
                report.online += 1;
                sum += load;
                if topology.is_big(cpu) {
                    report.big_sum += load;
                } else {
                    report.little_sum += load;
                }
            }
        }

        if report.online == 0 {
            return Err(ClusterPlugError::AggregationDegenerate);
        }
        report.average = sum / report.online as u32;

        debug!(
            "load avg {} over {} cpus (big {}, little {})",
            report.average, report.online, report.big_sum, report.little_sum
        );
        Ok(report)
    }
}

/// Busy share of `wall`; zero or inverted deltas count as fully busy
pub fn load_percent(wall: u64, idle: u64) -> u32 {
    if wall == 0 || wall < idle {
        return 100;
    }
    (100 * (wall - idle) as u128 / wall as u128) as u32
}
