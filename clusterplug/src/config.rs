//! Configuration for the Clusterplug hotplug daemon

use crate::error::{ClusterPlugError, Result as PlugResult};
use crate::topology::{Layout, Topology};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterPlugConfig {
    /// Load and vote thresholds
    #[serde(default)]
    pub tunables: Tunables,

    /// Initial policy switches
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Core partition
    #[serde(default)]
    pub topology: TopologyConfig,

    /// Hotplug and load-sampling backends
    #[serde(default)]
    pub hotplug: HotplugConfig,

    /// Display power detection
    #[serde(default)]
    pub display: DisplayConfig,

    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Runtime-adjustable thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tunables {
    /// Aggregate load (percent) above which an up vote is cast
    #[serde(default = "default_load_up")]
    pub load_threshold_up: u32,

    /// Aggregate load (percent) below which a down vote is cast
    #[serde(default = "default_load_down")]
    pub load_threshold_down: u32,

    /// Tick interval
    #[serde(default = "default_sampling_period")]
    pub sampling_period_ms: u32,

    /// Up votes that must be exceeded before a core is added
    #[serde(default = "default_vote_up")]
    pub vote_threshold_up: u32,

    /// Down votes that must be exceeded before a core is removed
    #[serde(default = "default_vote_down")]
    pub vote_threshold_down: u32,

    /// LITTLE cores kept online while the screen is off
    #[serde(default = "default_max_cores_screen_off")]
    pub max_cores_when_screen_off: u32,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            load_threshold_up: default_load_up(),
            load_threshold_down: default_load_down(),
            sampling_period_ms: default_sampling_period(),
            vote_threshold_up: default_vote_up(),
            vote_threshold_down: default_vote_down(),
            max_cores_when_screen_off: default_max_cores_screen_off(),
        }
    }
}

impl Tunables {
    pub fn sampling_period(&self) -> Duration {
        Duration::from_millis(self.sampling_period_ms as u64)
    }

    /// Check every field against the topology
    pub fn validate(&self, topology: &Topology) -> PlugResult<()> {
        check_percent("load_threshold_up", self.load_threshold_up)?;
        check_percent("load_threshold_down", self.load_threshold_down)?;
        if self.load_threshold_down >= self.load_threshold_up {
            return Err(ClusterPlugError::InvalidParameter {
                name: "load_threshold_down",
                reason: format!(
                    "must be below load_threshold_up ({} >= {})",
                    self.load_threshold_down, self.load_threshold_up
                ),
            });
        }
        check_nonzero("sampling_period_ms", self.sampling_period_ms)?;
        check_nonzero("vote_threshold_up", self.vote_threshold_up)?;
        check_nonzero("vote_threshold_down", self.vote_threshold_down)?;

        let n_little = topology.num_little() as u32;
        if self.max_cores_when_screen_off == 0 || self.max_cores_when_screen_off > n_little {
            return Err(ClusterPlugError::InvalidParameter {
                name: "max_cores_when_screen_off",
                reason: format!("must be between 1 and {}", n_little),
            });
        }

        Ok(())
    }
}

fn check_percent(name: &'static str, value: u32) -> PlugResult<()> {
    if value > 100 {
        return Err(ClusterPlugError::InvalidParameter {
            name,
            reason: format!("{} is not a percentage", value),
        });
    }
    Ok(())
}

fn check_nonzero(name: &'static str, value: u32) -> PlugResult<()> {
    if value == 0 {
        return Err(ClusterPlugError::InvalidParameter {
            name,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(())
}

/// Policy switches applied at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Start the controller immediately
    #[serde(default)]
    pub enabled: bool,

    /// Keep only the LITTLE cluster online regardless of screen state
    #[serde(default)]
    pub low_power_mode: bool,

    /// Keep sampling while the screen is off instead of dropping to the
    /// capped LITTLE cluster
    #[serde(default)]
    pub screen_off_power_mode: bool,
}

/// Core partition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Number of big cores
    #[serde(default = "default_cluster_size")]
    pub big_cores: usize,

    /// Number of LITTLE cores
    #[serde(default = "default_cluster_size")]
    pub little_cores: usize,

    /// Which cluster holds cpu0
    #[serde(default)]
    pub layout: Layout,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            big_cores: default_cluster_size(),
            little_cores: default_cluster_size(),
            layout: Layout::default(),
        }
    }
}

/// Hotplug backend paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotplugConfig {
    /// Directory holding cpuN/online
    #[serde(default = "default_cpu_sysfs")]
    pub cpu_sysfs_path: String,

    /// Per-cpu time counters
    #[serde(default = "default_proc_stat")]
    pub proc_stat_path: String,
}

impl Default for HotplugConfig {
    fn default() -> Self {
        Self {
            cpu_sysfs_path: default_cpu_sysfs(),
            proc_stat_path: default_proc_stat(),
        }
    }
}

/// Display power detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Backlight device to watch (e.g. /sys/class/backlight/panel0);
    /// display events only arrive over IPC when unset
    #[serde(default)]
    pub backlight_device: Option<String>,

    /// Poll interval for bl_power
    #[serde(default = "default_display_poll")]
    pub poll_interval_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            backlight_device: None,
            poll_interval_ms: default_display_poll(),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Socket path
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            log_level: default_log_level(),
        }
    }
}

// Default value functions
fn default_load_up() -> u32 {
    80
}

fn default_load_down() -> u32 {
    20
}

fn default_sampling_period() -> u32 {
    50
}

fn default_vote_up() -> u32 {
    2
}

fn default_vote_down() -> u32 {
    5
}

fn default_max_cores_screen_off() -> u32 {
    1
}

fn default_cluster_size() -> usize {
    4
}

fn default_cpu_sysfs() -> String {
    "/sys/devices/system/cpu".to_string()
}

fn default_proc_stat() -> String {
    "/proc/stat".to_string()
}

fn default_display_poll() -> u64 {
    250
}

fn default_socket_path() -> String {
    "/run/clusterplug/clusterplug.sock".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ClusterPlugConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject files that could never be applied at runtime
    pub fn validate(&self) -> Result<()> {
        let topology = Topology::from_config(&self.topology)?;
        self.tunables.validate(&topology)?;
        if self.policy.low_power_mode && self.policy.screen_off_power_mode {
            anyhow::bail!("low_power_mode and screen_off_power_mode are mutually exclusive");
        }
        Ok(())
    }
}
