//! Core online/offline switching
//!
//! `CoreSwitcher` wraps a `CpuHotplug` backend with a per-core device lock and
//! logical offline bookkeeping, and implements both the single-core add/remove
//! path and the cluster-wide power actions.

use crate::error::{ClusterPlugError, Result};
use crate::topology::{CoreId, Topology};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Capability to bring cores online or offline
pub trait CpuHotplug: Send + Sync {
    /// Current hardware state of `cpu`
    fn is_online(&self, cpu: CoreId) -> io::Result<bool>;

    /// Switch `cpu`; may block briefly on hardware
    fn set_online(&self, cpu: CoreId, online: bool) -> io::Result<()>;
}

/// Hotplug through /sys/devices/system/cpu/cpuN/online
pub struct SysfsHotplug {
    root: PathBuf,
}

impl SysfsHotplug {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn online_path(&self, cpu: CoreId) -> PathBuf {
        self.root.join(format!("cpu{}", cpu)).join("online")
    }
}

impl CpuHotplug for SysfsHotplug {
    fn is_online(&self, cpu: CoreId) -> io::Result<bool> {
        let path = self.online_path(cpu);
        if !path.exists() {
            // cores without an online file cannot be hotplugged and are always up
            if self.root.join(format!("cpu{}", cpu)).exists() {
                return Ok(true);
            }
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("cpu{} not present", cpu),
            ));
        }
        Ok(fs::read_to_string(&path)?.trim() == "1")
    }

    fn set_online(&self, cpu: CoreId, online: bool) -> io::Result<()> {
        let path = self.online_path(cpu);
        debug!("Writing {} to {}", online as u8, path.display());
        fs::write(&path, if online { "1" } else { "0" })
    }
}

/// Logical state kept alongside the hardware state
#[derive(Debug, Default)]
struct CoreDevice {
    offline: bool,
}

/// Counts from a cluster-wide action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchTally {
    pub onlined: u32,
    pub offlined: u32,
    pub failed: u32,
}

impl SwitchTally {
    fn record(&mut self, online: bool, outcome: Result<bool>) {
        match outcome {
            Ok(true) if online => self.onlined += 1,
            Ok(true) => self.offlined += 1,
            Ok(false) => {}
            Err(e) => {
                warn!("{}", e);
                self.failed += 1;
            }
        }
    }

    pub fn merge(&mut self, other: SwitchTally) {
        self.onlined += other.onlined;
        self.offlined += other.offlined;
        self.failed += other.failed;
    }
}

/// Topology-aware core switcher
pub struct CoreSwitcher {
    hotplug: Arc<dyn CpuHotplug>,
    topology: Topology,
    devices: Vec<Mutex<CoreDevice>>,
}

impl CoreSwitcher {
    pub fn new(hotplug: Arc<dyn CpuHotplug>, topology: Topology) -> Self {
        let devices = topology
            .cores()
            .map(|cpu| {
                let online = hotplug.is_online(cpu).unwrap_or(true);
                Mutex::new(CoreDevice { offline: !online })
            })
            .collect();
        Self {
            hotplug,
            topology,
            devices,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Hardware state, falling back to the logical state if it cannot be read
    pub fn is_online(&self, cpu: CoreId) -> bool {
        match self.hotplug.is_online(cpu) {
            Ok(online) => online,
            Err(e) => {
                debug!("cpu{} state unreadable ({}), using logical state", cpu, e);
                self.devices
                    .get(cpu)
                    .map(|d| !d.lock().unwrap_or_else(PoisonError::into_inner).offline)
                    .unwrap_or(false)
            }
        }
    }

    pub fn online_cores(&self) -> Vec<CoreId> {
        self.topology.cores().filter(|&cpu| self.is_online(cpu)).collect()
    }

    /// Switch one core under its device lock. Returns whether the hardware
    /// state changed; a core already in the target state is left alone.
    pub fn switch_core(&self, cpu: CoreId, online: bool) -> Result<bool> {
        if !self.topology.contains(cpu) {
            return Err(ClusterPlugError::NoSuchCore(cpu));
        }
        let device = self.devices.get(cpu).ok_or(ClusterPlugError::NoSuchCore(cpu))?;
        let mut device = device.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self
            .hotplug
            .is_online(cpu)
            .unwrap_or(!device.offline);
        if current == online {
            device.offline = !online;
            return Ok(false);
        }

        self.hotplug
            .set_online(cpu, online)
            .map_err(|source| ClusterPlugError::HardwareSwitch { cpu, online, source })?;
        device.offline = !online;
        Ok(true)
    }

    /// Candidates for the add/remove path; anchors are never yielded
    fn candidates(&self) -> impl Iterator<Item = CoreId> + '_ {
        self.topology
            .scan_order()
            .into_iter()
            .filter(|&cpu| !self.topology.is_anchor(cpu))
    }

    /// Bring the first offline candidate online
    pub fn add_one_core(&self) -> Result<Option<CoreId>> {
        for cpu in self.candidates() {
            if !self.is_online(cpu) {
                self.switch_core(cpu, true)?;
                info!("cpu{} ({:?}) switched on", cpu, self.topology.cluster(cpu));
                return Ok(Some(cpu));
            }
        }
        debug!("No offline core left to add");
        Ok(None)
    }

    /// Take the first online candidate offline
    pub fn remove_one_core(&self) -> Result<Option<CoreId>> {
        for cpu in self.candidates() {
            if self.is_online(cpu) {
                self.switch_core(cpu, false)?;
                info!("cpu{} ({:?}) switched off", cpu, self.topology.cluster(cpu));
                return Ok(Some(cpu));
            }
        }
        debug!("No removable core left online");
        Ok(None)
    }

    /// Bring every core online, highest id first
    pub fn online_all(&self) -> SwitchTally {
        let mut tally = SwitchTally::default();
        for cpu in self.topology.cores().rev() {
            tally.record(true, self.switch_core(cpu, true));
        }
        info!("All cpus enabled ({} switched on)", tally.onlined);
        tally
    }

    /// Take every big core offline
    pub fn disable_big_cluster(&self) -> SwitchTally {
        let mut tally = SwitchTally::default();
        for cpu in self.topology.big_cores() {
            tally.record(false, self.switch_core(cpu, false));
        }
        info!("{} big cpus disabled", tally.offlined);
        tally
    }

    /// Keep `limit` LITTLE cores online (all when None), starting from the
    /// LITTLE anchor, and take the rest offline
    pub fn enable_little_cluster(&self, limit: Option<usize>) -> SwitchTally {
        let mut tally = SwitchTally::default();
        let mut remaining = limit.unwrap_or(self.topology.num_little());
        let mut active = 0;

        for cpu in self.topology.little_fill_order() {
            if remaining > 0 {
                tally.record(true, self.switch_core(cpu, true));
                remaining -= 1;
                active += 1;
            } else {
                tally.record(false, self.switch_core(cpu, false));
            }
        }

        info!(
            "{} little cpus enabled, {} little cpus active",
            tally.onlined, active
        );
        tally
    }
}
