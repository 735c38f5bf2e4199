//! Fixed big.LITTLE core partition
//!
//! Cores are numbered `0..N` with one cluster occupying the low ids and the
//! other the high ids. Core 0 and core N-1 are the anchors: one belongs to each
//! cluster and neither is ever touched by the opportunistic add/remove path.

use crate::config::TopologyConfig;
use crate::error::{ClusterPlugError, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Logical CPU number
pub type CoreId = usize;

/// Which cluster sits at cpu0
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// cpu0..little are LITTLE, the rest are big
    #[default]
    LittleBig,
    /// cpu0..big are big, the rest are LITTLE
    BigLittle,
}

/// Performance tier of a core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cluster {
    Big,
    Little,
}

/// Core topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    big: usize,
    little: usize,
    layout: Layout,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            big: 4,
            little: 4,
            layout: Layout::LittleBig,
        }
    }
}

impl Topology {
    /// Create a topology; each cluster needs at least one core
    pub fn new(big: usize, little: usize, layout: Layout) -> Result<Self> {
        if big == 0 || little == 0 {
            return Err(ClusterPlugError::InvalidParameter {
                name: "topology",
                reason: format!("need at least one core per cluster (big={big}, little={little})"),
            });
        }
        Ok(Self { big, little, layout })
    }

    pub fn from_config(config: &TopologyConfig) -> Result<Self> {
        Self::new(config.big_cores, config.little_cores, config.layout)
    }

    pub fn num_cores(&self) -> usize {
        self.big + self.little
    }

    pub fn num_big(&self) -> usize {
        self.big
    }

    pub fn num_little(&self) -> usize {
        self.little
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn cores(&self) -> Range<CoreId> {
        0..self.num_cores()
    }

    pub fn contains(&self, cpu: CoreId) -> bool {
        cpu < self.num_cores()
    }

    pub fn is_big(&self, cpu: CoreId) -> bool {
        match self.layout {
            Layout::LittleBig => cpu >= self.little,
            Layout::BigLittle => cpu < self.big,
        }
    }

    pub fn is_little(&self, cpu: CoreId) -> bool {
        !self.is_big(cpu)
    }

    pub fn cluster(&self, cpu: CoreId) -> Cluster {
        if self.is_big(cpu) {
            Cluster::Big
        } else {
            Cluster::Little
        }
    }

    pub fn big_cores(&self) -> Vec<CoreId> {
        self.cores().filter(|&cpu| self.is_big(cpu)).collect()
    }

    /// The two cores never switched by the add/remove path
    pub fn anchors(&self) -> [CoreId; 2] {
        [0, self.num_cores() - 1]
    }

    pub fn is_anchor(&self, cpu: CoreId) -> bool {
        self.anchors().contains(&cpu)
    }

    /// Candidates for add/remove: anchors excluded, big cores first,
    /// walking inward from the big end
    pub fn scan_order(&self) -> Vec<CoreId> {
        let last = self.num_cores() - 1;
        match self.layout {
            Layout::LittleBig => (1..last).rev().collect(),
            Layout::BigLittle => (1..last).collect(),
        }
    }

    /// LITTLE cores starting at the LITTLE anchor, walking inward
    pub fn little_fill_order(&self) -> Vec<CoreId> {
        match self.layout {
            Layout::LittleBig => (0..self.little).collect(),
            Layout::BigLittle => (self.big..self.num_cores()).rev().collect(),
        }
    }
}
