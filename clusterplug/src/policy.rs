//! Cluster power policy state

use crate::config::Tunables;
use crate::error::ClusterPlugError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Operating mode, derived from the controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Controller switched off
    Disabled,
    /// Periodic load-driven decisions
    Sampling,
    /// Screen off without screen-off power mode: LITTLE only, capped
    ScreenOffPower,
    /// Low power mode: LITTLE only
    LowPower,
    /// Next tick brings every core online
    ForceOnlineAll,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Disabled => "disabled",
            Mode::Sampling => "sampling",
            Mode::ScreenOffPower => "screen-off power",
            Mode::LowPower => "low power",
            Mode::ForceOnlineAll => "force online all",
        };
        f.write_str(name)
    }
}

/// Display power transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayEvent {
    OnBegin,
    OnComplete,
    OffBegin,
    OffComplete,
}

impl FromStr for DisplayEvent {
    type Err = ClusterPlugError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "on_begin" => Ok(Self::OnBegin),
            "on_complete" => Ok(Self::OnComplete),
            "off_begin" => Ok(Self::OffBegin),
            "off_complete" => Ok(Self::OffComplete),
            _ => Err(ClusterPlugError::Parse(format!("unknown display event: {}", s))),
        }
    }
}

/// What the driver should do with its pending tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Leave the pending tick as it is
    Keep,
    /// Run a tick now, replacing any pending one
    Immediate,
    /// Run the next tick after the delay
    After(Duration),
    /// Drop the pending tick
    Cancel,
}

/// Mode flags and cluster bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    pub big_enabled: bool,
    pub little_enabled: bool,
    pub screen_on: bool,
    pub low_power_mode: bool,
    pub screen_off_power_mode: bool,
    /// Periodic tick is not armed
    pub suspended: bool,
    pub force_online_all: bool,
}

impl Default for ClusterState {
    fn default() -> Self {
        Self {
            big_enabled: true,
            little_enabled: true,
            screen_on: true,
            low_power_mode: false,
            screen_off_power_mode: false,
            suspended: true,
            force_online_all: false,
        }
    }
}

impl ClusterState {
    /// Whether the minimal LITTLE-only core set must be enforced.
    /// `screen_off_power_mode` keeps sampling alive while the screen is off.
    pub fn power_save_required(&self) -> bool {
        self.low_power_mode || (!self.screen_on && !self.screen_off_power_mode)
    }

    /// LITTLE cores to keep while saving power; capped only with the screen
    /// off and screen-off power mode clear
    pub fn little_limit(&self, tunables: &Tunables) -> Option<usize> {
        if !self.screen_on && !self.screen_off_power_mode {
            Some(tunables.max_cores_when_screen_off as usize)
        } else {
            None
        }
    }

    /// Returns false when the value is unchanged
    pub fn set_low_power_mode(&mut self, on: bool) -> bool {
        if self.low_power_mode == on {
            return false;
        }
        self.low_power_mode = on;
        if on {
            self.screen_off_power_mode = false;
        }
        true
    }

    /// Returns false when the value is unchanged
    pub fn set_screen_off_power_mode(&mut self, on: bool) -> bool {
        if self.screen_off_power_mode == on {
            return false;
        }
        self.screen_off_power_mode = on;
        if on {
            self.low_power_mode = false;
        }
        true
    }

    pub fn mode(&self, enabled: bool) -> Mode {
        if !enabled {
            Mode::Disabled
        } else if self.force_online_all {
            Mode::ForceOnlineAll
        } else if self.suspended && self.low_power_mode {
            Mode::LowPower
        } else if self.suspended {
            Mode::ScreenOffPower
        } else {
            Mode::Sampling
        }
    }
}
