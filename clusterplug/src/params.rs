//! Runtime parameter names and values

use crate::error::{ClusterPlugError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Parameters exposed over IPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    Enabled,
    LoadThresholdUp,
    LoadThresholdDown,
    SamplingPeriodMs,
    VoteThresholdUp,
    VoteThresholdDown,
    MaxCoresWhenScreenOff,
    LowPowerMode,
    ScreenOffPowerMode,
}

impl Parameter {
    pub const ALL: [Parameter; 9] = [
        Parameter::Enabled,
        Parameter::LoadThresholdUp,
        Parameter::LoadThresholdDown,
        Parameter::SamplingPeriodMs,
        Parameter::VoteThresholdUp,
        Parameter::VoteThresholdDown,
        Parameter::MaxCoresWhenScreenOff,
        Parameter::LowPowerMode,
        Parameter::ScreenOffPowerMode,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Parameter::Enabled => "enabled",
            Parameter::LoadThresholdUp => "load_threshold_up",
            Parameter::LoadThresholdDown => "load_threshold_down",
            Parameter::SamplingPeriodMs => "sampling_period_ms",
            Parameter::VoteThresholdUp => "vote_threshold_up",
            Parameter::VoteThresholdDown => "vote_threshold_down",
            Parameter::MaxCoresWhenScreenOff => "max_cores_when_screen_off",
            Parameter::LowPowerMode => "low_power_mode",
            Parameter::ScreenOffPowerMode => "screen_off_power_mode",
        }
    }

    pub fn is_bool(&self) -> bool {
        matches!(
            self,
            Parameter::Enabled | Parameter::LowPowerMode | Parameter::ScreenOffPowerMode
        )
    }

    /// Parse a command-line value for this parameter
    pub fn parse_value(&self, raw: &str) -> Result<ParameterValue> {
        let raw = raw.trim();
        if self.is_bool() {
            return match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => Ok(ParameterValue::Bool(true)),
                "0" | "false" | "off" | "no" => Ok(ParameterValue::Bool(false)),
                _ => Err(ClusterPlugError::InvalidParameter {
                    name: self.name(),
                    reason: format!("expected a boolean, got {:?}", raw),
                }),
            };
        }
        raw.parse::<u32>()
            .map(ParameterValue::Uint)
            .map_err(|e| ClusterPlugError::InvalidParameter {
                name: self.name(),
                reason: format!("{:?}: {}", raw, e),
            })
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Parameter {
    type Err = ClusterPlugError;

    fn from_str(s: &str) -> Result<Self> {
        Parameter::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| ClusterPlugError::UnknownParameter(s.to_string()))
    }
}

/// A parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Uint(u32),
}

impl ParameterValue {
    pub fn expect_bool(self, param: Parameter) -> Result<bool> {
        match self {
            ParameterValue::Bool(v) => Ok(v),
            // integer writes follow the sysfs convention: non-zero is true
            ParameterValue::Uint(v) => Ok(v != 0),
        }
        .and_then(|v| {
            if param.is_bool() {
                Ok(v)
            } else {
                Err(mismatch(param))
            }
        })
    }

    pub fn expect_uint(self, param: Parameter) -> Result<u32> {
        match self {
            ParameterValue::Uint(v) if !param.is_bool() => Ok(v),
            _ => Err(mismatch(param)),
        }
    }
}

fn mismatch(param: Parameter) -> ClusterPlugError {
    let expected = if param.is_bool() { "a boolean" } else { "an unsigned integer" };
    ClusterPlugError::InvalidParameter {
        name: param.name(),
        reason: format!("expected {}", expected),
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Bool(v) => write!(f, "{}", *v as u8),
            ParameterValue::Uint(v) => write!(f, "{}", v),
        }
    }
}
