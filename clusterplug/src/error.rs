//! Error types for Clusterplug

use crate::topology::CoreId;
use thiserror::Error;

/// Clusterplug error types
#[derive(Debug, Error)]
pub enum ClusterPlugError {
    /// A parameter write was rejected; the previous value is kept
    #[error("Invalid value for {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// Parameter name not recognised
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    /// The online/offline capability failed for a core
    #[error("Failed to switch cpu{cpu} {}: {source}", direction(.online))]
    HardwareSwitch {
        cpu: CoreId,
        online: bool,
        #[source]
        source: std::io::Error,
    },

    /// Aggregation ran with no online cores
    #[error("No online cores to aggregate load over")]
    AggregationDegenerate,

    /// Core index outside the configured topology
    #[error("cpu{0} is outside the configured topology")]
    NoSuchCore(CoreId),

    /// Parse error (procfs, sysfs, parameter values)
    #[error("Parse error: {0}")]
    Parse(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn direction(online: &bool) -> &'static str {
    if *online {
        "online"
    } else {
        "offline"
    }
}

/// Result type for Clusterplug operations
pub type Result<T> = std::result::Result<T, ClusterPlugError>;

impl ClusterPlugError {
    /// Whether the error leaves controller state untouched and can simply be
    /// retried on a later tick
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::HardwareSwitch { .. } | Self::Io(_))
    }

    /// Whether the error is a rejected configuration write
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameter { .. } | Self::UnknownParameter(_) | Self::Parse(_)
        )
    }
}
