//! Simulation settings
//!
//! Timing for the three periodic jobs, the handshake deadline, the grid the
//! devices walk on and the rule used to decide who is within radio range.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{MeshError, MeshResult};

// ============================================================================
// ENUMS
// ============================================================================

/// Rule used by neighbor discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryRule {
    /// Only the scanning device's radius has to cover the distance.
    /// A strong transmitter sees further than it is seen.
    SourceRadius,
    /// Both radii have to cover the distance.
    Mutual,
}

impl std::fmt::Display for DiscoveryRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceRadius => write!(f, "source-radius"),
            Self::Mutual => write!(f, "mutual"),
        }
    }
}

impl std::str::FromStr for DiscoveryRule {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source-radius" => Ok(Self::SourceRadius),
            "mutual" => Ok(Self::Mutual),
            other => Err(MeshError::InvalidConfig(format!(
                "unknown discovery rule: {}",
                other
            ))),
        }
    }
}

impl Default for DiscoveryRule {
    fn default() -> Self {
        Self::SourceRadius
    }
}

// ============================================================================
// SIM CONFIG
// ============================================================================

/// Settings shared by every device of one simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Period of the InboxDrain job
    pub inbox_interval_ms: u64,
    /// Default period of the RoutingRefresh job (devices may override it)
    pub refresh_interval_ms: u64,
    /// Period of the Walk job
    pub walk_interval_ms: u64,
    /// Start a Walk job for newly inserted devices
    pub walk_enabled: bool,
    /// Longest a refresh waits for handshake acknowledgements
    pub handshake_deadline_ms: u64,
    /// Upper bound of both grid axes; the lower bound is 0
    pub grid_max: i32,
    /// Largest per-axis displacement of one walk step
    pub walk_step: i32,
    /// Neighbor discovery rule
    pub discovery: DiscoveryRule,
    /// Link error rate and latency are drawn from `[0, link_quality_max)`
    pub link_quality_max: f64,
    /// Seed for link quality and mobility randomness; entropy when unset
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            inbox_interval_ms: 5_000,
            refresh_interval_ms: 20_000,
            walk_interval_ms: 35_000,
            walk_enabled: false,
            handshake_deadline_ms: 15_000,
            grid_max: 50,
            walk_step: 1,
            discovery: DiscoveryRule::default(),
            link_quality_max: 10.0,
            seed: None,
        }
    }
}

impl SimConfig {
    /// Validate configuration values
    pub fn validate(&self) -> MeshResult<()> {
        if self.inbox_interval_ms == 0 {
            return Err(MeshError::InvalidConfig(
                "inbox_interval_ms must be > 0".to_string(),
            ));
        }
        if self.refresh_interval_ms == 0 {
            return Err(MeshError::InvalidConfig(
                "refresh_interval_ms must be > 0".to_string(),
            ));
        }
        if self.walk_interval_ms == 0 {
            return Err(MeshError::InvalidConfig(
                "walk_interval_ms must be > 0".to_string(),
            ));
        }
        if self.handshake_deadline_ms == 0 {
            return Err(MeshError::InvalidConfig(
                "handshake_deadline_ms must be > 0".to_string(),
            ));
        }
        if self.grid_max <= 0 {
            return Err(MeshError::InvalidConfig(format!(
                "grid_max must be positive, got {}",
                self.grid_max
            )));
        }
        if self.walk_step < 0 {
            return Err(MeshError::InvalidConfig(format!(
                "walk_step must not be negative, got {}",
                self.walk_step
            )));
        }
        if !(self.link_quality_max.is_finite() && self.link_quality_max > 0.0) {
            return Err(MeshError::InvalidConfig(format!(
                "link_quality_max must be a positive number, got {}",
                self.link_quality_max
            )));
        }
        Ok(())
    }

    pub fn inbox_interval(&self) -> Duration {
        Duration::from_millis(self.inbox_interval_ms)
    }

    pub fn walk_interval(&self) -> Duration {
        Duration::from_millis(self.walk_interval_ms)
    }

    pub fn handshake_deadline(&self) -> Duration {
        Duration::from_millis(self.handshake_deadline_ms)
    }
}
