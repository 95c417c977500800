// MeshSim Core: ad-hoc wireless mesh simulator
//
// Mobile devices sit on a bounded 2D grid, discover each other by radio range,
// establish links with a three-message handshake, gossip multi-metric routing
// tables and source-route user messages hop by hop. All delivery is in-process.

pub mod config;
pub mod device;
pub mod environment;
pub mod message;
pub mod protocol;
pub mod routing;
pub mod scheduler;
pub mod simulator;

use thiserror::Error;

pub use config::{DiscoveryRule, SimConfig};
pub use device::{
    Device, DeviceSnapshot, DeviceStatus, FixedLinkQuality, LinkQuality, LinkQualitySource,
    SeededLinkQuality,
};
pub use environment::{Chart, CoverageArea, Environment};
pub use message::{ContentType, Payload, Request, Route, Topic, UserMessage};
pub use protocol::{ProtocolEngine, RefreshReport};
pub use routing::{best_paths, Metric, Path, RoutingEntry, RoutingTable};
pub use scheduler::{JobKind, Scheduler};
pub use simulator::{EnvironmentSnapshot, MeshSimulator, NewDevice, OutgoingMessage};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeshError {
    #[error("Device not found: {label}")]
    DeviceNotFound { label: String },
    #[error("Device already exists: {label}")]
    DeviceAlreadyExists { label: String },
    #[error("Device not placed on the chart: {label}")]
    NotPlaced { label: String },
    #[error("No route from {from} to {to} by {metric}")]
    NoRouteFound {
        from: String,
        to: String,
        metric: Metric,
    },
    #[error("Handshake deadline elapsed for {label}")]
    HandshakeTimeout { label: String },
    #[error("Invalid topic: {topic}")]
    InvalidTopic { topic: String },
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("No Tokio runtime to run jobs on: {0}")]
    NoRuntime(String),
}

impl MeshError {
    pub(crate) fn not_found(label: impl Into<String>) -> Self {
        MeshError::DeviceNotFound {
            label: label.into(),
        }
    }

    pub(crate) fn not_placed(label: impl Into<String>) -> Self {
        MeshError::NotPlaced {
            label: label.into(),
        }
    }
}

pub type MeshResult<T> = Result<T, MeshError>;

/// Current wall-clock time as unix seconds.
pub(crate) fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
