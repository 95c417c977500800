// Protocol messages exchanged between simulated devices
//
// Every request carries one strongly typed payload; the topic is derived from
// the payload so a handler can never see a body that does not match its topic.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::routing::{Metric, RoutingTable};
use crate::{current_timestamp, MeshError};

// ============================================================================
// TOPICS & CONTENT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    NewConnection,
    NewConnectionAck,
    ConfirmConnection,
    UpdateRouting,
    UserMessage,
    UserMessageAck,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewConnection => "new-connection",
            Self::NewConnectionAck => "new-connection-ack",
            Self::ConfirmConnection => "confirm-connection",
            Self::UpdateRouting => "update-routing",
            Self::UserMessage => "user-message",
            Self::UserMessageAck => "user-message-ack",
        }
    }

    /// User traffic is logged in the sender's outbox; control traffic is not
    pub fn is_user_traffic(&self) -> bool {
        matches!(self, Self::UserMessage | Self::UserMessageAck)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new-connection" => Ok(Self::NewConnection),
            "new-connection-ack" => Ok(Self::NewConnectionAck),
            "confirm-connection" => Ok(Self::ConfirmConnection),
            "update-routing" => Ok(Self::UpdateRouting),
            "user-message" => Ok(Self::UserMessage),
            "user-message-ack" => Ok(Self::UserMessageAck),
            other => Err(MeshError::InvalidTopic {
                topic: other.to_string(),
            }),
        }
    }
}

/// Kind of user payload; selects the metric a route is optimized for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContentType {
    Text,
    Audio,
    File,
    Other(String),
}

impl ContentType {
    pub fn metric(&self) -> Metric {
        match self {
            Self::Text => Metric::Distance,
            Self::Audio => Metric::Latency,
            Self::File => Metric::ErrorRate,
            Self::Other(_) => Metric::Distance,
        }
    }
}

impl From<String> for ContentType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "text" => Self::Text,
            "audio" => Self::Audio,
            "file" => Self::File,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for ContentType {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<ContentType> for String {
    fn from(value: ContentType) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Audio => f.write_str("audio"),
            Self::File => f.write_str("file"),
            Self::Other(other) => f.write_str(other),
        }
    }
}

// ============================================================================
// ROUTES & PAYLOADS
// ============================================================================

/// One directed hop
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub source: String,
    pub target: String,
}

impl Route {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.source, self.target)
    }
}

/// A source-routed user message in flight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    /// Device that originated the message
    pub origin: String,
    /// Final recipient
    pub destination: String,
    pub content_type: ContentType,
    pub body: String,
    /// Hops still to travel after the current receiver
    pub path: Vec<Route>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "body", rename_all = "kebab-case")]
pub enum Payload {
    NewConnection,
    NewConnectionAck,
    ConfirmConnection,
    UpdateRouting(RoutingTable),
    UserMessage(UserMessage),
    UserMessageAck { acked: Uuid },
}

impl Payload {
    pub fn topic(&self) -> Topic {
        match self {
            Self::NewConnection => Topic::NewConnection,
            Self::NewConnectionAck => Topic::NewConnectionAck,
            Self::ConfirmConnection => Topic::ConfirmConnection,
            Self::UpdateRouting(_) => Topic::UpdateRouting,
            Self::UserMessage(_) => Topic::UserMessage,
            Self::UserMessageAck { .. } => Topic::UserMessageAck,
        }
    }
}

// ============================================================================
// REQUEST
// ============================================================================

/// One message between two adjacent devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub sender: String,
    pub destination: String,
    pub payload: Payload,
    read: bool,
    /// Unix timestamp (seconds)
    pub created_at: u64,
}

impl Request {
    pub fn new(sender: impl Into<String>, destination: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            destination: destination.into(),
            payload,
            read: false,
            created_at: current_timestamp(),
        }
    }

    pub fn topic(&self) -> Topic {
        self.payload.topic()
    }

    pub fn is_read(&self) -> bool {
        self.read
    }

    /// Mark as read. Returns false if it already was; `read` never reverts.
    pub fn mark_read(&mut self) -> bool {
        !std::mem::replace(&mut self.read, true)
    }

    /// Remaining hops, for user messages
    pub fn path(&self) -> &[Route] {
        match &self.payload {
            Payload::UserMessage(message) => &message.path,
            _ => &[],
        }
    }

    pub fn content_type(&self) -> Option<&ContentType> {
        match &self.payload {
            Payload::UserMessage(message) => Some(&message.content_type),
            _ => None,
        }
    }
}
