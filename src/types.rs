//! Core event types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical index assigned by the state store. Non-decreasing per topic.
pub type Index = u64;

/// Category of events sharing a payload shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    ServiceHealth,
    ServiceHealthConnect,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::ServiceHealth => write!(f, "service_health"),
            Topic::ServiceHealthConnect => write!(f, "service_health_connect"),
        }
    }
}

/// Catalog operation carried by a health update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogOp {
    Register,
    Deregister,
}

/// A catalog node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub node: String,
    pub address: String,
}

/// A service instance registered on a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeService {
    pub id: String,
    pub service: String,
    pub port: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Passing,
    Warning,
    Critical,
}

/// A single health check attached to a service instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub check_id: String,
    pub status: HealthStatus,
}

/// A service instance together with its node and checks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckServiceNode {
    pub node: Node,
    pub service: NodeService,
    #[serde(default)]
    pub checks: Vec<HealthCheck>,
}

/// Health change for one service instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealthUpdate {
    pub op: CatalogOp,
    pub check_service_node: CheckServiceNode,
}

/// Event payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Domain update for a service instance.
    ServiceHealth(ServiceHealthUpdate),

    /// Marks the end of snapshot replay. Everything after it is live.
    EndOfSnapshot,
}

/// An immutable unit of domain change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub topic: Topic,
    /// Routing key, usually the service name.
    pub key: String,
    pub index: Index,
    pub payload: Payload,
}

impl Event {
    pub fn new(topic: Topic, key: impl Into<String>, index: Index, payload: Payload) -> Self {
        Self {
            topic,
            key: key.into(),
            index,
            payload,
        }
    }

    /// The marker appended between snapshot and live sections.
    pub fn end_of_snapshot(topic: Topic, index: Index) -> Self {
        Self {
            topic,
            key: String::new(),
            index,
            payload: Payload::EndOfSnapshot,
        }
    }

    pub fn is_end_of_snapshot(&self) -> bool {
        matches!(self.payload, Payload::EndOfSnapshot)
    }

    pub fn service_health(&self) -> Option<&ServiceHealthUpdate> {
        match &self.payload {
            Payload::ServiceHealth(update) => Some(update),
            Payload::EndOfSnapshot => None,
        }
    }
}

/// A subscription request. The core only reads `topic`; the rest is handed
/// to the snapshot function untouched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub topic: Topic,
    #[serde(default)]
    pub key: String,
    /// Last index the client has already seen (0 = none).
    #[serde(default)]
    pub index: Index,
}

impl SubscribeRequest {
    pub fn new(topic: Topic, key: impl Into<String>) -> Self {
        Self {
            topic,
            key: key.into(),
            index: 0,
        }
    }
}
