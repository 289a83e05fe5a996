//! Core types used throughout the test harness

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::{SharedError, SharedResult};

/// Harness component identifier, attached to every log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Component {
    /// The environment orchestrator itself
    Environment,
    /// Partitioned log broker client (reachability, topics, bypass I/O)
    QueueBroker,
    /// Pub/sub broker child process
    NatsServer,
    /// Durable streaming server child process
    StreamingServer,
    /// Raw pub/sub bypass connection
    BypassNats,
    /// Streaming bypass connection
    BypassStreaming,
    /// Bridge under test
    Bridge,
    /// Completion waiter
    Waiter,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::Environment => "environment",
            Component::QueueBroker => "queue_broker",
            Component::NatsServer => "nats_server",
            Component::StreamingServer => "streaming_server",
            Component::BypassNats => "bypass_nats",
            Component::BypassStreaming => "bypass_streaming",
            Component::Bridge => "bridge",
            Component::Waiter => "waiter",
        };
        f.write_str(name)
    }
}

fn validate_identity(kind: &str, value: &str) -> SharedResult<()> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(SharedError::InvalidIdentity {
            kind: kind.to_string(),
            input: value.to_string(),
        })
    }
}

/// Streaming cluster identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterId(String);

impl ClusterId {
    /// Fresh identifier, unique per environment
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn from_string(s: &str) -> SharedResult<Self> {
        validate_identity("cluster id", s)?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Streaming client identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn from_string(s: &str) -> SharedResult<Self> {
        validate_identity("client id", s)?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three identities an environment keeps for its whole life.
///
/// They are chosen once, when the streaming layer first starts, and reused on
/// every restart so reconnecting clients observe the same cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identities {
    pub cluster_id: ClusterId,
    /// Used by the bypass streaming connection
    pub bypass_client_id: ClientId,
    /// Reserved for the bridge under test
    pub bridge_client_id: ClientId,
}

impl Identities {
    pub fn generate() -> Self {
        Self {
            cluster_id: ClusterId::generate(),
            bypass_client_id: ClientId::generate(),
            bridge_client_id: ClientId::generate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identities_are_distinct() {
        let a = Identities::generate();
        let b = Identities::generate();

        assert_ne!(a.cluster_id, b.cluster_id);
        assert_ne!(a.bypass_client_id, a.bridge_client_id);
        assert_ne!(a.bypass_client_id, b.bypass_client_id);
    }

    #[test]
    fn test_generated_ids_are_valid_streaming_names() {
        let id = ClientId::generate();
        assert!(ClientId::from_string(id.as_str()).is_ok());
        assert_eq!(id.as_str().len(), 32);
    }

    #[test]
    fn test_invalid_identity_rejected() {
        assert!(ClusterId::from_string("").is_err());
        assert!(ClientId::from_string("has space").is_err());
        assert!(ClientId::from_string("dots.are.subjects").is_err());
        assert!(ClusterId::from_string("test-cluster_1").is_ok());
    }

    #[test]
    fn test_component_display() {
        assert_eq!(Component::StreamingServer.to_string(), "streaming_server");
        assert_eq!(Component::Bridge.to_string(), "bridge");
    }
}
