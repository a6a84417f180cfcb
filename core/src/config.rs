// Node configuration
//
// Everything a node needs to join a mesh: identity, key material, role, and
// the tuning knobs. Role capabilities default from the role but every flag
// can be pinned explicitly — a node's routing behavior is always readable
// from its configuration, never from which binary variant it happens to be.

use crate::crypto::PresharedKey;
use crate::discovery::JitterWindow;
use crate::ledger::DEFAULT_SEEN_CAPACITY;
use crate::role::{NodeRole, RolePolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Node id must not be empty")]
    EmptyNodeId,

    #[error("Node id too long: {0} characters (max 64)")]
    NodeIdTooLong(usize),

    #[error("Node id must not start with '+' — that prefix selects external delivery")]
    SigilNodeId,

    #[error("Jitter window is empty (min {min} > max {max})")]
    EmptyJitterWindow { min: u64, max: u64 },
}

/// Configuration for one mesh node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's identifier on the mesh (statically assigned)
    pub node_id: String,

    /// Network passphrase the preshared key derives from
    pub passphrase: String,

    /// Leaf or Gateway
    pub role: NodeRole,

    /// Bound on the seen-packet-id set
    #[serde(default = "default_seen_capacity")]
    pub seen_capacity: usize,

    /// Announce-reply jitter window, milliseconds
    #[serde(default = "default_jitter_min")]
    pub jitter_min_ms: u64,
    #[serde(default = "default_jitter_max")]
    pub jitter_max_ms: u64,

    /// Radio poll timeout, milliseconds
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,

    // Per-capability overrides; unset means "whatever the role says".
    #[serde(default)]
    pub flood_discover: Option<bool>,
    #[serde(default)]
    pub flood_announce: Option<bool>,
    #[serde(default)]
    pub flood_unaddressed: Option<bool>,
    #[serde(default)]
    pub bridge_external: Option<bool>,
}

fn default_seen_capacity() -> usize {
    DEFAULT_SEEN_CAPACITY
}

fn default_jitter_min() -> u64 {
    100
}

fn default_jitter_max() -> u64 {
    3000
}

fn default_poll_timeout() -> u64 {
    1000
}

impl NodeConfig {
    pub fn new(node_id: &str, passphrase: &str, role: NodeRole) -> Self {
        NodeConfig {
            node_id: node_id.to_string(),
            passphrase: passphrase.to_string(),
            role,
            seen_capacity: default_seen_capacity(),
            jitter_min_ms: default_jitter_min(),
            jitter_max_ms: default_jitter_max(),
            poll_timeout_ms: default_poll_timeout(),
            flood_discover: None,
            flood_announce: None,
            flood_unaddressed: None,
            bridge_external: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.is_empty() {
            return Err(ConfigError::EmptyNodeId);
        }
        if self.node_id.len() > 64 {
            return Err(ConfigError::NodeIdTooLong(self.node_id.len()));
        }
        if self.node_id.starts_with('+') {
            return Err(ConfigError::SigilNodeId);
        }
        if self.jitter_min_ms > self.jitter_max_ms {
            return Err(ConfigError::EmptyJitterWindow {
                min: self.jitter_min_ms,
                max: self.jitter_max_ms,
            });
        }
        Ok(())
    }

    /// Derive the mesh preshared key from the passphrase.
    pub fn preshared_key(&self) -> PresharedKey {
        PresharedKey::derive(&self.passphrase)
    }

    /// The effective routing policy: role defaults plus explicit overrides.
    pub fn policy(&self) -> RolePolicy {
        let defaults = RolePolicy::for_role(self.role);
        RolePolicy {
            flood_discover: self.flood_discover.unwrap_or(defaults.flood_discover),
            flood_announce: self.flood_announce.unwrap_or(defaults.flood_announce),
            flood_unaddressed: self
                .flood_unaddressed
                .unwrap_or(defaults.flood_unaddressed),
            bridge_external: self.bridge_external.unwrap_or(defaults.bridge_external),
        }
    }

    pub fn jitter_window(&self) -> JitterWindow {
        JitterWindow::new(self.jitter_min_ms, self.jitter_max_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::new("FIELD01", "password", NodeRole::Leaf);
        assert!(config.validate().is_ok());
        assert_eq!(config.seen_capacity, DEFAULT_SEEN_CAPACITY);
        assert_eq!(config.policy(), RolePolicy::leaf());
    }

    #[test]
    fn test_gateway_policy_from_role() {
        let config = NodeConfig::new("GATE", "password", NodeRole::Gateway);
        assert!(config.policy().bridge_external);
    }

    #[test]
    fn test_overrides_beat_role_defaults() {
        let mut config = NodeConfig::new("FIELD01", "password", NodeRole::Leaf);
        config.flood_announce = Some(true);
        config.bridge_external = Some(false);

        let policy = config.policy();
        assert!(policy.flood_announce);
        assert!(!policy.bridge_external);
        assert!(!policy.flood_discover);
    }

    #[test]
    fn test_minimal_json() {
        let config: NodeConfig = serde_json::from_str(
            r#"{ "node_id": "FIELD01", "passphrase": "password", "role": "leaf" }"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.jitter_min_ms, 100);
        assert_eq!(config.jitter_max_ms, 3000);
        assert_eq!(config.flood_discover, None);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = NodeConfig::new("", "password", NodeRole::Leaf);
        assert_eq!(config.validate(), Err(ConfigError::EmptyNodeId));

        config.node_id = "+15551234567".to_string();
        assert_eq!(config.validate(), Err(ConfigError::SigilNodeId));

        config.node_id = "FIELD01".to_string();
        config.jitter_min_ms = 500;
        config.jitter_max_ms = 100;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyJitterWindow { .. })
        ));
    }
}
