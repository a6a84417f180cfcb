// Role policy — explicit capabilities instead of per-node forks
//
// The mesh historically grew leaf and gateway variants that diverged by
// commenting retransmit calls in or out. Here every routing decision is a
// named boolean a node configuration states explicitly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which kind of participant this node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Sends and receives on the radio mesh only
    Leaf,
    /// As Leaf, plus bridges external-destination traffic upstream
    Gateway,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Leaf => write!(f, "leaf"),
            NodeRole::Gateway => write!(f, "gateway"),
        }
    }
}

/// The routing capabilities a role grants.
///
/// Flood flags control whether a received packet is re-broadcast to extend
/// its reach beyond direct radio range; `bridge_external` controls whether
/// external-destination messages are copied upstream. Defaults are
/// conservative (no flooding) for both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePolicy {
    /// Re-broadcast Discover probes heard from other nodes
    pub flood_discover: bool,
    /// Re-broadcast Announce advertisements heard from other nodes
    pub flood_announce: bool,
    /// Re-broadcast NetworkMessages addressed to somebody else
    pub flood_unaddressed: bool,
    /// Copy external-destination (`+`/`+Q`) messages to the bridge uplink
    pub bridge_external: bool,
}

impl RolePolicy {
    /// Policy for a plain mesh participant.
    pub fn leaf() -> Self {
        RolePolicy {
            flood_discover: false,
            flood_announce: false,
            flood_unaddressed: false,
            bridge_external: false,
        }
    }

    /// Policy for a node that also owns an upstream bridge.
    pub fn gateway() -> Self {
        RolePolicy {
            bridge_external: true,
            ..RolePolicy::leaf()
        }
    }

    pub fn for_role(role: NodeRole) -> Self {
        match role {
            NodeRole::Leaf => RolePolicy::leaf(),
            NodeRole::Gateway => RolePolicy::gateway(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_defaults() {
        let policy = RolePolicy::leaf();
        assert!(!policy.flood_discover);
        assert!(!policy.flood_announce);
        assert!(!policy.flood_unaddressed);
        assert!(!policy.bridge_external);
    }

    #[test]
    fn test_gateway_bridges_but_does_not_flood() {
        let policy = RolePolicy::gateway();
        assert!(policy.bridge_external);
        assert!(!policy.flood_discover);
        assert!(!policy.flood_announce);
        assert!(!policy.flood_unaddressed);
    }

    #[test]
    fn test_policy_serializes() {
        let policy = RolePolicy::for_role(NodeRole::Gateway);
        let json = serde_json::to_string(&policy).unwrap();
        let restored: RolePolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, restored);
    }
}
