//! Read-only view of a node for status pages and tests.

use crate::identity::{NodeId, as_opt_string, as_string};
use crate::link::LinkState;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Point-in-time state of a [`Node`](crate::Node).
///
/// `ring_healthy` and `slaves` are only present on the leader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    #[serde(with = "as_string")]
    pub node: NodeId,
    /// `"ip:port CONNECTED"` or `"ip:port DISCONNECTED"`.
    pub successor: String,
    pub successor_state: LinkState,
    pub signed_in: bool,
    pub leader: bool,
    #[serde(with = "as_opt_string", default)]
    pub leader_id: Option<NodeId>,
    pub watching_leader: bool,
    pub election_participant: bool,
    #[serde(default)]
    pub variable: Option<Value>,
    pub logical_clock: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ring_healthy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slaves: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(leader: bool) -> NodeSnapshot {
        NodeSnapshot {
            node: NodeId::new("10.0.0.1", 3000),
            successor: "10.0.0.2:3000 CONNECTED".into(),
            successor_state: LinkState::Connected,
            signed_in: true,
            leader,
            leader_id: Some(NodeId::new("10.0.0.1", 3000)),
            watching_leader: false,
            election_participant: false,
            variable: Some(json!({"k": 1})),
            logical_clock: 4,
            ring_healthy: leader.then_some(true),
            slaves: leader.then(|| vec!["10.0.0.2:3000".to_string()]),
        }
    }

    #[test]
    fn test_leader_fields_only_on_leader() {
        let slave = serde_json::to_value(snapshot(false)).unwrap();
        assert!(slave.get("ringHealthy").is_none());
        assert!(slave.get("slaves").is_none());

        let leader = serde_json::to_value(snapshot(true)).unwrap();
        assert_eq!(leader["ringHealthy"], json!(true));
        assert_eq!(leader["slaves"], json!(["10.0.0.2:3000"]));
    }

    #[test]
    fn test_wire_shape() {
        let value = serde_json::to_value(snapshot(false)).unwrap();
        assert_eq!(value["node"], json!("10.0.0.1:3000"));
        assert_eq!(value["leaderId"], json!("10.0.0.1:3000"));
        assert_eq!(value["successorState"], json!("connected"));
        assert_eq!(value["signedIn"], json!(true));

        let back: NodeSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, snapshot(false));
    }
}
