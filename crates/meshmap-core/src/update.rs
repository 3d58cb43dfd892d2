//! The incremental map update consumed by a session.
//!
//! A [`MapUpdate`] is one message from the control plane's long poll,
//! already deserialized by the transport layer. It mixes a handful of
//! encodings freely: a full peer-list replacement, deltas against the
//! previous list, per-field patches, liveness maps, and sticky
//! top-level fields where absence means "unchanged". The session
//! consumes an update exactly once; [`crate::merge`] rewrites its delta
//! fields in place while inflating it.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::derp::DerpMap;
use crate::filter::FilterRule;
use crate::key::{DiscoKey, NodePublicKey};
use crate::node::{Node, NodeId, UserProfile};
use crate::policy::{DnsConfig, SshPolicy, TkaInfo};

/// A per-field patch against one peer already in the merged list.
///
/// Only the fields a patch carries are applied. `derp_region` and
/// `cap` use zero as their "no change" sentinel; the rest use absence.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerChange {
    /// The peer being patched. Patches for unknown ids are dropped.
    pub node_id: NodeId,
    /// New home relay region. Zero means no change.
    pub derp_region: u16,
    /// New capability version. Zero means no change.
    pub cap: u32,
    /// Replacement endpoint list.
    pub endpoints: Option<Vec<SocketAddr>>,
    /// Replacement node key.
    pub key: Option<NodePublicKey>,
    /// Replacement discovery key.
    pub disco_key: Option<DiscoKey>,
    /// Replacement online state.
    pub online: Option<bool>,
    /// Replacement last-seen stamp.
    pub last_seen: Option<DateTime<Utc>>,
    /// Replacement key expiry.
    pub key_expiry: Option<DateTime<Utc>>,
    /// Replacement capability strings.
    pub capabilities: Option<Vec<String>>,
    /// Replacement key signature.
    pub key_signature: Option<Vec<u8>>,
}

/// A debug instruction embedded in an update.
///
/// The session does not interpret it; it is handed to the debug
/// observer, which may use the watchdog-reset sink it receives
/// alongside.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugMessage {
    /// Seconds the client is asked to sleep before continuing.
    pub sleep_seconds: Option<f64>,
    /// Reason the control plane wants the client to exit, if any.
    pub exit: Option<String>,
}

/// One non-keepalive message from the control plane.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MapUpdate {
    /// Replacement self node. Absent means the self node is unchanged.
    pub self_node: Option<Node>,
    /// Full peer-list replacement. Non-empty disables delta handling
    /// for this update.
    pub peers: Vec<Node>,
    /// Peers to drop from the previous list.
    pub peers_removed: Vec<NodeId>,
    /// Whole-node replacements and insertions, sorted by id.
    pub peers_changed: Vec<Node>,
    /// Per-field patches, applied after the list merge.
    pub peers_changed_patch: Vec<PeerChange>,
    /// Liveness delta: true stamps `last_seen` with the current time,
    /// false clears it.
    pub peer_seen_change: BTreeMap<NodeId, bool>,
    /// Online-state delta.
    pub online_change: BTreeMap<NodeId, bool>,
    /// Sticky relay map, with nested inheritance.
    pub derp_map: Option<DerpMap>,
    /// Sticky DNS configuration.
    pub dns_config: Option<DnsConfig>,
    /// Sticky SSH policy.
    pub ssh_policy: Option<SshPolicy>,
    /// Sticky packet-filter rules.
    pub packet_filter: Option<Vec<FilterRule>>,
    /// Newly delivered user profiles; accumulated, never evicted.
    pub user_profiles: Vec<UserProfile>,
    /// Sticky collect-services flag, encoded as an optional bool.
    pub collect_services: Option<bool>,
    /// Sticky login domain.
    pub domain: Option<String>,
    /// Sticky audit-log id for the domain's data plane.
    pub domain_audit_log_id: Option<String>,
    /// Sticky health problem list. An empty list clears problems.
    pub health: Option<Vec<String>>,
    /// Sticky key authority state.
    pub tka_info: Option<TkaInfo>,
    /// Debug instruction for the observer hook.
    pub debug: Option<DebugMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_deserializes_sparse_json() {
        let update: MapUpdate = serde_json::from_str(
            r#"{
                "peers_removed": [2],
                "peers_changed": [{"id": 3}],
                "domain": "example.com"
            }"#,
        )
        .expect("sparse update should parse");
        assert_eq!(update.peers_removed, vec![NodeId(2)]);
        assert_eq!(update.peers_changed.len(), 1);
        assert_eq!(update.domain.as_deref(), Some("example.com"));
        assert!(update.peers.is_empty());
        assert!(update.dns_config.is_none());
    }

    #[test]
    fn peer_change_sentinels_default_to_zero() {
        let pc = PeerChange::default();
        assert_eq!(pc.derp_region, 0);
        assert_eq!(pc.cap, 0);
        assert!(pc.endpoints.is_none());
    }
}
