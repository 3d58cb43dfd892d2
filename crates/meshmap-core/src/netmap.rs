//! The materialized network map snapshot.
//!
//! A [`NetworkMap`] is the session's output: one complete,
//! self-consistent view of the network produced after every
//! non-keepalive update. Once handed to consumers it must be treated
//! as immutable; the session never touches a snapshot again after
//! publishing it.

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};

use crate::derp::DerpMap;
use crate::filter::{FilterRule, Match};
use crate::key::{MachinePublicKey, NodePrivateKey, NodePublicKey};
use crate::node::{Hostinfo, MachineStatus, Node, UserId, UserProfile};
use crate::policy::{DnsConfig, SshPolicy, TkaHead};

/// A fully materialized network map.
///
/// Peer entries are strictly ascending by id. Every non-zero user id
/// referenced by the self node or a peer appears in `user_profiles`
/// iff a profile for it was ever delivered during the session.
#[derive(Clone, Debug)]
pub struct NetworkMap {
    /// This node's public key.
    pub node_key: NodePublicKey,
    /// This node's private key, carried for the data plane.
    pub private_key: NodePrivateKey,
    /// This machine's key identity.
    pub machine_key: MachinePublicKey,
    /// The self node, if one has been observed this session.
    pub self_node: Option<Node>,
    /// Complete peer list, ascending by id.
    pub peers: Vec<Node>,
    /// Profiles for every referenced user with a known profile.
    pub user_profiles: BTreeMap<UserId, UserProfile>,
    /// Expiry of the self node's key, or the epoch when unknown.
    pub expiry: DateTime<Utc>,
    /// The self node's fully qualified name.
    pub name: String,
    /// The self node's mesh addresses, after debug filtering.
    pub addresses: Vec<IpAddr>,
    /// The self node's host metadata.
    pub hostinfo: Option<Hostinfo>,
    /// Machine authorization state.
    pub machine_status: MachineStatus,
    /// Login domain.
    pub domain: String,
    /// Audit-log id for the domain's data plane.
    pub domain_audit_log_id: String,
    /// DNS configuration.
    pub dns: DnsConfig,
    /// Compiled packet filter.
    pub packet_filter: Vec<Match>,
    /// Raw packet-filter rules the compiled filter came from.
    pub packet_filter_rules: Vec<FilterRule>,
    /// SSH policy, if any was delivered.
    pub ssh_policy: Option<SshPolicy>,
    /// Whether the node should report its services.
    pub collect_services: bool,
    /// Relay map, if any was delivered.
    pub derp_map: Option<DerpMap>,
    /// Health problems reported by the control plane.
    pub control_health: Vec<String>,
    /// Whether the key authority is active.
    pub tka_enabled: bool,
    /// Parsed key authority head, when present and well formed.
    pub tka_head: Option<TkaHead>,
}

impl NetworkMap {
    /// One-line summary for status surfaces and logs.
    #[must_use]
    pub fn concise_summary(&self) -> String {
        let online = self
            .peers
            .iter()
            .filter(|p| p.online == Some(true))
            .count();
        let self_desc = self.self_node.as_ref().map_or_else(
            || "-".to_string(),
            |n| {
                let name = if n.computed_name.is_empty() {
                    n.name.trim_end_matches('.')
                } else {
                    &n.computed_name
                };
                format!("{} [{}]", self.node_key.short_hex(), name)
            },
        );
        format!(
            "netmap: self={self_desc} peers={}/{} tka={}",
            online,
            self.peers.len(),
            if self.tka_enabled { "on" } else { "off" },
        )
    }
}
