//! Session-scoped sticky state and snapshot assembly.
//!
//! Most top-level update fields are sticky: absence means "reuse the
//! previous value". [`StickyState`] stores the last observed value of
//! each, absorbs whatever an update carries, and assembles the
//! complete [`NetworkMap`] from the result plus the freshly merged
//! peer list. A session starts empty except for the DNS configuration,
//! whose documented initial value is the empty config rather than
//! "never observed".

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use meshmap_core::filter::{self, FilterRule, Match};
use meshmap_core::key::{MachinePublicKey, NodePrivateKey, NodePublicKey};
use meshmap_core::policy::TkaHead;
use meshmap_core::{
    merge, DerpMap, DnsConfig, MachineStatus, MapUpdate, NetworkMap, Node, SshPolicy, TkaInfo,
    UserId, UserProfile,
};
use tracing::{debug, warn};

use crate::knobs::DevKnobs;

/// Key material the snapshot carries, borrowed from the session.
pub(crate) struct SnapshotKeys<'a> {
    pub private_node_key: &'a NodePrivateKey,
    pub node_key: &'a NodePublicKey,
    pub machine_key: &'a MachinePublicKey,
}

/// Last observed values of every sticky field, plus the previous peer
/// list deltas are applied against.
pub(crate) struct StickyState {
    last_self_node: Option<Node>,
    last_dns_config: DnsConfig,
    last_derp_map: Option<DerpMap>,
    user_profiles: BTreeMap<UserId, UserProfile>,
    last_packet_filter_rules: Vec<FilterRule>,
    last_parsed_packet_filter: Vec<Match>,
    last_ssh_policy: Option<SshPolicy>,
    collect_services: bool,
    previous_peers: Vec<Node>,
    last_domain: String,
    last_domain_audit_log_id: String,
    last_health: Vec<String>,
    last_tka_info: Option<TkaInfo>,
}

impl StickyState {
    pub(crate) fn new() -> Self {
        Self {
            last_self_node: None,
            last_dns_config: DnsConfig::default(),
            last_derp_map: None,
            user_profiles: BTreeMap::new(),
            last_packet_filter_rules: Vec::new(),
            last_parsed_packet_filter: Vec::new(),
            last_ssh_policy: None,
            collect_services: false,
            previous_peers: Vec::new(),
            last_domain: String::new(),
            last_domain_audit_log_id: String::new(),
            last_health: Vec::new(),
            last_tka_info: None,
        }
    }

    pub(crate) fn last_self_node(&self) -> Option<&Node> {
        self.last_self_node.as_ref()
    }

    /// Inflates the update's peer list, absorbs its sticky fields, and
    /// assembles the snapshot. The update is consumed; feeding it in
    /// again is not meaningful.
    pub(crate) fn build_netmap(
        &mut self,
        update: &mut MapUpdate,
        now: DateTime<Utc>,
        keys: &SnapshotKeys<'_>,
        knobs: DevKnobs,
    ) -> NetworkMap {
        merge::apply_peer_delta(update, std::mem::take(&mut self.previous_peers), now);
        // The merged list escapes into the snapshot; keep our own copy
        // as the base for the next delta.
        self.previous_peers = update.peers.clone();

        for profile in update.user_profiles.drain(..) {
            self.user_profiles.insert(profile.id, profile);
        }

        if let Some(mut derp_map) = update.derp_map.take() {
            debug!("netmap: new map contains DERP map");
            if let Some(prev) = &self.last_derp_map {
                derp_map.inherit_absent_from(prev);
            }
            self.last_derp_map = Some(derp_map);
        }

        if let Some(rules) = update.packet_filter.take() {
            match filter::compile(&rules) {
                Ok(matches) => self.last_parsed_packet_filter = matches,
                // Keep the previously compiled filter on failure.
                Err(err) => warn!(%err, "packet filter compile failed"),
            }
            self.last_packet_filter_rules = rules;
        }
        if let Some(dns) = update.dns_config.take() {
            self.last_dns_config = dns;
        }
        if let Some(policy) = update.ssh_policy.take() {
            self.last_ssh_policy = Some(policy);
        }
        if let Some(collect) = update.collect_services {
            self.collect_services = collect;
        }
        if let Some(domain) = update.domain.take() {
            self.last_domain = domain;
        }
        if let Some(id) = update.domain_audit_log_id.take() {
            self.last_domain_audit_log_id = id;
        }
        if let Some(health) = update.health.take() {
            self.last_health = health;
        }
        if let Some(tka) = update.tka_info.take() {
            self.last_tka_info = Some(tka);
        }

        let mut nm = NetworkMap {
            node_key: *keys.node_key,
            private_key: keys.private_node_key.clone(),
            machine_key: *keys.machine_key,
            self_node: None,
            peers: std::mem::take(&mut update.peers),
            user_profiles: BTreeMap::new(),
            expiry: DateTime::UNIX_EPOCH,
            name: String::new(),
            addresses: Vec::new(),
            hostinfo: None,
            machine_status: MachineStatus::Unknown,
            domain: self.last_domain.clone(),
            domain_audit_log_id: self.last_domain_audit_log_id.clone(),
            dns: self.last_dns_config.clone(),
            packet_filter: self.last_parsed_packet_filter.clone(),
            packet_filter_rules: self.last_packet_filter_rules.clone(),
            ssh_policy: self.last_ssh_policy.clone(),
            collect_services: self.collect_services,
            derp_map: self.last_derp_map.clone(),
            control_health: self.last_health.clone(),
            tka_enabled: self.last_tka_info.as_ref().is_some_and(|t| !t.disabled),
            tka_head: None,
        };

        if let Some(tka) = &self.last_tka_info {
            if !tka.head.is_empty() {
                match tka.head.parse::<TkaHead>() {
                    Ok(head) => nm.tka_head = Some(head),
                    Err(err) => {
                        warn!(%err, "malformed TKA head; disabling");
                        nm.tka_enabled = false;
                    }
                }
            }
        }

        if let Some(node) = update.self_node.take() {
            self.last_self_node = Some(node);
        }
        if let Some(node) = &self.last_self_node {
            nm.self_node = Some(node.clone());
            nm.expiry = node.key_expiry;
            nm.name.clone_from(&node.name);
            nm.addresses = filter_self_addresses(knobs, &node.addresses);
            nm.hostinfo.clone_from(&node.hostinfo);
            nm.machine_status = if node.machine_authorized {
                MachineStatus::Authorized
            } else {
                MachineStatus::Unauthorized
            };
        }

        let mut referenced = Vec::with_capacity(1 + nm.peers.len() * 2);
        if let Some(node) = &nm.self_node {
            referenced.push(node.user);
        }
        for peer in &nm.peers {
            referenced.push(peer.sharer);
            referenced.push(peer.user);
        }
        for id in referenced {
            if id.is_zero() {
                continue;
            }
            if let Some(profile) = self.user_profiles.get(&id) {
                nm.user_profiles
                    .entry(id)
                    .or_insert_with(|| profile.clone());
            }
        }

        if knobs.force_proxy_dns {
            nm.dns.proxied = true;
        }
        nm
    }
}

/// Returns the self addresses a snapshot should carry.
///
/// Unfiltered by default; the IPv6-only debug knob keeps only IPv6
/// addresses.
fn filter_self_addresses(knobs: DevKnobs, addresses: &[IpAddr]) -> Vec<IpAddr> {
    if knobs.self_v6_only {
        addresses.iter().copied().filter(IpAddr::is_ipv6).collect()
    } else {
        addresses.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use meshmap_core::NodeId;

    use super::*;

    fn keys() -> (NodePrivateKey, NodePublicKey, MachinePublicKey) {
        let private = NodePrivateKey::from_bytes([5; 32]);
        let public = private.public();
        (private, public, MachinePublicKey::from_bytes([6; 32]))
    }

    fn build(state: &mut StickyState, update: &mut MapUpdate, knobs: DevKnobs) -> NetworkMap {
        let (private, public, machine) = keys();
        state.build_netmap(
            update,
            DateTime::UNIX_EPOCH + chrono::Duration::seconds(1000),
            &SnapshotKeys {
                private_node_key: &private,
                node_key: &public,
                machine_key: &machine,
            },
            knobs,
        )
    }

    fn profile(id: u64) -> UserProfile {
        UserProfile {
            id: UserId(id),
            login_name: format!("user{id}@example.com"),
            display_name: format!("User {id}"),
            profile_pic_url: String::new(),
        }
    }

    #[test]
    fn sticky_fields_survive_empty_update() {
        let mut state = StickyState::new();
        let mut first = MapUpdate {
            domain: Some("corp.example".into()),
            health: Some(vec!["relay unreachable".into()]),
            collect_services: Some(true),
            dns_config: Some(DnsConfig {
                resolvers: vec!["100.100.100.100".into()],
                ..DnsConfig::default()
            }),
            ..MapUpdate::default()
        };
        let nm1 = build(&mut state, &mut first, DevKnobs::default());
        assert_eq!(nm1.domain, "corp.example");

        let mut second = MapUpdate::default();
        let nm2 = build(&mut state, &mut second, DevKnobs::default());
        assert_eq!(nm2.domain, "corp.example");
        assert_eq!(nm2.control_health, vec!["relay unreachable".to_string()]);
        assert!(nm2.collect_services);
        assert_eq!(nm2.dns.resolvers, vec!["100.100.100.100".to_string()]);
    }

    #[test]
    fn collect_services_only_moves_on_definite_values() {
        let mut state = StickyState::new();
        let mut on = MapUpdate {
            collect_services: Some(true),
            ..MapUpdate::default()
        };
        assert!(build(&mut state, &mut on, DevKnobs::default()).collect_services);

        let mut unset = MapUpdate::default();
        assert!(build(&mut state, &mut unset, DevKnobs::default()).collect_services);

        let mut off = MapUpdate {
            collect_services: Some(false),
            ..MapUpdate::default()
        };
        assert!(!build(&mut state, &mut off, DevKnobs::default()).collect_services);
    }

    #[test]
    fn bad_filter_keeps_previous_compiled_rules() {
        let mut state = StickyState::new();
        let good = vec![FilterRule {
            src_ips: vec!["10.0.0.0/8".into()],
            dst_ips: vec!["10.1.2.3".into()],
            ip_proto: Vec::new(),
        }];
        let mut first = MapUpdate {
            packet_filter: Some(good.clone()),
            ..MapUpdate::default()
        };
        let nm1 = build(&mut state, &mut first, DevKnobs::default());
        assert_eq!(nm1.packet_filter.len(), 1);

        let bad = vec![FilterRule {
            src_ips: vec!["not-a-prefix".into()],
            ..FilterRule::default()
        }];
        let mut second = MapUpdate {
            packet_filter: Some(bad.clone()),
            ..MapUpdate::default()
        };
        let nm2 = build(&mut state, &mut second, DevKnobs::default());
        // Compiled filter unchanged, raw rules replaced.
        assert_eq!(nm2.packet_filter, nm1.packet_filter);
        assert_eq!(nm2.packet_filter_rules, bad);
    }

    #[test]
    fn tka_enabled_follows_info_and_head() {
        let mut state = StickyState::new();
        let mut enabled = MapUpdate {
            tka_info: Some(TkaInfo {
                head: format!("sha256:{}", "ef".repeat(32)),
                disabled: false,
            }),
            ..MapUpdate::default()
        };
        let nm = build(&mut state, &mut enabled, DevKnobs::default());
        assert!(nm.tka_enabled);
        assert!(nm.tka_head.is_some());

        let mut disabled = MapUpdate {
            tka_info: Some(TkaInfo {
                head: format!("sha256:{}", "ef".repeat(32)),
                disabled: true,
            }),
            ..MapUpdate::default()
        };
        let nm = build(&mut state, &mut disabled, DevKnobs::default());
        assert!(!nm.tka_enabled);
    }

    #[test]
    fn malformed_tka_head_demotes_to_disabled() {
        let mut state = StickyState::new();
        let mut update = MapUpdate {
            tka_info: Some(TkaInfo {
                head: "sha256:nope".into(),
                disabled: false,
            }),
            ..MapUpdate::default()
        };
        let nm = build(&mut state, &mut update, DevKnobs::default());
        assert!(!nm.tka_enabled);
        assert!(nm.tka_head.is_none());
    }

    #[test]
    fn user_profiles_project_referenced_ids_only() {
        let mut state = StickyState::new();
        let mut update = MapUpdate {
            user_profiles: vec![profile(10), profile(11), profile(12)],
            self_node: Some(Node {
                user: UserId(10),
                ..Node::with_id(1)
            }),
            peers: vec![
                Node {
                    user: UserId(11),
                    sharer: UserId(10),
                    ..Node::with_id(2)
                },
                // References a user no profile was ever delivered for.
                Node {
                    user: UserId(99),
                    ..Node::with_id(3)
                },
            ],
            ..MapUpdate::default()
        };
        let nm = build(&mut state, &mut update, DevKnobs::default());

        let ids: Vec<u64> = nm.user_profiles.keys().map(|u| u.0).collect();
        assert_eq!(ids, vec![10, 11]);
    }

    #[test]
    fn user_profiles_accumulate_across_updates() {
        let mut state = StickyState::new();
        let mut first = MapUpdate {
            user_profiles: vec![profile(10)],
            ..MapUpdate::default()
        };
        build(&mut state, &mut first, DevKnobs::default());

        // The profile arrived earlier; a later update referencing it
        // still resolves.
        let mut second = MapUpdate {
            peers: vec![Node {
                user: UserId(10),
                ..Node::with_id(4)
            }],
            ..MapUpdate::default()
        };
        let nm = build(&mut state, &mut second, DevKnobs::default());
        assert!(nm.user_profiles.contains_key(&UserId(10)));
    }

    #[test]
    fn self_node_sticks_and_drives_derived_fields() {
        let mut state = StickyState::new();
        let expiry = DateTime::UNIX_EPOCH + chrono::Duration::days(30);
        let mut first = MapUpdate {
            self_node: Some(Node {
                name: "laptop.corp.mesh.example.".into(),
                machine_authorized: true,
                key_expiry: expiry,
                addresses: vec!["100.64.0.1".parse().unwrap(), "fd7a::1".parse().unwrap()],
                ..Node::with_id(1)
            }),
            ..MapUpdate::default()
        };
        let nm1 = build(&mut state, &mut first, DevKnobs::default());
        assert_eq!(nm1.machine_status, MachineStatus::Authorized);
        assert_eq!(nm1.expiry, expiry);
        assert_eq!(nm1.addresses.len(), 2);

        let mut second = MapUpdate::default();
        let nm2 = build(&mut state, &mut second, DevKnobs::default());
        assert_eq!(nm2.name, "laptop.corp.mesh.example.");
        assert_eq!(nm2.machine_status, MachineStatus::Authorized);
    }

    #[test]
    fn no_self_node_leaves_derived_fields_unset() {
        let mut state = StickyState::new();
        let mut update = MapUpdate::default();
        let nm = build(&mut state, &mut update, DevKnobs::default());
        assert_eq!(nm.machine_status, MachineStatus::Unknown);
        assert!(nm.self_node.is_none());
        assert!(nm.name.is_empty());
    }

    #[test]
    fn v6_only_knob_filters_addresses() {
        let mut state = StickyState::new();
        let mut update = MapUpdate {
            self_node: Some(Node {
                addresses: vec!["100.64.0.1".parse().unwrap(), "fd7a::1".parse().unwrap()],
                ..Node::with_id(1)
            }),
            ..MapUpdate::default()
        };
        let knobs = DevKnobs {
            self_v6_only: true,
            ..DevKnobs::default()
        };
        let nm = build(&mut state, &mut update, knobs);
        assert_eq!(nm.addresses, vec!["fd7a::1".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn force_proxy_dns_knob() {
        let mut state = StickyState::new();
        let mut update = MapUpdate::default();
        let knobs = DevKnobs {
            force_proxy_dns: true,
            ..DevKnobs::default()
        };
        assert!(build(&mut state, &mut update, knobs).dns.proxied);
    }

    #[test]
    fn derp_map_inherits_through_session_state() {
        let mut state = StickyState::new();
        let mut first = MapUpdate {
            derp_map: Some(DerpMap {
                regions: Some(
                    [(1u16, meshmap_core::DerpRegion::default())]
                        .into_iter()
                        .collect(),
                ),
                omit_default_regions: true,
                home_params: Some(meshmap_core::DerpHomeParams {
                    region_score: Some([(1u16, 0.5f64)].into_iter().collect()),
                }),
            }),
            ..MapUpdate::default()
        };
        build(&mut state, &mut first, DevKnobs::default());

        // Regions absent, home params present but empty: both inherit.
        let mut second = MapUpdate {
            derp_map: Some(DerpMap {
                regions: None,
                omit_default_regions: false,
                home_params: Some(meshmap_core::DerpHomeParams { region_score: None }),
            }),
            ..MapUpdate::default()
        };
        let nm = build(&mut state, &mut second, DevKnobs::default());
        let dm = nm.derp_map.expect("derp map present");
        assert!(dm.regions.is_some());
        assert!(dm.omit_default_regions);
        assert_eq!(
            dm.home_params.and_then(|hp| hp.region_score),
            Some([(1u16, 0.5f64)].into_iter().collect())
        );

        // Unknown removal ids are a no-op for sticky state too: the
        // list delta never touches the stored DERP map.
        let mut third = MapUpdate {
            peers_removed: vec![NodeId(1234)],
            ..MapUpdate::default()
        };
        let nm = build(&mut state, &mut third, DevKnobs::default());
        assert!(nm.derp_map.is_some());
    }
}
