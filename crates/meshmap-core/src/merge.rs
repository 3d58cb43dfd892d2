//! Peer delta reconciliation.
//!
//! [`apply_peer_delta`] inflates an incremental [`MapUpdate`] into a
//! complete peer list, using the previous list as the base. After it
//! returns, `update.peers` is the full list and the delta fields that
//! fed it are cleared, so the update can be consumed as if it had been
//! full all along.
//!
//! # Invariants
//!
//! - [INV-MRG-001] The produced list is strictly ascending by node id
//!   with no duplicates.
//! - [INV-MRG-002] Out-of-order input is never an error: it is sorted
//!   in place and logged. A misordered previous list is an internal
//!   error class and logged as such, but still recovered.
//! - [INV-MRG-003] Patches referencing unknown ids change nothing.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::derp::DERP_MAGIC_ADDR;
use crate::node::{Node, NodeId};
use crate::update::MapUpdate;

/// Returns true if `nodes` is strictly ascending by id.
fn nodes_sorted(nodes: &[Node]) -> bool {
    nodes.windows(2).all(|w| w[0].id < w[1].id)
}

/// Sorts `nodes` ascending by id.
fn sort_nodes(nodes: &mut [Node]) {
    nodes.sort_by_key(|n| n.id);
}

/// Rewrites `update.peers` to the complete peer list.
///
/// If the update carries a non-empty `peers`, that list wins outright
/// (sorted first if the sender misordered it) and the delta fields are
/// left untouched. Otherwise the previous list is merged with
/// `peers_removed` and `peers_changed`, the liveness and per-field
/// patches are layered on top, and the consumed delta fields are
/// cleared.
///
/// Removal and change interact the way the sender expects: an id in
/// `peers_removed` drops the previous entry even if `peers_changed`
/// also names it, but a changed entry with no previous counterpart is
/// inserted regardless of the removal set.
///
/// `now` stamps `last_seen` for peers marked seen in
/// `peer_seen_change`.
pub fn apply_peer_delta(update: &mut MapUpdate, prev: Vec<Node>, now: DateTime<Utc>) {
    if !update.peers.is_empty() {
        // Not delta encoded.
        if !nodes_sorted(&update.peers) {
            warn!("full peer list not sorted by id; sorting");
            sort_nodes(&mut update.peers);
        }
        return;
    }

    let removed: BTreeSet<NodeId> = update.peers_removed.iter().copied().collect();
    let mut changed = std::mem::take(&mut update.peers_changed);
    if !nodes_sorted(&changed) {
        warn!("changed peer list not sorted by id; sorting");
        sort_nodes(&mut changed);
    }
    let mut prev = prev;
    if !nodes_sorted(&prev) {
        // Must not happen: the previous list is always produced sorted.
        warn!("previous peer list not sorted by id (internal error); sorting");
        sort_nodes(&mut prev);
    }

    let mut new_full = prev;
    if !removed.is_empty() || !changed.is_empty() {
        let prev = std::mem::take(&mut new_full);
        new_full.reserve(prev.len().saturating_sub(removed.len()) + changed.len());
        let mut prev_it = prev.into_iter().peekable();
        let mut changed_it = changed.into_iter().peekable();
        loop {
            let pid = match prev_it.peek() {
                Some(p) => p.id,
                None => break,
            };
            if removed.contains(&pid) {
                prev_it.next();
                continue;
            }
            let cid = match changed_it.peek() {
                Some(c) => c.id,
                None => break,
            };
            match pid.cmp(&cid) {
                Ordering::Less => new_full.extend(prev_it.next()),
                Ordering::Equal => {
                    // A changed entry replaces the previous node
                    // wholesale; field-level merging is the patch
                    // phase's job.
                    prev_it.next();
                    new_full.extend(changed_it.next());
                }
                Ordering::Greater => new_full.extend(changed_it.next()),
            }
        }
        new_full.extend(changed_it);
        new_full.extend(prev_it.filter(|n| !removed.contains(&n.id)));
        // Sorted by construction; re-sort anyway in case the inputs
        // overlapped in ways the walk does not anticipate.
        sort_nodes(&mut new_full);
    }

    if !update.peer_seen_change.is_empty()
        || !update.online_change.is_empty()
        || !update.peers_changed_patch.is_empty()
    {
        apply_patches(update, &mut new_full, now);
    }

    update.peers = new_full;
    update.peers_changed = Vec::new();
    update.peers_removed = Vec::new();
}

/// Applies the liveness maps and per-field patches to the merged list.
fn apply_patches(update: &MapUpdate, peers: &mut [Node], now: DateTime<Utc>) {
    let mut by_id: HashMap<NodeId, &mut Node> = peers.iter_mut().map(|n| (n.id, n)).collect();

    for (&id, &seen) in &update.peer_seen_change {
        if let Some(n) = by_id.get_mut(&id) {
            n.last_seen = if seen { Some(now) } else { None };
        }
    }
    for (&id, &online) in &update.online_change {
        if let Some(n) = by_id.get_mut(&id) {
            n.online = Some(online);
        }
    }
    for pc in &update.peers_changed_patch {
        let Some(n) = by_id.get_mut(&pc.node_id) else {
            continue;
        };
        if pc.derp_region != 0 {
            n.derp = format!("{DERP_MAGIC_ADDR}:{}", pc.derp_region);
        }
        if pc.cap != 0 {
            n.cap = pc.cap;
        }
        if let Some(endpoints) = &pc.endpoints {
            n.endpoints.clone_from(endpoints);
        }
        if let Some(key) = pc.key {
            n.key = key;
        }
        if let Some(disco_key) = pc.disco_key {
            n.disco_key = disco_key;
        }
        if let Some(online) = pc.online {
            n.online = Some(online);
        }
        if let Some(last_seen) = pc.last_seen {
            n.last_seen = Some(last_seen);
        }
        if let Some(key_expiry) = pc.key_expiry {
            n.key_expiry = key_expiry;
        }
        if let Some(capabilities) = &pc.capabilities {
            n.capabilities.clone_from(capabilities);
        }
        if let Some(key_signature) = &pc.key_signature {
            n.key_signature.clone_from(key_signature);
        }
    }
}
