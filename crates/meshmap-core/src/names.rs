//! Display-name initialization for nodes carried in an update.
//!
//! The control plane sends fully qualified names. For presentation the
//! client wants the short form when a peer lives under the same name
//! suffix as the self node, and the full name otherwise. This runs as
//! a side effect on the update before the snapshot is built, so every
//! node in the snapshot already carries its `computed_name`.

use crate::node::Node;
use crate::update::MapUpdate;

/// Sets `computed_name` on the update's self node, peers, and changed
/// peers.
///
/// `self_node` is whichever self view is currently valid: the one in
/// this update if present, otherwise the last observed one.
pub fn init_display_names(self_node: Option<&Node>, update: &mut MapUpdate) {
    let suffix = self_node.and_then(|n| name_suffix(&n.name));
    if let Some(n) = update.self_node.as_mut() {
        n.computed_name = display_name(&n.name, suffix.as_deref());
    }
    for n in &mut update.peers {
        n.computed_name = display_name(&n.name, suffix.as_deref());
    }
    for n in &mut update.peers_changed {
        n.computed_name = display_name(&n.name, suffix.as_deref());
    }
}

/// Everything after the first label of a fully qualified name.
fn name_suffix(name: &str) -> Option<&str> {
    let trimmed = name.trim_end_matches('.');
    let (_, rest) = trimmed.split_once('.')?;
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

fn display_name(name: &str, self_suffix: Option<&str>) -> String {
    let trimmed = name.trim_end_matches('.');
    if trimmed.is_empty() {
        return String::new();
    }
    if let (Some(suffix), Some((first, rest))) = (self_suffix, trimmed.split_once('.')) {
        if rest == suffix {
            return first.to_string();
        }
    }
    trimmed.to_string()
}
