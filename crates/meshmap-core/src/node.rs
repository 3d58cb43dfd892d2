//! Peer and user identity types.
//!
//! A [`Node`] is one entry in the network map's peer list. The list
//! invariant throughout this crate is strictly ascending by [`NodeId`]
//! with no duplicates; [`crate::merge`] restores it whenever an update
//! arrives out of order.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::{DiscoKey, NodePublicKey};

/// Stable numeric identifier of a node, assigned by the control plane.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default, Debug,
)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Stable numeric identifier of a user profile.
///
/// The zero value is a sentinel meaning "no user".
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default, Debug,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl UserId {
    /// The "no user" sentinel.
    pub const ZERO: Self = Self(0);

    /// Returns true for the sentinel value.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

/// Machine authorization state derived from the self node.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize, Default)]
pub enum MachineStatus {
    /// No valid self node has been observed yet.
    #[default]
    Unknown,
    /// The machine is authorized on the mesh.
    Authorized,
    /// The machine is known but not authorized.
    Unauthorized,
}

/// Host metadata reported by a node.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Hostinfo {
    /// Self-reported hostname.
    pub hostname: String,
    /// Operating system identifier.
    pub os: String,
    /// Advertised service descriptors, opaque to the session.
    pub services: Vec<String>,
}

/// A user profile delivered by the control plane.
///
/// Profiles accumulate per session and are never evicted.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    /// The profile's identifier.
    pub id: UserId,
    /// Login name, e.g. an email address.
    pub login_name: String,
    /// Human-readable display name.
    pub display_name: String,
    /// URL of the avatar image, if any.
    pub profile_pic_url: String,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            id: UserId::ZERO,
            login_name: String::new(),
            display_name: String::new(),
            profile_pic_url: String::new(),
        }
    }
}

/// One peer record in the network map.
///
/// The same shape carries the self node, which additionally populates
/// `machine_authorized`, `addresses`, and `hostinfo`.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    /// Control-plane identifier; the peer list sort key.
    pub id: NodeId,
    /// Fully qualified MagicDNS-style name, usually with a trailing dot.
    pub name: String,
    /// Display name derived locally from `name` and the self node's
    /// name suffix. Never sent on the wire.
    #[serde(skip)]
    pub computed_name: String,
    /// Owning user.
    pub user: UserId,
    /// User who shared this node into the map, or zero.
    pub sharer: UserId,
    /// The node's public key.
    pub key: NodePublicKey,
    /// The node's path-discovery key.
    pub disco_key: DiscoKey,
    /// Home relay in `magic-addr:region` form, or empty.
    pub derp: String,
    /// Candidate UDP endpoints for direct connections.
    pub endpoints: Vec<SocketAddr>,
    /// Addresses assigned to the node inside the mesh.
    pub addresses: Vec<IpAddr>,
    /// Capability version number; zero means unknown.
    pub cap: u32,
    /// Capability strings granted by the control plane.
    pub capabilities: Vec<String>,
    /// Whether the node is currently connected to the control plane.
    /// `None` means the control plane did not say.
    pub online: Option<bool>,
    /// When the node was last seen, if it is not currently online.
    pub last_seen: Option<DateTime<Utc>>,
    /// Expiry of the node's key.
    pub key_expiry: DateTime<Utc>,
    /// Signature over the node key, opaque to the session.
    pub key_signature: Vec<u8>,
    /// Whether the machine is authorized. Only meaningful on the self
    /// node.
    pub machine_authorized: bool,
    /// Host metadata. Only meaningful on the self node.
    pub hostinfo: Option<Hostinfo>,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            id: NodeId::default(),
            name: String::new(),
            computed_name: String::new(),
            user: UserId::ZERO,
            sharer: UserId::ZERO,
            key: NodePublicKey::default(),
            disco_key: DiscoKey::default(),
            derp: String::new(),
            endpoints: Vec::new(),
            addresses: Vec::new(),
            cap: 0,
            capabilities: Vec::new(),
            online: None,
            last_seen: None,
            key_expiry: DateTime::UNIX_EPOCH,
            key_signature: Vec::new(),
            machine_authorized: false,
            hostinfo: None,
        }
    }
}

impl Node {
    /// Convenience constructor used pervasively by tests and callers
    /// that build synthetic maps.
    #[must_use]
    pub fn with_id(id: u64) -> Self {
        Self {
            id: NodeId(id),
            ..Self::default()
        }
    }
}
