//! Key material carried through the map session.
//!
//! The session never performs cryptography itself; it only threads key
//! identities from the control plane into snapshots. Node keys are
//! Ed25519 pairs (via `ed25519-dalek`), everything else is an opaque
//! 32-byte identity rendered as prefixed hex.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A node's public key, as distributed in the network map.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct NodePublicKey([u8; 32]);

impl NodePublicKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns an abbreviated hex form for log lines and summaries.
    #[must_use]
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for NodePublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nodekey:{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NodePublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePublicKey({}…)", self.short_hex())
    }
}

/// A node's private key. Owned by the session for its whole lifetime.
///
/// Deliberately not serializable; it never leaves process memory.
#[derive(Clone)]
pub struct NodePrivateKey(ed25519_dalek::SigningKey);

impl NodePrivateKey {
    /// Builds a private key from raw seed bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }

    /// Derives the matching public key.
    #[must_use]
    pub fn public(&self) -> NodePublicKey {
        NodePublicKey(self.0.verifying_key().to_bytes())
    }
}

impl fmt::Debug for NodePrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        f.write_str("NodePrivateKey(…)")
    }
}

/// The machine key identity reported alongside the node key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct MachinePublicKey([u8; 32]);

impl MachinePublicKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for MachinePublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "machinekey:{}", hex::encode(self.0))
    }
}

impl fmt::Debug for MachinePublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MachinePublicKey({}…)", hex::encode(&self.0[..4]))
    }
}

/// A node's path-discovery key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct DiscoKey([u8; 32]);

impl DiscoKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for DiscoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "discokey:{}", hex::encode(self.0))
    }
}

impl fmt::Debug for DiscoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiscoKey({}…)", hex::encode(&self.0[..4]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_derivation_is_stable() {
        let a = NodePrivateKey::from_bytes([7; 32]);
        let b = NodePrivateKey::from_bytes([7; 32]);
        assert_eq!(a.public(), b.public());

        let c = NodePrivateKey::from_bytes([8; 32]);
        assert_ne!(a.public(), c.public());
    }

    #[test]
    fn display_is_prefixed_hex() {
        let key = NodePublicKey::from_bytes([0xab; 32]);
        let s = key.to_string();
        assert!(s.starts_with("nodekey:abab"));
        assert_eq!(s.len(), "nodekey:".len() + 64);
    }

    #[test]
    fn private_key_debug_is_redacted() {
        let key = NodePrivateKey::from_bytes([9; 32]);
        assert_eq!(format!("{key:?}"), "NodePrivateKey(…)");
    }
}
