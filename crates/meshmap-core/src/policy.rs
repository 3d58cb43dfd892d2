//! Sticky policy blobs: DNS configuration, SSH policy, and key
//! authority (TKA) state.
//!
//! These types are mostly opaque to the session; it stores the latest
//! observed value of each and copies it into every snapshot. The one
//! piece of real logic is [`TkaHead`] parsing, which gates the
//! snapshot's `tka_enabled` flag.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// DNS configuration pushed by the control plane.
///
/// A session starts from the empty configuration, not from "absent":
/// the first snapshot already carries a (possibly empty) `DnsConfig`.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// Resolver addresses, in priority order.
    pub resolvers: Vec<String>,
    /// Search domains.
    pub domains: Vec<String>,
    /// Whether DNS queries are proxied through the node itself.
    pub proxied: bool,
}

/// SSH access policy. Opaque to the session.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SshPolicy {
    /// Serialized policy rules, evaluated elsewhere.
    pub rules: Vec<String>,
}

/// Key authority state for the network-lock feature.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TkaInfo {
    /// Head of the authority log, in `sha256:<hex>` form. Empty means
    /// the control plane sent no head.
    pub head: String,
    /// Whether the feature is administratively disabled.
    pub disabled: bool,
}

/// Parsed head of the key authority log.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TkaHead([u8; 32]);

impl TkaHead {
    /// Returns the raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Error parsing a [`TkaHead`] from its textual form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TkaHeadParseError {
    /// The `sha256:` prefix was missing.
    #[error("TKA head missing sha256 prefix: {0:?}")]
    MissingPrefix(String),
    /// The digest portion was not 64 hex characters.
    #[error("TKA head digest malformed: {0:?}")]
    BadDigest(String),
}

impl FromStr for TkaHead {
    type Err = TkaHeadParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digest = s
            .strip_prefix("sha256:")
            .ok_or_else(|| TkaHeadParseError::MissingPrefix(s.to_string()))?;
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(digest, &mut bytes)
            .map_err(|_| TkaHeadParseError::BadDigest(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for TkaHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tka_head_round_trips() {
        let text = format!("sha256:{}", "ab".repeat(32));
        let head: TkaHead = text.parse().expect("valid head");
        assert_eq!(head.to_string(), text);
        assert_eq!(head.as_bytes(), &[0xab; 32]);
    }

    #[test]
    fn tka_head_rejects_missing_prefix() {
        let err = "ab".repeat(32).parse::<TkaHead>().unwrap_err();
        assert!(matches!(err, TkaHeadParseError::MissingPrefix(_)));
    }

    #[test]
    fn tka_head_rejects_short_digest() {
        let err = "sha256:abcd".parse::<TkaHead>().unwrap_err();
        assert!(matches!(err, TkaHeadParseError::BadDigest(_)));
    }

    #[test]
    fn dns_config_default_is_empty() {
        let dns = DnsConfig::default();
        assert!(dns.resolvers.is_empty());
        assert!(dns.domains.is_empty());
        assert!(!dns.proxied);
    }
}
