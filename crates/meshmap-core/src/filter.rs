//! Packet-filter rules and their compiled form.
//!
//! The control plane ships filter rules as strings; the data plane
//! wants them pre-parsed. [`compile`] turns one into the other and is
//! the only fallible step: a malformed prefix fails the whole rule set,
//! and the caller keeps its previously compiled filter.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A raw filter rule as delivered by the control plane.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterRule {
    /// Source prefixes, in `addr/bits` or bare-address form.
    pub src_ips: Vec<String>,
    /// Destination prefixes, same forms as `src_ips`.
    pub dst_ips: Vec<String>,
    /// Allowed IP protocol numbers. Empty means any.
    pub ip_proto: Vec<u8>,
}

/// An IP prefix with explicit bit length.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct IpPrefix {
    /// Base address.
    pub addr: IpAddr,
    /// Prefix length in bits.
    pub bits: u8,
}

impl IpPrefix {
    fn max_bits(addr: IpAddr) -> u8 {
        match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.bits)
    }
}

/// Error parsing an [`IpPrefix`] from text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid prefix {input:?}")]
pub struct InvalidPrefixError {
    /// The rejected input.
    pub input: String,
}

impl FromStr for IpPrefix {
    type Err = InvalidPrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || InvalidPrefixError {
            input: s.to_string(),
        };
        let (addr_part, bits_part) = match s.split_once('/') {
            Some((a, b)) => (a, Some(b)),
            None => (s, None),
        };
        let addr: IpAddr = addr_part.parse().map_err(|_| bad())?;
        let max = Self::max_bits(addr);
        let bits = match bits_part {
            Some(b) => b.parse::<u8>().map_err(|_| bad())?,
            None => max,
        };
        if bits > max {
            return Err(bad());
        }
        Ok(Self { addr, bits })
    }
}

/// One compiled filter rule.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Match {
    /// Parsed source prefixes.
    pub srcs: Vec<IpPrefix>,
    /// Parsed destination prefixes.
    pub dsts: Vec<IpPrefix>,
    /// Allowed IP protocol numbers. Empty means any.
    pub ip_proto: Vec<u8>,
}

/// Error compiling a rule set.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FilterCompileError {
    /// A rule carried an unparseable prefix.
    #[error("rule {rule_index}: {source}")]
    Prefix {
        /// Index of the offending rule.
        rule_index: usize,
        /// The underlying parse failure.
        source: InvalidPrefixError,
    },
}

/// Compiles raw rules into matches.
///
/// # Errors
///
/// Fails on the first malformed prefix; nothing is partially compiled.
pub fn compile(rules: &[FilterRule]) -> Result<Vec<Match>, FilterCompileError> {
    rules
        .iter()
        .enumerate()
        .map(|(rule_index, rule)| {
            let parse_all = |inputs: &[String]| -> Result<Vec<IpPrefix>, FilterCompileError> {
                inputs
                    .iter()
                    .map(|s| {
                        s.parse()
                            .map_err(|source| FilterCompileError::Prefix { rule_index, source })
                    })
                    .collect()
            };
            Ok(Match {
                srcs: parse_all(&rule.src_ips)?,
                dsts: parse_all(&rule.dst_ips)?,
                ip_proto: rule.ip_proto.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_parses_with_and_without_bits() {
        let p: IpPrefix = "10.0.0.0/8".parse().expect("cidr form");
        assert_eq!(p.bits, 8);

        let bare: IpPrefix = "192.168.1.7".parse().expect("bare form");
        assert_eq!(bare.bits, 32);

        let v6: IpPrefix = "fd7a::/48".parse().expect("v6 form");
        assert_eq!(v6.bits, 48);
    }

    #[test]
    fn prefix_rejects_garbage() {
        assert!("not-an-addr/8".parse::<IpPrefix>().is_err());
        assert!("10.0.0.0/40".parse::<IpPrefix>().is_err());
        assert!("fd7a::/200".parse::<IpPrefix>().is_err());
    }

    #[test]
    fn compile_maps_rules() {
        let rules = vec![FilterRule {
            src_ips: vec!["100.64.0.0/10".into()],
            dst_ips: vec!["100.64.0.1".into()],
            ip_proto: vec![6, 17],
        }];
        let matches = compile(&rules).expect("valid rules");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].srcs[0].bits, 10);
        assert_eq!(matches[0].dsts[0].bits, 32);
        assert_eq!(matches[0].ip_proto, vec![6, 17]);
    }

    #[test]
    fn compile_reports_rule_index() {
        let rules = vec![
            FilterRule::default(),
            FilterRule {
                src_ips: vec!["bogus".into()],
                ..FilterRule::default()
            },
        ];
        let err = compile(&rules).unwrap_err();
        assert!(matches!(err, FilterCompileError::Prefix { rule_index: 1, .. }));
    }
}
