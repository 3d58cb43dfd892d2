//! # meshmap-core
//!
//! Data model and delta reconciliation for the meshmap control protocol.
//!
//! A control-plane long poll delivers a stream of incremental
//! [`MapUpdate`] values. This crate holds the pure, runtime-free half of
//! that pipeline: the node and key types, the sticky configuration blobs
//! (DERP map, DNS, SSH, TKA, packet filter), the peer delta merge that
//! inflates an incremental update into a complete peer list, and the
//! [`NetworkMap`] snapshot type handed to the rest of the node.
//!
//! Session state, stickiness across updates, and the watchdog live in
//! `meshmap-client`; everything here is deterministic and synchronous.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod derp;
pub mod filter;
pub mod key;
pub mod merge;
pub mod names;
pub mod netmap;
pub mod node;
pub mod policy;
pub mod update;

pub use derp::{DerpHomeParams, DerpMap, DerpRegion, DERP_MAGIC_ADDR};
pub use key::{DiscoKey, MachinePublicKey, NodePrivateKey, NodePublicKey};
pub use netmap::NetworkMap;
pub use node::{Hostinfo, MachineStatus, Node, NodeId, UserId, UserProfile};
pub use policy::{DnsConfig, SshPolicy, TkaHead, TkaInfo};
pub use update::{DebugMessage, MapUpdate, PeerChange};
