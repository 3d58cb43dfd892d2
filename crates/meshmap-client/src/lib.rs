//! # meshmap-client
//!
//! The client half of the meshmap control protocol: a [`MapSession`]
//! consumes the stream of incremental updates from one control-plane
//! long poll and emits a fully materialized
//! [`NetworkMap`](meshmap_core::NetworkMap) snapshot after each one.
//!
//! The session owns everything scoped to the poll: the sticky values
//! of fields the control plane only sends when they change, the
//! previous peer list that deltas are applied against, the observer
//! hooks, and the watchdog that tears the poll down when updates stop
//! arriving. Reconciliation itself is pure and lives in
//! `meshmap-core`.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use meshmap_client::{BoxFuture, MapSession, NetmapUpdater};
//! use meshmap_core::{NetworkMap, NodePrivateKey};
//!
//! struct Engine;
//!
//! impl NetmapUpdater for Engine {
//!     fn update_full_netmap(&self, netmap: Arc<NetworkMap>) -> BoxFuture<'_, ()> {
//!         Box::pin(async move {
//!             println!("{}", netmap.concise_summary());
//!         })
//!     }
//! }
//!
//! # async fn run(update: meshmap_core::MapUpdate) -> anyhow::Result<()> {
//! let mut session = MapSession::new(NodePrivateKey::from_bytes([7; 32]), Arc::new(Engine));
//! session.start_watchdog();
//! session.handle_non_keepalive(update).await?;
//! session.close();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod knobs;
pub mod session;
mod sticky;
mod watchdog;

pub use clock::{Clock, FixedClock, SystemClock};
pub use knobs::{ControlKnobs, DevKnobs};
pub use session::{BoxFuture, DebugHookError, MapSession, NetmapUpdater, SessionError};
pub use watchdog::{WatchdogResetSink, WATCHDOG_TIMEOUT};
