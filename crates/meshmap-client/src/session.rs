//! The map session: one long poll's worth of state.
//!
//! A [`MapSession`] accepts incremental [`MapUpdate`] values and emits
//! fully inflated [`NetworkMap`] snapshots, filling in the data prior
//! updates in the same session established. Updates arrive serially;
//! the caller must not overlap [`MapSession::handle_non_keepalive`]
//! with itself or with [`MapSession::close`]. The watchdog is the only
//! concurrent activity, and it talks to the session purely through the
//! reset and alive channels.
//!
//! Keepalive messages never reach this type; the transport handles
//! them before the session sees anything.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use meshmap_core::{
    names, DebugMessage, MachinePublicKey, MapUpdate, NetworkMap, NodePrivateKey, NodePublicKey,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::clock::{Clock, SystemClock};
use crate::knobs::{self, ControlKnobs, DevKnobs};
use crate::sticky::{SnapshotKeys, StickyState};
use crate::watchdog::{self, WatchdogResetSink};

/// A boxed future for dyn-safe async hooks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error type debug observers may fail with.
pub type DebugHookError = Box<dyn std::error::Error + Send + Sync>;

type DebugHook =
    Box<dyn Fn(DebugMessage, WatchdogResetSink) -> BoxFuture<'static, Result<(), DebugHookError>> + Send + Sync>;

/// Downstream consumer of finished snapshots.
pub trait NetmapUpdater: Send + Sync {
    /// Delivers one snapshot. Called once per non-keepalive update, in
    /// update order. The snapshot is immutable from here on.
    fn update_full_netmap(&self, netmap: Arc<NetworkMap>) -> BoxFuture<'_, ()>;
}

/// Errors surfaced by [`MapSession::handle_non_keepalive`].
///
/// Everything else that can go wrong inside an update (misordered
/// lists, malformed sticky values, patches for unknown peers) is
/// recovered locally and at most logged.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// The debug observer rejected the update's debug message. The
    /// session state is untouched; the caller is expected to tear the
    /// session down.
    #[error("debug hook failed: {0}")]
    DebugHook(DebugHookError),
}

/// State machine over one control-plane long poll.
///
/// Create with [`MapSession::new`], adjust the optional hooks before
/// the first update, then feed updates. Call [`MapSession::close`]
/// when the poll ends so the watchdog task winds down.
pub struct MapSession {
    updater: Arc<dyn NetmapUpdater>,
    private_node_key: NodePrivateKey,
    node_key: NodePublicKey,
    machine_key: MachinePublicKey,
    clock: Arc<dyn Clock>,
    knobs: DevKnobs,
    control_knobs: Arc<ControlKnobs>,
    cancel: Arc<dyn Fn() + Send + Sync>,

    on_debug: DebugHook,
    on_concise_summary: Box<dyn Fn(&str) + Send + Sync>,
    on_self_node_changed: Box<dyn Fn(&NetworkMap) + Send + Sync>,

    watchdog_reset_tx: mpsc::Sender<()>,
    watchdog_reset_rx: Option<mpsc::Receiver<()>>,
    alive_tx: watch::Sender<bool>,

    sticky: StickyState,
    last_summary: String,
}

impl MapSession {
    /// Returns a mostly unconfigured session: no-op hooks, the system
    /// clock, process-wide dev knobs, watchdog not yet started.
    #[must_use]
    pub fn new(private_node_key: NodePrivateKey, updater: Arc<dyn NetmapUpdater>) -> Self {
        let (watchdog_reset_tx, watchdog_reset_rx) = mpsc::channel(1);
        let (alive_tx, _) = watch::channel(true);
        let node_key = private_node_key.public();
        Self {
            updater,
            private_node_key,
            node_key,
            machine_key: MachinePublicKey::default(),
            clock: Arc::new(SystemClock),
            knobs: knobs::process_knobs(),
            control_knobs: Arc::new(ControlKnobs::default()),
            cancel: Arc::new(|| {}),
            on_debug: Box::new(|_, _| Box::pin(async { Ok(()) })),
            on_concise_summary: Box::new(|_| {}),
            on_self_node_changed: Box::new(|_| {}),
            watchdog_reset_tx,
            watchdog_reset_rx: Some(watchdog_reset_rx),
            alive_tx,
            sticky: StickyState::new(),
            last_summary: String::new(),
        }
    }

    /// Sets the machine key identity carried in snapshots.
    pub fn set_machine_public_key(&mut self, key: MachinePublicKey) {
        self.machine_key = key;
    }

    /// Replaces the clock used for liveness stamps.
    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    /// Overrides the process-wide dev knobs for this session.
    pub fn set_dev_knobs(&mut self, dev_knobs: DevKnobs) {
        self.knobs = dev_knobs;
    }

    /// Sets the hook the watchdog fires on timeout. It should unwind
    /// the caller's long poll.
    pub fn set_cancel_hook(&mut self, cancel: impl Fn() + Send + Sync + 'static) {
        self.cancel = Arc::new(cancel);
    }

    /// Sets the observer for debug messages. It receives a reset sink
    /// it may use to defer the watchdog, and its failure aborts the
    /// update.
    pub fn set_on_debug(
        &mut self,
        hook: impl Fn(DebugMessage, WatchdogResetSink) -> BoxFuture<'static, Result<(), DebugHookError>>
            + Send
            + Sync
            + 'static,
    ) {
        self.on_debug = Box::new(hook);
    }

    /// Sets the observer for per-update one-line summaries.
    pub fn set_on_concise_summary(&mut self, hook: impl Fn(&str) + Send + Sync + 'static) {
        self.on_concise_summary = Box::new(hook);
    }

    /// Sets the observer fired, before snapshot delivery, by updates
    /// that changed the self node.
    pub fn set_on_self_node_changed(
        &mut self,
        hook: impl Fn(&NetworkMap) + Send + Sync + 'static,
    ) {
        self.on_self_node_changed = Box::new(hook);
    }

    /// Control knobs driven by self-node capabilities.
    #[must_use]
    pub fn control_knobs(&self) -> Arc<ControlKnobs> {
        Arc::clone(&self.control_knobs)
    }

    /// The most recent concise summary, or empty before the first
    /// update.
    #[must_use]
    pub fn last_concise_summary(&self) -> &str {
        &self.last_summary
    }

    /// Starts the watchdog task. If no activity arrives within
    /// [`crate::WATCHDOG_TIMEOUT`], it fires the cancel hook and
    /// terminates. Subsequent calls do nothing.
    pub fn start_watchdog(&mut self) {
        if let Some(reset_rx) = self.watchdog_reset_rx.take() {
            // Detached on purpose; the task exits via the alive channel.
            let _ = watchdog::spawn(self.alive_tx.subscribe(), reset_rx, Arc::clone(&self.cancel));
        }
    }

    /// Ends the session: the watchdog terminates without firing.
    /// Safe to call more than once.
    pub fn close(&self) {
        // send_replace updates the value even with no receiver yet, so
        // a watchdog started late still sees the session as closed.
        self.alive_tx.send_replace(false);
    }

    /// Handles one non-keepalive update and publishes the resulting
    /// snapshot.
    ///
    /// Steps run in a fixed order: debug observer, dev-knob input
    /// mutation, control-knob refresh, display-name initialization,
    /// reconciliation and snapshot assembly, then the observer
    /// cascade (`on_concise_summary`, conditionally
    /// `on_self_node_changed`, and finally the snapshot consumer).
    /// Each observer sees all mutations from earlier updates and none
    /// from later ones.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::DebugHook`] if the debug observer
    /// fails, in which case session state is unchanged.
    pub async fn handle_non_keepalive(&mut self, mut update: MapUpdate) -> Result<(), SessionError> {
        if let Some(debug) = update.debug.clone() {
            let sink = WatchdogResetSink::new(self.watchdog_reset_tx.clone());
            (self.on_debug)(debug, sink)
                .await
                .map_err(SessionError::DebugHook)?;
        }

        if self.knobs.strip_endpoints {
            for peer in &mut update.peers {
                peer.endpoints.clear();
            }
            for peer in &mut update.peers_changed {
                peer.endpoints.clear();
            }
        }

        // Updates that mutate the self node may carry new attributes.
        if let Some(self_node) = update.self_node.as_mut() {
            if self.knobs.strip_caps {
                self_node.capabilities.clear();
            }
            self.control_knobs
                .apply_node_capabilities(&self_node.capabilities);
        }

        let self_view = update
            .self_node
            .clone()
            .or_else(|| self.sticky.last_self_node().cloned());
        names::init_display_names(self_view.as_ref(), &mut update);

        let had_self_node = update.self_node.is_some();
        let keys = SnapshotKeys {
            private_node_key: &self.private_node_key,
            node_key: &self.node_key,
            machine_key: &self.machine_key,
        };
        let netmap = Arc::new(self.sticky.build_netmap(
            &mut update,
            self.clock.now(),
            &keys,
            self.knobs,
        ));

        self.last_summary = netmap.concise_summary();
        (self.on_concise_summary)(&self.last_summary);

        // The self node changed; persistence-minded observers go first.
        if had_self_node {
            (self.on_self_node_changed)(&netmap);
        }

        self.updater.update_full_netmap(netmap).await;
        Ok(())
    }
}

impl std::fmt::Debug for MapSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapSession")
            .field("node_key", &self.node_key)
            .field("watchdog_started", &self.watchdog_reset_rx.is_none())
            .field("last_summary", &self.last_summary)
            .finish_non_exhaustive()
    }
}
