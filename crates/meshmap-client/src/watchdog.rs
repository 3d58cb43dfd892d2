//! Long-poll activity watchdog.
//!
//! One task per session: it waits for the timeout, a reset request, or
//! session shutdown. On timeout it fires the session's cancel hook,
//! which unwinds the caller's long poll. Resets rearm the timer via
//! [`tokio::time::Sleep::reset`], so a reset that races an expiry
//! simply wins; there is no separate drain step to get stuck in.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long the watchdog waits without activity before tearing down
/// the long poll.
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(120);

/// Sends watchdog reset requests.
///
/// Handed to the debug observer so the control plane can ask the
/// client to keep a quiet poll alive. Sending never blocks; a reset
/// that finds the slot full is dropped, which is fine because a reset
/// is already pending.
#[derive(Clone, Debug)]
pub struct WatchdogResetSink {
    tx: mpsc::Sender<()>,
}

impl WatchdogResetSink {
    pub(crate) fn new(tx: mpsc::Sender<()>) -> Self {
        Self { tx }
    }

    /// Requests that the watchdog timer start over.
    pub fn request_reset(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Spawns the watchdog task.
///
/// The task ends, without firing, as soon as `alive` reports the
/// session closed. `biased` ordering below makes that check win over a
/// concurrently expired timer, so a closed session never cancels.
pub(crate) fn spawn(
    mut alive: watch::Receiver<bool>,
    mut reset: mpsc::Receiver<()>,
    cancel: Arc<dyn Fn() + Send + Sync>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !*alive.borrow() {
            debug!("netmap: session already closed; watchdog not arming");
            return;
        }
        let sleep = tokio::time::sleep(WATCHDOG_TIMEOUT);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = alive.changed() => {
                    debug!("netmap: ending watchdog task");
                    return;
                }
                Some(()) = reset.recv() => {
                    debug!("netmap: reset watchdog timer");
                    sleep.as_mut().reset(Instant::now() + WATCHDOG_TIMEOUT);
                }
                () = &mut sleep => {
                    warn!("map response long-poll timed out");
                    cancel();
                    return;
                }
            }
        }
    })
}
