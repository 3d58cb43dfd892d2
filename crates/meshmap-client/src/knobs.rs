//! Debug and control knobs.
//!
//! [`DevKnobs`] are process-wide booleans read once from the
//! environment at first use; they mutate session inputs for debugging
//! and never change afterwards. [`ControlKnobs`] are runtime toggles
//! the control plane drives through capability strings on the self
//! node, re-evaluated on every update that carries one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;

/// Environment variable: clear peer endpoints before merging.
pub const ENV_STRIP_ENDPOINTS: &str = "MESHMAP_DEBUG_STRIP_ENDPOINTS";
/// Environment variable: clear the self node's capabilities.
pub const ENV_STRIP_CAPS: &str = "MESHMAP_DEBUG_STRIP_CAPS";
/// Environment variable: force `dns.proxied` on in every snapshot.
pub const ENV_FORCE_PROXY_DNS: &str = "MESHMAP_DEBUG_FORCE_PROXY_DNS";
/// Environment variable: keep only IPv6 self addresses.
pub const ENV_SELF_V6_ONLY: &str = "MESHMAP_DEBUG_SELF_V6_ONLY";

static PROCESS_KNOBS: LazyLock<DevKnobs> = LazyLock::new(DevKnobs::from_env);

/// Returns the process-wide knobs, reading the environment on first
/// call.
#[must_use]
pub fn process_knobs() -> DevKnobs {
    *PROCESS_KNOBS
}

fn env_bool(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => v == "1" || v.eq_ignore_ascii_case("true"),
        Err(_) => false,
    }
}

/// Process-wide debug toggles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DevKnobs {
    /// Clear `endpoints` on every peer in `peers` and `peers_changed`
    /// before the merge.
    pub strip_endpoints: bool,
    /// Clear the self node's `capabilities` before they are inspected.
    pub strip_caps: bool,
    /// Set `dns.proxied` in every snapshot after assembly.
    pub force_proxy_dns: bool,
    /// Drop IPv4 self addresses from snapshots.
    pub self_v6_only: bool,
}

impl DevKnobs {
    /// Reads the knob environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            strip_endpoints: env_bool(ENV_STRIP_ENDPOINTS),
            strip_caps: env_bool(ENV_STRIP_CAPS),
            force_proxy_dns: env_bool(ENV_FORCE_PROXY_DNS),
            self_v6_only: env_bool(ENV_SELF_V6_ONLY),
        }
    }
}

/// Capability string that disables UPnP port mapping.
pub const CAP_DISABLE_UPNP: &str = "meshmap:disable-upnp";
/// Capability string that keeps the full packet filter on this node.
pub const CAP_KEEP_FULL_FILTER: &str = "meshmap:keep-full-filter";
/// Capability string that silences discovery pings.
pub const CAP_SILENT_DISCO: &str = "meshmap:silent-disco";

/// Runtime toggles driven by self-node capabilities.
///
/// Each flag reflects the most recent self node: a capability that
/// disappears turns its flag back off.
#[derive(Debug, Default)]
pub struct ControlKnobs {
    disable_upnp: AtomicBool,
    keep_full_filter: AtomicBool,
    silent_disco: AtomicBool,
}

impl ControlKnobs {
    /// Re-evaluates every flag from the given capability strings.
    pub fn apply_node_capabilities(&self, capabilities: &[String]) {
        let has = |cap: &str| capabilities.iter().any(|c| c == cap);
        self.disable_upnp
            .store(has(CAP_DISABLE_UPNP), Ordering::Relaxed);
        self.keep_full_filter
            .store(has(CAP_KEEP_FULL_FILTER), Ordering::Relaxed);
        self.silent_disco
            .store(has(CAP_SILENT_DISCO), Ordering::Relaxed);
    }

    /// Whether UPnP port mapping is disabled.
    #[must_use]
    pub fn disable_upnp(&self) -> bool {
        self.disable_upnp.load(Ordering::Relaxed)
    }

    /// Whether this node keeps the full packet filter.
    #[must_use]
    pub fn keep_full_filter(&self) -> bool {
        self.keep_full_filter.load(Ordering::Relaxed)
    }

    /// Whether discovery pings are silenced.
    #[must_use]
    pub fn silent_disco(&self) -> bool {
        self.silent_disco.load(Ordering::Relaxed)
    }
}
