//! Relay (DERP) map types and their sticky inheritance rules.
//!
//! The control plane sends the relay map incrementally: a zero-valued
//! field at any nesting level means "keep what you had". The
//! [`DerpMap::inherit_absent_from`] method applies those rules against
//! the previously stored map, producing the complete map a snapshot
//! carries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Magic loopback address marking a relay region in a node's `derp`
/// field, as `DERP_MAGIC_ADDR:region`.
pub const DERP_MAGIC_ADDR: &str = "127.3.3.40";

/// One relay region.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DerpRegion {
    /// Numeric region identifier.
    pub region_id: u16,
    /// Short mnemonic code, e.g. `"nyc"`.
    pub region_code: String,
    /// Human-readable name.
    pub region_name: String,
}

/// Client steering parameters nested inside a [`DerpMap`].
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DerpHomeParams {
    /// Multiplier applied to measured region latencies when picking a
    /// home region. Absent means "unchanged from the previous map".
    pub region_score: Option<BTreeMap<u16, f64>>,
}

/// The relay map: regions plus steering parameters.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DerpMap {
    /// Region table keyed by region id. Absent means "unchanged".
    pub regions: Option<BTreeMap<u16, DerpRegion>>,
    /// Whether the built-in default regions are omitted. Travels with
    /// `regions`: it is only meaningful when a region table is present.
    pub omit_default_regions: bool,
    /// Steering parameters. Absent means "unchanged".
    pub home_params: Option<DerpHomeParams>,
}

impl DerpMap {
    /// Fills absent fields from the previously stored map.
    ///
    /// `regions` and `omit_default_regions` travel as a pair: if the
    /// incoming map has no region table, both are taken from `prev`.
    /// `home_params` is inherited whole when absent, otherwise
    /// sub-merged so an absent `region_score` keeps the prior scores.
    pub fn inherit_absent_from(&mut self, prev: &Self) {
        if self.regions.is_none() {
            self.regions.clone_from(&prev.regions);
            self.omit_default_regions = prev.omit_default_regions;
        }
        if self.home_params.is_none() {
            self.home_params.clone_from(&prev.home_params);
        } else if let (Some(hp), Some(prev_hp)) = (&mut self.home_params, &prev.home_params) {
            if hp.region_score.is_none() {
                hp.region_score.clone_from(&prev_hp.region_score);
            }
        }
    }
}
