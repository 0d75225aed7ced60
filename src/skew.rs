//! DeltaSkew — spec §4.5. Converts allocation deviation from target
//! into asymmetric per-side spacing offsets.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkewConfig {
    pub sensitivity: f64,
    pub max_skew_bps: f64,
}

impl Default for SkewConfig {
    fn default() -> Self {
        Self { sensitivity: 2.0, max_skew_bps: 30.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SideSpacing {
    pub buy_bps: f64,
    pub sell_bps: f64,
}

pub struct DeltaSkew {
    config: SkewConfig,
}

impl DeltaSkew {
    pub fn new(config: SkewConfig) -> Self {
        Self { config }
    }

    /// `deviation = btc_alloc_pct - target_pct`; over-allocated (skew>0)
    /// widens buys and tightens sells, under-allocated mirrors.
    pub fn apply(&self, base_spacing_bps: f64, btc_alloc_pct: f64, target_pct: f64, min_bps: f64) -> SideSpacing {
        let deviation = btc_alloc_pct - target_pct;
        let raw_skew_bps = deviation * 100.0 * self.config.sensitivity;
        let skew = raw_skew_bps.clamp(-self.config.max_skew_bps, self.config.max_skew_bps);

        let (buy_bps, sell_bps) = if skew > 0.0 {
            (base_spacing_bps + skew, (base_spacing_bps - skew).max(min_bps))
        } else {
            let skew_abs = -skew;
            ((base_spacing_bps - skew_abs).max(min_bps), base_spacing_bps + skew_abs)
        };

        SideSpacing { buy_bps: buy_bps.max(min_bps), sell_bps: sell_bps.max(min_bps) }
    }
}
