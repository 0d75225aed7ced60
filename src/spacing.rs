//! BollingerSpacing — spec §4.4. Rolling band-width + optional ATR
//! blend into a spacing figure in basis points, floor-clamped to the
//! venue's minimum profitable spacing.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpacingConfig {
    pub window: usize,
    pub multiplier: f64,
    pub spacing_scale: f64,
    pub atr_enabled: bool,
    pub atr_window: usize,
    pub atr_weight: f64,
    pub min_bps: f64,
    pub max_bps: f64,
}

impl Default for SpacingConfig {
    fn default() -> Self {
        Self {
            window: 20,
            multiplier: 2.0,
            spacing_scale: 1.0,
            atr_enabled: false,
            atr_window: 14,
            atr_weight: 0.3,
            min_bps: 5.0,
            max_bps: 500.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Bar {
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

pub struct BollingerSpacing {
    config: SpacingConfig,
    mids: VecDeque<f64>,
    bars: VecDeque<Bar>,
}

impl BollingerSpacing {
    pub fn new(config: SpacingConfig) -> Self {
        Self { config, mids: VecDeque::new(), bars: VecDeque::new() }
    }

    pub fn on_mid(&mut self, mid: f64) {
        self.mids.push_back(mid);
        while self.mids.len() > self.config.window {
            self.mids.pop_front();
        }
    }

    pub fn on_bar(&mut self, bar: Bar) {
        self.bars.push_back(bar);
        while self.bars.len() > self.config.atr_window + 1 {
            self.bars.pop_front();
        }
    }

    fn sma(&self) -> f64 {
        if self.mids.is_empty() {
            return 0.0;
        }
        self.mids.iter().sum::<f64>() / self.mids.len() as f64
    }

    /// Population standard deviation (denominator `n`, per spec §4.4).
    fn population_stddev(&self, mean: f64) -> f64 {
        if self.mids.is_empty() {
            return 0.0;
        }
        let variance = self.mids.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / self.mids.len() as f64;
        variance.sqrt()
    }

    /// Bollinger bandwidth in bps: `(upper - lower) / sma * 10_000`.
    pub fn bb_bandwidth_bps(&self) -> f64 {
        let sma = self.sma();
        if sma <= 0.0 {
            return 0.0;
        }
        let stddev = self.population_stddev(sma);
        let upper = sma + self.config.multiplier * stddev;
        let lower = sma - self.config.multiplier * stddev;
        (upper - lower) / sma * 10_000.0
    }

    /// Mean true range of the last `atr_window` bars, as bps of the
    /// latest close.
    pub fn atr_bps(&self) -> f64 {
        if self.bars.len() < 2 {
            return 0.0;
        }
        let bars: Vec<&Bar> = self.bars.iter().collect();
        let mut true_ranges = Vec::new();
        for w in bars.windows(2) {
            let (prev, cur) = (w[0], w[1]);
            let tr = (cur.high - cur.low)
                .max((cur.high - prev.close).abs())
                .max((cur.low - prev.close).abs());
            true_ranges.push(tr);
        }
        let window = true_ranges.len().min(self.config.atr_window);
        let recent = &true_ranges[true_ranges.len() - window..];
        let atr = recent.iter().sum::<f64>() / recent.len() as f64;
        let last_close = bars.last().unwrap().close;
        if last_close <= 0.0 {
            0.0
        } else {
            atr / last_close * 10_000.0
        }
    }

    /// Blends BB and ATR spacing (if enabled) and clamps to
    /// `[max(min_bps, fee_floor_bps), max_bps]`.
    pub fn spacing_bps(&self, fee_floor_bps: f64) -> f64 {
        let bb_spacing = self.bb_bandwidth_bps() * self.config.spacing_scale;
        let blended = if self.config.atr_enabled {
            let atr_spacing = self.atr_bps() * self.config.spacing_scale;
            (1.0 - self.config.atr_weight) * bb_spacing + self.config.atr_weight * atr_spacing
        } else {
            bb_spacing
        };
        let floor = self.config.min_bps.max(fee_floor_bps);
        blended.clamp(floor, self.config.max_bps)
    }

    pub fn spacing_bps_decimal(&self, fee_floor_bps: Decimal) -> Decimal {
        Decimal::from_f64(self.spacing_bps(fee_floor_bps.to_f64().unwrap_or(0.0)))
            .unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_prices_give_zero_bandwidth() {
        let mut bb = BollingerSpacing::new(SpacingConfig::default());
        for _ in 0..20 {
            bb.on_mid(50000.0);
        }
        assert_eq!(bb.bb_bandwidth_bps(), 0.0);
    }

    #[test]
    fn spacing_is_floored_by_fee_model() {
        let mut bb = BollingerSpacing::new(SpacingConfig::default());
        for _ in 0..20 {
            bb.on_mid(50000.0);
        }
        assert_eq!(bb.spacing_bps(65.0), 65.0);
    }

    #[test]
    fn spacing_clamped_to_max() {
        let mut cfg = SpacingConfig::default();
        cfg.max_bps = 50.0;
        let mut bb = BollingerSpacing::new(cfg);
        let mut price = 50000.0;
        for i in 0..20 {
            price += if i % 2 == 0 { 2000.0 } else { -2000.0 };
            bb.on_mid(price);
        }
        assert!(bb.spacing_bps(0.0) <= 50.0);
    }

    #[test]
    fn volatile_prices_widen_bandwidth() {
        let mut bb = BollingerSpacing::new(SpacingConfig::default());
        let mut price = 50000.0;
        for i in 0..20 {
            price += if i % 2 == 0 { 500.0 } else { -500.0 };
            bb.on_mid(price);
        }
        assert!(bb.bb_bandwidth_bps() > 0.0);
    }
}
