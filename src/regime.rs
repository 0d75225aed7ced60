//! RegimeRouter — spec §4.3. EWMA volatility + short-horizon momentum
//! + VWAP drive regime classification with hysteresis to avoid flapping.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    RangeBound,
    TrendingUp,
    TrendingDown,
    Chaos,
}

impl Default for Regime {
    fn default() -> Self {
        Regime::RangeBound
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    pub ewma_span: f64,
    pub momentum_window: usize,
    pub vwap_window: usize,
    pub chaos_vol: f64,
    pub trend_up_threshold: f64,
    pub trend_down_threshold: f64,
    pub hysteresis_ticks: u32,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            ewma_span: 30.0,
            momentum_window: 20,
            vwap_window: 200,
            chaos_vol: 0.008,
            trend_up_threshold: 0.015,
            trend_down_threshold: 0.015,
            hysteresis_ticks: 5,
        }
    }
}

pub struct RegimeRouter {
    config: RegimeConfig,
    alpha: f64,
    ewma_var: Option<f64>,
    last_price: Option<f64>,
    mids: VecDeque<f64>,
    trade_window: VecDeque<(f64, f64)>, // (price, volume)
    current_regime: Regime,
    candidate: Option<Regime>,
    candidate_streak: u32,
}

impl RegimeRouter {
    pub fn new(config: RegimeConfig) -> Self {
        let alpha = 2.0 / (config.ewma_span + 1.0);
        Self {
            config,
            alpha,
            ewma_var: None,
            last_price: None,
            mids: VecDeque::new(),
            trade_window: VecDeque::new(),
            current_regime: Regime::RangeBound,
            candidate: None,
            candidate_streak: 0,
        }
    }

    /// Feeds a new mid-price tick. Updates EWMA variance, the momentum
    /// ring, and re-evaluates (with hysteresis) the regime.
    pub fn on_mid(&mut self, price: f64, circuit_frozen: bool) {
        if let Some(prev) = self.last_price {
            if prev != 0.0 {
                let r = (price - prev) / prev;
                self.ewma_var = Some(match self.ewma_var {
                    None => r * r,
                    Some(v) => self.alpha * r * r + (1.0 - self.alpha) * v,
                });
            }
        }
        self.last_price = Some(price);

        self.mids.push_back(price);
        while self.mids.len() > self.config.momentum_window {
            self.mids.pop_front();
        }

        let candidate = self.classify(circuit_frozen);
        self.apply_hysteresis(candidate);
    }

    pub fn on_trade(&mut self, price: f64, volume: f64) {
        self.trade_window.push_back((price, volume));
        while self.trade_window.len() > self.config.vwap_window {
            self.trade_window.pop_front();
        }
    }

    pub fn ewma_vol(&self) -> f64 {
        self.ewma_var.map(|v| v.sqrt()).unwrap_or(0.0)
    }

    pub fn momentum(&self) -> f64 {
        match (self.mids.front(), self.mids.back()) {
            (Some(&oldest), Some(&newest)) if oldest != 0.0 => (newest - oldest) / oldest,
            _ => 0.0,
        }
    }

    pub fn vwap(&self) -> Option<f64> {
        if self.trade_window.is_empty() {
            return None;
        }
        let (pv, v): (f64, f64) = self
            .trade_window
            .iter()
            .fold((0.0, 0.0), |(pv, v), (p, q)| (pv + p * q, v + q));
        if v <= 0.0 {
            None
        } else {
            Some(pv / v)
        }
    }

    pub fn regime(&self) -> Regime {
        self.current_regime
    }

    fn classify(&self, circuit_frozen: bool) -> Regime {
        if circuit_frozen || self.ewma_vol() > self.config.chaos_vol {
            return Regime::Chaos;
        }
        let m = self.momentum();
        if m > self.config.trend_up_threshold {
            Regime::TrendingUp
        } else if m < -self.config.trend_down_threshold {
            Regime::TrendingDown
        } else {
            Regime::RangeBound
        }
    }

    /// A regime transition requires the candidate to persist for
    /// `hysteresis_ticks` consecutive ticks before it takes effect.
    fn apply_hysteresis(&mut self, candidate: Regime) {
        if candidate == self.current_regime {
            self.candidate = None;
            self.candidate_streak = 0;
            return;
        }
        if self.candidate == Some(candidate) {
            self.candidate_streak += 1;
        } else {
            self.candidate = Some(candidate);
            self.candidate_streak = 1;
        }
        if self.candidate_streak >= self.config.hysteresis_ticks {
            self.current_regime = candidate;
            self.candidate = None;
            self.candidate_streak = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_range_bound() {
        let router = RegimeRouter::new(RegimeConfig::default());
        assert_eq!(router.regime(), Regime::RangeBound);
    }

    #[test]
    fn chaos_forced_by_frozen_circuit_breaker() {
        let mut router = RegimeRouter::new(RegimeConfig::default());
        for _ in 0..6 {
            router.on_mid(50000.0, true);
        }
        assert_eq!(router.regime(), Regime::Chaos);
    }

    #[test]
    fn trending_up_requires_persistence() {
        let mut cfg = RegimeConfig::default();
        cfg.hysteresis_ticks = 2;
        cfg.momentum_window = 3;
        let mut router = RegimeRouter::new(cfg);
        router.on_mid(100.0, false);
        router.on_mid(100.0, false);
        router.on_mid(100.0, false); // mids=[100,100,100], momentum=0
        router.on_mid(103.0, false); // mids=[100,100,103], momentum=3% -> streak 1
        assert_eq!(router.regime(), Regime::RangeBound);
        router.on_mid(103.0, false); // mids=[100,103,103], momentum=3% -> streak 2, commits
        assert_eq!(router.regime(), Regime::TrendingUp);
    }

    #[test]
    fn vwap_is_volume_weighted() {
        let mut router = RegimeRouter::new(RegimeConfig::default());
        router.on_trade(100.0, 1.0);
        router.on_trade(200.0, 3.0);
        // (100*1 + 200*3)/4 = 175
        assert_eq!(router.vwap(), Some(175.0));
    }
}
