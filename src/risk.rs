//! RiskManager — spec §4.7. Owns `RiskState` exclusively: high-water
//! mark tracking, drawdown classification, the velocity-based circuit
//! breaker with hysteresis, and the pause state machine composed with
//! the tax lock.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawdownClass {
    Healthy,
    Warning,
    Problem,
    Critical,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseState {
    Active,
    TaxLock,
    RiskPause,
    DualLock,
    EmergencySell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub warning_dd: Decimal,
    pub problem_dd: Decimal,
    pub critical_dd: Decimal,
    pub emergency_dd: Decimal,
    pub recovery_hysteresis: Decimal, // fraction of critical_dd, e.g. 0.1
    pub velocity_window_sec: i64,
    pub freeze_pct: Decimal,
    pub unfreeze_pct_factor: Decimal, // e.g. 0.5 of freeze_pct
    pub cooldown_sec: i64,
    pub trailing_stop_enabled: bool,
    pub trailing_stop_floor: Decimal,
    pub trailing_stop_baseline_equity: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            warning_dd: dec!(0.05),
            problem_dd: dec!(0.10),
            critical_dd: dec!(0.15),
            emergency_dd: dec!(0.20),
            recovery_hysteresis: dec!(0.1),
            velocity_window_sec: 60,
            freeze_pct: dec!(0.03),
            unfreeze_pct_factor: dec!(0.5),
            cooldown_sec: 300,
            trailing_stop_enabled: false,
            trailing_stop_floor: dec!(0.075),
            trailing_stop_baseline_equity: dec!(0),
        }
    }
}

pub struct RiskManager {
    config: RiskConfig,
    hwm_usd: Decimal,
    current_equity_usd: Decimal,
    classification: DrawdownClass,
    pause: PauseState,
    price_ring: VecDeque<(DateTime<Utc>, Decimal)>,
    circuit_frozen_until: Option<DateTime<Utc>>,
    frozen_since: Option<DateTime<Utc>>,
    in_risk_lock: bool,
}

impl RiskManager {
    pub fn new(config: RiskConfig, starting_equity_usd: Decimal) -> Self {
        Self {
            config,
            hwm_usd: starting_equity_usd,
            current_equity_usd: starting_equity_usd,
            classification: DrawdownClass::Healthy,
            pause: PauseState::Active,
            price_ring: VecDeque::new(),
            circuit_frozen_until: None,
            frozen_since: None,
            in_risk_lock: false,
        }
    }

    /// Updates the high-water mark (never decreases on its own) and
    /// recomputes drawdown classification.
    pub fn on_equity(&mut self, equity_usd: Decimal) {
        self.current_equity_usd = equity_usd;
        if equity_usd > self.hwm_usd {
            self.hwm_usd = equity_usd;
        }
        self.classification = self.classify();
    }

    /// Shifts HWM by `delta_usd` on an external deposit/withdrawal
    /// notification, preventing a spurious drawdown reading (spec §4.7,
    /// decision recorded in SPEC_FULL.md §12.2).
    pub fn adjust_hwm(&mut self, delta_usd: Decimal) {
        self.hwm_usd += delta_usd;
        self.classification = self.classify();
    }

    pub fn drawdown_pct(&self) -> Decimal {
        if self.hwm_usd <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.hwm_usd - self.current_equity_usd) / self.hwm_usd).max(Decimal::ZERO)
    }

    fn critical_threshold(&self) -> Decimal {
        if !self.config.trailing_stop_enabled || self.config.trailing_stop_baseline_equity <= Decimal::ZERO {
            return self.config.critical_dd;
        }
        if self.current_equity_usd <= self.config.trailing_stop_baseline_equity {
            return self.config.critical_dd;
        }
        // Interpolates from critical_dd toward the floor as equity grows,
        // never tightening below the configured floor.
        let growth = self.current_equity_usd / self.config.trailing_stop_baseline_equity;
        let interpolated = self.config.critical_dd / growth;
        interpolated.max(self.config.trailing_stop_floor)
    }

    fn classify(&self) -> DrawdownClass {
        let dd = self.drawdown_pct();
        let critical = self.critical_threshold();
        if dd >= self.config.emergency_dd {
            DrawdownClass::Emergency
        } else if dd >= critical {
            DrawdownClass::Critical
        } else if dd >= self.config.problem_dd {
            DrawdownClass::Problem
        } else if dd >= self.config.warning_dd {
            DrawdownClass::Warning
        } else {
            DrawdownClass::Healthy
        }
    }

    pub fn classification(&self) -> DrawdownClass {
        self.classification
    }

    /// Feeds a (timestamp, price) sample for the circuit breaker's
    /// rolling velocity ring and re-evaluates freeze/unfreeze.
    pub fn on_price(&mut self, now: DateTime<Utc>, price: Decimal) {
        self.price_ring.push_back((now, price));
        let cutoff = now - chrono::Duration::seconds(self.config.velocity_window_sec);
        while matches!(self.price_ring.front(), Some((ts, _)) if *ts < cutoff) {
            self.price_ring.pop_front();
        }

        let velocity = self.velocity(price);

        if self.circuit_frozen_until.is_none() {
            if velocity >= self.config.freeze_pct {
                self.freeze(now);
            }
        } else if let Some(frozen_since) = self.frozen_since {
            let cooldown_elapsed = (now - frozen_since).num_seconds() >= self.config.cooldown_sec;
            let velocity_calm = velocity < self.config.freeze_pct * self.config.unfreeze_pct_factor;
            if cooldown_elapsed && velocity_calm {
                self.circuit_frozen_until = None;
                self.frozen_since = None;
            }
        }
    }

    fn velocity(&self, current_price: Decimal) -> Decimal {
        match self.price_ring.front() {
            Some((_, window_ago_price)) if *window_ago_price != Decimal::ZERO => {
                ((current_price - *window_ago_price) / *window_ago_price).abs()
            }
            _ => Decimal::ZERO,
        }
    }

    fn freeze(&mut self, now: DateTime<Utc>) {
        self.circuit_frozen_until = Some(now + chrono::Duration::seconds(self.config.cooldown_sec));
        self.frozen_since = Some(now);
        log::warn!("circuit breaker frozen at {}", now);
    }

    pub fn is_circuit_frozen(&self) -> bool {
        self.circuit_frozen_until.is_some()
    }

    pub fn circuit_frozen_until(&self) -> Option<DateTime<Utc>> {
        self.circuit_frozen_until
    }

    /// Recomputes `pause` from tax-lock input + current drawdown, per
    /// the composition table in spec §4.7. Entry into the risk-paused
    /// band happens at `critical_dd`; exit requires dropping below
    /// `critical_dd × (1 − recovery_hysteresis)` (spec §4.7 recovery
    /// rule, §8 "critical threshold" hysteresis).
    pub fn update_pause(&mut self, tax_locked: bool) -> PauseState {
        let dd = self.drawdown_pct();
        let prior = self.pause;
        let critical = self.critical_threshold();
        let emergency = dd >= self.config.emergency_dd;

        if !self.in_risk_lock && dd >= critical {
            self.in_risk_lock = true;
        } else if self.in_risk_lock && dd < critical * (Decimal::ONE - self.config.recovery_hysteresis) {
            self.in_risk_lock = false;
        }

        let new_state = if emergency {
            PauseState::EmergencySell
        } else if self.in_risk_lock {
            if tax_locked { PauseState::DualLock } else { PauseState::RiskPause }
        } else if tax_locked {
            PauseState::TaxLock
        } else {
            PauseState::Active
        };

        if new_state != prior {
            log::info!("pause transition: {:?} -> {:?} (dd={})", prior, new_state, dd);
        }
        self.pause = new_state;
        new_state
    }

    pub fn pause(&self) -> PauseState {
        self.pause
    }

    pub fn hwm_usd(&self) -> Decimal {
        self.hwm_usd
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskStateSnapshot {
    pub hwm_usd: Decimal,
    pub current_equity_usd: Decimal,
    pub drawdown_pct: Decimal,
    pub classification: DrawdownClass,
    pub pause: PauseState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hwm_never_decreases_on_market_movement() {
        let mut rm = RiskManager::new(RiskConfig::default(), dec!(10000));
        rm.on_equity(dec!(12000));
        rm.on_equity(dec!(9000));
        assert_eq!(rm.hwm_usd(), dec!(12000));
    }

    #[test]
    fn classification_thresholds() {
        let mut rm = RiskManager::new(RiskConfig::default(), dec!(10000));
        rm.on_equity(dec!(9600)); // dd=4% -> healthy
        assert_eq!(rm.classification(), DrawdownClass::Healthy);
        rm.on_equity(dec!(9400)); // dd=6% -> warning
        assert_eq!(rm.classification(), DrawdownClass::Warning);
        rm.on_equity(dec!(8700)); // dd=13% -> problem
        assert_eq!(rm.classification(), DrawdownClass::Problem);
        rm.on_equity(dec!(8200)); // dd=18% -> critical
        assert_eq!(rm.classification(), DrawdownClass::Critical);
        rm.on_equity(dec!(7900)); // dd=21% -> emergency (scenario 6)
        assert_eq!(rm.classification(), DrawdownClass::Emergency);
    }

    #[test]
    fn adjust_hwm_prevents_spurious_drawdown_on_withdrawal() {
        let mut rm = RiskManager::new(RiskConfig::default(), dec!(10000));
        rm.adjust_hwm(dec!(-2000));
        rm.on_equity(dec!(8000));
        assert_eq!(rm.drawdown_pct(), Decimal::ZERO);
    }

    #[test]
    fn circuit_breaker_freezes_on_velocity_spike_scenario_4() {
        let mut rm = RiskManager::new(RiskConfig::default(), dec!(10000));
        let t0 = Utc::now();
        rm.on_price(t0, dec!(50000));
        rm.on_price(t0 + chrono::Duration::seconds(60), dec!(51600)); // +3.2%
        assert!(rm.is_circuit_frozen());
    }

    #[test]
    fn circuit_breaker_hysteresis_blocks_early_unfreeze() {
        let mut rm = RiskManager::new(RiskConfig::default(), dec!(10000));
        let t0 = Utc::now();
        rm.on_price(t0, dec!(50000));
        rm.on_price(t0 + chrono::Duration::seconds(60), dec!(51600));
        assert!(rm.is_circuit_frozen());
        // velocity dropped but cooldown not elapsed
        rm.on_price(t0 + chrono::Duration::seconds(70), dec!(50000));
        assert!(rm.is_circuit_frozen());
    }

    #[test]
    fn pause_composition_matches_spec_table() {
        let mut rm = RiskManager::new(RiskConfig::default(), dec!(10000));
        assert_eq!(rm.update_pause(false), PauseState::Active);
        assert_eq!(rm.update_pause(true), PauseState::TaxLock);
        rm.on_equity(dec!(8200)); // critical
        assert_eq!(rm.update_pause(false), PauseState::RiskPause);
        assert_eq!(rm.update_pause(true), PauseState::DualLock);
        rm.on_equity(dec!(7900)); // emergency
        assert_eq!(rm.update_pause(true), PauseState::EmergencySell);
    }
}
