//! Frozen engine configuration — SPEC_FULL.md §10. Loaded once at
//! startup from TOML (optionally overlaid with environment variables
//! via `dotenvy`, matching the teacher's existing `main.rs` startup)
//! and never mutated afterward (spec §9 "Configuration is a frozen
//! value passed at construction").

use crate::error::EngineError;
use crate::fee_model::FeeModelConfig;
use crate::grid::GridRequest;
use crate::inventory::InventoryArbiterConfig;
use crate::rate_limiter::RateLimiterConfig;
use crate::regime::RegimeConfig;
use crate::risk::RiskConfig;
use crate::skew::SkewConfig;
use crate::spacing::SpacingConfig;
use crate::tax_agent::TaxAgentConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridCenter {
    Vwap,
    Mid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeBandConfig {
    pub btc_target_pct: Decimal,
    pub btc_min_pct: Decimal,
    pub btc_max_pct: Decimal,
    pub grid_levels: usize,
    pub order_size_scale: Decimal,
    pub signal_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeBands {
    pub range_bound: RegimeBandConfig,
    pub trending_up: RegimeBandConfig,
    pub trending_down: RegimeBandConfig,
    pub chaos: RegimeBandConfig,
}

impl Default for RegimeBands {
    fn default() -> Self {
        let base = RegimeBandConfig {
            btc_target_pct: dec!(0.5),
            btc_min_pct: dec!(0.3),
            btc_max_pct: dec!(0.7),
            grid_levels: 3,
            order_size_scale: Decimal::ONE,
            signal_enabled: false,
        };
        Self {
            range_bound: base.clone(),
            trending_up: RegimeBandConfig { btc_max_pct: dec!(0.8), order_size_scale: dec!(1.2), ..base.clone() },
            trending_down: RegimeBandConfig { btc_min_pct: dec!(0.2), order_size_scale: dec!(1.2), ..base.clone() },
            chaos: RegimeBandConfig { grid_levels: 1, order_size_scale: dec!(0.3), ..base },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub tick_size_usd: Decimal,
    pub order_size_usd: Decimal,
    pub grid_center: GridCenter,
    pub heartbeat_interval_sec: u64,
    pub cancel_after_timeout_sec: u64,
    pub shutdown_deadline_sec: u64,
    pub book_depth: usize,
    pub ledger_path: PathBuf,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,

    pub fee_model: FeeModelConfig,
    pub rate_limiter: RateLimiterConfig,
    pub regime: RegimeConfig,
    pub spacing: SpacingConfig,
    pub skew: SkewConfig,
    pub risk: RiskConfig,
    pub tax_agent: TaxAgentConfig,
    pub inventory: InventoryArbiterConfig,
    pub regime_bands: RegimeBands,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_size_usd: dec!(0.1),
            order_size_usd: dec!(100),
            grid_center: GridCenter::Vwap,
            heartbeat_interval_sec: 20,
            cancel_after_timeout_sec: 60,
            shutdown_deadline_sec: 5,
            book_depth: 10,
            ledger_path: PathBuf::from("ledger.json"),
            data_dir: PathBuf::from("."),
            metrics_port: None,
            fee_model: FeeModelConfig::default(),
            rate_limiter: RateLimiterConfig::default(),
            regime: RegimeConfig::default(),
            spacing: SpacingConfig::default(),
            skew: SkewConfig::default(),
            risk: RiskConfig::default(),
            tax_agent: TaxAgentConfig::default(),
            inventory: InventoryArbiterConfig::default(),
            regime_bands: RegimeBands::default(),
        }
    }
}

impl EngineConfig {
    pub fn load_from_toml(contents: &str) -> Result<Self, EngineError> {
        toml::from_str(contents).map_err(|e| EngineError::ConfigInvalid(e.to_string()))
    }

    pub fn load_from_file(path: &std::path::Path) -> Result<Self, EngineError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            EngineError::ConfigInvalid(format!("could not read config at {:?}: {e}", path))
        })?;
        Self::load_from_toml(&contents)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.tick_size_usd <= Decimal::ZERO {
            return Err(EngineError::ConfigInvalid("tick_size_usd must be positive".to_string()));
        }
        if self.order_size_usd <= Decimal::ZERO {
            return Err(EngineError::ConfigInvalid("order_size_usd must be positive".to_string()));
        }
        if self.rate_limiter.headroom_pct <= 0.0 || self.rate_limiter.headroom_pct > 1.0 {
            return Err(EngineError::ConfigInvalid("rate_limiter.headroom_pct must be in (0, 1]".to_string()));
        }
        Ok(())
    }

    pub fn band_for(&self, regime: crate::regime::Regime) -> &RegimeBandConfig {
        use crate::regime::Regime;
        match regime {
            Regime::RangeBound => &self.regime_bands.range_bound,
            Regime::TrendingUp => &self.regime_bands.trending_up,
            Regime::TrendingDown => &self.regime_bands.trending_down,
            Regime::Chaos => &self.regime_bands.chaos,
        }
    }
}

/// Convenience builder for a `GridEngine` request shared by
/// `StrategyLoop`; kept here so the per-tick wiring in `strategy.rs`
/// doesn't need to repeat the field list.
pub fn base_grid_request(config: &EngineConfig, center_price: Decimal, buy_bps: Decimal, sell_bps: Decimal, levels_buy: usize, levels_sell: usize, size_scale: Decimal) -> GridRequest {
    GridRequest {
        center_price,
        buy_spacing_bps: buy_bps,
        sell_spacing_bps: sell_bps,
        levels_buy,
        levels_sell,
        order_size_usd: config.order_size_usd,
        order_size_scale: size_scale,
        tick: config.tick_size_usd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_tick_size_is_invalid() {
        let mut cfg = EngineConfig::default();
        cfg.tick_size_usd = Decimal::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn toml_round_trip_parses_minimal_overrides() {
        let toml_str = r#"
            tick_size_usd = "0.1"
            order_size_usd = "250"
            grid_center = "Mid"
            heartbeat_interval_sec = 20
            cancel_after_timeout_sec = 60
            shutdown_deadline_sec = 5
            book_depth = 10
            ledger_path = "ledger.json"
            data_dir = "."

            [fee_model]
            adverse_selection_bps = "10"
            min_edge_bps = "5"

            [rate_limiter]
            max = 100.0
            decay_per_sec = 10.0
            headroom_pct = 0.8

            [regime]
            ewma_span = 30.0
            momentum_window = 20
            vwap_window = 200
            chaos_vol = 0.008
            trend_up_threshold = 0.015
            trend_down_threshold = 0.015
            hysteresis_ticks = 5

            [spacing]
            window = 20
            multiplier = 2.0
            spacing_scale = 1.0
            atr_enabled = false
            atr_window = 14
            atr_weight = 0.3
            min_bps = 5.0
            max_bps = 500.0

            [skew]
            sensitivity = 2.0
            max_skew_bps = 30.0

            [risk]
            warning_dd = "0.05"
            problem_dd = "0.10"
            critical_dd = "0.15"
            emergency_dd = "0.20"
            recovery_hysteresis = "0.1"
            velocity_window_sec = 60
            freeze_pct = "0.03"
            unfreeze_pct_factor = "0.5"
            cooldown_sec = 300
            trailing_stop_enabled = false
            trailing_stop_floor = "0.075"
            trailing_stop_baseline_equity = "0"

            [tax_agent]
            holding_period_days = 365
            near_threshold_days = 330
            annual_exemption_eur = "1000"
            emergency_dd_override_pct = "0.20"
            harvest_enabled = true
            harvest_min_loss_eur = "10"
            harvest_max_per_day = 3
            harvest_target_net_eur = "0"

            [inventory]
            per_tick_rebalance_pct = "0.10"

            [regime_bands.range_bound]
            btc_target_pct = "0.5"
            btc_min_pct = "0.3"
            btc_max_pct = "0.7"
            grid_levels = 3
            order_size_scale = "1.0"
            signal_enabled = false

            [regime_bands.trending_up]
            btc_target_pct = "0.5"
            btc_min_pct = "0.3"
            btc_max_pct = "0.8"
            grid_levels = 3
            order_size_scale = "1.2"
            signal_enabled = false

            [regime_bands.trending_down]
            btc_target_pct = "0.5"
            btc_min_pct = "0.2"
            btc_max_pct = "0.7"
            grid_levels = 3
            order_size_scale = "1.2"
            signal_enabled = false

            [regime_bands.chaos]
            btc_target_pct = "0.5"
            btc_min_pct = "0.3"
            btc_max_pct = "0.7"
            grid_levels = 1
            order_size_scale = "0.3"
            signal_enabled = false
        "#;
        let config = EngineConfig::load_from_toml(toml_str).unwrap();
        assert_eq!(config.order_size_usd, dec!(250));
        assert_eq!(config.grid_center, GridCenter::Mid);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_toml_yields_config_invalid_error() {
        let err = EngineConfig::load_from_toml("not valid toml {{{").unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid(_)));
    }
}
