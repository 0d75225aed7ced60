//! `StrategyLoop` — spec §2/§9. The single per-tick orchestrator: wires
//! `FeeModel -> RateLimiter -> RegimeRouter -> RiskManager ->
//! BollingerSpacing -> DeltaSkew -> GridEngine -> TaxAgent ->
//! InventoryArbiter -> OrderManager` in that order and returns the
//! dispatch-ready [`Intent`] list for the caller to send through an
//! [`crate::exchange::ExchangeSession`]. Holds no I/O of its own — it is
//! driven by [`crate::lifecycle::LifecycleCoordinator`], which owns the
//! exchange session, the ledger, and the wall clock.

use crate::config::{base_grid_request, EngineConfig};
use crate::error::EngineError;
use crate::exchange::{BookSnapshot, ExecEvent};
use crate::fee_model::FeeModel;
use crate::grid::GridEngine;
use crate::inventory::InventoryArbiter;
use crate::ledger::FifoLedger;
use crate::order_manager::{Intent, OrderManager};
use crate::rate_limiter::{sort_by_priority, CommandPriority, RateLimiter};
use crate::regime::{Regime, RegimeRouter};
use crate::risk::{PauseState, RiskManager};
use crate::skew::DeltaSkew;
use crate::spacing::BollingerSpacing;
use crate::tax_agent::{HarvestRecommendation, TaxAgent};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

/// Everything the loop needs to know about the world this tick. Built
/// by the lifecycle coordinator from the exchange collaborator's book
/// snapshot plus the engine's own equity/volume bookkeeping.
pub struct TickInput {
    pub now: DateTime<Utc>,
    pub book: BookSnapshot,
    pub equity_usd: Decimal,
    pub btc_alloc_pct: Decimal,
    pub thirty_day_volume_usd: Decimal,
    pub venue_rate_counter: f64,
}

fn intent_priority(intent: &Intent) -> CommandPriority {
    match intent {
        Intent::CancelOrder { .. } => CommandPriority::Cancel,
        Intent::AmendOrder { .. } => CommandPriority::NormalAmend,
        Intent::AddOrder { .. } => CommandPriority::New,
    }
}

pub struct StrategyLoop {
    config: EngineConfig,
    fee_model: FeeModel,
    rate_limiter: RateLimiter,
    regime_router: RegimeRouter,
    spacing: BollingerSpacing,
    skew: DeltaSkew,
    risk: RiskManager,
    tax_agent: TaxAgent,
    inventory: InventoryArbiter,
    order_manager: OrderManager,
    busy: bool,
}

impl StrategyLoop {
    pub fn new(config: EngineConfig, starting_equity_usd: Decimal, now: DateTime<Utc>) -> Self {
        // OrderManager's slot count is fixed for the engine's lifetime
        // (a slot's side never flips, spec §4.11's Data Model), so it is
        // sized for the busiest regime band rather than the starting one.
        let max_levels = [
            &config.regime_bands.range_bound,
            &config.regime_bands.trending_up,
            &config.regime_bands.trending_down,
            &config.regime_bands.chaos,
        ]
        .iter()
        .map(|b| b.grid_levels)
        .max()
        .unwrap_or(0);
        let levels_buy = max_levels;
        let levels_sell = max_levels;
        Self {
            fee_model: FeeModel::new(config.fee_model.clone()),
            rate_limiter: RateLimiter::new(config.rate_limiter.clone(), now),
            regime_router: RegimeRouter::new(config.regime.clone()),
            spacing: BollingerSpacing::new(config.spacing.clone()),
            skew: DeltaSkew::new(config.skew.clone()),
            risk: RiskManager::new(config.risk.clone(), starting_equity_usd),
            tax_agent: TaxAgent::new(config.tax_agent.clone()),
            inventory: InventoryArbiter::new(config.inventory.clone()),
            order_manager: OrderManager::new(levels_buy, levels_sell),
            config,
            busy: false,
        }
    }

    pub fn pause(&self) -> PauseState {
        self.risk.pause()
    }

    pub fn regime(&self) -> Regime {
        self.regime_router.regime()
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn order_manager(&self) -> &OrderManager {
        &self.order_manager
    }

    pub fn acknowledge_ledger_mismatch(&mut self) {
        self.order_manager.acknowledge_ledger_mismatch();
    }

    /// Routes a synchronously-observed amend rejection (the exchange
    /// collaborator's `amend_order` returns a `Result`, so this is
    /// known at dispatch time rather than via the async exec-event
    /// queue) into the same handler `ExecEvent::AmendReject` uses.
    pub fn on_amend_rejected(&mut self, order_id: &str, reason: &str) {
        self.order_manager.on_amend_reject(order_id, reason);
    }

    /// Dispatches an exchange exec event into the `OrderManager` and,
    /// for trades, the ledger. The only entry point that mutates the
    /// ledger outside of direct operator action.
    pub fn on_exec_event(&mut self, ledger: &mut FifoLedger, event: ExecEvent, eur_usd_rate: Decimal, now: DateTime<Utc>) {
        match event {
            ExecEvent::NewAck { cl_ord_id, order_id } => self.order_manager.on_new_ack(&cl_ord_id, &order_id),
            ExecEvent::AmendAck { order_id } => self.order_manager.on_amend_ack(&order_id),
            ExecEvent::CancelAck { order_id } => self.order_manager.on_cancel_ack(&order_id),
            ExecEvent::Reject { cl_ord_id, reason } => self.order_manager.on_reject(&cl_ord_id, &reason),
            ExecEvent::AmendReject { order_id, reason } => self.order_manager.on_amend_reject(&order_id, &reason),
            ExecEvent::Trade { order_id, qty, price, fee, trade_id } => {
                self.order_manager.on_trade(ledger, &order_id, qty, price, fee, &trade_id, eur_usd_rate, now);
            }
        }
    }

    /// Sell-side harvest candidates per spec §4.9, intended to be
    /// polled once a day by the lifecycle coordinator rather than every
    /// tick (harvesting is a low-frequency decision).
    pub fn harvest_candidates(&self, ledger: &FifoLedger, mid_usd: Decimal, eur_usd_rate: Decimal, now: DateTime<Utc>) -> Vec<HarvestRecommendation> {
        self.tax_agent.recommend_harvest(ledger, crate::money::Usd::new(mid_usd), eur_usd_rate, now)
    }

    /// Runs one full tick: updates every collaborator's rolling state
    /// from `input`, derives the desired grid for the current pause
    /// state and regime, diffs it against live orders, and returns the
    /// rate-limited, priority-sorted intents ready for dispatch.
    ///
    /// Not reentrant — a second call while one is outstanding returns
    /// `EngineError::ExchangeTransient` rather than corrupting shared
    /// collaborator state (spec §9).
    pub fn on_tick(&mut self, ledger: &FifoLedger, input: TickInput) -> Result<Vec<Intent>, EngineError> {
        if self.busy {
            return Err(EngineError::ExchangeTransient("tick already in progress".to_string()));
        }
        self.busy = true;
        let result = self.on_tick_inner(ledger, input);
        self.busy = false;
        result
    }

    fn on_tick_inner(&mut self, ledger: &FifoLedger, input: TickInput) -> Result<Vec<Intent>, EngineError> {
        let TickInput { now, book, equity_usd, btc_alloc_pct, thirty_day_volume_usd, venue_rate_counter } = input;

        self.rate_limiter.decay(now);
        self.rate_limiter.reconcile(venue_rate_counter);

        let mid = book.mid().ok_or_else(|| EngineError::ExchangeTransient("book has no two-sided top of book".to_string()))?;
        if !book.verify_checksum() {
            return Err(EngineError::BookChecksumMismatch(format!("mid={mid}")));
        }

        self.risk.on_equity(equity_usd);
        self.risk.on_price(now, mid);
        let circuit_frozen = self.risk.is_circuit_frozen();

        let mid_f64 = mid.to_f64().unwrap_or(0.0);
        self.regime_router.on_mid(mid_f64, circuit_frozen);
        self.spacing.on_mid(mid_f64);
        let regime = self.regime_router.regime();
        let band = self.config.band_for(regime).clone();

        let sellable_ratio = self.tax_agent.sellable_ratio(ledger, now);
        let sell_fraction = self.tax_agent.sell_level_fraction(sellable_ratio);
        let tax_locked = sell_fraction.is_zero();

        let pause = self.risk.update_pause(tax_locked);

        let fee_floor_bps = self.fee_model.min_profitable_spacing_bps(thirty_day_volume_usd).to_f64().unwrap_or(0.0);
        let base_spacing_bps = self.spacing.spacing_bps(fee_floor_bps);
        let alloc_f64 = btc_alloc_pct.to_f64().unwrap_or(0.0);
        let target_f64 = band.btc_target_pct.to_f64().unwrap_or(0.0);
        // The per-side floor passed to the skew must itself be at least
        // the fee-profitable minimum (spec §4.4), not just the spacing
        // config's raw `min_bps` — otherwise a tightened side can land
        // below the profitable floor even though the unskewed base
        // spacing passed it (spec §4.5 / §8 "Spacing profitability").
        let skew_min_bps = self.config.spacing.min_bps.max(fee_floor_bps);
        let side_spacing = self.skew.apply(base_spacing_bps, alloc_f64, target_f64, skew_min_bps);

        // Net edge is re-checked per side against its *applied* (post-skew)
        // spacing, since skew can move either side independently of the
        // base spacing the tick gate below is computed from.
        let buy_net_edge = self.fee_model.expected_net_edge_bps(Decimal::from_f64(side_spacing.buy_bps).unwrap_or(Decimal::ZERO), thirty_day_volume_usd);
        let sell_net_edge = self.fee_model.expected_net_edge_bps(Decimal::from_f64(side_spacing.sell_bps).unwrap_or(Decimal::ZERO), thirty_day_volume_usd);
        let net_edge = self.fee_model.expected_net_edge_bps(Decimal::from_f64(base_spacing_bps).unwrap_or(Decimal::ZERO), thirty_day_volume_usd);

        let (levels_buy, levels_sell, sell_spacing_bps) = match pause {
            PauseState::EmergencySell => (0, band.grid_levels.max(1), 0.0),
            PauseState::RiskPause | PauseState::DualLock => (0, 0, side_spacing.sell_bps),
            PauseState::TaxLock => {
                let buy_levels = if buy_net_edge > Decimal::ZERO { band.grid_levels } else { 0 };
                (buy_levels, 0, side_spacing.sell_bps)
            }
            PauseState::Active => {
                let scaled_sell = if sell_net_edge > Decimal::ZERO {
                    ((band.grid_levels as f64) * sell_fraction.to_f64().unwrap_or(1.0)).floor() as usize
                } else {
                    0
                };
                let buy_levels = if buy_net_edge > Decimal::ZERO { band.grid_levels } else { 0 };
                (buy_levels, scaled_sell, side_spacing.sell_bps)
            }
        };

        let desired = if levels_buy == 0 && levels_sell == 0 && pause != PauseState::EmergencySell {
            log::debug!(
                "no side has positive expected net edge this tick (buy={buy_net_edge}bps sell={sell_net_edge}bps, base={net_edge}bps), suppressing quotes"
            );
            Vec::new()
        } else {
            let center_price = match self.config.grid_center {
                crate::config::GridCenter::Vwap => self
                    .regime_router
                    .vwap()
                    .and_then(Decimal::from_f64)
                    .filter(|v| *v > Decimal::ZERO)
                    .unwrap_or(mid),
                crate::config::GridCenter::Mid => mid,
            };

            let capacity = self.inventory.capacity(band.btc_max_pct, band.btc_min_pct, btc_alloc_pct, equity_usd, mid);

            let buy_bps = Decimal::from_f64(side_spacing.buy_bps).unwrap_or(Decimal::ZERO);
            let sell_bps = Decimal::from_f64(sell_spacing_bps).unwrap_or(Decimal::ZERO);
            let req = base_grid_request(&self.config, center_price, buy_bps, sell_bps, levels_buy, levels_sell, band.order_size_scale);
            let raw_levels = GridEngine::compute(&req);
            clamp_to_capacity(raw_levels, capacity.max_buy_btc.raw(), capacity.max_sell_btc.raw())
        };

        let mut intents = self.order_manager.expire_stale_pending(now);
        intents.extend(self.order_manager.reconcile(&desired, now));
        sort_by_priority(&mut intents, intent_priority);

        let admitted: Vec<Intent> = intents
            .into_iter()
            .filter(|_| self.rate_limiter.try_admit(1.0, now))
            .collect();

        Ok(admitted)
    }
}

/// Walks buy levels (closest to center first) capping cumulative qty at
/// `max_buy`, and likewise for sells at `max_sell`. Levels beyond the
/// cap are dropped outright rather than partially filled, so a slot
/// never oscillates between two different small sizes tick to tick.
fn clamp_to_capacity(levels: Vec<crate::grid::DesiredLevel>, max_buy: Decimal, max_sell: Decimal) -> Vec<crate::grid::DesiredLevel> {
    let mut out = Vec::with_capacity(levels.len());
    let mut buy_used = Decimal::ZERO;
    let mut sell_used = Decimal::ZERO;
    for level in levels {
        match level.side {
            crate::money::Side::Buy => {
                if buy_used + level.qty <= max_buy {
                    buy_used += level.qty;
                    out.push(level);
                }
            }
            crate::money::Side::Sell => {
                if sell_used + level.qty <= max_sell {
                    sell_used += level.qty;
                    out.push(level);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{BookLevel, BookSnapshot};
    use rust_decimal_macros::dec;

    fn snapshot(mid: Decimal) -> BookSnapshot {
        let raw = BookSnapshot {
            bids: vec![BookLevel { price: mid - dec!(1), qty: dec!(10) }],
            asks: vec![BookLevel { price: mid + dec!(1), qty: dec!(10) }],
            checksum: 0,
        };
        BookSnapshot { checksum: raw.compute_checksum(), ..raw }
    }

    fn input(now: DateTime<Utc>, mid: Decimal) -> TickInput {
        TickInput {
            now,
            book: snapshot(mid),
            equity_usd: dec!(100_000),
            btc_alloc_pct: dec!(0.5),
            thirty_day_volume_usd: dec!(0),
            venue_rate_counter: 0.0,
        }
    }

    #[test]
    fn first_tick_emits_new_order_intents_when_no_pause() {
        let now = Utc::now();
        let mut strategy = StrategyLoop::new(EngineConfig::default(), dec!(100_000), now);
        let ledger = FifoLedger::new(chrono::Duration::days(365));
        let intents = strategy.on_tick(&ledger, input(now, dec!(50000))).unwrap();
        assert!(intents.iter().any(|i| matches!(i, Intent::AddOrder { .. })));
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let now = Utc::now();
        let mut strategy = StrategyLoop::new(EngineConfig::default(), dec!(100_000), now);
        let ledger = FifoLedger::new(chrono::Duration::days(365));
        let mut tick = input(now, dec!(50000));
        tick.book.checksum = 0xDEAD_BEEF;
        let err = strategy.on_tick(&ledger, tick).unwrap_err();
        assert!(matches!(err, EngineError::BookChecksumMismatch(_)));
    }

    #[test]
    fn reentrant_call_is_rejected() {
        let now = Utc::now();
        let mut strategy = StrategyLoop::new(EngineConfig::default(), dec!(100_000), now);
        strategy.busy = true;
        let ledger = FifoLedger::new(chrono::Duration::days(365));
        let err = strategy.on_tick(&ledger, input(now, dec!(50000))).unwrap_err();
        assert!(matches!(err, EngineError::ExchangeTransient(_)));
        assert!(!strategy.busy);
    }

    #[test]
    fn severe_drawdown_enters_emergency_sell_and_suppresses_buys() {
        let now = Utc::now();
        let mut strategy = StrategyLoop::new(EngineConfig::default(), dec!(100_000), now);
        let ledger = FifoLedger::new(chrono::Duration::days(365));
        let mut tick = input(now, dec!(50000));
        tick.equity_usd = dec!(79_000); // 21% drawdown from 100k HWM
        let intents = strategy.on_tick(&ledger, tick).unwrap();
        assert_eq!(strategy.pause(), PauseState::EmergencySell);
        assert!(!intents.iter().any(|i| matches!(i, Intent::AddOrder { side: crate::money::Side::Buy, .. })));
    }
}
