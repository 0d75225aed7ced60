//! `LifecycleCoordinator` — spec §4.13. Owns the exchange session, the
//! ledger, and the wall clock; drives startup reconciliation, reconnect
//! recovery, and graceful shutdown around the pure [`crate::strategy::StrategyLoop`].

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::exchange::{BookSnapshot, ExchangeSession};
use crate::ledger::FifoLedger;
use crate::money::Side;
use crate::notify::Notifier;
use crate::persistence::LedgerStore;
use crate::strategy::{StrategyLoop, TickInput};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::time::Duration as StdDuration;

/// Trailing window for the fee model's `thirty_day_volume_usd` input.
const VOLUME_WINDOW_DAYS: i64 = 30;

/// Coordinates one engine instance end to end: load ledger, connect,
/// reconcile against the exchange's open-order snapshot, tick, and
/// shut down cleanly on signal. `StrategyLoop` stays pure; this struct
/// is the only place that performs I/O.
pub struct LifecycleCoordinator<X: ExchangeSession, S: LedgerStore> {
    config: EngineConfig,
    exchange: X,
    store: S,
    notifier: Box<dyn Notifier>,
    strategy: StrategyLoop,
    ledger: FifoLedger,
    draining: bool,
    /// Portfolio snapshot (spec §3): cash and BTC marked to the most
    /// recent book, maintained from trade exec events since the
    /// exchange collaborator's balance query is out of scope (§1).
    usd_qty: Decimal,
    btc_qty: Decimal,
    trade_log: VecDeque<(DateTime<Utc>, Decimal)>,
}

impl<X: ExchangeSession, S: LedgerStore> LifecycleCoordinator<X, S> {
    /// Loads the ledger (creating an empty one if absent per §4.13),
    /// builds the pure `StrategyLoop`, and returns a coordinator ready
    /// for `connect_and_reconcile`.
    pub async fn new(
        config: EngineConfig,
        exchange: X,
        store: S,
        notifier: Box<dyn Notifier>,
        starting_equity_usd: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        let holding_period = chrono::Duration::days(config.tax_agent.holding_period_days as i64);
        let ledger = match store.load().await? {
            Some(doc) => FifoLedger::from_document(doc, holding_period),
            None => {
                log::info!("no ledger found at startup, starting with an empty one");
                FifoLedger::new(holding_period)
            }
        };
        let strategy = StrategyLoop::new(config.clone(), starting_equity_usd, now);
        Ok(Self {
            config,
            exchange,
            store,
            notifier,
            strategy,
            ledger,
            draining: false,
            usd_qty: starting_equity_usd,
            btc_qty: Decimal::ZERO,
            trade_log: VecDeque::new(),
        })
    }

    pub fn ledger(&self) -> &FifoLedger {
        &self.ledger
    }

    pub fn strategy(&self) -> &StrategyLoop {
        &self.strategy
    }

    /// Startup (and reconnect) reconciliation per §4.13: request the
    /// exchange's open-orders snapshot, cancel every exchange-side
    /// order our slots don't know about (orphan), and reset any slot
    /// referencing an order the exchange no longer reports. Arms the
    /// dead-man's switch once reconciliation completes.
    pub async fn connect_and_reconcile(&mut self) -> Result<(), EngineError> {
        let live_orders = self.exchange.open_orders_snapshot().await?;
        let known_order_ids: std::collections::HashSet<&str> = self
            .strategy
            .order_manager()
            .slots()
            .iter()
            .filter_map(|s| s.live_order_id.as_deref())
            .collect();

        for order in &live_orders {
            if !known_order_ids.contains(order.order_id.as_str()) {
                log::warn!("cancelling orphan order {} not tracked by any slot", order.order_id);
                self.exchange.cancel_order(&order.order_id).await?;
            }
        }
        // Slots referencing an order the exchange no longer reports are
        // reset to EMPTY by acknowledging a synthetic cancel; the ack
        // path is the same one live traffic uses.
        let reported: std::collections::HashSet<&str> =
            live_orders.iter().map(|o| o.order_id.as_str()).collect();
        let stale_order_ids: Vec<String> = self
            .strategy
            .order_manager()
            .slots()
            .iter()
            .filter_map(|s| s.live_order_id.clone())
            .filter(|id| !reported.contains(id.as_str()))
            .collect();
        for order_id in stale_order_ids {
            self.strategy.on_exec_event(
                &mut self.ledger,
                crate::exchange::ExecEvent::CancelAck { order_id },
                Decimal::ONE,
                Utc::now(),
            );
        }

        self.exchange.cancel_after(self.config.cancel_after_timeout_sec).await?;
        Ok(())
    }

    /// Pulls the current book from the exchange collaborator, derives
    /// the portfolio snapshot (spec §3) from trade-tracked cash/BTC
    /// balances, and drives one full strategy tick. This is the
    /// function the composition root's idle-fallback loop calls every
    /// cycle (spec §4.12/§4.13).
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        let book = self.exchange.request_book(self.config.book_depth).await?;
        let venue_rate_counter = self.exchange.venue_rate_counter();
        let mid = book.mid().unwrap_or(Decimal::ZERO);

        let equity_usd = self.usd_qty + self.btc_qty * mid;
        let btc_alloc_pct = if equity_usd > Decimal::ZERO {
            (self.btc_qty * mid / equity_usd).clamp(Decimal::ZERO, Decimal::ONE)
        } else {
            Decimal::ZERO
        };

        let cutoff = now - Duration::days(VOLUME_WINDOW_DAYS);
        while matches!(self.trade_log.front(), Some((ts, _)) if *ts < cutoff) {
            self.trade_log.pop_front();
        }
        let thirty_day_volume_usd = self.trade_log.iter().map(|(_, v)| *v).sum();

        self.run_tick(TickInput { now, book, equity_usd, btc_alloc_pct, thirty_day_volume_usd, venue_rate_counter }).await
    }

    /// Runs one tick: delegates to the pure strategy loop, dispatches
    /// the returned intents through the exchange collaborator, and
    /// schedules a ledger save if the tick mutated it via a fill.
    pub async fn run_tick(&mut self, input: TickInput) -> Result<(), EngineError> {
        if self.draining {
            return Ok(());
        }
        let prior_pause = self.strategy.pause();
        let intents = self.strategy.on_tick(&self.ledger, input)?;
        let pause = self.strategy.pause();
        if pause != prior_pause {
            self.notifier.pause_transition(prior_pause, pause);
        }

        for intent in intents {
            self.dispatch(intent).await;
        }
        Ok(())
    }

    async fn dispatch(&mut self, intent: crate::order_manager::Intent) {
        use crate::order_manager::Intent;
        let result = match &intent {
            Intent::AddOrder { cl_ord_id, side, price, qty, .. } => {
                self.exchange.add_order(cl_ord_id, *side, *price, *qty, true).await
            }
            Intent::AmendOrder { order_id, new_price, new_qty, .. } => {
                self.exchange.amend_order(order_id, Some(*new_price), Some(*new_qty)).await
            }
            Intent::CancelOrder { order_id, .. } => self.exchange.cancel_order(order_id).await,
        };
        if let Err(err) = result {
            log::warn!("intent dispatch failed: {err}");
            match &err {
                EngineError::OrderRejected { cl_ord_id, reason } => {
                    self.notifier.order_rejected(cl_ord_id, reason);
                }
                EngineError::AmendRejected { order_id, reason } => {
                    // Reverts the slot to LIVE with unchanged params and
                    // flags it for cancel+add next tick (spec §4.11).
                    self.strategy.on_amend_rejected(order_id, reason);
                    self.notifier.order_rejected(order_id, reason);
                }
                _ => {}
            }
        }
    }

    /// Delivers one exec event from the exchange collaborator's queue
    /// into the strategy/ledger, persisting the ledger if it mutated.
    pub async fn on_exec_event(&mut self, event: crate::exchange::ExecEvent, eur_usd_rate: Decimal, now: DateTime<Utc>) -> Result<(), EngineError> {
        let is_trade = matches!(event, crate::exchange::ExecEvent::Trade { .. });
        if let crate::exchange::ExecEvent::Trade { ref order_id, qty, price, fee, .. } = event {
            if let Some(slot) = self.strategy.order_manager().slots().iter().find(|s| s.live_order_id.as_deref() == Some(order_id.as_str())) {
                match slot.side {
                    Side::Buy => {
                        self.usd_qty -= qty * price + fee;
                        self.btc_qty += qty;
                    }
                    Side::Sell => {
                        self.usd_qty += qty * price - fee;
                        self.btc_qty -= qty;
                    }
                }
            }
            self.trade_log.push_back((now, qty * price));
        }
        self.strategy.on_exec_event(&mut self.ledger, event, eur_usd_rate, now);
        if self.strategy.order_manager().is_ledger_mismatch() {
            self.notifier.ledger_mismatch_alert("sell fill demanded more than open lots cover");
        }
        if is_trade {
            self.persist().await?;
        }
        Ok(())
    }

    async fn persist(&self) -> Result<(), EngineError> {
        self.store.save(&self.ledger.to_document()).await
    }

    /// Book checksum mismatch handling per §6: pause is implicit
    /// (the tick already rejects on mismatch via `StrategyLoop`); this
    /// only notifies and leaves resubscription to the market-data actor.
    pub fn on_book_checksum_mismatch(&self, book: &BookSnapshot) {
        self.notifier.book_checksum_mismatch(&format!("expected={} computed={}", book.checksum, book.compute_checksum()));
    }

    /// Graceful shutdown per §4.13: mark draining, cancel every LIVE
    /// and pending order, disarm the DMS, persist synchronously, and
    /// close the session — all within the configured deadline.
    pub async fn shutdown(&mut self) -> Result<(), EngineError> {
        self.draining = true;
        let deadline = StdDuration::from_secs(self.config.shutdown_deadline_sec);
        let outcome = tokio::time::timeout(deadline, self.shutdown_inner()).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                log::error!("graceful shutdown exceeded {:?} deadline, forcing exit", deadline);
                Err(EngineError::DeadlineExceeded("shutdown deadline exceeded".to_string()))
            }
        }
    }

    async fn shutdown_inner(&mut self) -> Result<(), EngineError> {
        let order_ids: Vec<String> = self
            .strategy
            .order_manager()
            .slots()
            .iter()
            .filter_map(|s| s.live_order_id.clone())
            .collect();
        for order_id in order_ids {
            if let Err(err) = self.exchange.cancel_order(&order_id).await {
                log::warn!("failed to cancel {order_id} during shutdown: {err}");
            }
        }
        self.exchange.cancel_after(0).await?;
        self.persist().await?;
        log::info!("ledger persisted, engine shut down cleanly");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::exchange::SimExchange;
    use crate::notify::LogNotifier;
    use crate::persistence::LedgerStore;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct MemLedgerStore(Mutex<Option<crate::ledger::LedgerDocument>>);

    #[async_trait]
    impl LedgerStore for MemLedgerStore {
        async fn load(&self) -> Result<Option<crate::ledger::LedgerDocument>, EngineError> {
            Ok(self.0.lock().unwrap().clone())
        }

        async fn save(&self, doc: &crate::ledger::LedgerDocument) -> Result<(), EngineError> {
            *self.0.lock().unwrap() = Some(doc.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn startup_reconciles_empty_ledger_and_arms_dms() {
        let now = Utc::now();
        let coordinator = LifecycleCoordinator::new(
            EngineConfig::default(),
            SimExchange::new(dec!(50000)),
            MemLedgerStore(Mutex::new(None)),
            Box::new(LogNotifier),
            dec!(100_000),
            now,
        )
        .await
        .unwrap();
        assert_eq!(coordinator.ledger().total_btc().raw(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn shutdown_cancels_all_and_persists() {
        let now = Utc::now();
        let mut coordinator = LifecycleCoordinator::new(
            EngineConfig::default(),
            SimExchange::new(dec!(50000)),
            MemLedgerStore(Mutex::new(None)),
            Box::new(LogNotifier),
            dec!(100_000),
            now,
        )
        .await
        .unwrap();
        coordinator.connect_and_reconcile().await.unwrap();
        coordinator.shutdown().await.unwrap();
        assert!(coordinator.draining);
    }

    #[tokio::test]
    async fn tick_pulls_book_and_emits_intents() {
        let now = Utc::now();
        let mut coordinator = LifecycleCoordinator::new(
            EngineConfig::default(),
            SimExchange::new(dec!(50000)),
            MemLedgerStore(Mutex::new(None)),
            Box::new(LogNotifier),
            dec!(100_000),
            now,
        )
        .await
        .unwrap();
        coordinator.connect_and_reconcile().await.unwrap();
        coordinator.tick(now).await.unwrap();
        assert!(coordinator.strategy().order_manager().slots().iter().any(|s| s.live_order_id.is_some() || s.pending_cl_ord_id.is_some()));
    }

    #[tokio::test]
    async fn trade_exec_event_updates_portfolio_and_volume() {
        let now = Utc::now();
        let mut coordinator = LifecycleCoordinator::new(
            EngineConfig::default(),
            SimExchange::new(dec!(50000)),
            MemLedgerStore(Mutex::new(None)),
            Box::new(LogNotifier),
            dec!(100_000),
            now,
        )
        .await
        .unwrap();
        coordinator.connect_and_reconcile().await.unwrap();
        coordinator.tick(now).await.unwrap();
        let buy_order_id = coordinator
            .strategy()
            .order_manager()
            .slots()
            .iter()
            .find(|s| s.side == Side::Buy && s.pending_cl_ord_id.is_some())
            .and_then(|s| s.pending_cl_ord_id.clone())
            .expect("a buy slot should have a pending new order after the first tick");
        coordinator
            .on_exec_event(
                crate::exchange::ExecEvent::NewAck { cl_ord_id: buy_order_id.clone(), order_id: "sim-1".to_string() },
                dec!(1.1),
                now,
            )
            .await
            .unwrap();
        coordinator
            .on_exec_event(
                crate::exchange::ExecEvent::Trade {
                    order_id: "sim-1".to_string(),
                    qty: dec!(0.01),
                    price: dec!(49999),
                    fee: dec!(0.5),
                    trade_id: "t1".to_string(),
                },
                dec!(1.1),
                now,
            )
            .await
            .unwrap();
        assert_eq!(coordinator.btc_qty, dec!(0.01));
        assert_eq!(coordinator.trade_log.len(), 1);
    }
}
