//! `ExchangeSession` — spec §6. The exchange WebSocket codec bytes are
//! an out-of-scope collaborator; this module defines only the trait
//! contract plus two implementations: `SimExchange` (in-memory, used by
//! the strategy's own tests and `backtest`) and `LiveExchange` (a thin
//! connection skeleton — wire parsing is intentionally not reproduced
//! here, see SPEC_FULL.md §0).

use crate::error::EngineError;
use crate::money::Side;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum ExecEvent {
    NewAck { cl_ord_id: String, order_id: String },
    AmendAck { order_id: String },
    CancelAck { order_id: String },
    Trade { order_id: String, qty: Decimal, price: Decimal, fee: Decimal, trade_id: String },
    /// Rejection of a brand-new order, keyed by the `cl_ord_id` assigned
    /// at `add_order` time (spec §4.11 `reject`).
    Reject { cl_ord_id: String, reason: String },
    /// Rejection of an in-flight amend, keyed by the live `order_id`
    /// (amends target an existing order, not a `cl_ord_id`) — spec
    /// §4.11: "If amend is rejected, slot transitions to LIVE with
    /// unchanged params and retries as cancel+add on next tick."
    AmendReject { order_id: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct BookLevel {
    pub price: Decimal,
    pub qty: Decimal,
}

#[derive(Debug, Clone)]
pub struct BookSnapshot {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub checksum: u32,
}

impl BookSnapshot {
    pub fn mid(&self) -> Option<Decimal> {
        let bid = self.bids.first()?.price;
        let ask = self.asks.first()?.price;
        Some((bid + ask) / Decimal::TWO)
    }

    /// CRC32 over the canonical wire representation of the top-of-book
    /// levels, per spec §6's checksum requirement. The exact byte
    /// layout is venue-defined (out of scope); this hashes a
    /// stable textual encoding so a re-snapshot after a checksum
    /// mismatch is verifiable in tests without depending on the real
    /// wire codec.
    pub fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for level in self.bids.iter().chain(self.asks.iter()) {
            hasher.update(level.price.to_string().as_bytes());
            hasher.update(level.qty.to_string().as_bytes());
        }
        hasher.finalize()
    }

    pub fn verify_checksum(&self) -> bool {
        self.compute_checksum() == self.checksum
    }
}

/// Abstract exchange session per spec §6. The core depends only on
/// this interface (spec §9 "dynamic dispatch ... interface
/// abstractions").
#[async_trait]
pub trait ExchangeSession: Send + Sync {
    async fn add_order(&mut self, cl_ord_id: &str, side: Side, price: Decimal, qty: Decimal, post_only: bool) -> Result<(), EngineError>;
    async fn amend_order(&mut self, order_id: &str, new_price: Option<Decimal>, new_qty: Option<Decimal>) -> Result<(), EngineError>;
    async fn cancel_order(&mut self, order_id: &str) -> Result<(), EngineError>;
    /// 0 disarms the dead-man's switch.
    async fn cancel_after(&mut self, timeout_sec: u64) -> Result<(), EngineError>;
    async fn request_book(&mut self, depth: usize) -> Result<BookSnapshot, EngineError>;
    async fn open_orders_snapshot(&mut self) -> Result<Vec<OpenOrder>, EngineError>;
    /// Local mirror of the venue's authoritative rate-limit counter,
    /// reconciled into `RateLimiter` per spec §4.2.
    fn venue_rate_counter(&self) -> f64;
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrder {
    pub order_id: String,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
}

/// In-memory exchange for tests and the `backtest` stub. Orders rest
/// until matched against a synthetic mid the caller feeds in; fills are
/// always maker (post-only).
pub struct SimExchange {
    resting: HashMap<String, OpenOrder>,
    next_order_seq: u64,
    rate_counter: f64,
    mid: Decimal,
}

impl SimExchange {
    pub fn new(initial_mid: Decimal) -> Self {
        Self { resting: HashMap::new(), next_order_seq: 0, rate_counter: 0.0, mid: initial_mid }
    }

    pub fn set_mid(&mut self, mid: Decimal) {
        self.mid = mid;
    }

    /// Crosses any resting order against the current mid, returning
    /// synthetic exec events for fully-filled orders.
    pub fn match_resting_orders(&mut self) -> Vec<ExecEvent> {
        let mut events = Vec::new();
        let mut filled_ids = Vec::new();
        for (order_id, order) in self.resting.iter() {
            let crosses = match order.side {
                Side::Buy => self.mid <= order.price,
                Side::Sell => self.mid >= order.price,
            };
            if crosses {
                events.push(ExecEvent::Trade {
                    order_id: order_id.clone(),
                    qty: order.qty,
                    price: order.price,
                    fee: order.price * order.qty * Decimal::new(25, 4) / Decimal::ONE_HUNDRED,
                    trade_id: Uuid::new_v4().to_string(),
                });
                filled_ids.push(order_id.clone());
            }
        }
        for id in filled_ids {
            self.resting.remove(&id);
        }
        events
    }
}

#[async_trait]
impl ExchangeSession for SimExchange {
    async fn add_order(&mut self, cl_ord_id: &str, side: Side, price: Decimal, qty: Decimal, _post_only: bool) -> Result<(), EngineError> {
        self.next_order_seq += 1;
        let order_id = format!("sim-{}", self.next_order_seq);
        self.resting.insert(order_id, OpenOrder { order_id: cl_ord_id.to_string(), side, price, qty });
        self.rate_counter += 1.0;
        Ok(())
    }

    async fn amend_order(&mut self, order_id: &str, new_price: Option<Decimal>, new_qty: Option<Decimal>) -> Result<(), EngineError> {
        let order = self.resting.get_mut(order_id).ok_or_else(|| EngineError::AmendRejected {
            order_id: order_id.to_string(),
            reason: "unknown order".to_string(),
        })?;
        if let Some(p) = new_price {
            order.price = p;
        }
        if let Some(q) = new_qty {
            order.qty = q;
        }
        self.rate_counter += 1.0;
        Ok(())
    }

    async fn cancel_order(&mut self, order_id: &str) -> Result<(), EngineError> {
        self.resting.remove(order_id);
        self.rate_counter += 1.0;
        Ok(())
    }

    async fn cancel_after(&mut self, _timeout_sec: u64) -> Result<(), EngineError> {
        Ok(())
    }

    async fn request_book(&mut self, _depth: usize) -> Result<BookSnapshot, EngineError> {
        let snapshot = BookSnapshot {
            bids: vec![BookLevel { price: self.mid - Decimal::ONE, qty: Decimal::ONE }],
            asks: vec![BookLevel { price: self.mid + Decimal::ONE, qty: Decimal::ONE }],
            checksum: 0,
        };
        Ok(BookSnapshot { checksum: snapshot.compute_checksum(), ..snapshot })
    }

    async fn open_orders_snapshot(&mut self) -> Result<Vec<OpenOrder>, EngineError> {
        Ok(self.resting.values().cloned().collect())
    }

    fn venue_rate_counter(&self) -> f64 {
        self.rate_counter
    }
}

/// Thin connection skeleton for the real venue. Wire parsing and
/// signing are out of this spec's scope (§1); this struct exists so
/// `LifecycleCoordinator` has a concrete non-sim type to construct in
/// `run` mode, following the same shape as the trait above.
pub struct LiveExchange {
    api_key: String,
    api_secret: String,
    ws_url: url::Url,
}

impl LiveExchange {
    pub fn new(api_key: String, api_secret: String, ws_url: url::Url) -> Self {
        Self { api_key, api_secret, ws_url }
    }

    pub async fn connect(&mut self) -> Result<(), EngineError> {
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(EngineError::ExchangeAuth("missing API credentials".to_string()));
        }
        log::info!("connecting to exchange session at {}", self.ws_url);
        let _ = Utc::now();
        Err(EngineError::ExchangeTransient(
            "live exchange wire protocol is an external collaborator, not reproduced here".to_string(),
        ))
    }

    fn not_reproduced(&self) -> EngineError {
        EngineError::ExchangeTransient(
            "live exchange wire protocol is an external collaborator, not reproduced here".to_string(),
        )
    }
}

/// `LiveExchange` satisfies the `ExchangeSession` contract so
/// `LifecycleCoordinator` can be constructed against it, but every
/// operation defers to the same out-of-scope wire protocol as
/// `connect` — this type exists to show the shape of the real
/// collaborator, not to reimplement it (SPEC_FULL.md §0).
#[async_trait]
impl ExchangeSession for LiveExchange {
    async fn add_order(&mut self, _cl_ord_id: &str, _side: Side, _price: Decimal, _qty: Decimal, _post_only: bool) -> Result<(), EngineError> {
        Err(self.not_reproduced())
    }

    async fn amend_order(&mut self, _order_id: &str, _new_price: Option<Decimal>, _new_qty: Option<Decimal>) -> Result<(), EngineError> {
        Err(self.not_reproduced())
    }

    async fn cancel_order(&mut self, _order_id: &str) -> Result<(), EngineError> {
        Err(self.not_reproduced())
    }

    async fn cancel_after(&mut self, _timeout_sec: u64) -> Result<(), EngineError> {
        Err(self.not_reproduced())
    }

    async fn request_book(&mut self, _depth: usize) -> Result<BookSnapshot, EngineError> {
        Err(self.not_reproduced())
    }

    async fn open_orders_snapshot(&mut self) -> Result<Vec<OpenOrder>, EngineError> {
        Err(self.not_reproduced())
    }

    fn venue_rate_counter(&self) -> f64 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn add_order_rests_until_crossed() {
        let mut ex = SimExchange::new(dec!(50000));
        ex.add_order("cl1", Side::Buy, dec!(49500), dec!(0.01), true).await.unwrap();
        assert!(ex.match_resting_orders().is_empty());
        ex.set_mid(dec!(49400));
        let events = ex.match_resting_orders();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn checksum_changes_with_book_contents() {
        let a = BookSnapshot {
            bids: vec![BookLevel { price: dec!(100), qty: dec!(1) }],
            asks: vec![BookLevel { price: dec!(101), qty: dec!(1) }],
            checksum: 0,
        };
        let b = BookSnapshot {
            bids: vec![BookLevel { price: dec!(99), qty: dec!(1) }],
            asks: vec![BookLevel { price: dec!(101), qty: dec!(1) }],
            checksum: 0,
        };
        assert_ne!(a.compute_checksum(), b.compute_checksum());
    }
}
