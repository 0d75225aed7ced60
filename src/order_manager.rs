//! OrderManager — spec §4.11. Owns every `OrderSlot` exclusively, diffs
//! desired grid levels against live slot state, and drives the
//! amend-first reconciliation protocol with PENDING timeouts.

use crate::grid::DesiredLevel;
use crate::ledger::{BuyFill, FifoLedger, LotSource, SellFill};
use crate::money::{Btc, Side, Usd, BTC_LOT_STEP, DEFAULT_TICK_USD};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    Empty,
    PendingNew,
    Live,
    AmendPending,
    CancelPending,
    /// Not in the spec's state enum directly, but reached via
    /// `trade -> record_sell` failing with `InsufficientLots` (spec
    /// §4.11 trade handling). Trading stays paused until an operator
    /// acknowledges via `OrderManager::acknowledge_ledger_mismatch`.
    LedgerMismatch,
}

#[derive(Debug, Clone)]
pub struct OrderSlot {
    pub slot_index: usize,
    pub side: Side,
    pub state: SlotState,
    pub live_order_id: Option<String>,
    pub pending_cl_ord_id: Option<String>,
    pub live_price: Option<Decimal>,
    pub live_qty: Option<Decimal>,
    pub desired_price: Option<Decimal>,
    pub desired_qty: Option<Decimal>,
    pub last_intent_at: Option<DateTime<Utc>>,
    pub reject_count: u32,
    /// Set when an amend on this slot was rejected; per spec §4.11 the
    /// slot must retry as cancel+add rather than another amend, even
    /// though `live_price`/`live_qty` still differ from desired.
    pub force_cancel_add: bool,
}

impl OrderSlot {
    pub fn new(slot_index: usize, side: Side) -> Self {
        Self {
            slot_index,
            side,
            state: SlotState::Empty,
            live_order_id: None,
            pending_cl_ord_id: None,
            live_price: None,
            live_qty: None,
            desired_price: None,
            desired_qty: None,
            last_intent_at: None,
            reject_count: 0,
            force_cancel_add: false,
        }
    }

    fn is_pending(&self) -> bool {
        matches!(self.state, SlotState::PendingNew | SlotState::AmendPending | SlotState::CancelPending)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    AddOrder { slot_index: usize, cl_ord_id: String, side: Side, price: Decimal, qty: Decimal },
    AmendOrder { slot_index: usize, order_id: String, new_price: Decimal, new_qty: Decimal },
    CancelOrder { slot_index: usize, order_id: String },
}

pub const PENDING_TIMEOUT_MS: i64 = 1500;
const PRICE_EPS_TICKS: Decimal = DEFAULT_TICK_USD;
const QTY_EPS: Decimal = BTC_LOT_STEP;

pub struct OrderManager {
    slots: Vec<OrderSlot>,
    ledger_mismatch: bool,
    levels_buy: usize,
}

impl OrderManager {
    pub fn new(levels_buy: usize, levels_sell: usize) -> Self {
        let mut slots = Vec::with_capacity(levels_buy + levels_sell);
        for i in 0..levels_buy {
            slots.push(OrderSlot::new(i, Side::Buy));
        }
        for i in 0..levels_sell {
            slots.push(OrderSlot::new(levels_buy + i, Side::Sell));
        }
        Self { slots, ledger_mismatch: false, levels_buy }
    }


    pub fn slots(&self) -> &[OrderSlot] {
        &self.slots
    }

    pub fn is_ledger_mismatch(&self) -> bool {
        self.ledger_mismatch
    }

    /// Operator acknowledgement clears the ledger-mismatch pause per
    /// spec §4.11 / §7.
    pub fn acknowledge_ledger_mismatch(&mut self) {
        self.ledger_mismatch = false;
        for slot in &mut self.slots {
            if slot.state == SlotState::LedgerMismatch {
                slot.state = SlotState::Empty;
            }
        }
    }

    /// Times out any PENDING_* slot older than `PENDING_TIMEOUT_MS`,
    /// forcing it to CANCEL_PENDING (treated as stale, spec §4.11).
    pub fn expire_stale_pending(&mut self, now: DateTime<Utc>) -> Vec<Intent> {
        let mut intents = Vec::new();
        for slot in &mut self.slots {
            if matches!(slot.state, SlotState::PendingNew | SlotState::AmendPending) {
                if let Some(at) = slot.last_intent_at {
                    if (now - at).num_milliseconds() > PENDING_TIMEOUT_MS {
                        slot.state = SlotState::CancelPending;
                        slot.last_intent_at = Some(now);
                        if let Some(order_id) = &slot.live_order_id {
                            intents.push(Intent::CancelOrder { slot_index: slot.slot_index, order_id: order_id.clone() });
                        }
                    }
                }
            }
        }
        intents
    }

    /// Assigns desired (price, qty) per slot side by ladder index, then
    /// diffs against live state per the table in spec §4.11. Slots
    /// without a matching desired level for their side are treated as
    /// "absent" (cancel if LIVE, no-op if EMPTY).
    pub fn reconcile(&mut self, desired: &[DesiredLevel], now: DateTime<Utc>) -> Vec<Intent> {
        if self.ledger_mismatch {
            return Vec::new();
        }

        let levels_buy = self.levels_buy;
        let mut intents = Vec::new();
        for slot in &mut self.slots {
            if slot.is_pending() {
                continue; // forbidden to stack a second command on a pending slot
            }
            let local_idx = match slot.side {
                Side::Buy => slot.slot_index,
                Side::Sell => slot.slot_index - levels_buy,
            };
            let want = desired.iter().find(|d| d.side == slot.side && d.index == local_idx);
            slot.desired_price = want.map(|d| d.price);
            slot.desired_qty = want.map(|d| d.qty);

            match (slot.state, want) {
                (SlotState::Empty, Some(d)) => {
                    let cl_ord_id = uuid::Uuid::new_v4().to_string();
                    slot.state = SlotState::PendingNew;
                    slot.pending_cl_ord_id = Some(cl_ord_id.clone());
                    slot.last_intent_at = Some(now);
                    intents.push(Intent::AddOrder { slot_index: slot.slot_index, cl_ord_id, side: slot.side, price: d.price, qty: d.qty });
                }
                (SlotState::Live, Some(d)) => {
                    let price_diff = slot.live_price.map(|p| (p - d.price).abs() > PRICE_EPS_TICKS).unwrap_or(true);
                    let qty_diff = slot.live_qty.map(|q| (q - d.qty).abs() > QTY_EPS).unwrap_or(true);
                    if price_diff || qty_diff {
                        if let Some(order_id) = slot.live_order_id.clone() {
                            if slot.force_cancel_add {
                                // A prior amend on this slot was rejected;
                                // degrade to cancel+add instead of amending
                                // again (spec §4.11).
                                slot.force_cancel_add = false;
                                slot.state = SlotState::CancelPending;
                                slot.last_intent_at = Some(now);
                                intents.push(Intent::CancelOrder { slot_index: slot.slot_index, order_id });
                            } else {
                                slot.state = SlotState::AmendPending;
                                slot.last_intent_at = Some(now);
                                intents.push(Intent::AmendOrder { slot_index: slot.slot_index, order_id, new_price: d.price, new_qty: d.qty });
                            }
                        }
                    }
                }
                (SlotState::Live, None) => {
                    if let Some(order_id) = slot.live_order_id.clone() {
                        slot.state = SlotState::CancelPending;
                        slot.last_intent_at = Some(now);
                        intents.push(Intent::CancelOrder { slot_index: slot.slot_index, order_id });
                    }
                }
                _ => {}
            }
        }
        intents
    }

    pub fn on_new_ack(&mut self, cl_ord_id: &str, order_id: &str) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.pending_cl_ord_id.as_deref() == Some(cl_ord_id)) {
            slot.state = SlotState::Live;
            slot.live_order_id = Some(order_id.to_string());
            slot.live_price = slot.desired_price;
            slot.live_qty = slot.desired_qty;
            slot.pending_cl_ord_id = None;
        }
    }

    pub fn on_amend_ack(&mut self, order_id: &str) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.live_order_id.as_deref() == Some(order_id)) {
            slot.state = SlotState::Live;
            slot.live_price = slot.desired_price;
            slot.live_qty = slot.desired_qty;
        }
    }

    pub fn on_cancel_ack(&mut self, order_id: &str) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.live_order_id.as_deref() == Some(order_id)) {
            slot.state = SlotState::Empty;
            slot.live_order_id = None;
            slot.live_price = None;
            slot.live_qty = None;
        }
    }

    /// Reverts a slot to its prior non-pending state and bumps the
    /// reject counter, per spec §4.11.
    pub fn on_reject(&mut self, cl_ord_id: &str, _reason: &str) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.pending_cl_ord_id.as_deref() == Some(cl_ord_id)) {
            slot.reject_count += 1;
            slot.pending_cl_ord_id = None;
            slot.state = if slot.live_order_id.is_some() { SlotState::Live } else { SlotState::Empty };
        }
    }

    /// Handles rejection of an in-flight amend, keyed by `order_id`
    /// (amends target the live order, not a `cl_ord_id`). Per spec
    /// §4.11 the slot reverts to LIVE with its prior, unchanged
    /// `live_price`/`live_qty` — never updated to the rejected amend's
    /// target — and is flagged to retry as cancel+add on the next
    /// `reconcile` rather than another amend.
    pub fn on_amend_reject(&mut self, order_id: &str, _reason: &str) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.live_order_id.as_deref() == Some(order_id) && s.state == SlotState::AmendPending) {
            slot.reject_count += 1;
            slot.state = SlotState::Live;
            slot.force_cancel_add = true;
        }
    }

    /// Applies a trade fill: decrements live qty (EMPTY if exhausted)
    /// and forwards the normalized fill to the ledger. A failed sell
    /// (`InsufficientLots`) enters the ledger-mismatch pause.
    pub fn on_trade(&mut self, ledger: &mut FifoLedger, order_id: &str, qty: Decimal, price: Decimal, fee: Decimal, trade_id: &str, eur_usd_rate: Decimal, now: DateTime<Utc>) {
        let (side, venue_order_id, exhausted) = {
            let slot = match self.slots.iter_mut().find(|s| s.live_order_id.as_deref() == Some(order_id)) {
                Some(s) => s,
                None => return,
            };
            let remaining = slot.live_qty.unwrap_or(Decimal::ZERO) - qty;
            slot.live_qty = Some(remaining.max(Decimal::ZERO));
            let exhausted = remaining <= Decimal::ZERO;
            if exhausted {
                slot.state = SlotState::Empty;
                slot.live_order_id = None;
                slot.live_price = None;
                slot.live_qty = None;
            }
            (slot.side, order_id.to_string(), exhausted)
        };
        let _ = exhausted;

        match side {
            Side::Buy => {
                ledger.record_buy(BuyFill {
                    venue_order_id,
                    venue_trade_id: trade_id.to_string(),
                    source: LotSource::Grid,
                    traded_at: now,
                    qty_btc: Btc::new(qty),
                    price_usd: Usd::new(price),
                    fee_usd: Usd::new(fee),
                    eur_usd_rate,
                });
            }
            Side::Sell => {
                let result = ledger.record_sell(SellFill {
                    traded_at: now,
                    qty_btc: Btc::new(qty),
                    price_usd: Usd::new(price),
                    fee_usd: Usd::new(fee),
                    eur_usd_rate,
                });
                if result.is_err() {
                    log::error!("ledger mismatch on sell fill for order {order_id}: demand exceeds open lots");
                    self.ledger_mismatch = true;
                    for slot in &mut self.slots {
                        slot.state = SlotState::LedgerMismatch;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::DesiredLevel;
    use rust_decimal_macros::dec;

    #[test]
    fn empty_slot_with_desired_emits_add_order() {
        let mut om = OrderManager::new(1, 0);
        let desired = vec![DesiredLevel { index: 0, side: Side::Buy, price: dec!(49000), qty: dec!(0.01) }];
        let intents = om.reconcile(&desired, Utc::now());
        assert_eq!(intents.len(), 1);
        assert!(matches!(intents[0], Intent::AddOrder { .. }));
        assert_eq!(om.slots()[0].state, SlotState::PendingNew);
    }

    #[test]
    fn pending_slot_forbids_second_command() {
        let mut om = OrderManager::new(1, 0);
        let desired = vec![DesiredLevel { index: 0, side: Side::Buy, price: dec!(49000), qty: dec!(0.01) }];
        om.reconcile(&desired, Utc::now());
        let intents = om.reconcile(&desired, Utc::now());
        assert!(intents.is_empty());
    }

    #[test]
    fn live_slot_amends_on_price_drift_scenario_5() {
        let mut om = OrderManager::new(1, 0);
        let desired = vec![DesiredLevel { index: 0, side: Side::Buy, price: dec!(49500), qty: dec!(0.01) }];
        om.reconcile(&desired, Utc::now());
        om.on_new_ack(om.slots()[0].pending_cl_ord_id.clone().unwrap().as_str(), "order-1");
        assert_eq!(om.slots()[0].state, SlotState::Live);

        let desired2 = vec![DesiredLevel { index: 0, side: Side::Buy, price: dec!(49510), qty: dec!(0.01) }];
        let intents = om.reconcile(&desired2, Utc::now());
        assert_eq!(intents.len(), 1);
        assert!(matches!(intents[0], Intent::AmendOrder { .. }));

        om.on_amend_ack("order-1");
        assert_eq!(om.slots()[0].state, SlotState::Live);
        assert_eq!(om.slots()[0].live_price, Some(dec!(49510)));
        assert_eq!(om.slots()[0].live_order_id, Some("order-1".to_string()));
    }

    #[test]
    fn pending_timeout_forces_cancel_pending() {
        let mut om = OrderManager::new(1, 0);
        let desired = vec![DesiredLevel { index: 0, side: Side::Buy, price: dec!(49000), qty: dec!(0.01) }];
        let past = Utc::now() - chrono::Duration::milliseconds(2000);
        om.reconcile(&desired, past);
        let intents = om.expire_stale_pending(Utc::now());
        assert_eq!(om.slots()[0].state, SlotState::CancelPending);
        assert!(intents.is_empty()); // no live_order_id yet since it was PENDING_NEW
    }

    #[test]
    fn rejected_amend_reverts_to_live_and_retries_as_cancel_add() {
        let mut om = OrderManager::new(1, 0);
        let desired = vec![DesiredLevel { index: 0, side: Side::Buy, price: dec!(49500), qty: dec!(0.01) }];
        om.reconcile(&desired, Utc::now());
        let cl = om.slots()[0].pending_cl_ord_id.clone().unwrap();
        om.on_new_ack(&cl, "order-1");

        let desired2 = vec![DesiredLevel { index: 0, side: Side::Buy, price: dec!(49510), qty: dec!(0.01) }];
        let intents = om.reconcile(&desired2, Utc::now());
        assert!(matches!(intents[0], Intent::AmendOrder { .. }));
        assert_eq!(om.slots()[0].state, SlotState::AmendPending);

        om.on_amend_reject("order-1", "post-only would cross");
        assert_eq!(om.slots()[0].state, SlotState::Live);
        // unchanged params, not the rejected amend's target
        assert_eq!(om.slots()[0].live_price, Some(dec!(49500)));
        assert_eq!(om.slots()[0].live_order_id, Some("order-1".to_string()));

        let intents2 = om.reconcile(&desired2, Utc::now());
        assert_eq!(intents2.len(), 1);
        assert!(matches!(intents2[0], Intent::CancelOrder { .. }));
        assert_eq!(om.slots()[0].state, SlotState::CancelPending);

        om.on_cancel_ack("order-1");
        assert_eq!(om.slots()[0].state, SlotState::Empty);
        let intents3 = om.reconcile(&desired2, Utc::now());
        assert!(matches!(intents3[0], Intent::AddOrder { .. }));
    }

    #[test]
    fn insufficient_lots_on_sell_enters_ledger_mismatch() {
        let mut om = OrderManager::new(0, 1);
        let mut ledger = FifoLedger::new(chrono::Duration::days(365));
        let desired = vec![DesiredLevel { index: 0, side: Side::Sell, price: dec!(51000), qty: dec!(0.01) }];
        om.reconcile(&desired, Utc::now());
        let cl = om.slots()[0].pending_cl_ord_id.clone().unwrap();
        om.on_new_ack(&cl, "order-1");
        om.on_trade(&mut ledger, "order-1", dec!(0.01), dec!(51000), dec!(0.5), "trade-1", dec!(1.1), Utc::now());
        assert!(om.is_ledger_mismatch());
        om.acknowledge_ledger_mismatch();
        assert!(!om.is_ledger_mismatch());
    }
}
