//! GridEngine — spec §4.6. Emits N desired (side, price, qty) levels
//! from a center price, per-side spacing, and regime size scale.

use crate::money::{round_price_down, round_price_up, round_qty_down, Side, BTC_LOT_STEP, MIN_ORDER_BTC};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DesiredLevel {
    pub index: usize,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
}

#[derive(Debug, Clone)]
pub struct GridRequest {
    pub center_price: Decimal,
    pub buy_spacing_bps: Decimal,
    pub sell_spacing_bps: Decimal,
    pub levels_buy: usize,
    pub levels_sell: usize,
    pub order_size_usd: Decimal,
    pub order_size_scale: Decimal,
    pub tick: Decimal,
}

pub struct GridEngine;

impl GridEngine {
    /// Emits a desired grid. Returns an empty grid (and the caller
    /// should log) if `sell[0] <= buy[0]` would result, per spec §4.6.
    pub fn compute(req: &GridRequest) -> Vec<DesiredLevel> {
        if req.center_price <= Decimal::ZERO {
            return Vec::new();
        }

        let effective_size = req.order_size_usd * req.order_size_scale;
        let mut buys = Vec::new();
        for i in 0..req.levels_buy {
            let n = Decimal::from(i + 1);
            let raw_price = req.center_price * (Decimal::ONE - n * req.buy_spacing_bps / dec!(10_000));
            let price = round_price_down(raw_price, req.tick);
            if price <= Decimal::ZERO {
                break;
            }
            let raw_qty = effective_size / price;
            let qty = round_qty_down(raw_qty, BTC_LOT_STEP);
            if qty < MIN_ORDER_BTC {
                continue;
            }
            buys.push(DesiredLevel { index: i, side: Side::Buy, price, qty });
        }

        let mut sells = Vec::new();
        for i in 0..req.levels_sell {
            let n = Decimal::from(i + 1);
            let raw_price = req.center_price * (Decimal::ONE + n * req.sell_spacing_bps / dec!(10_000));
            let price = round_price_up(raw_price, req.tick);
            let raw_qty = effective_size / price;
            let qty = round_qty_down(raw_qty, BTC_LOT_STEP);
            if qty < MIN_ORDER_BTC {
                continue;
            }
            sells.push(DesiredLevel { index: i, side: Side::Sell, price, qty });
        }

        if let (Some(b0), Some(s0)) = (buys.first(), sells.first()) {
            if s0.price <= b0.price {
                log::warn!(
                    "grid: sell[0] ({}) <= buy[0] ({}), emitting empty grid",
                    s0.price,
                    b0.price
                );
                return Vec::new();
            }
        }

        buys.into_iter().chain(sells).collect()
    }
}
