//! InventoryArbiter — spec §4.10. Caps per-tick buy/sell capacity by
//! the active regime's allocation bands and a per-tick rebalance cap.

use crate::money::Btc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryArbiterConfig {
    /// Fraction of equity that may be rebalanced in a single tick.
    /// Default 0.10; spec §4.10 documents this as a real risk at fast
    /// tick intervals and expects operators to configure it down
    /// (e.g. 0.01) for sub-second loops.
    pub per_tick_rebalance_pct: Decimal,
}

impl Default for InventoryArbiterConfig {
    fn default() -> Self {
        Self { per_tick_rebalance_pct: Decimal::new(10, 2) } // 0.10
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InventoryCapacity {
    pub max_buy_btc: Btc,
    pub max_sell_btc: Btc,
}

pub struct InventoryArbiter {
    config: InventoryArbiterConfig,
}

impl InventoryArbiter {
    pub fn new(config: InventoryArbiterConfig) -> Self {
        Self { config }
    }

    pub fn capacity(
        &self,
        btc_max_pct: Decimal,
        btc_min_pct: Decimal,
        btc_alloc_pct: Decimal,
        equity_usd: Decimal,
        mid_price: Decimal,
    ) -> InventoryCapacity {
        if mid_price <= Decimal::ZERO {
            return InventoryCapacity { max_buy_btc: Btc::ZERO, max_sell_btc: Btc::ZERO };
        }

        let max_buy = ((btc_max_pct - btc_alloc_pct).max(Decimal::ZERO) * equity_usd / mid_price).max(Decimal::ZERO);
        let max_sell = ((btc_alloc_pct - btc_min_pct).max(Decimal::ZERO) * equity_usd / mid_price).max(Decimal::ZERO);

        let rebalance_cap = self.config.per_tick_rebalance_pct * equity_usd / mid_price;

        InventoryCapacity {
            max_buy_btc: Btc::new(max_buy.min(rebalance_cap)),
            max_sell_btc: Btc::new(max_sell.min(rebalance_cap)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn caps_buy_by_allocation_band() {
        let arbiter = InventoryArbiter::new(InventoryArbiterConfig { per_tick_rebalance_pct: dec!(1.0) });
        let cap = arbiter.capacity(dec!(0.6), dec!(0.2), dec!(0.5), dec!(100_000), dec!(50_000));
        // (0.6-0.5)*100000/50000 = 0.2
        assert_eq!(cap.max_buy_btc.raw(), dec!(0.2));
    }

    #[test]
    fn caps_sell_by_allocation_band() {
        let arbiter = InventoryArbiter::new(InventoryArbiterConfig { per_tick_rebalance_pct: dec!(1.0) });
        let cap = arbiter.capacity(dec!(0.6), dec!(0.2), dec!(0.5), dec!(100_000), dec!(50_000));
        // (0.5-0.2)*100000/50000 = 0.6
        assert_eq!(cap.max_sell_btc.raw(), dec!(0.6));
    }

    #[test]
    fn rebalance_cap_trims_large_deviations() {
        let arbiter = InventoryArbiter::new(InventoryArbiterConfig { per_tick_rebalance_pct: dec!(0.01) });
        let cap = arbiter.capacity(dec!(0.9), dec!(0.1), dec!(0.5), dec!(100_000), dec!(50_000));
        // rebalance cap = 0.01*100000/50000 = 0.02, far below allocation band capacity
        assert_eq!(cap.max_buy_btc.raw(), dec!(0.02));
        assert_eq!(cap.max_sell_btc.raw(), dec!(0.02));
    }

    #[test]
    fn no_negative_capacity_when_within_band() {
        let arbiter = InventoryArbiter::new(InventoryArbiterConfig::default());
        let cap = arbiter.capacity(dec!(0.6), dec!(0.4), dec!(0.5), dec!(100_000), dec!(50_000));
        assert!(cap.max_buy_btc.raw() >= Decimal::ZERO);
        assert!(cap.max_sell_btc.raw() >= Decimal::ZERO);
    }
}
