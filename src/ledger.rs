//! FifoLedger — spec §4.8. Owns all TaxLots and Disposals exclusively;
//! enforces strict FIFO consumption order (ascending `purchased_at`,
//! tie-broken by ascending `lot_id`) and never silently short-sells.

use crate::error::EngineError;
use crate::money::{Btc, Eur, Usd};
use chrono::{DateTime, Datelike, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotSource {
    Grid,
    Signal,
    Harvest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotStatus {
    Open,
    Partial,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxLot {
    pub lot_id: String,
    pub venue_order_id: String,
    pub venue_trade_id: String,
    pub source: LotSource,
    pub purchased_at: DateTime<Utc>,
    pub original_qty_btc: Btc,
    pub remaining_qty_btc: Btc,
    pub purchase_price_usd: Usd,
    pub purchase_total_usd: Usd,
    pub purchase_fee_usd: Usd,
    pub purchase_price_eur: Eur,
    pub purchase_total_eur: Eur,
    pub eur_usd_rate_at_purchase: Decimal,
}

impl TaxLot {
    pub fn tax_free_at(&self, holding_period: Duration) -> DateTime<Utc> {
        self.purchased_at + holding_period
    }

    pub fn status(&self) -> LotStatus {
        if self.remaining_qty_btc.is_zero() {
            LotStatus::Closed
        } else if self.remaining_qty_btc == self.original_qty_btc {
            LotStatus::Open
        } else {
            LotStatus::Partial
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.purchased_at
    }

    pub fn is_tax_free(&self, now: DateTime<Utc>, holding_period: Duration) -> bool {
        self.age(now) >= holding_period
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disposal {
    pub disposal_id: String,
    pub lot_id: String,
    pub disposed_at: DateTime<Utc>,
    pub qty_btc: Btc,
    pub sale_price_usd: Usd,
    pub sale_fee_usd_portion: Usd,
    pub eur_usd_rate_at_sale: Decimal,
    pub proceeds_eur: Eur,
    pub cost_basis_eur: Eur,
    pub gain_loss_eur: Eur,
    pub is_taxable: bool,
}

/// A fill normalized by `OrderManager` before it reaches the ledger.
#[derive(Debug, Clone)]
pub struct BuyFill {
    pub venue_order_id: String,
    pub venue_trade_id: String,
    pub source: LotSource,
    pub traded_at: DateTime<Utc>,
    pub qty_btc: Btc,
    pub price_usd: Usd,
    pub fee_usd: Usd,
    pub eur_usd_rate: Decimal,
}

#[derive(Debug, Clone)]
pub struct SellFill {
    pub traded_at: DateTime<Utc>,
    pub qty_btc: Btc,
    pub price_usd: Usd,
    pub fee_usd: Usd,
    pub eur_usd_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LedgerDocument {
    pub version: u32,
    pub lots: Vec<TaxLot>,
    pub disposals: Vec<Disposal>,
    pub ytd_cache: BTreeMap<i32, Decimal>,
}

pub const LEDGER_VERSION: u32 = 1;

pub struct FifoLedger {
    holding_period: Duration,
    lots: Vec<TaxLot>,
    disposals: Vec<Disposal>,
    ytd_cache: BTreeMap<i32, Decimal>,
    total_btc_cache: Option<Btc>,
}

impl FifoLedger {
    pub fn new(holding_period: Duration) -> Self {
        Self {
            holding_period,
            lots: Vec::new(),
            disposals: Vec::new(),
            ytd_cache: BTreeMap::new(),
            total_btc_cache: None,
        }
    }

    pub fn from_document(doc: LedgerDocument, holding_period: Duration) -> Self {
        Self {
            holding_period,
            lots: doc.lots,
            disposals: doc.disposals,
            ytd_cache: doc.ytd_cache,
            total_btc_cache: None,
        }
    }

    pub fn to_document(&self) -> LedgerDocument {
        LedgerDocument {
            version: LEDGER_VERSION,
            lots: self.lots.clone(),
            disposals: self.disposals.clone(),
            ytd_cache: self.ytd_cache.clone(),
        }
    }

    pub fn lots(&self) -> &[TaxLot] {
        &self.lots
    }

    pub fn disposals(&self) -> &[Disposal] {
        &self.disposals
    }

    fn invalidate_caches(&mut self) {
        self.total_btc_cache = None;
    }

    /// Appends a new lot from a buy fill. EUR fields are computed from
    /// `eur_usd_rate` (the rate valid at the purchase's UTC date).
    pub fn record_buy(&mut self, fill: BuyFill) -> &TaxLot {
        let purchase_total_usd = Usd::new(fill.price_usd.raw() * fill.qty_btc.raw()) + fill.fee_usd;
        let purchase_total_eur = Eur::new(purchase_total_usd.raw() / fill.eur_usd_rate);
        let purchase_price_eur = Eur::new(fill.price_usd.raw() / fill.eur_usd_rate);

        let lot = TaxLot {
            lot_id: Uuid::new_v4().to_string(),
            venue_order_id: fill.venue_order_id,
            venue_trade_id: fill.venue_trade_id,
            source: fill.source,
            purchased_at: fill.traded_at,
            original_qty_btc: fill.qty_btc,
            remaining_qty_btc: fill.qty_btc,
            purchase_price_usd: fill.price_usd,
            purchase_total_usd,
            purchase_fee_usd: fill.fee_usd,
            purchase_price_eur,
            purchase_total_eur,
            eur_usd_rate_at_purchase: fill.eur_usd_rate,
        };
        self.lots.push(lot);
        self.invalidate_caches();
        self.lots.last().unwrap()
    }

    /// Consumes oldest open lots in strict FIFO order (ascending
    /// `purchased_at`, tie-broken by ascending `lot_id`). Fails with
    /// `InsufficientLots` if demand exceeds open quantity — a sell is
    /// never allowed to silently proceed against short inventory.
    pub fn record_sell(&mut self, fill: SellFill) -> Result<Vec<Disposal>, EngineError> {
        let available = self.total_btc();
        if fill.qty_btc.raw() > available.raw() {
            return Err(EngineError::InsufficientLots {
                requested: fill.qty_btc.to_string(),
                available: available.to_string(),
            });
        }

        let mut open_indices: Vec<usize> = (0..self.lots.len())
            .filter(|&i| !self.lots[i].remaining_qty_btc.is_zero())
            .collect();
        open_indices.sort_by(|&a, &b| {
            self.lots[a]
                .purchased_at
                .cmp(&self.lots[b].purchased_at)
                .then_with(|| self.lots[a].lot_id.cmp(&self.lots[b].lot_id))
        });

        let mut remaining_to_sell = fill.qty_btc.raw();
        let mut disposals = Vec::new();

        for idx in open_indices {
            if remaining_to_sell <= Decimal::ZERO {
                break;
            }
            let lot = &mut self.lots[idx];
            let sell_portion = remaining_to_sell.min(lot.remaining_qty_btc.raw());
            if sell_portion <= Decimal::ZERO {
                continue;
            }

            let cost_proportion = sell_portion / lot.original_qty_btc.raw();
            let cost_basis_eur = Eur::new(cost_proportion * lot.purchase_total_eur.raw());
            let sale_fee_portion_usd = Usd::new(fill.fee_usd.raw() * sell_portion / fill.qty_btc.raw());
            let gross_proceeds_usd = fill.price_usd.raw() * sell_portion;
            let proceeds_eur = Eur::new((gross_proceeds_usd - sale_fee_portion_usd.raw()) / fill.eur_usd_rate);
            let gain_loss_eur = proceeds_eur - cost_basis_eur;
            let is_taxable = (fill.traded_at - lot.purchased_at) < self.holding_period;

            lot.remaining_qty_btc = lot.remaining_qty_btc - Btc::new(sell_portion);

            let disposal = Disposal {
                disposal_id: Uuid::new_v4().to_string(),
                lot_id: lot.lot_id.clone(),
                disposed_at: fill.traded_at,
                qty_btc: Btc::new(sell_portion),
                sale_price_usd: fill.price_usd,
                sale_fee_usd_portion: sale_fee_portion_usd,
                eur_usd_rate_at_sale: fill.eur_usd_rate,
                proceeds_eur,
                cost_basis_eur,
                gain_loss_eur,
                is_taxable,
            };

            if is_taxable {
                let year = fill.traded_at.year();
                *self.ytd_cache.entry(year).or_insert(Decimal::ZERO) += gain_loss_eur.raw();
            }

            disposals.push(disposal.clone());
            self.disposals.push(disposal);
            remaining_to_sell -= sell_portion;
        }

        self.invalidate_caches();
        Ok(disposals)
    }

    pub fn total_btc(&self) -> Btc {
        self.lots.iter().fold(Btc::ZERO, |acc, l| acc + l.remaining_qty_btc)
    }

    /// Sum of open quantities whose age is at least the holding period,
    /// as of `now`.
    pub fn tax_free_btc(&self, now: DateTime<Utc>) -> Btc {
        self.lots
            .iter()
            .filter(|l| l.is_tax_free(now, self.holding_period))
            .fold(Btc::ZERO, |acc, l| acc + l.remaining_qty_btc)
    }

    /// Open lots whose mark-to-market EUR proceeds would be less than
    /// their remaining cost basis.
    pub fn underwater_lots(&self, current_price_usd: Usd, current_eur_usd_rate: Decimal) -> Vec<(&TaxLot, Eur)> {
        self.lots
            .iter()
            .filter(|l| !l.remaining_qty_btc.is_zero())
            .filter_map(|l| {
                let remaining_cost_proportion = l.remaining_qty_btc.raw() / l.original_qty_btc.raw();
                let remaining_cost_basis_eur = Eur::new(remaining_cost_proportion * l.purchase_total_eur.raw());
                let mark_to_market_usd = current_price_usd.raw() * l.remaining_qty_btc.raw();
                let mark_to_market_eur = Eur::new(mark_to_market_usd / current_eur_usd_rate);
                let unrealized = mark_to_market_eur - remaining_cost_basis_eur;
                if unrealized.raw() < Decimal::ZERO {
                    Some((l, -unrealized))
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn ytd_realized_gain_eur(&self, year: i32) -> Eur {
        Eur::new(*self.ytd_cache.get(&year).unwrap_or(&Decimal::ZERO))
    }

    pub fn holding_period(&self) -> Duration {
        self.holding_period
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn one_year() -> Duration {
        Duration::days(365)
    }

    #[test]
    fn profitable_round_trip_scenario_1() {
        let mut ledger = FifoLedger::new(one_year());
        let now = Utc::now();
        ledger.record_buy(BuyFill {
            venue_order_id: "o1".into(),
            venue_trade_id: "t1".into(),
            source: LotSource::Grid,
            traded_at: now,
            qty_btc: Btc::new(dec!(0.01)),
            price_usd: Usd::new(dec!(50000)),
            fee_usd: Usd::new(dec!(0.50)),
            eur_usd_rate: dec!(1.10),
        });
        let lot = &ledger.lots()[0];
        assert_eq!(lot.purchase_total_eur.raw(), (dec!(0.01) * dec!(50000) + dec!(0.50)) / dec!(1.10));

        let disposals = ledger
            .record_sell(SellFill {
                traded_at: now,
                qty_btc: Btc::new(dec!(0.01)),
                price_usd: Usd::new(dec!(50500)),
                fee_usd: Usd::new(dec!(0.505)),
                eur_usd_rate: dec!(1.10),
            })
            .unwrap();
        assert_eq!(disposals.len(), 1);
        let d = &disposals[0];
        assert!(d.is_taxable);
        let gain = d.gain_loss_eur.raw();
        assert!((gain - dec!(3.63)).abs() < dec!(0.02));
    }

    #[test]
    fn haltefrist_unlock_scenario_2() {
        let mut ledger = FifoLedger::new(one_year());
        let now = Utc::now();
        let purchased_at = now - Duration::days(366);
        ledger.record_buy(BuyFill {
            venue_order_id: "o1".into(),
            venue_trade_id: "t1".into(),
            source: LotSource::Grid,
            traded_at: purchased_at,
            qty_btc: Btc::new(dec!(0.02)),
            price_usd: Usd::new(dec!(40000)),
            fee_usd: Usd::new(dec!(0.40)),
            eur_usd_rate: dec!(1.10),
        });
        let disposals = ledger
            .record_sell(SellFill {
                traded_at: now,
                qty_btc: Btc::new(dec!(0.02)),
                price_usd: Usd::new(dec!(50000)),
                fee_usd: Usd::new(dec!(0.50)),
                eur_usd_rate: dec!(1.10),
            })
            .unwrap();
        assert!(!disposals[0].is_taxable);
        assert_eq!(ledger.ytd_realized_gain_eur(now.year()).raw(), Decimal::ZERO);
    }

    #[test]
    fn holding_period_boundary_is_inclusive_at_365_days() {
        let mut ledger = FifoLedger::new(one_year());
        let now = Utc::now();
        let purchased_at = now - Duration::days(365);
        ledger.record_buy(BuyFill {
            venue_order_id: "o1".into(),
            venue_trade_id: "t1".into(),
            source: LotSource::Grid,
            traded_at: purchased_at,
            qty_btc: Btc::new(dec!(0.01)),
            price_usd: Usd::new(dec!(40000)),
            fee_usd: Usd::new(dec!(0.0)),
            eur_usd_rate: dec!(1.0),
        });
        assert!(ledger.lots()[0].is_tax_free(now, one_year()));
    }

    #[test]
    fn insufficient_lots_never_silently_short_sells() {
        let mut ledger = FifoLedger::new(one_year());
        let now = Utc::now();
        ledger.record_buy(BuyFill {
            venue_order_id: "o1".into(),
            venue_trade_id: "t1".into(),
            source: LotSource::Grid,
            traded_at: now,
            qty_btc: Btc::new(dec!(0.01)),
            price_usd: Usd::new(dec!(50000)),
            fee_usd: Usd::new(dec!(0)),
            eur_usd_rate: dec!(1.0),
        });
        let err = ledger
            .record_sell(SellFill {
                traded_at: now,
                qty_btc: Btc::new(dec!(0.02)),
                price_usd: Usd::new(dec!(50000)),
                fee_usd: Usd::new(dec!(0)),
                eur_usd_rate: dec!(1.0),
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientLots { .. }));
        assert_eq!(ledger.total_btc().raw(), dec!(0.01));
    }

    #[test]
    fn partial_sell_consumes_oldest_lot_partially() {
        let mut ledger = FifoLedger::new(one_year());
        let now = Utc::now();
        ledger.record_buy(BuyFill {
            venue_order_id: "o1".into(),
            venue_trade_id: "t1".into(),
            source: LotSource::Grid,
            traded_at: now - Duration::days(2),
            qty_btc: Btc::new(dec!(0.02)),
            price_usd: Usd::new(dec!(40000)),
            fee_usd: Usd::new(dec!(0)),
            eur_usd_rate: dec!(1.0),
        });
        ledger.record_buy(BuyFill {
            venue_order_id: "o2".into(),
            venue_trade_id: "t2".into(),
            source: LotSource::Grid,
            traded_at: now - Duration::days(1),
            qty_btc: Btc::new(dec!(0.02)),
            price_usd: Usd::new(dec!(45000)),
            fee_usd: Usd::new(dec!(0)),
            eur_usd_rate: dec!(1.0),
        });
        let disposals = ledger
            .record_sell(SellFill {
                traded_at: now,
                qty_btc: Btc::new(dec!(0.01)),
                price_usd: Usd::new(dec!(50000)),
                fee_usd: Usd::new(dec!(0)),
                eur_usd_rate: dec!(1.0),
            })
            .unwrap();
        assert_eq!(disposals.len(), 1);
        assert_eq!(ledger.lots()[0].remaining_qty_btc.raw(), dec!(0.01));
        assert_eq!(ledger.lots()[0].status(), LotStatus::Partial);
        assert_eq!(ledger.lots()[1].status(), LotStatus::Open);
    }

    #[test]
    fn cost_basis_proportionality_within_epsilon() {
        let mut ledger = FifoLedger::new(one_year());
        let now = Utc::now();
        ledger.record_buy(BuyFill {
            venue_order_id: "o1".into(),
            venue_trade_id: "t1".into(),
            source: LotSource::Grid,
            traded_at: now,
            qty_btc: Btc::new(dec!(0.03)),
            price_usd: Usd::new(dec!(40000)),
            fee_usd: Usd::new(dec!(1.2)),
            eur_usd_rate: dec!(1.1),
        });
        let disposals = ledger
            .record_sell(SellFill {
                traded_at: now,
                qty_btc: Btc::new(dec!(0.01)),
                price_usd: Usd::new(dec!(45000)),
                fee_usd: Usd::new(dec!(0.5)),
                eur_usd_rate: dec!(1.1),
            })
            .unwrap();
        let lot_total_eur = ledger.lots()[0].purchase_total_eur.raw();
        let ratio = disposals[0].cost_basis_eur.raw() / lot_total_eur;
        assert!((ratio - dec!(0.01) / dec!(0.03)).abs() < dec!(0.00000001));
    }

    #[test]
    fn emergency_override_records_taxable_gain_scenario_6() {
        let mut ledger = FifoLedger::new(one_year());
        let now = Utc::now();
        ledger.record_buy(BuyFill {
            venue_order_id: "o1".into(),
            venue_trade_id: "t1".into(),
            source: LotSource::Grid,
            traded_at: now - Duration::days(10),
            qty_btc: Btc::new(dec!(0.01)),
            price_usd: Usd::new(dec!(50000)),
            fee_usd: Usd::new(dec!(0)),
            eur_usd_rate: dec!(1.1),
        });
        let disposals = ledger
            .record_sell(SellFill {
                traded_at: now,
                qty_btc: Btc::new(dec!(0.01)),
                price_usd: Usd::new(dec!(45000)),
                fee_usd: Usd::new(dec!(0)),
                eur_usd_rate: dec!(1.1),
            })
            .unwrap();
        assert!(disposals[0].is_taxable);
    }
}
