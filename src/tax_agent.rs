//! TaxAgent — spec §4.9. Gates every sell decision against the FIFO
//! ledger: Freigrenze enforcement, near-threshold protection, and the
//! sell-level harvesting recommender. Holds only a read-only handle to
//! the ledger plus a cached `sellable_ratio`.

use crate::ledger::{FifoLedger, TaxLot};
use crate::money::{Btc, Eur, Usd};
use chrono::{DateTime, Datelike, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxAgentConfig {
    pub holding_period_days: i64,
    pub near_threshold_days: i64,
    pub annual_exemption_eur: Eur,
    pub emergency_dd_override_pct: Decimal,
    pub harvest_enabled: bool,
    pub harvest_min_loss_eur: Eur,
    pub harvest_max_per_day: usize,
    pub harvest_target_net_eur: Eur,
}

impl Default for TaxAgentConfig {
    fn default() -> Self {
        Self {
            holding_period_days: 365,
            near_threshold_days: 330,
            annual_exemption_eur: Eur::new(dec!(1000)),
            emergency_dd_override_pct: dec!(0.20),
            harvest_enabled: true,
            harvest_min_loss_eur: Eur::new(dec!(10)),
            harvest_max_per_day: 3,
            harvest_target_net_eur: Eur::new(dec!(0)),
        }
    }
}

impl TaxAgentConfig {
    pub fn holding_period(&self) -> Duration {
        Duration::days(self.holding_period_days)
    }

    pub fn near_threshold(&self) -> Duration {
        Duration::days(self.near_threshold_days)
    }

    /// The age below which a lot is NOT "near threshold protected" —
    /// i.e. still eligible to be counted toward taxable sell simulation
    /// or harvested. Spec §4.9 step 4: exclude lots with
    /// `age ∈ [near_threshold_days, holding_period)`.
    fn protected_band(&self) -> (Duration, Duration) {
        (Duration::days(self.near_threshold_days), self.holding_period())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow,
    AllowPartial { max_qty: Btc },
    AllowAll,
    Veto,
}

pub struct HarvestRecommendation {
    pub lot_id: String,
    pub qty_btc: Btc,
    pub estimated_loss_eur: Eur,
}

pub struct TaxAgent {
    config: TaxAgentConfig,
}

impl TaxAgent {
    pub fn new(config: TaxAgentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TaxAgentConfig {
        &self.config
    }

    fn is_protected(&self, lot: &TaxLot, now: DateTime<Utc>) -> bool {
        let (lo, hi) = self.config.protected_band();
        let age = lot.age(now);
        age >= lo && age < hi
    }

    /// spec §4.9 `evaluate_sell`. `current_price_usd`/`eur_usd_rate` quote
    /// the prospective sale so the simulated FIFO consumption can project
    /// this sale's own gain, not just already-realized YTD gain — a sell
    /// of an old, deep-in-the-money lot can cross the Freigrenze on its
    /// own even when today's YTD total so far is zero.
    pub fn evaluate_sell(
        &self,
        ledger: &FifoLedger,
        qty: Btc,
        now: DateTime<Utc>,
        current_dd_pct: Decimal,
        current_price_usd: Usd,
        eur_usd_rate: Decimal,
    ) -> Decision {
        if current_dd_pct >= self.config.emergency_dd_override_pct {
            return Decision::AllowAll;
        }

        let tax_free_qty = ledger.tax_free_btc(now);
        if tax_free_qty.raw() >= qty.raw() {
            return Decision::Allow;
        }

        let need_from_taxable = qty - tax_free_qty;

        let mut taxable_open: Vec<&TaxLot> = ledger
            .lots()
            .iter()
            .filter(|l| !l.remaining_qty_btc.is_zero())
            .filter(|l| !l.is_tax_free(now, self.config.holding_period()))
            .filter(|l| !self.is_protected(l, now))
            .collect();
        taxable_open.sort_by(|a, b| a.purchased_at.cmp(&b.purchased_at).then_with(|| a.lot_id.cmp(&b.lot_id)));

        let current_ytd = ledger.ytd_realized_gain_eur(now.year());
        let exemption = self.config.annual_exemption_eur;

        let mut remaining_to_source = need_from_taxable.raw();
        let mut projected_gain = Decimal::ZERO;
        let mut sourced = Decimal::ZERO;

        for lot in &taxable_open {
            if remaining_to_source <= Decimal::ZERO {
                break;
            }
            let portion = remaining_to_source.min(lot.remaining_qty_btc.raw());
            if portion <= Decimal::ZERO {
                continue;
            }
            let cost_proportion = portion / lot.original_qty_btc.raw();
            let cost_basis_eur = cost_proportion * lot.purchase_total_eur.raw();
            let proceeds_eur = portion * current_price_usd.raw() / eur_usd_rate;
            let lot_gain = proceeds_eur - cost_basis_eur;
            let headroom = exemption.raw() - (current_ytd.raw() + projected_gain);

            if lot_gain <= Decimal::ZERO || lot_gain <= headroom {
                // Whole portion fits: either it is a loss/breakeven (never
                // pushes YTD up) or its gain still leaves room under the
                // exemption.
                projected_gain += lot_gain;
                sourced += portion;
                remaining_to_source -= portion;
            } else if headroom > Decimal::ZERO {
                // This lot alone would cross the Freigrenze; take only the
                // fraction of it that lands exactly at the exemption
                // (linear in qty since cost basis and proceeds both scale
                // with portion), then stop — FIFO order forbids skipping
                // ahead to a later, smaller-gain lot.
                let gain_per_unit = lot_gain / portion;
                let max_portion = (headroom / gain_per_unit).min(portion);
                if max_portion > Decimal::ZERO {
                    projected_gain += gain_per_unit * max_portion;
                    sourced += max_portion;
                }
                break;
            } else {
                break;
            }
        }

        if sourced >= need_from_taxable.raw() {
            return Decision::Allow;
        }

        let total_allowed = tax_free_qty.raw() + sourced;
        if total_allowed > Decimal::ZERO {
            return Decision::AllowPartial { max_qty: Btc::new(total_allowed) };
        }

        Decision::Veto
    }

    /// spec §4.9: `clamp(tax_free_btc / max(total_btc, eps), 0, 1)`.
    pub fn sellable_ratio(&self, ledger: &FifoLedger, now: DateTime<Utc>) -> Decimal {
        let total = ledger.total_btc().raw();
        let eps = dec!(0.00000001);
        let ratio = ledger.tax_free_btc(now).raw() / total.max(eps);
        ratio.clamp(Decimal::ZERO, Decimal::ONE)
    }

    /// Maps `sellable_ratio` to the fraction of configured sell levels
    /// to keep active this tick.
    pub fn sell_level_fraction(&self, ratio: Decimal) -> Decimal {
        if ratio >= dec!(0.8) {
            Decimal::ONE
        } else if ratio >= dec!(0.5) {
            dec!(0.6)
        } else if ratio >= dec!(0.2) {
            dec!(0.2)
        } else {
            Decimal::ZERO
        }
    }

    /// spec §4.9 `recommend_harvest`. Only runs when harvesting is
    /// enabled and the ledger has a positive YTD realized gain to offset.
    pub fn recommend_harvest(&self, ledger: &FifoLedger, current_price_usd: Usd, eur_usd_rate: Decimal, now: DateTime<Utc>) -> Vec<HarvestRecommendation> {
        if !self.config.harvest_enabled {
            return Vec::new();
        }
        let ytd = ledger.ytd_realized_gain_eur(now.year());
        if ytd.raw() <= Decimal::ZERO {
            return Vec::new();
        }

        let mut underwater = ledger.underwater_lots(current_price_usd, eur_usd_rate);
        underwater.sort_by(|a, b| b.1.raw().cmp(&a.1.raw())); // largest loss first

        let mut recs = Vec::new();
        let mut projected_net = ytd.raw();

        for (lot, loss) in underwater {
            if recs.len() >= self.config.harvest_max_per_day {
                break;
            }
            if loss.raw() < self.config.harvest_min_loss_eur.raw() {
                continue;
            }
            if self.is_protected(lot, now) {
                continue; // spec §12.1: near-threshold protection applies to forced harvests too
            }
            if projected_net <= self.config.harvest_target_net_eur.raw() {
                break;
            }
            recs.push(HarvestRecommendation {
                lot_id: lot.lot_id.clone(),
                qty_btc: lot.remaining_qty_btc,
                estimated_loss_eur: loss,
            });
            projected_net -= loss.raw();
        }
        recs
    }
}
