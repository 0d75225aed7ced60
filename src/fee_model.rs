//! FeeModel — spec §4.1. Maps 30-day USD volume to a maker/taker fee
//! tier and the spacing math derived from it.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeTier {
    pub maker_bps: Decimal,
    pub taker_bps: Decimal,
}

impl FeeTier {
    pub fn rt_cost_bps(&self) -> Decimal {
        self.maker_bps + self.taker_bps
    }
}

/// Fixed fee schedule, spec §6. Each row is `(min_30d_volume_usd, maker_bps, taker_bps)`.
const SCHEDULE: &[(Decimal, Decimal, Decimal)] = &[
    (dec!(0), dec!(25), dec!(40)),
    (dec!(10_000), dec!(20), dec!(35)),
    (dec!(50_000), dec!(14), dec!(24)),
    (dec!(100_000), dec!(12), dec!(20)),
    (dec!(250_000), dec!(8), dec!(18)),
    (dec!(500_000), dec!(6), dec!(16)),
    (dec!(1_000_000), dec!(4), dec!(14)),
    (dec!(5_000_000), dec!(2), dec!(12)),
    (dec!(10_000_000), dec!(0), dec!(10)),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeModelConfig {
    pub adverse_selection_bps: Decimal,
    pub min_edge_bps: Decimal,
}

impl Default for FeeModelConfig {
    fn default() -> Self {
        Self {
            adverse_selection_bps: dec!(10),
            min_edge_bps: dec!(5),
        }
    }
}

pub struct FeeModel {
    config: FeeModelConfig,
}

impl FeeModel {
    pub fn new(config: FeeModelConfig) -> Self {
        Self { config }
    }

    /// Looks up the fee tier for a given trailing 30-day USD volume.
    /// The schedule is ordered ascending by threshold; the highest
    /// threshold not exceeding `volume` wins.
    pub fn fee_tier(&self, thirty_day_volume_usd: Decimal) -> FeeTier {
        let mut chosen = SCHEDULE[0];
        for row in SCHEDULE {
            if thirty_day_volume_usd >= row.0 {
                chosen = *row;
            } else {
                break;
            }
        }
        FeeTier { maker_bps: chosen.1, taker_bps: chosen.2 }
    }

    /// `2 × maker_bps + adverse_selection_bps + min_edge_bps`.
    pub fn min_profitable_spacing_bps(&self, thirty_day_volume_usd: Decimal) -> Decimal {
        let tier = self.fee_tier(thirty_day_volume_usd);
        dec!(2) * tier.maker_bps + self.config.adverse_selection_bps + self.config.min_edge_bps
    }

    /// `spacing_bps − rt_cost_bps − adverse_selection_bps`. Orders may
    /// only be emitted when this is strictly positive (spec §4.1).
    pub fn expected_net_edge_bps(&self, spacing_bps: Decimal, thirty_day_volume_usd: Decimal) -> Decimal {
        let tier = self.fee_tier(thirty_day_volume_usd);
        spacing_bps - tier.rt_cost_bps() - self.config.adverse_selection_bps
    }
}
