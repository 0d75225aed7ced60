//! `EurUsdRates` — spec §6. Fetching the daily rate is out of scope;
//! the core only consumes this lookup interface. Real implementations
//! should use the ECB daily reference rate, falling back to the
//! previous business day on weekends/holidays.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

#[async_trait]
pub trait EurUsdRates: Send + Sync {
    async fn rate_for(&self, date_utc: NaiveDate) -> Option<Decimal>;
}

/// Static-table test double: holds a fixed rate table and falls back to
/// the previous business day, matching the real ECB-backed
/// implementation's contract without requiring network access.
pub struct StaticEurUsdRates {
    table: BTreeMap<NaiveDate, Decimal>,
    fallback: Option<Decimal>,
}

impl StaticEurUsdRates {
    pub fn new(table: BTreeMap<NaiveDate, Decimal>) -> Self {
        Self { table, fallback: None }
    }

    /// A single flat rate for every date, useful for scenario tests
    /// that don't care about the ECB calendar.
    pub fn constant(rate: Decimal) -> Self {
        Self { table: BTreeMap::new(), fallback: Some(rate) }
    }
}

#[async_trait]
impl EurUsdRates for StaticEurUsdRates {
    async fn rate_for(&self, date_utc: NaiveDate) -> Option<Decimal> {
        if let Some(rate) = self.table.get(&date_utc) {
            return Some(*rate);
        }
        // Walk backward to the previous business day present in the
        // table, mirroring the weekend/holiday fallback rule.
        self.table.range(..date_utc).next_back().map(|(_, r)| *r).or(self.fallback)
    }
}
