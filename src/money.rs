//! Fixed-point money types. All monetary values are exact decimals —
//! never binary floats — per the two scales the engine has to keep
//! straight: USD/EUR to 2dp, BTC to 8dp.

use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

macro_rules! money_type {
    ($name:ident, $scale:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
        pub struct $name(Decimal);

        impl $name {
            pub const SCALE: u32 = $scale;
            pub const ZERO: $name = $name(Decimal::ZERO);

            pub fn new(d: Decimal) -> Self {
                $name(d.round_dp_with_strategy($scale, RoundingStrategy::MidpointAwayFromZero))
            }

            pub fn raw(self) -> Decimal {
                self.0
            }

            pub fn is_zero(self) -> bool {
                self.0.is_zero()
            }

            pub fn abs(self) -> Self {
                $name(self.0.abs())
            }

            pub fn max(self, other: Self) -> Self {
                if self.0 >= other.0 { self } else { other }
            }

            pub fn min(self, other: Self) -> Self {
                if self.0 <= other.0 { self } else { other }
            }
        }

        impl From<Decimal> for $name {
            fn from(d: Decimal) -> Self {
                $name::new(d)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Add for $name {
            type Output = $name;
            fn add(self, rhs: Self) -> $name {
                $name::new(self.0 + rhs.0)
            }
        }

        impl Sub for $name {
            type Output = $name;
            fn sub(self, rhs: Self) -> $name {
                $name::new(self.0 - rhs.0)
            }
        }

        impl Neg for $name {
            type Output = $name;
            fn neg(self) -> $name {
                $name::new(-self.0)
            }
        }

        impl Mul<Decimal> for $name {
            type Output = $name;
            fn mul(self, rhs: Decimal) -> $name {
                $name::new(self.0 * rhs)
            }
        }

        impl Div<Decimal> for $name {
            type Output = $name;
            fn div(self, rhs: Decimal) -> $name {
                $name::new(self.0 / rhs)
            }
        }
    };
}

money_type!(Usd, 2);
money_type!(Eur, 2);
money_type!(Btc, 8);

/// Epsilon comparisons per spec §4.11: one venue tick for price, one
/// BTC lot step for quantity. Comparisons elsewhere use a fixed small
/// epsilon to absorb decimal rounding noise.
pub const MONEY_EPSILON: Decimal = dec!(0.00000001);

/// Price tick for XBT/USD (spec §3). Venue-defined; kept as a constant
/// because this engine is single-venue/single-pair by design.
pub const DEFAULT_TICK_USD: Decimal = dec!(0.1);

/// Minimum order size in BTC (spec §4.6).
pub const MIN_ORDER_BTC: Decimal = dec!(0.0001);

/// BTC lot step used for quantity rounding (spec §4.11's `qty_eps`).
pub const BTC_LOT_STEP: Decimal = dec!(0.00000001);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Round a price down to the nearest tick (buys must never cross up).
pub fn round_price_down(price: Decimal, tick: Decimal) -> Decimal {
    if tick.is_zero() {
        return price;
    }
    (price / tick).floor() * tick
}

/// Round a price up to the nearest tick (sells must never cross down).
pub fn round_price_up(price: Decimal, tick: Decimal) -> Decimal {
    if tick.is_zero() {
        return price;
    }
    (price / tick).ceil() * tick
}

/// Round a BTC quantity down to the venue lot step.
pub fn round_qty_down(qty: Decimal, lot_step: Decimal) -> Decimal {
    if lot_step.is_zero() {
        return qty;
    }
    (qty / lot_step).floor() * lot_step
}
