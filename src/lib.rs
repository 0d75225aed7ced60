//! `mm-engine-rs` — a single-venue, single-pair spot market-making
//! engine with a built-in German §23 EStG FIFO tax ledger gating every
//! sell decision. `main.rs` is a thin CLI composition root over this
//! library; see `SPEC_FULL.md` for the module/component map.

pub mod config;
pub mod error;
pub mod exchange;
pub mod fee_model;
pub mod grid;
pub mod inventory;
pub mod ledger;
pub mod lifecycle;
pub mod money;
pub mod notify;
pub mod order_manager;
pub mod persistence;
pub mod rate_limiter;
pub mod rates;
pub mod regime;
pub mod report;
pub mod risk;
pub mod skew;
pub mod spacing;
pub mod strategy;
pub mod tax_agent;
