//! Automated grid trading for perpetual futures.
//!
//! The engine opens maker legs in one configured direction, pairs every
//! fill with a take-profit close order, and keeps its view of the grid
//! reconciled against the venue. Venues plug in behind the
//! [`ExchangeAdapter`](exchange::ExchangeAdapter) trait.

pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod retry;
pub mod signing;

pub use config::{AppSettings, ExchangeCredentials, TradingConfig};
pub use engine::TradingEngine;
pub use error::{GridError, Result};
pub use exchange::{build_adapter, parse_exchange_kind, ExchangeAdapter, ExchangeKind};
pub use retry::RetryPolicy;
