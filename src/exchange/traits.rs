use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio::sync::mpsc::UnboundedSender;

use crate::domain::{ActiveOrder, OrderIntent, OrderOutcome, OrderSide, OrderUpdate};
use crate::error::{GridError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    Backpack,
    Aster,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backpack => "backpack",
            Self::Aster => "aster",
        }
    }
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "backpack" | "bp" => Ok(Self::Backpack),
            "aster" => Ok(Self::Aster),
            _ => Err("invalid exchange; expected backpack|aster"),
        }
    }
}

pub fn parse_exchange_kind(raw: &str) -> Result<ExchangeKind> {
    ExchangeKind::from_str(raw).map_err(|e| GridError::Validation(e.to_string()))
}

/// Uniform capability contract over one venue's protocol client.
///
/// Implementations must validate credentials at construction, keep
/// `connect`/`disconnect` idempotent, and have `connect` return only after
/// the push subscription is acknowledged. Update delivery to the registered
/// channel is serialized: one listener task owns the sender.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn kind(&self) -> ExchangeKind;

    fn tick_size(&self) -> Decimal;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Place a post-only open order one tick inside the touch. Post-only
    /// rejections are re-quoted and retried internally up to a bounded
    /// count; any other venue error resolves to a failed outcome rather
    /// than an `Err`.
    async fn place_open_order(&self, intent: &OrderIntent) -> Result<OrderOutcome>;

    /// Place a close order at the caller-supplied price, verbatim.
    async fn place_close_order(
        &self,
        contract_id: &str,
        quantity: Decimal,
        price: Decimal,
        side: OrderSide,
    ) -> Result<OrderOutcome>;

    /// Best-effort cancel; `Ok(false)` means the venue no longer knows the
    /// order (already filled or expired).
    async fn cancel_order(&self, order_id: &str) -> Result<bool>;

    async fn query_order(&self, order_id: &str) -> Result<Option<ActiveOrder>>;

    async fn query_active_orders(&self, contract_id: &str) -> Result<Vec<ActiveOrder>>;

    /// Signed net position for the contract (positive long, negative short).
    async fn query_position(&self, contract_id: &str) -> Result<Decimal>;

    async fn best_bid_ask(&self, contract_id: &str) -> Result<(Decimal, Decimal)>;

    /// Register the engine's update channel. Exactly one channel per
    /// session; must be called before `connect`.
    fn register_update_channel(&self, tx: UnboundedSender<OrderUpdate>);

    fn is_connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_exchange_kind_accepts_aliases() {
        assert_eq!(
            parse_exchange_kind("backpack").expect("backpack should parse"),
            ExchangeKind::Backpack
        );
        assert_eq!(
            parse_exchange_kind("bp").expect("bp alias should parse"),
            ExchangeKind::Backpack
        );
        assert_eq!(
            parse_exchange_kind("Aster").expect("aster should parse"),
            ExchangeKind::Aster
        );
    }

    #[test]
    fn parse_exchange_kind_rejects_unknown_value() {
        assert!(parse_exchange_kind("edgex").is_err());
    }
}
