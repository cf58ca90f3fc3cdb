use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The side that closes a position opened on this side.
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for OrderSide {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" | "long" | "bid" => Ok(OrderSide::Buy),
            "sell" | "short" | "ask" => Ok(OrderSide::Sell),
            _ => Err("invalid side; expected buy|sell"),
        }
    }
}

/// Canonical order status across venues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Resting on the book
    Open,
    /// Some quantity executed, remainder resting
    PartiallyFilled,
    /// Fully executed
    Filled,
    /// Cancelled or expired (may carry a nonzero partial fill)
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Open => "OPEN",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// What we want to do this cycle; created fresh per open attempt.
#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub client_order_id: String,
    pub contract_id: String,
    pub quantity: Decimal,
    pub side: OrderSide,
}

impl OrderIntent {
    pub fn new(contract_id: &str, quantity: Decimal, side: OrderSide) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            contract_id: contract_id.to_string(),
            quantity,
            side,
        }
    }
}

/// Synchronous result of an order placement or cancel. Immutable once built.
#[derive(Debug, Clone)]
pub struct OrderOutcome {
    pub success: bool,
    pub order_id: String,
    pub side: Option<OrderSide>,
    pub size: Decimal,
    pub price: Decimal,
    pub status: Option<OrderStatus>,
    pub filled_size: Decimal,
    pub error: Option<String>,
}

impl OrderOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: String::new(),
            side: None,
            size: Decimal::ZERO,
            price: Decimal::ZERO,
            status: None,
            filled_size: Decimal::ZERO,
            error: Some(message.into()),
        }
    }

    pub fn is_filled(&self) -> bool {
        self.status == Some(OrderStatus::Filled)
    }
}

/// Asynchronous order update delivered over a venue's push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    pub side: OrderSide,
    pub size: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
    pub filled_size: Decimal,
}

/// Snapshot of an order currently resting on the venue.
#[derive(Debug, Clone)]
pub struct ActiveOrder {
    pub order_id: String,
    pub side: OrderSide,
    pub size: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
    pub filled_size: Decimal,
}

/// A close order the engine is waiting on. Added when a leg opens, removed
/// on fill or cancel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedClose {
    pub id: String,
    pub price: Decimal,
    pub size: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn side_parsing_and_opposite() {
        assert_eq!("buy".parse::<OrderSide>().unwrap(), OrderSide::Buy);
        assert_eq!("SELL".parse::<OrderSide>().unwrap(), OrderSide::Sell);
        assert_eq!("Bid".parse::<OrderSide>().unwrap(), OrderSide::Buy);
        assert!("hold".parse::<OrderSide>().is_err());
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn status_terminality() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Open.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn failure_outcome_carries_message() {
        let outcome = OrderOutcome::failure("no liquidity");
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("no liquidity"));
        assert_eq!(outcome.filled_size, dec!(0));
    }

    #[test]
    fn intents_get_unique_client_ids() {
        let a = OrderIntent::new("BTC_USDC_PERP", dec!(0.1), OrderSide::Buy);
        let b = OrderIntent::new("BTC_USDC_PERP", dec!(0.1), OrderSide::Buy);
        assert_ne!(a.client_order_id, b.client_order_id);
    }
}
