//! Aster REST client. The venue speaks a Binance-futures-compatible
//! protocol: signed query strings, `X-MBX-APIKEY`, numeric error codes in
//! the response body.

use reqwest::{Client, Method, Response, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::domain::{ActiveOrder, OrderSide, OrderStatus};
use crate::error::{GridError, Result};
use crate::signing::QuerySigner;

const DEFAULT_BASE_URL: &str = "https://fapi.asterdex.com";

// Venue error codes carried in the JSON body.
const CODE_UNKNOWN_ORDER: i64 = -2011;
const CODE_ORDER_NOT_FOUND: i64 = -2013;
const CODE_POST_ONLY_REJECT: i64 = -5022;

#[derive(Debug, Deserialize)]
struct VenueError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

fn parse_status(raw: &str) -> Result<OrderStatus> {
    match raw {
        "NEW" => Ok(OrderStatus::Open),
        "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
        "FILLED" => Ok(OrderStatus::Filled),
        "CANCELED" | "EXPIRED" => Ok(OrderStatus::Cancelled),
        other => Err(GridError::Protocol(format!("Unknown order status: {}", other))),
    }
}

fn parse_side(raw: &str) -> Result<OrderSide> {
    match raw {
        "BUY" => Ok(OrderSide::Buy),
        "SELL" => Ok(OrderSide::Sell),
        other => Err(GridError::Protocol(format!("Unknown order side: {}", other))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    side: String,
    orig_qty: Decimal,
    price: Decimal,
    status: String,
    #[serde(default)]
    executed_qty: Decimal,
}

impl OrderResponse {
    fn into_active(self) -> Result<ActiveOrder> {
        Ok(ActiveOrder {
            order_id: self.order_id.to_string(),
            side: parse_side(&self.side)?,
            size: self.orig_qty,
            price: self.price,
            status: parse_status(&self.status)?,
            filled_size: self.executed_qty,
        })
    }
}

#[derive(Debug, Deserialize)]
struct DepthResponse {
    bids: Vec<(Decimal, Decimal)>,
    asks: Vec<(Decimal, Decimal)>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRisk {
    symbol: String,
    position_amt: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListenKeyResponse {
    listen_key: String,
}

pub struct AsterRest {
    http: Client,
    base_url: String,
    signer: QuerySigner,
}

impl AsterRest {
    pub fn new(signer: QuerySigner, base_url: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            signer,
        })
    }

    async fn check(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            return Err(GridError::RateLimited(body));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GridError::Auth(body));
        }

        if let Ok(venue) = serde_json::from_str::<VenueError>(&body) {
            match venue.code {
                CODE_POST_ONLY_REJECT => return Err(GridError::PostOnlyRejected(venue.msg)),
                CODE_UNKNOWN_ORDER | CODE_ORDER_NOT_FOUND => {
                    return Err(GridError::Transport {
                        status: 404,
                        body: venue.msg,
                    })
                }
                _ => {}
            }
        }

        Err(GridError::Transport {
            status: status.as_u16(),
            body,
        })
    }

    async fn signed(&self, method: Method, path: &str, query: &str) -> Result<Response> {
        let signed_query = self.signer.signed_query(query)?;
        let response = self
            .http
            .request(method, format!("{}{}?{}", self.base_url, path, signed_query))
            .headers(self.signer.api_key_header()?)
            .send()
            .await?;
        self.check(response).await
    }

    pub async fn best_bid_ask(&self, symbol: &str) -> Result<(Decimal, Decimal)> {
        let response = self
            .http
            .get(format!("{}/fapi/v1/depth", self.base_url))
            .query(&[("symbol", symbol), ("limit", "5")])
            .send()
            .await?;
        let depth: DepthResponse = self.check(response).await?.json().await?;

        // Bids arrive best-first, asks best-first as well.
        let best_bid = depth
            .bids
            .first()
            .map(|(price, _)| *price)
            .ok_or_else(|| GridError::Protocol("Empty bid book".to_string()))?;
        let best_ask = depth
            .asks
            .first()
            .map(|(price, _)| *price)
            .ok_or_else(|| GridError::Protocol("Empty ask book".to_string()))?;

        Ok((best_bid, best_ask))
    }

    /// Submit a limit order. `post_only` maps to `GTX` time-in-force, which
    /// the venue rejects (never crosses) when it would execute as taker.
    pub async fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        post_only: bool,
    ) -> Result<ActiveOrder> {
        let tif = if post_only { "GTX" } else { "GTC" };
        let side_str = match side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };
        debug!(
            "Submitting {} {} {}@{} tif={}",
            side_str, symbol, quantity, price, tif
        );

        let query = format!(
            "symbol={}&side={}&type=LIMIT&timeInForce={}&quantity={}&price={}&newOrderRespType=RESULT",
            symbol, side_str, tif, quantity, price
        );
        let response = self.signed(Method::POST, "/fapi/v1/order", &query).await?;
        let order = response.json::<OrderResponse>().await?.into_active()?;

        // A GTX order that would cross comes back already expired.
        if post_only && order.status == OrderStatus::Cancelled {
            return Err(GridError::PostOnlyRejected(
                "GTX order expired on entry".to_string(),
            ));
        }
        Ok(order)
    }

    pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<bool> {
        let query = format!("symbol={}&orderId={}", symbol, order_id);
        match self.signed(Method::DELETE, "/fapi/v1/order", &query).await {
            Ok(_) => Ok(true),
            Err(GridError::Transport { status: 404, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn query_order(&self, symbol: &str, order_id: &str) -> Result<Option<ActiveOrder>> {
        let query = format!("symbol={}&orderId={}", symbol, order_id);
        match self.signed(Method::GET, "/fapi/v1/order", &query).await {
            Ok(response) => Ok(Some(response.json::<OrderResponse>().await?.into_active()?)),
            Err(GridError::Transport { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn open_orders(&self, symbol: &str) -> Result<Vec<ActiveOrder>> {
        let query = format!("symbol={}", symbol);
        let response = self.signed(Method::GET, "/fapi/v1/openOrders", &query).await?;
        let orders: Vec<OrderResponse> = response.json().await?;
        orders.into_iter().map(OrderResponse::into_active).collect()
    }

    pub async fn position(&self, symbol: &str) -> Result<Decimal> {
        let query = format!("symbol={}", symbol);
        let response = self
            .signed(Method::GET, "/fapi/v2/positionRisk", &query)
            .await?;
        let positions: Vec<PositionRisk> = response.json().await?;

        Ok(positions
            .into_iter()
            .filter(|p| p.symbol == symbol)
            .map(|p| p.position_amt)
            .sum())
    }

    /// Create a user-data-stream listen key. Key auth only, no signature.
    pub async fn create_listen_key(&self) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/fapi/v1/listenKey", self.base_url))
            .headers(self.signer.api_key_header()?)
            .send()
            .await?;
        let key: ListenKeyResponse = self.check(response).await?.json().await?;
        Ok(key.listen_key)
    }

    /// Keep the listen key alive; the venue expires idle keys after an hour.
    pub async fn keepalive_listen_key(&self) -> Result<()> {
        let response = self
            .http
            .put(format!("{}/fapi/v1/listenKey", self.base_url))
            .headers(self.signer.api_key_header()?)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn status_mapping_folds_canceled_and_expired() {
        assert_eq!(parse_status("NEW").unwrap(), OrderStatus::Open);
        assert_eq!(parse_status("CANCELED").unwrap(), OrderStatus::Cancelled);
        assert_eq!(parse_status("EXPIRED").unwrap(), OrderStatus::Cancelled);
        assert!(parse_status("REJECTED").is_err());
    }

    #[test]
    fn order_response_converts_numeric_id() {
        let order = OrderResponse {
            order_id: 987654,
            side: "SELL".to_string(),
            orig_qty: dec!(0.5),
            price: dec!(101.5),
            status: "NEW".to_string(),
            executed_qty: dec!(0),
        };
        let active = order.into_active().unwrap();
        assert_eq!(active.order_id, "987654");
        assert_eq!(active.side, OrderSide::Sell);
        assert_eq!(active.status, OrderStatus::Open);
    }
}
