//! Backpack REST client (signed with the instruction scheme).

use reqwest::{Client, Method, Response, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::domain::{ActiveOrder, OrderSide, OrderStatus};
use crate::error::{GridError, Result};
use crate::signing::InstructionSigner;

const DEFAULT_BASE_URL: &str = "https://api.backpack.exchange";

/// Compose the instruction string to sign: the instruction name followed by
/// the request parameters in ascending key order.
fn instruction_with(instruction: &str, params: &[(&str, String)]) -> String {
    let mut sorted: Vec<_> = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let mut out = instruction.to_string();
    for (key, value) in sorted {
        out.push('&');
        out.push_str(key);
        out.push('=');
        out.push_str(&value);
    }
    out
}

fn parse_side(raw: &str) -> Result<OrderSide> {
    match raw {
        "Bid" => Ok(OrderSide::Buy),
        "Ask" => Ok(OrderSide::Sell),
        other => Err(GridError::Protocol(format!("Unknown order side: {}", other))),
    }
}

fn wire_side(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "Bid",
        OrderSide::Sell => "Ask",
    }
}

fn parse_status(raw: &str) -> Result<OrderStatus> {
    match raw {
        "New" | "TriggerPending" => Ok(OrderStatus::Open),
        "PartiallyFilled" => Ok(OrderStatus::PartiallyFilled),
        "Filled" => Ok(OrderStatus::Filled),
        "Cancelled" | "Expired" => Ok(OrderStatus::Cancelled),
        other => Err(GridError::Protocol(format!("Unknown order status: {}", other))),
    }
}

#[derive(Debug, Deserialize)]
struct DepthResponse {
    bids: Vec<(Decimal, Decimal)>,
    asks: Vec<(Decimal, Decimal)>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitOrderRequest<'a> {
    symbol: &'a str,
    side: &'static str,
    order_type: &'static str,
    quantity: Decimal,
    price: Decimal,
    time_in_force: &'static str,
    post_only: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    id: String,
    side: String,
    quantity: Decimal,
    price: Decimal,
    status: String,
    #[serde(default)]
    executed_quantity: Decimal,
}

impl OrderResponse {
    fn into_active(self) -> Result<ActiveOrder> {
        Ok(ActiveOrder {
            order_id: self.id,
            side: parse_side(&self.side)?,
            size: self.quantity,
            price: self.price,
            status: parse_status(&self.status)?,
            filled_size: self.executed_quantity,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionResponse {
    symbol: String,
    net_quantity: Decimal,
}

pub struct BackpackRest {
    http: Client,
    base_url: String,
    signer: InstructionSigner,
}

impl BackpackRest {
    pub fn new(signer: InstructionSigner, base_url: Option<String>) -> Result<Self> {
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
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GridError::RateLimited(body));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GridError::Auth(body));
        }
        // Backpack reports a maker-crossing reject in the error body.
        if body.contains("POST_ONLY") || body.contains("would match") {
            return Err(GridError::PostOnlyRejected(body));
        }
        Err(GridError::Transport {
            status: status.as_u16(),
            body,
        })
    }

    async fn signed(
        &self,
        method: Method,
        path: &str,
        instruction: &str,
        params: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Response> {
        let headers = self
            .signer
            .build_headers(&instruction_with(instruction, params))?;

        let mut request = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .headers(headers);
        if !params.is_empty() && body.is_none() {
            let pairs: Vec<(&str, &str)> =
                params.iter().map(|(k, v)| (*k, v.as_str())).collect();
            request = request.query(&pairs);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        self.check(response).await
    }

    /// Best bid and ask from the public depth endpoint.
    pub async fn best_bid_ask(&self, symbol: &str) -> Result<(Decimal, Decimal)> {
        let response = self
            .http
            .get(format!("{}/api/v1/depth", self.base_url))
            .query(&[("symbol", symbol)])
            .send()
            .await?;
        let depth: DepthResponse = self.check(response).await?.json().await?;

        let best_bid = depth
            .bids
            .iter()
            .map(|(price, _)| *price)
            .max()
            .ok_or_else(|| GridError::Protocol("Empty bid book".to_string()))?;
        let best_ask = depth
            .asks
            .iter()
            .map(|(price, _)| *price)
            .min()
            .ok_or_else(|| GridError::Protocol("Empty ask book".to_string()))?;

        Ok((best_bid, best_ask))
    }

    /// Submit a limit order. `post_only` opens use maker-only semantics; close
    /// orders go through as plain limit orders.
    pub async fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        post_only: bool,
    ) -> Result<ActiveOrder> {
        let payload = SubmitOrderRequest {
            symbol,
            side: wire_side(side),
            order_type: "Limit",
            quantity,
            price,
            time_in_force: "GTC",
            post_only,
        };
        debug!(
            "Submitting {} {} {}@{} post_only={}",
            payload.side, symbol, quantity, price, post_only
        );

        let params = [
            ("orderType", "Limit".to_string()),
            ("postOnly", post_only.to_string()),
            ("price", price.to_string()),
            ("quantity", quantity.to_string()),
            ("side", wire_side(side).to_string()),
            ("symbol", symbol.to_string()),
            ("timeInForce", "GTC".to_string()),
        ];
        let response = self
            .signed(
                Method::POST,
                "/api/v1/order",
                "orderExecute",
                &params,
                Some(serde_json::to_value(&payload)?),
            )
            .await?;

        response.json::<OrderResponse>().await?.into_active()
    }

    /// Cancel by venue order id. `Ok(false)` when the venue no longer knows
    /// the order.
    pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<bool> {
        let params = [
            ("orderId", order_id.to_string()),
            ("symbol", symbol.to_string()),
        ];
        let body = serde_json::json!({ "symbol": symbol, "orderId": order_id });
        match self
            .signed(
                Method::DELETE,
                "/api/v1/order",
                "orderCancel",
                &params,
                Some(body),
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(GridError::Transport { status: 404, .. }) => Ok(false),
            Err(GridError::Transport { status: 400, body })
                if body.contains("RESOURCE_NOT_FOUND") =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn query_order(&self, symbol: &str, order_id: &str) -> Result<Option<ActiveOrder>> {
        let params = [
            ("orderId", order_id.to_string()),
            ("symbol", symbol.to_string()),
        ];
        match self
            .signed(Method::GET, "/api/v1/order", "orderQuery", &params, None)
            .await
        {
            Ok(response) => Ok(Some(response.json::<OrderResponse>().await?.into_active()?)),
            Err(GridError::Transport { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn open_orders(&self, symbol: &str) -> Result<Vec<ActiveOrder>> {
        let params = [("symbol", symbol.to_string())];
        let response = self
            .signed(
                Method::GET,
                "/api/v1/orders",
                "orderQueryAll",
                &params,
                None,
            )
            .await?;

        let orders: Vec<OrderResponse> = response.json().await?;
        orders.into_iter().map(OrderResponse::into_active).collect()
    }

    /// Signed net position for the symbol; flat positions are simply absent
    /// from the venue response.
    pub async fn position(&self, symbol: &str) -> Result<Decimal> {
        let response = self
            .signed(Method::GET, "/api/v1/position", "positionQuery", &[], None)
            .await?;

        let positions: Vec<PositionResponse> = response.json().await?;
        Ok(positions
            .into_iter()
            .find(|p| p.symbol == symbol)
            .map(|p| p.net_quantity)
            .unwrap_or(Decimal::ZERO))
    }
}
