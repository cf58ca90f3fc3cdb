//! Backpack venue adapter.

mod rest;
mod ws;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::{ExchangeCredentials, TradingConfig};
use crate::domain::{ActiveOrder, OrderIntent, OrderOutcome, OrderSide, OrderUpdate};
use crate::error::{GridError, Result};
use crate::exchange::post_only::open_with_requotes;
use crate::exchange::traits::{ExchangeAdapter, ExchangeKind};
use crate::signing::InstructionSigner;

use rest::BackpackRest;
use ws::BackpackWs;

pub struct BackpackAdapter {
    rest: BackpackRest,
    ws: Arc<BackpackWs>,
    contract_id: String,
    tick_size: Decimal,
}

impl BackpackAdapter {
    pub fn new(config: &TradingConfig, credentials: ExchangeCredentials) -> Result<Self> {
        if credentials.api_key.trim().is_empty() || credentials.api_secret.trim().is_empty() {
            return Err(GridError::Config(
                "Backpack credentials must not be empty".to_string(),
            ));
        }

        let signer = InstructionSigner::new(
            credentials.api_key.clone(),
            credentials.api_secret.clone(),
        );
        let rest = BackpackRest::new(signer.clone(), credentials.base_url.clone())?;
        let ws = Arc::new(BackpackWs::new(
            signer,
            config.contract_id.clone(),
            credentials.ws_url.clone(),
        ));

        Ok(Self {
            rest,
            ws,
            contract_id: config.contract_id.clone(),
            tick_size: config.tick_size,
        })
    }
}

#[async_trait]
impl ExchangeAdapter for BackpackAdapter {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Backpack
    }

    fn tick_size(&self) -> Decimal {
        self.tick_size
    }

    async fn connect(&self) -> Result<()> {
        self.ws.connect().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.ws.disconnect().await;
        Ok(())
    }

    async fn place_open_order(&self, intent: &OrderIntent) -> Result<OrderOutcome> {
        open_with_requotes(
            intent.side,
            self.tick_size,
            || self.rest.best_bid_ask(&intent.contract_id),
            |price| {
                self.rest.submit_order(
                    &intent.contract_id,
                    intent.side,
                    intent.quantity,
                    price,
                    true,
                )
            },
        )
        .await
    }

    async fn place_close_order(
        &self,
        contract_id: &str,
        quantity: Decimal,
        price: Decimal,
        side: OrderSide,
    ) -> Result<OrderOutcome> {
        let order = self
            .rest
            .submit_order(contract_id, side, quantity, price, false)
            .await?;

        Ok(OrderOutcome {
            success: true,
            order_id: order.order_id,
            side: Some(order.side),
            size: order.size,
            price: order.price,
            status: Some(order.status),
            filled_size: order.filled_size,
            error: None,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        self.rest.cancel_order(&self.contract_id, order_id).await
    }

    async fn query_order(&self, order_id: &str) -> Result<Option<ActiveOrder>> {
        self.rest.query_order(&self.contract_id, order_id).await
    }

    async fn query_active_orders(&self, contract_id: &str) -> Result<Vec<ActiveOrder>> {
        self.rest.open_orders(contract_id).await
    }

    async fn query_position(&self, contract_id: &str) -> Result<Decimal> {
        self.rest.position(contract_id).await
    }

    async fn best_bid_ask(&self, contract_id: &str) -> Result<(Decimal, Decimal)> {
        self.rest.best_bid_ask(contract_id).await
    }

    fn register_update_channel(&self, tx: UnboundedSender<OrderUpdate>) {
        self.ws.register_update_channel(tx);
    }

    fn is_connected(&self) -> bool {
        self.ws.is_connected()
    }
}
