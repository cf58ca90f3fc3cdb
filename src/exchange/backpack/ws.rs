//! Backpack private WebSocket: order updates for one symbol.
//!
//! One listener task owns the update sender, so delivery into the engine
//! channel is serialized. The task reconnects with jittered exponential
//! backoff and re-subscribes after every reconnect.

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::domain::{OrderSide, OrderStatus, OrderUpdate};
use crate::error::{GridError, Result};
use crate::signing::InstructionSigner;

const DEFAULT_WS_URL: &str = "wss://ws.backpack.exchange";
const PING_INTERVAL: Duration = Duration::from_secs(20);
const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const SUBSCRIBE_ACK_TIMEOUT: Duration = Duration::from_secs(10);
const POST_SUBSCRIBE_SETTLE: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    data: Option<OrderEvent>,
}

#[derive(Debug, Deserialize)]
struct OrderEvent {
    e: String,
    #[serde(default)]
    i: Value,
    s: String,
    #[serde(rename = "S")]
    side: String,
    q: Decimal,
    p: Decimal,
    #[serde(default)]
    z: Decimal,
}

impl OrderEvent {
    fn order_id(&self) -> String {
        match &self.i {
            Value::String(id) => id.clone(),
            other => other.to_string(),
        }
    }

    fn into_update(self) -> Option<OrderUpdate> {
        let status = match self.e.as_str() {
            "orderAccepted" => OrderStatus::Open,
            "orderFill" => {
                if self.z >= self.q {
                    OrderStatus::Filled
                } else {
                    OrderStatus::PartiallyFilled
                }
            }
            "orderCancelled" | "orderExpired" => OrderStatus::Cancelled,
            _ => return None,
        };
        let side = match self.side.as_str() {
            "Bid" => OrderSide::Buy,
            "Ask" => OrderSide::Sell,
            other => {
                warn!("Dropping order event with unknown side {}", other);
                return None;
            }
        };

        Some(OrderUpdate {
            order_id: self.order_id(),
            side,
            size: self.q,
            price: self.p,
            status,
            filled_size: self.z,
        })
    }
}

pub struct BackpackWs {
    ws_url: String,
    symbol: String,
    signer: InstructionSigner,
    update_tx: Mutex<Option<UnboundedSender<OrderUpdate>>>,
    connected: AtomicBool,
    running: AtomicBool,
    subscribed: Notify,
    shutdown: Notify,
}

impl BackpackWs {
    pub fn new(signer: InstructionSigner, symbol: String, ws_url: Option<String>) -> Self {
        Self {
            ws_url: ws_url.unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
            symbol,
            signer,
            update_tx: Mutex::new(None),
            connected: AtomicBool::new(false),
            running: AtomicBool::new(false),
            subscribed: Notify::new(),
            shutdown: Notify::new(),
        }
    }

    pub fn register_update_channel(&self, tx: UnboundedSender<OrderUpdate>) {
        *self.update_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Start the listener task and wait until the subscription is in place.
    /// Idempotent: a second call while running is a no-op.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let ws = Arc::clone(self);
        tokio::spawn(async move { ws.run_loop().await });

        tokio::time::timeout(SUBSCRIBE_ACK_TIMEOUT, self.subscribed.notified())
            .await
            .map_err(|_| {
                self.running.store(false, Ordering::SeqCst);
                GridError::Protocol("Timed out waiting for order stream subscription".to_string())
            })?;

        // Give the venue a moment to start routing events to the new stream.
        tokio::time::sleep(POST_SUBSCRIBE_SETTLE).await;
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    fn subscribe_frame(&self) -> Result<Message> {
        let signature = self.signer.subscribe_signature()?;
        let frame = json!({
            "method": "SUBSCRIBE",
            "params": [format!("account.orderUpdate.{}", self.symbol)],
            "signature": signature,
        });
        Ok(Message::Text(frame.to_string()))
    }

    fn forward(&self, update: OrderUpdate) {
        let guard = self.update_tx.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = guard.as_ref() {
            if tx.send(update).is_err() {
                warn!("Order update receiver dropped; update discarded");
            }
        }
    }

    fn handle_text(&self, text: &str) {
        let frame: StreamFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Ignoring unparseable frame: {}", e);
                return;
            }
        };

        let Some(event) = frame.data else { return };
        if !frame
            .stream
            .as_deref()
            .is_some_and(|s| s.starts_with("account.orderUpdate"))
        {
            return;
        }
        // Updates for other symbols on the same account are not ours.
        if event.s != self.symbol {
            return;
        }

        if let Some(update) = event.into_update() {
            debug!(
                "Order update: {} {} status={}",
                update.order_id, update.side, update.status
            );
            self.forward(update);
        }
    }

    async fn run_loop(self: Arc<Self>) {
        let mut attempt: u32 = 0;

        while self.running.load(Ordering::SeqCst) {
            match self.run_session().await {
                Ok(()) => {
                    attempt = 0;
                }
                Err(e) => {
                    warn!("Order stream session ended: {}", e);
                }
            }
            self.connected.store(false, Ordering::SeqCst);

            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            attempt += 1;
            if attempt > MAX_RECONNECT_ATTEMPTS {
                error!(
                    "Order stream gave up after {} reconnect attempts",
                    MAX_RECONNECT_ATTEMPTS
                );
                self.running.store(false, Ordering::SeqCst);
                // Dropping the sender closes the engine's channel, which it
                // treats as a fatal stream loss.
                self.update_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
                break;
            }

            let delay = reconnect_delay(attempt);
            info!(
                "Reconnecting order stream in {:?} (attempt {}/{})",
                delay, attempt, MAX_RECONNECT_ATTEMPTS
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.notified() => break,
            }
        }

        info!("Order stream listener stopped");
    }

    async fn run_session(&self) -> Result<()> {
        info!("Connecting to {}", self.ws_url);
        let (stream, _) = connect_async(self.ws_url.as_str()).await?;
        let (mut write, mut read) = stream.split();

        write.send(self.subscribe_frame()?).await?;
        self.connected.store(true, Ordering::SeqCst);
        self.subscribed.notify_waiters();
        info!("Subscribed to order updates for {}", self.symbol);

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = ping.tick() => {
                    write.send(Message::Ping(Vec::new())).await?;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text),
                        Some(Ok(Message::Ping(payload))) => {
                            write.send(Message::Pong(payload)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return Err(GridError::Protocol(format!(
                                "Server closed order stream: {:?}",
                                frame
                            )));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            return Err(GridError::Protocol(
                                "Order stream ended".to_string(),
                            ));
                        }
                    }
                }
            }
        }
    }
}

fn reconnect_delay(attempt: u32) -> Duration {
    let base = Duration::from_secs(1)
        .saturating_mul(1u32 << attempt.min(5))
        .min(MAX_RECONNECT_DELAY);
    let jitter_ms = (base.as_millis() as u64 / 4).max(1);
    let offset = rand::thread_rng().gen_range(0..=jitter_ms * 2) as i64 - jitter_ms as i64;
    let millis = (base.as_millis() as i64 + offset).max(100) as u64;
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn event(e: &str, q: Decimal, z: Decimal) -> OrderEvent {
        OrderEvent {
            e: e.to_string(),
            i: Value::from(12345u64),
            s: "BTC_USDC_PERP".to_string(),
            side: "Bid".to_string(),
            q,
            p: dec!(100),
            z,
        }
    }

    #[test]
    fn full_fill_maps_to_filled() {
        let update = event("orderFill", dec!(0.1), dec!(0.1)).into_update().unwrap();
        assert_eq!(update.status, OrderStatus::Filled);
        assert_eq!(update.order_id, "12345");
        assert_eq!(update.side, OrderSide::Buy);
    }

    #[test]
    fn partial_fill_maps_to_partially_filled() {
        let update = event("orderFill", dec!(0.1), dec!(0.04)).into_update().unwrap();
        assert_eq!(update.status, OrderStatus::PartiallyFilled);
        assert_eq!(update.filled_size, dec!(0.04));
    }

    #[test]
    fn expiry_maps_to_cancelled_and_unknown_events_drop() {
        let update = event("orderExpired", dec!(0.1), dec!(0)).into_update().unwrap();
        assert_eq!(update.status, OrderStatus::Cancelled);
        assert!(event("balanceUpdate", dec!(0.1), dec!(0)).into_update().is_none());
    }

    #[test]
    fn reconnect_delay_is_bounded() {
        for attempt in 1..=20 {
            let delay = reconnect_delay(attempt);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= MAX_RECONNECT_DELAY + MAX_RECONNECT_DELAY / 2);
        }
    }
}
