//! Aster user data stream: a listen-key WebSocket carrying order updates.
//!
//! The stream is account-scoped rather than symbol-scoped, so events for
//! other symbols are filtered here. The listen key must be refreshed
//! periodically or the venue drops the stream.

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::domain::{OrderSide, OrderStatus, OrderUpdate};
use crate::error::{GridError, Result};

use super::rest::AsterRest;

const DEFAULT_STREAM_URL: &str = "wss://fstream.asterdex.com";
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30 * 60);
const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POST_CONNECT_SETTLE: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct StreamEvent {
    e: String,
    #[serde(default)]
    o: Option<OrderPayload>,
}

#[derive(Debug, Deserialize)]
struct OrderPayload {
    s: String,
    #[serde(rename = "S")]
    side: String,
    i: u64,
    q: Decimal,
    p: Decimal,
    #[serde(default)]
    z: Decimal,
    #[serde(rename = "X")]
    status: String,
}

impl OrderPayload {
    fn into_update(self) -> Option<OrderUpdate> {
        let status = match self.status.as_str() {
            "NEW" => OrderStatus::Open,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" | "EXPIRED" => OrderStatus::Cancelled,
            other => {
                debug!("Dropping order event with status {}", other);
                return None;
            }
        };
        let side = match self.side.as_str() {
            "BUY" => OrderSide::Buy,
            "SELL" => OrderSide::Sell,
            other => {
                warn!("Dropping order event with unknown side {}", other);
                return None;
            }
        };

        Some(OrderUpdate {
            order_id: self.i.to_string(),
            side,
            size: self.q,
            price: self.p,
            status,
            filled_size: self.z,
        })
    }
}

pub struct AsterWs {
    rest: Arc<AsterRest>,
    stream_url: String,
    symbol: String,
    update_tx: Mutex<Option<UnboundedSender<OrderUpdate>>>,
    connected: AtomicBool,
    running: AtomicBool,
    ready: Notify,
    shutdown: Notify,
}

impl AsterWs {
    pub fn new(rest: Arc<AsterRest>, symbol: String, stream_url: Option<String>) -> Self {
        Self {
            rest,
            stream_url: stream_url.unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()),
            symbol,
            update_tx: Mutex::new(None),
            connected: AtomicBool::new(false),
            running: AtomicBool::new(false),
            ready: Notify::new(),
            shutdown: Notify::new(),
        }
    }

    pub fn register_update_channel(&self, tx: UnboundedSender<OrderUpdate>) {
        *self.update_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let ws = Arc::clone(self);
        tokio::spawn(async move { ws.run_loop().await });

        tokio::time::timeout(CONNECT_TIMEOUT, self.ready.notified())
            .await
            .map_err(|_| {
                self.running.store(false, Ordering::SeqCst);
                GridError::Protocol("Timed out waiting for user data stream".to_string())
            })?;

        tokio::time::sleep(POST_CONNECT_SETTLE).await;
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    fn forward(&self, update: OrderUpdate) {
        let guard = self.update_tx.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = guard.as_ref() {
            if tx.send(update).is_err() {
                warn!("Order update receiver dropped; update discarded");
            }
        }
    }

    /// Returns `true` when the session must be torn down (expired key).
    fn handle_text(&self, text: &str) -> bool {
        let event: StreamEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                debug!("Ignoring unparseable frame: {}", e);
                return false;
            }
        };

        match event.e.as_str() {
            "ORDER_TRADE_UPDATE" => {
                let Some(payload) = event.o else { return false };
                if payload.s != self.symbol {
                    return false;
                }
                if let Some(update) = payload.into_update() {
                    debug!(
                        "Order update: {} {} status={}",
                        update.order_id, update.side, update.status
                    );
                    self.forward(update);
                }
                false
            }
            "listenKeyExpired" => {
                warn!("Listen key expired, reconnecting with a fresh key");
                true
            }
            _ => false,
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
                    warn!("User data stream session ended: {}", e);
                }
            }
            self.connected.store(false, Ordering::SeqCst);

            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            attempt += 1;
            if attempt > MAX_RECONNECT_ATTEMPTS {
                error!(
                    "User data stream gave up after {} reconnect attempts",
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
                "Reconnecting user data stream in {:?} (attempt {}/{})",
                delay, attempt, MAX_RECONNECT_ATTEMPTS
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.notified() => break,
            }
        }

        info!("User data stream listener stopped");
    }

    async fn run_session(&self) -> Result<()> {
        let listen_key = self.rest.create_listen_key().await?;
        let url = format!("{}/ws/{}", self.stream_url, listen_key);
        info!("Connecting to user data stream");

        let (stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = stream.split();

        self.connected.store(true, Ordering::SeqCst);
        self.ready.notify_waiters();
        info!("User data stream connected for {}", self.symbol);

        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        keepalive.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = keepalive.tick() => {
                    if let Err(e) = self.rest.keepalive_listen_key().await {
                        warn!("Listen key keepalive failed: {}", e);
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if self.handle_text(&text) {
                                return Err(GridError::Protocol(
                                    "Listen key expired".to_string(),
                                ));
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            write.send(Message::Pong(payload)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return Err(GridError::Protocol(format!(
                                "Server closed user data stream: {:?}",
                                frame
                            )));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            return Err(GridError::Protocol(
                                "User data stream ended".to_string(),
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

    fn payload(status: &str) -> OrderPayload {
        OrderPayload {
            s: "BTCUSDT".to_string(),
            side: "BUY".to_string(),
            i: 42,
            q: dec!(0.2),
            p: dec!(50000),
            z: dec!(0.2),
            status: status.to_string(),
        }
    }

    #[test]
    fn terminal_statuses_map_to_canonical() {
        assert_eq!(
            payload("FILLED").into_update().unwrap().status,
            OrderStatus::Filled
        );
        assert_eq!(
            payload("CANCELED").into_update().unwrap().status,
            OrderStatus::Cancelled
        );
        assert_eq!(
            payload("EXPIRED").into_update().unwrap().status,
            OrderStatus::Cancelled
        );
    }

    #[test]
    fn unknown_status_is_dropped() {
        assert!(payload("REJECTED").into_update().is_none());
    }

    #[test]
    fn order_trade_update_parses_from_wire() {
        let raw = r#"{"e":"ORDER_TRADE_UPDATE","T":1,"E":2,"o":{"s":"BTCUSDT","S":"SELL","i":7,"q":"0.1","p":"50100","z":"0","X":"NEW","x":"NEW"}}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.e, "ORDER_TRADE_UPDATE");
        let update = event.o.unwrap().into_update().unwrap();
        assert_eq!(update.order_id, "7");
        assert_eq!(update.side, OrderSide::Sell);
        assert_eq!(update.status, OrderStatus::Open);
    }
}
