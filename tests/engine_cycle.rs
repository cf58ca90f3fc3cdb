//! End-to-end engine cycles against a scripted in-memory venue.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

use perpgrid::adapters::{Notifier, TradeLog};
use perpgrid::domain::{
    ActiveOrder, OrderIntent, OrderOutcome, OrderSide, OrderStatus, OrderUpdate,
};
use perpgrid::{ExchangeAdapter, ExchangeKind, Result, TradingConfig, TradingEngine};

#[derive(Default)]
struct FakeState {
    next_id: u64,
    opens: Vec<(String, Decimal, Decimal)>,
    closes: Vec<(String, Decimal, Decimal, OrderSide)>,
    fill_opens_immediately: bool,
    report_filled_on_place: bool,
    partial_fill_on_cancel: Option<Decimal>,
    close_stream_on_connect: bool,
    position: Decimal,
    disconnected: bool,
}

struct FakeVenue {
    state: Mutex<FakeState>,
    tx: Mutex<Option<UnboundedSender<OrderUpdate>>>,
}

impl FakeVenue {
    fn new(state: FakeState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            tx: Mutex::new(None),
        })
    }

    fn push_update(&self, update: OrderUpdate) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            tx.send(update).unwrap();
        }
    }

    fn open_count(&self) -> usize {
        self.state.lock().unwrap().opens.len()
    }

    fn closes(&self) -> Vec<(String, Decimal, Decimal, OrderSide)> {
        self.state.lock().unwrap().closes.clone()
    }
}

#[async_trait]
impl ExchangeAdapter for FakeVenue {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Backpack
    }

    fn tick_size(&self) -> Decimal {
        dec!(0.1)
    }

    async fn connect(&self) -> Result<()> {
        if self.state.lock().unwrap().close_stream_on_connect {
            self.tx.lock().unwrap().take();
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.lock().unwrap().disconnected = true;
        Ok(())
    }

    async fn place_open_order(&self, intent: &OrderIntent) -> Result<OrderOutcome> {
        let (order_id, fill, report_filled) = {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let order_id = state.next_id.to_string();
            state
                .opens
                .push((order_id.clone(), intent.quantity, dec!(100)));
            (
                order_id,
                state.fill_opens_immediately,
                state.report_filled_on_place,
            )
        };

        if fill {
            self.push_update(OrderUpdate {
                order_id: order_id.clone(),
                side: intent.side,
                size: intent.quantity,
                price: dec!(100),
                status: OrderStatus::Filled,
                filled_size: intent.quantity,
            });
        }

        let (status, filled_size) = if report_filled {
            (OrderStatus::Filled, intent.quantity)
        } else {
            (OrderStatus::Open, Decimal::ZERO)
        };
        Ok(OrderOutcome {
            success: true,
            order_id,
            side: Some(intent.side),
            size: intent.quantity,
            price: dec!(100),
            status: Some(status),
            filled_size,
            error: None,
        })
    }

    async fn place_close_order(
        &self,
        _contract_id: &str,
        quantity: Decimal,
        price: Decimal,
        side: OrderSide,
    ) -> Result<OrderOutcome> {
        let order_id = {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let order_id = state.next_id.to_string();
            state
                .closes
                .push((order_id.clone(), quantity, price, side));
            order_id
        };

        Ok(OrderOutcome {
            success: true,
            order_id,
            side: Some(side),
            size: quantity,
            price,
            status: Some(OrderStatus::Open),
            filled_size: Decimal::ZERO,
            error: None,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        let partial = self.state.lock().unwrap().partial_fill_on_cancel;
        if let Some(filled) = partial {
            self.push_update(OrderUpdate {
                order_id: order_id.to_string(),
                side: OrderSide::Buy,
                size: dec!(0.1),
                price: dec!(100),
                status: OrderStatus::Cancelled,
                filled_size: filled,
            });
        }
        Ok(true)
    }

    async fn query_order(&self, _order_id: &str) -> Result<Option<ActiveOrder>> {
        Ok(None)
    }

    async fn query_active_orders(&self, _contract_id: &str) -> Result<Vec<ActiveOrder>> {
        Ok(Vec::new())
    }

    async fn query_position(&self, _contract_id: &str) -> Result<Decimal> {
        Ok(self.state.lock().unwrap().position)
    }

    async fn best_bid_ask(&self, _contract_id: &str) -> Result<(Decimal, Decimal)> {
        Ok((dec!(99.9), dec!(100.1)))
    }

    fn register_update_channel(&self, tx: UnboundedSender<OrderUpdate>) {
        *self.tx.lock().unwrap() = Some(tx);
    }

    fn is_connected(&self) -> bool {
        true
    }
}

fn long_config() -> TradingConfig {
    TradingConfig {
        exchange: "backpack".to_string(),
        ticker: "BTC-PERP".to_string(),
        contract_id: "BTC_USDC_PERP".to_string(),
        quantity: dec!(0.1),
        take_profit_pct: dec!(2),
        tick_size: dec!(0.1),
        direction: OrderSide::Buy,
        max_orders: 10,
        wait_time_secs: 4,
        grid_step_pct: dec!(1),
        stop_price: dec!(-1),
        pause_price: dec!(-1),
        boost_mode: false,
    }
}

fn engine_for(venue: Arc<FakeVenue>, config: TradingConfig, tag: &str) -> TradingEngine {
    let dir = std::env::temp_dir().join(format!("perpgrid-test-{}-{}", tag, std::process::id()));
    let trade_log = TradeLog::new(&dir.to_string_lossy(), "fake", &config.ticker);
    TradingEngine::new(config, venue, trade_log, Notifier::from_env())
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test(start_paused = true)]
async fn filled_open_gets_take_profit_close() {
    let venue = FakeVenue::new(FakeState {
        fill_opens_immediately: true,
        ..FakeState::default()
    });

    let mut engine = engine_for(Arc::clone(&venue), long_config(), "fill");
    let shutdown = engine.shutdown_handle();
    let task = tokio::spawn(async move { engine.run().await });

    let check_venue = Arc::clone(&venue);
    wait_until(move || !check_venue.closes().is_empty()).await;
    shutdown.store(true, Ordering::SeqCst);
    task.await.unwrap().unwrap();

    let closes = venue.closes();
    assert_eq!(closes.len(), 1);
    let (_, quantity, price, side) = &closes[0];
    // fill at 100, 2% take profit, long direction closes with a sell
    assert_eq!(*quantity, dec!(0.1));
    assert_eq!(*price, dec!(102));
    assert_eq!(*side, OrderSide::Sell);
    assert!(venue.state.lock().unwrap().disconnected);
}

#[tokio::test(start_paused = true)]
async fn grid_gate_blocks_second_open_at_same_level() {
    let venue = FakeVenue::new(FakeState {
        fill_opens_immediately: true,
        ..FakeState::default()
    });

    let mut engine = engine_for(Arc::clone(&venue), long_config(), "gate");
    let shutdown = engine.shutdown_handle();
    let task = tokio::spawn(async move { engine.run().await });

    let check_venue = Arc::clone(&venue);
    wait_until(move || !check_venue.closes().is_empty()).await;
    // Let a few more cycles run; the close at 102 blocks any new open
    // because the prospective close lands on the same level.
    tokio::time::sleep(std::time::Duration::from_secs(20)).await;
    shutdown.store(true, Ordering::SeqCst);
    task.await.unwrap().unwrap();

    assert_eq!(venue.open_count(), 1);
    assert_eq!(venue.closes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_open_is_cancelled_and_partial_fill_closed() {
    let venue = FakeVenue::new(FakeState {
        fill_opens_immediately: false,
        partial_fill_on_cancel: Some(dec!(0.04)),
        ..FakeState::default()
    });

    let mut engine = engine_for(Arc::clone(&venue), long_config(), "stale");
    let shutdown = engine.shutdown_handle();
    let task = tokio::spawn(async move { engine.run().await });

    let check_venue = Arc::clone(&venue);
    wait_until(move || !check_venue.closes().is_empty()).await;
    shutdown.store(true, Ordering::SeqCst);
    task.await.unwrap().unwrap();

    let closes = venue.closes();
    assert_eq!(closes.len(), 1);
    let (_, quantity, price, side) = &closes[0];
    assert_eq!(*quantity, dec!(0.04));
    assert_eq!(*price, dec!(102));
    assert_eq!(*side, OrderSide::Sell);
}

#[tokio::test(start_paused = true)]
async fn fill_reported_twice_gets_one_close_leg() {
    // The placement response already says Filled and the push channel
    // delivers the same fill event afterwards.
    let venue = FakeVenue::new(FakeState {
        fill_opens_immediately: true,
        report_filled_on_place: true,
        ..FakeState::default()
    });

    let mut engine = engine_for(Arc::clone(&venue), long_config(), "dupfill");
    let shutdown = engine.shutdown_handle();
    let task = tokio::spawn(async move { engine.run().await });

    let check_venue = Arc::clone(&venue);
    wait_until(move || !check_venue.closes().is_empty()).await;
    // Run on so the echoed push event gets drained and (if mishandled)
    // would place its own close.
    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    shutdown.store(true, Ordering::SeqCst);
    task.await.unwrap().unwrap();

    assert_eq!(venue.open_count(), 1);
    let closes = venue.closes();
    assert_eq!(closes.len(), 1, "each filled open must get exactly one close leg");
    assert_eq!(closes[0].1, dec!(0.1));
    assert_eq!(closes[0].2, dec!(102));
}

#[tokio::test(start_paused = true)]
async fn drained_grid_reopens_without_cooldown() {
    let venue = FakeVenue::new(FakeState {
        fill_opens_immediately: true,
        ..FakeState::default()
    });

    // One slot, and a base wait long enough that any cooldown band would
    // stall the test's bounded polling loop.
    let mut config = long_config();
    config.max_orders = 1;
    config.wait_time_secs = 100_000;

    let mut engine = engine_for(Arc::clone(&venue), config, "drain");
    let shutdown = engine.shutdown_handle();
    let task = tokio::spawn(async move { engine.run().await });

    let check_venue = Arc::clone(&venue);
    wait_until(move || !check_venue.closes().is_empty()).await;
    // Let the engine idle a few ticks at the max-orders cap.
    tokio::time::sleep(std::time::Duration::from_secs(5)).await;

    let close_id = venue.closes()[0].0.clone();
    venue.push_update(OrderUpdate {
        order_id: close_id,
        side: OrderSide::Sell,
        size: dec!(0.1),
        price: dec!(102),
        status: OrderStatus::Filled,
        filled_size: dec!(0.1),
    });

    // The freed slot must be refilled immediately, not after the band wait.
    let check_venue = Arc::clone(&venue);
    wait_until(move || check_venue.open_count() >= 2).await;
    shutdown.store(true, Ordering::SeqCst);
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn lost_update_stream_stops_the_session() {
    let venue = FakeVenue::new(FakeState {
        close_stream_on_connect: true,
        ..FakeState::default()
    });

    let mut engine = engine_for(Arc::clone(&venue), long_config(), "lost-stream");
    let task = tokio::spawn(async move { engine.run().await });

    // The engine notices the dead channel on its first drain and shuts
    // down on its own; no trading happens blind.
    task.await.unwrap().unwrap();
    assert_eq!(venue.open_count(), 0);
    assert!(venue.state.lock().unwrap().disconnected);
}

#[tokio::test(start_paused = true)]
async fn position_mismatch_stops_the_session() {
    let venue = FakeVenue::new(FakeState {
        position: dec!(5),
        ..FakeState::default()
    });

    let mut engine = engine_for(Arc::clone(&venue), long_config(), "mismatch");
    let task = tokio::spawn(async move { engine.run().await });

    // The first reconcile sees a 5-contract position with nothing tracked
    // and shuts the session down before any order is placed.
    task.await.unwrap().unwrap();
    assert_eq!(venue.open_count(), 0);
    assert!(venue.state.lock().unwrap().disconnected);
}
