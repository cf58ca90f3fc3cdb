//! Order lifecycle engine: the grid loop that opens maker legs, pairs each
//! fill with a take-profit close, and reconciles local state against the
//! venue.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::adapters::{Notifier, TradeLog};
use crate::config::TradingConfig;
use crate::domain::{
    close_price, round_to_tick, OrderIntent, OrderStatus, OrderUpdate, TrackedClose,
};
use crate::error::{GridError, Result};
use crate::exchange::ExchangeAdapter;
use crate::retry::RetryPolicy;

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const RECONCILE_INTERVAL: Duration = Duration::from_secs(60);
const FILL_WAIT: Duration = Duration::from_secs(10);
const CANCEL_SETTLE_WAIT: Duration = Duration::from_secs(5);
const PAUSE_IDLE: Duration = Duration::from_secs(5);
const BOOST_COOLDOWN_CAP: Duration = Duration::from_secs(1);
const SETTLED_HISTORY: usize = 64;

/// Cooldown before the next open, scaled by how loaded the grid is.
/// A falling active count means a close just filled, so re-open at once.
fn cooldown(active: usize, previous_active: usize, max_orders: u32, wait: Duration) -> Duration {
    if active < previous_active {
        return Duration::ZERO;
    }
    let max = max_orders as usize;
    if active * 3 >= max * 2 {
        wait * 2
    } else if active * 3 >= max {
        wait
    } else if active * 6 >= max {
        wait / 2
    } else {
        wait / 4
    }
}

/// Whether a prospective close at `candidate` keeps the configured spacing
/// from every tracked close. An empty grid always passes.
fn grid_gate(tracked: &[TrackedClose], candidate: Decimal, grid_step_pct: Decimal) -> bool {
    if candidate <= Decimal::ZERO {
        return false;
    }
    tracked.iter().all(|close| {
        let distance_pct = ((close.price - candidate).abs() / candidate) * dec!(100);
        distance_pct >= grid_step_pct
    })
}

pub struct TradingEngine {
    config: TradingConfig,
    adapter: Arc<dyn ExchangeAdapter>,
    trade_log: TradeLog,
    notifier: Notifier,
    retry: RetryPolicy,
    update_rx: UnboundedReceiver<OrderUpdate>,
    tracked: Vec<TrackedClose>,
    // Open orders already paired with a close; the placement response, the
    // push channel and the query fallback can each report the same fill.
    settled_opens: HashSet<String>,
    settled_order: VecDeque<String>,
    previous_active: usize,
    last_open: Option<Instant>,
    last_reconcile: Option<Instant>,
    shutdown: Arc<AtomicBool>,
}

impl TradingEngine {
    pub fn new(
        config: TradingConfig,
        adapter: Arc<dyn ExchangeAdapter>,
        trade_log: TradeLog,
        notifier: Notifier,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        adapter.register_update_channel(tx);

        Self {
            config,
            adapter,
            trade_log,
            notifier,
            retry: RetryPolicy::default(),
            update_rx: rx,
            tracked: Vec::new(),
            settled_opens: HashSet::new(),
            settled_order: VecDeque::new(),
            previous_active: 0,
            last_open: None,
            last_reconcile: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked once per tick; flip it to stop the loop gracefully.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run the grid loop until shutdown is requested or a fatal condition
    /// (stop price, position mismatch) ends the session.
    pub async fn run(&mut self) -> Result<()> {
        self.adapter.connect().await?;
        info!(
            "Engine started: {} {} {} x{} tp={}% grid={}%",
            self.config.exchange,
            self.config.ticker,
            self.config.direction,
            self.config.quantity,
            self.config.take_profit_pct,
            self.config.grid_step_pct,
        );
        self.notifier.notify(&format!(
            "Grid started: {} {} {}",
            self.config.exchange, self.config.ticker, self.config.direction
        ));

        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while !self.shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;

            if !self.drain_updates().await {
                self.stop_with("Order update stream terminated, shutting down")
                    .await;
                break;
            }

            if self.due_for_reconcile() {
                if let Err(e) = self.reconcile().await {
                    self.stop_with(&format!("Reconcile aborted the session: {}", e))
                        .await;
                    break;
                }
            }

            match self.tick().await {
                Ok(()) => {}
                Err(GridError::Cancelled) => break,
                Err(e) => warn!("Cycle error: {}", e),
            }
        }

        self.adapter.disconnect().await?;
        info!("Engine stopped");
        Ok(())
    }

    async fn stop_with(&mut self, reason: &str) {
        error!("{}", reason);
        self.notifier.notify(reason);
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn due_for_reconcile(&self) -> bool {
        self.last_reconcile
            .map(|at| at.elapsed() >= RECONCILE_INTERVAL)
            .unwrap_or(true)
    }

    /// Rebuild the tracked close set from the venue and check the position
    /// against it. A divergence beyond twice the per-order quantity is not
    /// recoverable automatically; the operator has to intervene.
    async fn reconcile(&mut self) -> Result<()> {
        self.last_reconcile = Some(Instant::now());
        let contract = self.config.contract_id.clone();
        let close_side = self.config.close_side();

        let adapter = Arc::clone(&self.adapter);
        let contract_for_orders = contract.clone();
        let active = self
            .retry
            .execute_or(
                move || {
                    let adapter = Arc::clone(&adapter);
                    let contract = contract_for_orders.clone();
                    async move { adapter.query_active_orders(&contract).await }
                },
                Vec::new(),
            )
            .await;

        let adapter = Arc::clone(&self.adapter);
        let contract_for_position = contract.clone();
        let position = self
            .retry
            .execute_or(
                move || {
                    let adapter = Arc::clone(&adapter);
                    let contract = contract_for_position.clone();
                    async move { adapter.query_position(&contract).await }
                },
                Decimal::ZERO,
            )
            .await;

        self.tracked = active
            .into_iter()
            .filter(|order| order.side == close_side && !order.status.is_terminal())
            .map(|order| TrackedClose {
                id: order.order_id,
                price: order.price,
                size: order.size - order.filled_size,
            })
            .collect();

        let tracked_total: Decimal = self.tracked.iter().map(|c| c.size).sum();
        let threshold = self.config.quantity * dec!(2);
        let gap = (position.abs() - tracked_total).abs();
        if gap > threshold {
            return Err(GridError::PositionMismatch {
                position,
                tracked: tracked_total,
                threshold,
            });
        }

        info!(
            "Reconciled: {} tracked closes, position {}",
            self.tracked.len(),
            position
        );
        Ok(())
    }

    /// One trading cycle: gate checks, then place-and-monitor an open leg.
    async fn tick(&mut self) -> Result<()> {
        let (bid, ask) = self
            .adapter
            .best_bid_ask(&self.config.contract_id)
            .await?;
        let last = (bid + ask) / dec!(2);

        if self.stop_triggered(last) {
            self.stop_with(&format!(
                "Stop price {} crossed (last {}), shutting down",
                self.config.stop_price, last
            ))
            .await;
            return Err(GridError::Cancelled);
        }
        if self.pause_triggered(last) {
            tokio::time::sleep(PAUSE_IDLE).await;
            return Ok(());
        }

        // Record the count even on early returns, so a drained grid is seen
        // as a drop on the next cycle and re-opens without cooldown.
        let active = self.tracked.len();
        let previous_active = self.previous_active;
        self.previous_active = active;
        if active >= self.config.max_orders as usize {
            return Ok(());
        }

        let wait = Duration::from_secs(self.config.wait_time_secs);
        let mut pause = cooldown(active, previous_active, self.config.max_orders, wait);
        if self.config.boost_mode {
            pause = pause.min(BOOST_COOLDOWN_CAP);
        }
        if let Some(last_open) = self.last_open {
            if last_open.elapsed() < pause {
                return Ok(());
            }
        }

        let prospective_close = round_to_tick(
            close_price(last, self.config.take_profit_pct, self.config.close_side()),
            self.config.tick_size,
        );
        if !self.config.boost_mode
            && !grid_gate(&self.tracked, prospective_close, self.config.grid_step_pct)
        {
            return Ok(());
        }

        self.open_and_monitor().await
    }

    fn stop_triggered(&self, last: Decimal) -> bool {
        if self.config.stop_price == dec!(-1) {
            return false;
        }
        if self.config.is_long() {
            last <= self.config.stop_price
        } else {
            last >= self.config.stop_price
        }
    }

    fn pause_triggered(&self, last: Decimal) -> bool {
        if self.config.pause_price == dec!(-1) {
            return false;
        }
        if self.config.is_long() {
            last >= self.config.pause_price
        } else {
            last <= self.config.pause_price
        }
    }

    /// Place a post-only open and babysit it until it resolves: a fill gets
    /// a close leg, a timeout gets cancelled with any partial fill closed.
    async fn open_and_monitor(&mut self) -> Result<()> {
        let intent = OrderIntent::new(
            &self.config.contract_id,
            self.config.quantity,
            self.config.direction,
        );
        let outcome = self.adapter.place_open_order(&intent).await?;
        if !outcome.success {
            warn!(
                "Open order not placed: {}",
                outcome.error.as_deref().unwrap_or("unknown")
            );
            return Ok(());
        }
        self.last_open = Some(Instant::now());
        info!(
            "Open order {} resting at {} for {}",
            outcome.order_id, outcome.price, outcome.size
        );

        // Orders sometimes fill before the placement response returns.
        if outcome.is_filled() {
            let update = OrderUpdate {
                order_id: outcome.order_id.clone(),
                side: self.config.direction,
                size: outcome.size,
                price: outcome.price,
                status: OrderStatus::Filled,
                filled_size: outcome.size,
            };
            return self.open_filled(&update).await;
        }

        let (terminal, deferred) = self.await_terminal(&outcome.order_id, FILL_WAIT).await;
        let result = match terminal {
            Some(update) if update.status == OrderStatus::Filled => {
                self.open_filled(&update).await
            }
            Some(update) => self.open_cancelled(&update).await,
            None => self.cancel_stale_open(&outcome.order_id).await,
        };

        for update in deferred {
            self.handle_update(update).await;
        }
        result
    }

    /// Wait for a terminal update for `order_id`, setting aside updates for
    /// other orders so they are not lost.
    async fn await_terminal(
        &mut self,
        order_id: &str,
        window: Duration,
    ) -> (Option<OrderUpdate>, Vec<OrderUpdate>) {
        let deadline = Instant::now() + window;
        let mut deferred = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return (None, deferred);
            }
            match tokio::time::timeout(remaining, self.update_rx.recv()).await {
                Ok(Some(update)) if update.order_id == order_id => {
                    if update.status.is_terminal() {
                        return (Some(update), deferred);
                    }
                    // Partial progress; keep waiting for the remainder.
                }
                Ok(Some(update)) => deferred.push(update),
                Ok(None) => return (None, deferred),
                Err(_) => return (None, deferred),
            }
        }
    }

    /// Remember that this open order has been paired with a close, so a
    /// duplicate terminal report (placement response, push event and query
    /// fallback all describe the same fill) does not get a second leg.
    fn mark_settled(&mut self, order_id: &str) {
        if self.settled_opens.insert(order_id.to_string()) {
            self.settled_order.push_back(order_id.to_string());
            if self.settled_order.len() > SETTLED_HISTORY {
                if let Some(oldest) = self.settled_order.pop_front() {
                    self.settled_opens.remove(&oldest);
                }
            }
        }
    }

    /// The open leg filled: pair it with a take-profit close.
    async fn open_filled(&mut self, update: &OrderUpdate) -> Result<()> {
        let fill_price = update.price;
        let quantity = update.filled_size;
        self.mark_settled(&update.order_id);
        info!("Open {} filled: {} @ {}", update.order_id, quantity, fill_price);
        self.trade_log.record(
            &update.order_id,
            update.side,
            quantity,
            fill_price,
            OrderStatus::Filled,
        );

        self.place_close(quantity, fill_price).await
    }

    /// Cancelled open: a partial fill still needs its close leg.
    async fn open_cancelled(&mut self, update: &OrderUpdate) -> Result<()> {
        if update.filled_size <= Decimal::ZERO {
            info!("Open {} cancelled unfilled", update.order_id);
            return Ok(());
        }
        self.mark_settled(&update.order_id);
        info!(
            "Open {} cancelled with partial fill {}",
            update.order_id, update.filled_size
        );
        self.trade_log.record(
            &update.order_id,
            update.side,
            update.filled_size,
            update.price,
            OrderStatus::Cancelled,
        );
        self.place_close(update.filled_size, update.price).await
    }

    /// No terminal update inside the window: pull the order and settle
    /// whatever filled in the meantime.
    async fn cancel_stale_open(&mut self, order_id: &str) -> Result<()> {
        info!("Open {} did not resolve in time, cancelling", order_id);

        let adapter = Arc::clone(&self.adapter);
        let id = order_id.to_string();
        let known = self
            .retry
            .execute(move || {
                let adapter = Arc::clone(&adapter);
                let id = id.clone();
                async move { adapter.cancel_order(&id).await }
            })
            .await?;

        if known {
            let (terminal, deferred) = self.await_terminal(order_id, CANCEL_SETTLE_WAIT).await;
            let result = match terminal {
                Some(update) if update.status == OrderStatus::Filled => {
                    // Filled while the cancel was in flight.
                    self.open_filled(&update).await
                }
                Some(update) => self.open_cancelled(&update).await,
                None => self.settle_from_query(order_id).await,
            };
            for update in deferred {
                self.handle_update(update).await;
            }
            return result;
        }

        // The venue no longer knows the order; the stream should have told
        // us, but query as a fallback.
        self.settle_from_query(order_id).await
    }

    /// Push-channel silence fallback: query the order and close any fill.
    async fn settle_from_query(&mut self, order_id: &str) -> Result<()> {
        let Some(order) = self.adapter.query_order(order_id).await? else {
            return Ok(());
        };
        if order.filled_size <= Decimal::ZERO {
            return Ok(());
        }
        self.mark_settled(order_id);
        info!(
            "Order {} shows filled size {} on query, placing close",
            order_id, order.filled_size
        );
        self.trade_log.record(
            &order.order_id,
            order.side,
            order.filled_size,
            order.price,
            order.status,
        );
        self.place_close(order.filled_size, order.price).await
    }

    async fn place_close(&mut self, quantity: Decimal, fill_price: Decimal) -> Result<()> {
        let close_side = self.config.close_side();
        let price = round_to_tick(
            close_price(fill_price, self.config.take_profit_pct, close_side),
            self.config.tick_size,
        );

        let adapter = Arc::clone(&self.adapter);
        let contract = self.config.contract_id.clone();
        let outcome = self
            .retry
            .execute(move || {
                let adapter = Arc::clone(&adapter);
                let contract = contract.clone();
                async move {
                    adapter
                        .place_close_order(&contract, quantity, price, close_side)
                        .await
                }
            })
            .await;

        match outcome {
            Ok(outcome) => {
                info!(
                    "Close order {} resting at {} for {}",
                    outcome.order_id, outcome.price, outcome.size
                );
                self.tracked.push(TrackedClose {
                    id: outcome.order_id,
                    price: outcome.price,
                    size: outcome.size,
                });
                Ok(())
            }
            Err(e) => {
                // The position is unhedged until the next reconcile.
                let message = format!(
                    "Close order failed for {} @ {}: {}",
                    quantity, price, e
                );
                warn!("{}", message);
                self.notifier.notify(&message);
                Err(e)
            }
        }
    }

    /// Drain pending updates. Returns `false` when the update channel is
    /// gone, which means the push listener gave up for good.
    async fn drain_updates(&mut self) -> bool {
        let mut pending = Vec::new();
        let mut alive = true;
        loop {
            match self.update_rx.try_recv() {
                Ok(update) => pending.push(update),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    alive = false;
                    break;
                }
            }
        }
        for update in pending {
            self.handle_update(update).await;
        }
        alive
    }

    /// Process an update that arrived outside a monitor window.
    async fn handle_update(&mut self, update: OrderUpdate) {
        if update.side == self.config.close_side() {
            self.handle_close_update(update);
        } else if update.status.is_terminal() && self.settled_opens.contains(&update.order_id) {
            // Echo of a fill we already closed out.
        } else if update.status == OrderStatus::Filled {
            if let Err(e) = self.open_filled(&update).await {
                warn!("Deferred open fill handling failed: {}", e);
            }
        } else if update.status == OrderStatus::Cancelled && update.filled_size > Decimal::ZERO {
            if let Err(e) = self.open_cancelled(&update).await {
                warn!("Deferred open cancel handling failed: {}", e);
            }
        }
    }

    fn handle_close_update(&mut self, update: OrderUpdate) {
        match update.status {
            OrderStatus::Filled => {
                info!(
                    "Close {} filled: {} @ {}",
                    update.order_id, update.filled_size, update.price
                );
                self.tracked.retain(|close| close.id != update.order_id);
                self.trade_log.record(
                    &update.order_id,
                    update.side,
                    update.filled_size,
                    update.price,
                    OrderStatus::Filled,
                );
            }
            OrderStatus::Cancelled => {
                warn!("Close {} cancelled externally", update.order_id);
                self.tracked.retain(|close| close.id != update.order_id);
                if update.filled_size > Decimal::ZERO {
                    self.trade_log.record(
                        &update.order_id,
                        update.side,
                        update.filled_size,
                        update.price,
                        OrderStatus::Cancelled,
                    );
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracked(prices: &[Decimal]) -> Vec<TrackedClose> {
        prices
            .iter()
            .enumerate()
            .map(|(i, price)| TrackedClose {
                id: i.to_string(),
                price: *price,
                size: dec!(0.1),
            })
            .collect()
    }

    #[test]
    fn cooldown_scales_with_grid_load() {
        let wait = Duration::from_secs(60);
        // 0 of 10 active
        assert_eq!(cooldown(0, 0, 10, wait), wait / 4);
        // 2 of 10: one sixth band
        assert_eq!(cooldown(2, 2, 10, wait), wait / 2);
        // 4 of 10: one third band
        assert_eq!(cooldown(4, 4, 10, wait), wait);
        // 7 of 10: two thirds band
        assert_eq!(cooldown(7, 7, 10, wait), wait * 2);
    }

    #[test]
    fn cooldown_resets_when_count_falls() {
        let wait = Duration::from_secs(60);
        assert_eq!(cooldown(5, 6, 10, wait), Duration::ZERO);
    }

    #[test]
    fn grid_gate_blocks_crowded_prices() {
        let closes = tracked(&[dec!(102), dec!(104)]);
        // 1% of 102.5 is ~1.02; 102 is only 0.49% away
        assert!(!grid_gate(&closes, dec!(102.5), dec!(1)));
        // 106.1 clears both by more than 1%
        assert!(grid_gate(&closes, dec!(106.1), dec!(1)));
    }

    #[test]
    fn grid_gate_passes_empty_grid() {
        assert!(grid_gate(&[], dec!(100), dec!(1)));
    }
}
