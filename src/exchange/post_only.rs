//! Maker-only open loop shared by the venue adapters.

use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::{post_only_price, ActiveOrder, OrderOutcome, OrderSide};
use crate::error::{GridError, Result};

const POST_ONLY_ATTEMPTS: u32 = 15;
const POST_ONLY_RETRY_DELAY: Duration = Duration::from_millis(100);

fn accepted(order: ActiveOrder) -> OrderOutcome {
    OrderOutcome {
        success: true,
        order_id: order.order_id,
        side: Some(order.side),
        size: order.size,
        price: order.price,
        status: Some(order.status),
        filled_size: order.filled_size,
        error: None,
    }
}

/// Quote one tick inside the touch and submit post-only; on a post-only
/// rejection re-quote from a fresh touch and retry, up to a fixed budget.
/// Any other venue error resolves to a failed outcome, never an `Err`.
pub(crate) async fn open_with_requotes<Q, QFut, S, SFut>(
    side: OrderSide,
    tick: Decimal,
    quote: Q,
    submit: S,
) -> Result<OrderOutcome>
where
    Q: Fn() -> QFut,
    QFut: Future<Output = Result<(Decimal, Decimal)>>,
    S: Fn(Decimal) -> SFut,
    SFut: Future<Output = Result<ActiveOrder>>,
{
    let mut last_reject = String::new();

    for attempt in 0..POST_ONLY_ATTEMPTS {
        let (bid, ask) = match quote().await {
            Ok(touch) => touch,
            Err(e) => return Ok(OrderOutcome::failure(e.to_string())),
        };
        let price = post_only_price(bid, ask, side, tick);

        match submit(price).await {
            Ok(order) => return Ok(accepted(order)),
            Err(GridError::PostOnlyRejected(reason)) => {
                debug!(
                    "Post-only reject at {} (attempt {}/{}), re-quoting",
                    price,
                    attempt + 1,
                    POST_ONLY_ATTEMPTS
                );
                last_reject = reason;
                tokio::time::sleep(POST_ONLY_RETRY_DELAY).await;
            }
            Err(e) => {
                warn!("Open order failed: {}", e);
                return Ok(OrderOutcome::failure(e.to_string()));
            }
        }
    }

    Ok(OrderOutcome::failure(format!(
        "Post-only rejected {} times, last: {}",
        POST_ONLY_ATTEMPTS, last_reject
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderStatus;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn touch() -> Result<(Decimal, Decimal)> {
        Ok((dec!(99.9), dec!(100.1)))
    }

    fn resting(price: Decimal) -> ActiveOrder {
        ActiveOrder {
            order_id: "1".to_string(),
            side: OrderSide::Buy,
            size: dec!(0.1),
            price,
            status: OrderStatus::Open,
            filled_size: dec!(0),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn accepts_on_fourth_requote() {
        let submissions = Arc::new(AtomicU32::new(0));
        let counter = submissions.clone();

        let outcome = open_with_requotes(
            OrderSide::Buy,
            dec!(0.1),
            || async { touch() },
            |price| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err(GridError::PostOnlyRejected("would match".to_string()))
                    } else {
                        Ok(resting(price))
                    }
                }
            },
        )
        .await
        .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.price, dec!(100));
        assert_eq!(submissions.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_after_requote_budget() {
        let submissions = Arc::new(AtomicU32::new(0));
        let counter = submissions.clone();

        let outcome = open_with_requotes(
            OrderSide::Sell,
            dec!(0.1),
            || async { touch() },
            |_price| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(GridError::PostOnlyRejected("would match".to_string()))
                }
            },
        )
        .await
        .unwrap();

        assert!(!outcome.success);
        assert_eq!(submissions.load(Ordering::SeqCst), 15);
        assert!(outcome.error.unwrap().contains("15 times"));
    }

    #[tokio::test(start_paused = true)]
    async fn venue_error_fails_without_requote() {
        let submissions = Arc::new(AtomicU32::new(0));
        let counter = submissions.clone();

        let outcome = open_with_requotes(
            OrderSide::Buy,
            dec!(0.1),
            || async { touch() },
            |_price| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<ActiveOrder, _>(GridError::OrderSubmission(
                        "insufficient margin".to_string(),
                    ))
                }
            },
        )
        .await
        .unwrap();

        assert!(!outcome.success);
        assert_eq!(submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quote_failure_fails_without_submitting() {
        let outcome = open_with_requotes(
            OrderSide::Buy,
            dec!(0.1),
            || async {
                Err::<(Decimal, Decimal), _>(GridError::Transport {
                    status: 503,
                    body: "unavailable".to_string(),
                })
            },
            |price| async move { Ok(resting(price)) },
        )
        .await
        .unwrap();

        assert!(!outcome.success);
    }
}
