//! Price arithmetic shared by all venue adapters.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use super::OrderSide;

/// Round a price to the nearest multiple of `tick`, half-up.
///
/// Every outbound price must pass through this before hitting a venue.
/// A non-positive tick passes the price through untouched.
pub fn round_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    let ticks = (price / tick).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    (ticks * tick).normalize()
}

/// Take-profit close price for a filled open leg.
///
/// A sell-close (long exposure) sits above the fill, a buy-close (short
/// exposure) below it.
pub fn close_price(fill_price: Decimal, take_profit_pct: Decimal, close_side: OrderSide) -> Decimal {
    let fraction = take_profit_pct / dec!(100);
    match close_side {
        OrderSide::Sell => fill_price * (Decimal::ONE + fraction),
        OrderSide::Buy => fill_price * (Decimal::ONE - fraction),
    }
}

/// Post-only open price one tick inside the touch: a buy quotes just under
/// the best ask, a sell just over the best bid.
pub fn post_only_price(best_bid: Decimal, best_ask: Decimal, side: OrderSide, tick: Decimal) -> Decimal {
    let raw = match side {
        OrderSide::Buy => best_ask - tick,
        OrderSide::Sell => best_bid + tick,
    };
    round_to_tick(raw, tick)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_to_tick_half_up() {
        assert_eq!(round_to_tick(dec!(100.05), dec!(0.1)), dec!(100.1));
        assert_eq!(round_to_tick(dec!(100.04), dec!(0.1)), dec!(100));
        assert_eq!(round_to_tick(dec!(1234.5), dec!(1)), dec!(1235));
        assert_eq!(round_to_tick(dec!(0.123456), dec!(0.0001)), dec!(0.1235));
    }

    #[test]
    fn round_to_tick_is_idempotent() {
        for (price, tick) in [
            (dec!(100.05), dec!(0.1)),
            (dec!(0.123456), dec!(0.0001)),
            (dec!(98765.4321), dec!(0.5)),
        ] {
            let once = round_to_tick(price, tick);
            assert_eq!(round_to_tick(once, tick), once);
        }
    }

    #[test]
    fn round_to_tick_passes_through_zero_tick() {
        assert_eq!(round_to_tick(dec!(100.0501), Decimal::ZERO), dec!(100.0501));
    }

    #[test]
    fn close_price_take_profit() {
        // fill 100, tp 2%: sell-close 102, buy-close 98
        assert_eq!(close_price(dec!(100), dec!(2), OrderSide::Sell), dec!(102.00));
        assert_eq!(close_price(dec!(100), dec!(2), OrderSide::Buy), dec!(98.00));
    }

    #[test]
    fn post_only_price_sits_inside_the_touch() {
        let bid = dec!(99.9);
        let ask = dec!(100.1);
        let tick = dec!(0.1);
        assert_eq!(post_only_price(bid, ask, OrderSide::Buy, tick), dec!(100));
        assert_eq!(post_only_price(bid, ask, OrderSide::Sell, tick), dec!(100));
    }
}
