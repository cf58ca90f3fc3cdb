pub mod order;
pub mod price;

pub use order::{
    ActiveOrder, OrderIntent, OrderOutcome, OrderSide, OrderStatus, OrderUpdate, TrackedClose,
};
pub use price::{close_price, post_only_price, round_to_tick};
