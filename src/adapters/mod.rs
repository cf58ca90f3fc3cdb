pub mod notifier;
pub mod trade_log;

pub use notifier::Notifier;
pub use trade_log::TradeLog;
