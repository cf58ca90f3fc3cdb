//! Append-only CSV transaction log.
//!
//! One file per exchange/ticker pair. Rows are written through a
//! non-blocking appender so the trading loop never stalls on disk, and a
//! failed write is logged rather than propagated.

use chrono::Local;
use rust_decimal::Decimal;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};

use crate::domain::{OrderSide, OrderStatus};

const CSV_HEADER: &str = "Timestamp,OrderID,Side,Quantity,Price,Status";

pub struct TradeLog {
    writer: Mutex<NonBlocking>,
    // Dropping the guard flushes and stops the background writer thread.
    _guard: WorkerGuard,
}

impl TradeLog {
    /// Open (or create) the transaction log under `dir`. The header row is
    /// written once, when the file is new.
    pub fn new(dir: &str, exchange: &str, ticker: &str) -> Self {
        let filename = format!(
            "{}_{}_transactions.csv",
            exchange,
            ticker.replace(['/', ':'], "_")
        );

        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("Could not create log directory {}: {}", dir, e);
        }
        let needs_header = std::fs::metadata(Path::new(dir).join(&filename))
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let appender = tracing_appender::rolling::never(dir, filename);
        let (mut writer, guard) = tracing_appender::non_blocking(appender);

        if needs_header {
            if let Err(e) = writeln!(writer, "{}", CSV_HEADER) {
                warn!("Could not write transaction log header: {}", e);
            }
        }

        Self {
            writer: Mutex::new(writer),
            _guard: guard,
        }
    }

    /// Record one completed transaction. Never fails; a write error costs a
    /// log line, not the trading loop.
    pub fn record(
        &self,
        order_id: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        status: OrderStatus,
    ) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let row = format!(
            "{},{},{},{},{},{}",
            timestamp, order_id, side, quantity, price, status
        );

        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(writer, "{}", row) {
            warn!("Could not write transaction row: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn writes_header_and_rows() {
        let dir = std::env::temp_dir().join(format!("perpgrid-log-{}", std::process::id()));
        let dir_str = dir.to_string_lossy().to_string();

        {
            let log = TradeLog::new(&dir_str, "backpack", "BTC-PERP");
            log.record("abc123", OrderSide::Buy, dec!(0.1), dec!(50000.5), OrderStatus::Filled);
            // Drop flushes the non-blocking writer.
        }

        let contents =
            std::fs::read_to_string(dir.join("backpack_BTC-PERP_transactions.csv")).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next().unwrap(), CSV_HEADER);
        let row = lines.next().unwrap();
        assert!(row.ends_with(",abc123,BUY,0.1,50000.5,FILLED"));

        let _ = std::fs::remove_dir_all(dir);
    }
}
