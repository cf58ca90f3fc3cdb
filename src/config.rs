use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::domain::OrderSide;
use crate::error::{GridError, Result};

/// Immutable trading parameters, built once at startup and passed down by
/// reference. Sentinel `-1` disables the stop/pause price checks.
#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Exchange name (e.g. "backpack")
    pub exchange: String,
    /// Trading ticker (e.g. "BTC-PERP")
    pub ticker: String,
    /// Contract/symbol identifier on the venue
    pub contract_id: String,
    /// Quantity per open order
    pub quantity: Decimal,
    /// Take profit percentage (e.g. 0.5 = 0.5%)
    pub take_profit_pct: Decimal,
    /// Minimum price increment the venue accepts
    pub tick_size: Decimal,
    /// Trading direction
    pub direction: OrderSide,
    /// Maximum number of concurrent close orders
    pub max_orders: u32,
    /// Base wait time between opens (seconds)
    pub wait_time_secs: u64,
    /// Minimum price spacing between consecutive close orders (percent)
    pub grid_step_pct: Decimal,
    /// Trading stops when the price crosses this level (-1 disables)
    pub stop_price: Decimal,
    /// Trading pauses while the price is past this level (-1 disables)
    pub pause_price: Decimal,
    /// Aggressive-volume mode: bypasses the grid gate, caps cooldown at 1s
    #[serde(default)]
    pub boost_mode: bool,
}

impl TradingConfig {
    /// The side that closes a position opened in the configured direction.
    pub fn close_side(&self) -> OrderSide {
        self.direction.opposite()
    }

    pub fn is_long(&self) -> bool {
        self.direction == OrderSide::Buy
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.ticker.trim().is_empty() {
            errors.push("ticker must not be empty".to_string());
        }
        if self.contract_id.trim().is_empty() {
            errors.push("contract_id must not be empty".to_string());
        }
        if self.quantity <= Decimal::ZERO {
            errors.push("quantity must be positive".to_string());
        }
        if self.take_profit_pct <= Decimal::ZERO {
            errors.push("take_profit_pct must be positive".to_string());
        }
        if self.tick_size < Decimal::ZERO {
            errors.push("tick_size must not be negative".to_string());
        }
        if self.max_orders == 0 {
            errors.push("max_orders must be at least 1".to_string());
        }
        if self.grid_step_pct < Decimal::ZERO {
            errors.push("grid_step_pct must not be negative".to_string());
        }

        let sentinel = dec!(-1);
        if self.stop_price != sentinel && self.stop_price <= Decimal::ZERO {
            errors.push("stop_price must be positive or -1 to disable".to_string());
        }
        if self.pause_price != sentinel && self.pause_price <= Decimal::ZERO {
            errors.push("pause_price must be positive or -1 to disable".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Per-venue API credentials plus optional endpoint overrides.
///
/// Secret material is wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ExchangeCredentials {
    pub api_key: String,
    pub api_secret: String,
    #[zeroize(skip)]
    pub base_url: Option<String>,
    #[zeroize(skip)]
    pub ws_url: Option<String>,
}

impl std::fmt::Debug for ExchangeCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeCredentials")
            .field("api_key", &"***")
            .field("api_secret", &"***")
            .field("base_url", &self.base_url)
            .field("ws_url", &self.ws_url)
            .finish()
    }
}

fn env_first(names: &[String]) -> Option<String> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok())
        .filter(|v| !v.trim().is_empty())
}

impl ExchangeCredentials {
    /// Load credentials for a venue from the environment.
    ///
    /// Looks up `<VENUE>_API_KEY` / `<VENUE>_API_SECRET` first, then the
    /// unprefixed `API_KEY` / `API_SECRET` fallbacks. Fails fast so a
    /// misconfigured bot never reaches the trading loop.
    pub fn from_env(exchange: &str) -> Result<Self> {
        let prefix = exchange.to_ascii_uppercase();

        let api_key = env_first(&[format!("{}_API_KEY", prefix), "API_KEY".to_string()])
            .ok_or_else(|| {
                GridError::Config(format!("{}_API_KEY (or API_KEY) is required", prefix))
            })?;
        let api_secret = env_first(&[format!("{}_API_SECRET", prefix), "API_SECRET".to_string()])
            .ok_or_else(|| {
                GridError::Config(format!("{}_API_SECRET (or API_SECRET) is required", prefix))
            })?;

        Ok(Self {
            api_key,
            api_secret,
            base_url: std::env::var(format!("{}_BASE_URL", prefix)).ok(),
            ws_url: std::env::var(format!("{}_WS_URL", prefix)).ok(),
        })
    }
}

/// Optional ambient settings (log file directory, notifier webhooks) layered
/// from `config/default.toml` and `PERPGRID_`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSettings {
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for activity/CSV logs
    #[serde(default = "default_log_dir")]
    pub dir: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl AppSettings {
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .set_default("logging.level", "info")
            .map_err(|e| GridError::Config(e.to_string()))?
            .set_default("logging.dir", "logs")
            .map_err(|e| GridError::Config(e.to_string()))?
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(
                config::Environment::with_prefix("PERPGRID")
                    .separator("__")
                    .try_parsing(true),
            );

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GridError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> TradingConfig {
        TradingConfig {
            exchange: "backpack".to_string(),
            ticker: "BTC-PERP".to_string(),
            contract_id: "BTC_USDC_PERP".to_string(),
            quantity: dec!(0.1),
            take_profit_pct: dec!(0.5),
            tick_size: dec!(0.1),
            direction: OrderSide::Buy,
            max_orders: 10,
            wait_time_secs: 60,
            grid_step_pct: dec!(1),
            stop_price: dec!(-1),
            pause_price: dec!(-1),
            boost_mode: false,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn close_side_is_opposite_direction() {
        let mut config = sample_config();
        assert_eq!(config.close_side(), OrderSide::Sell);
        config.direction = OrderSide::Sell;
        assert_eq!(config.close_side(), OrderSide::Buy);
    }

    #[test]
    fn rejects_non_positive_quantity_and_zero_max_orders() {
        let mut config = sample_config();
        config.quantity = Decimal::ZERO;
        config.max_orders = 0;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn rejects_bad_threshold_sentinels() {
        let mut config = sample_config();
        config.stop_price = dec!(0);
        config.pause_price = dec!(-3);
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn credentials_debug_redacts_secrets() {
        let creds = ExchangeCredentials {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            base_url: None,
            ws_url: None,
        };
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("secret"));
    }
}
