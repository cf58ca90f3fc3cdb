use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

use crate::config::TradingConfig;
use crate::domain::OrderSide;
use crate::error::{GridError, Result};

#[derive(Parser, Debug)]
#[command(name = "perpgrid", about = "Perpetual futures grid trading bot", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the grid trading loop against one venue
    Run(RunArgs),
    /// List supported exchanges
    ListExchanges,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Exchange to trade on (backpack, aster)
    #[arg(long, env = "PERPGRID_EXCHANGE")]
    pub exchange: String,

    /// Ticker label used for logs (e.g. BTC-PERP)
    #[arg(long)]
    pub ticker: String,

    /// Venue contract identifier; defaults to the ticker
    #[arg(long)]
    pub contract_id: Option<String>,

    /// Quantity per open order
    #[arg(long)]
    pub quantity: Decimal,

    /// Trading direction (buy or sell)
    #[arg(long, default_value = "buy")]
    pub direction: OrderSide,

    /// Take profit percentage
    #[arg(long)]
    pub take_profit: Decimal,

    /// Minimum price increment the venue accepts
    #[arg(long)]
    pub tick_size: Decimal,

    /// Maximum number of concurrent close orders
    #[arg(long, default_value_t = 10)]
    pub max_orders: u32,

    /// Base wait time between opens, in seconds
    #[arg(long, default_value_t = 60)]
    pub wait_time: u64,

    /// Minimum price spacing between close orders, in percent
    #[arg(long, default_value = "1.0")]
    pub grid_step: Decimal,

    /// Stop trading when the price crosses this level (-1 disables)
    #[arg(long, default_value = "-1", allow_hyphen_values = true)]
    pub stop_price: Decimal,

    /// Pause trading while the price is past this level (-1 disables)
    #[arg(long, default_value = "-1", allow_hyphen_values = true)]
    pub pause_price: Decimal,

    /// Aggressive-volume mode: skip the grid gate, minimal cooldown
    #[arg(long)]
    pub boost_mode: bool,
}

impl RunArgs {
    pub fn into_config(self) -> Result<TradingConfig> {
        let contract_id = self.contract_id.unwrap_or_else(|| self.ticker.clone());
        let config = TradingConfig {
            exchange: self.exchange,
            ticker: self.ticker,
            contract_id,
            quantity: self.quantity,
            take_profit_pct: self.take_profit,
            tick_size: self.tick_size,
            direction: self.direction,
            max_orders: self.max_orders,
            wait_time_secs: self.wait_time,
            grid_step_pct: self.grid_step,
            stop_price: self.stop_price,
            pause_price: self.pause_price,
            boost_mode: self.boost_mode,
        };

        config
            .validate()
            .map_err(|errors| GridError::Validation(errors.join("; ")))?;
        Ok(config)
    }
}
