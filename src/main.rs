use clap::Parser;
use std::sync::atomic::Ordering;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use perpgrid::adapters::{Notifier, TradeLog};
use perpgrid::cli::{Cli, Command};
use perpgrid::{build_adapter, parse_exchange_kind, AppSettings, TradingEngine};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let settings = AppSettings::load().unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.logging.level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let exit = match cli.command {
        Command::ListExchanges => {
            for name in perpgrid::exchange::supported_exchanges() {
                println!("{}", name);
            }
            0
        }
        Command::Run(args) => run(args, settings).await,
    };
    std::process::exit(exit);
}

async fn run(args: perpgrid::cli::RunArgs, settings: AppSettings) -> i32 {
    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return 1;
        }
    };

    let kind = match parse_exchange_kind(&config.exchange) {
        Ok(kind) => kind,
        Err(e) => {
            error!("{}", e);
            return 1;
        }
    };

    let adapter = match build_adapter(kind, &config) {
        Ok(adapter) => adapter,
        Err(e) => {
            error!("Could not build {} adapter: {}", kind, e);
            return 1;
        }
    };

    let trade_log = TradeLog::new(&settings.logging.dir, kind.as_str(), &config.ticker);
    let notifier = Notifier::from_env();

    let mut engine = TradingEngine::new(config, adapter, trade_log, notifier);
    let shutdown = engine.shutdown_handle();

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        shutdown.store(true, Ordering::SeqCst);
    });

    match engine.run().await {
        Ok(()) => 0,
        Err(e) => {
            error!("Engine exited with error: {}", e);
            1
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
