//! Venue registry: maps an exchange name to a ready adapter.

use std::sync::Arc;

use tracing::info;

use crate::config::{ExchangeCredentials, TradingConfig};
use crate::error::Result;
use crate::exchange::aster::AsterAdapter;
use crate::exchange::backpack::BackpackAdapter;
use crate::exchange::traits::{ExchangeAdapter, ExchangeKind};

/// Names accepted on the command line, in display order.
pub fn supported_exchanges() -> Vec<&'static str> {
    vec![ExchangeKind::Backpack.as_str(), ExchangeKind::Aster.as_str()]
}

/// Build the adapter for a venue. Credentials come from the environment
/// (`<VENUE>_API_KEY` / `API_KEY` fallback) and are validated here, so a
/// misconfigured session fails before the trading loop starts.
pub fn build_adapter(
    kind: ExchangeKind,
    config: &TradingConfig,
) -> Result<Arc<dyn ExchangeAdapter>> {
    let credentials = ExchangeCredentials::from_env(kind.as_str())?;
    info!("Building {} adapter for {}", kind, config.contract_id);

    let adapter: Arc<dyn ExchangeAdapter> = match kind {
        ExchangeKind::Backpack => Arc::new(BackpackAdapter::new(config, credentials)?),
        ExchangeKind::Aster => Arc::new(AsterAdapter::new(config, credentials)?),
    };

    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lists_both_venues() {
        let names = supported_exchanges();
        assert_eq!(names, vec!["backpack", "aster"]);
    }
}
