//! Source Adapters
//!
//! REST implementations of [`MarketDataSource`](crate::application::ports::MarketDataSource).

mod binance;
mod http;
mod yahoo;

use std::sync::Arc;

pub use binance::{BinanceSource, exchange_symbol};
pub use yahoo::YahooSource;

use crate::application::ports::{MarketDataSource, SourceError};
use crate::application::services::SourceRegistration;
use crate::infrastructure::config::{BINANCE, SourceSettings, YAHOO};

/// Build the adapter and registration for one configured source.
///
/// # Errors
///
/// Returns an error if the adapter's HTTP client cannot be built or the
/// source name is not recognized.
pub fn build_source(settings: &SourceSettings) -> Result<SourceRegistration, SourceError> {
    let source: Arc<dyn MarketDataSource> = match settings.name.as_str() {
        BINANCE => Arc::new(BinanceSource::new(settings)?),
        YAHOO => Arc::new(YahooSource::new(settings)?),
        other => {
            return Err(SourceError::Rejected {
                status: 0,
                message: format!("unknown source: {other}"),
            });
        }
    };
    Ok(SourceRegistration::new(source, settings.connection.clone()))
}
