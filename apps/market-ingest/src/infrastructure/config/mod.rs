//! Configuration Module
//!
//! Typed configuration loaded once from the environment.

mod env;
mod settings;
mod trading;

pub use env::EnvLookup;
pub use settings::{
    BINANCE, ConfigError, FirestoreSettings, IngestSettings, ServiceConfig, SourceSettings, YAHOO,
};
pub use trading::{ConfigValidationError, TradingConfig, ValidationRule};
