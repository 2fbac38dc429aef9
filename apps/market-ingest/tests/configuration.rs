//! Configuration Loading Integration Tests

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;

use market_ingest::infrastructure::config::ValidationRule;
use market_ingest::{ConfigError, ServiceConfig};

fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn position_size_override_is_valid() {
    let config = ServiceConfig::from_lookup(&env(&[("MAX_POSITION_SIZE", "0.5")])).unwrap();
    assert!((config.trading.max_position_size - 0.5).abs() < f64::EPSILON);
    assert!(config.trading.validate());
}

#[test]
fn oversized_position_fails_validation() {
    let config = ServiceConfig::from_lookup(&env(&[("MAX_POSITION_SIZE", "1.5")])).unwrap();
    assert!(!config.trading.validate());
    assert_eq!(
        config.trading.check().unwrap_err().rule,
        ValidationRule::PositionSize
    );
}

#[test]
fn take_profit_must_exceed_stop_loss() {
    let config = ServiceConfig::from_lookup(&env(&[
        ("STOP_LOSS_PCT", "0.05"),
        ("TAKE_PROFIT_PCT", "0.05"),
    ]))
    .unwrap();
    assert_eq!(
        config.trading.check().unwrap_err().rule,
        ValidationRule::TakeProfitExceedsStopLoss
    );
}

#[test]
fn unparseable_value_is_a_load_error() {
    let err = ServiceConfig::from_lookup(&env(&[("RL_EPISODES", "lots")])).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "RL_EPISODES"));
}

#[test]
fn zero_poll_interval_fails_to_load() {
    let err = ServiceConfig::from_lookup(&env(&[("INGEST_POLL_INTERVAL_SECS", "0")])).unwrap_err();
    assert!(
        matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "INGEST_POLL_INTERVAL_SECS")
    );
}

#[test]
fn full_service_configuration() {
    let config = ServiceConfig::from_lookup(&env(&[
        ("PAPER_TRADING", "false"),
        ("INGEST_SOURCES", "yahoo"),
        ("YAHOO_SYMBOLS", "AAPL,MSFT,GBPUSD=X"),
        ("FIREBASE_PROJECT_ID", "trading-intel"),
        ("FIREBASE_COLLECTION", "bars"),
        ("INGEST_POLL_INTERVAL_SECS", "15"),
    ]))
    .unwrap();

    assert!(!config.trading.paper_trading);
    assert_eq!(config.sources.len(), 1);
    assert_eq!(config.sources[0].symbols.len(), 3);
    assert_eq!(config.firestore.unwrap().collection, "bars");
    assert_eq!(config.ingest.poll_interval.as_secs(), 15);
}
