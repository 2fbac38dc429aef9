//! Trading Configuration
//!
//! Typed, immutable trading parameters: built from defaults, overridden from
//! environment variables, validated once at startup.

use crate::domain::market_data::AssetClass;

use super::env::{EnvLookup, parse_bool, parse_f64, parse_u32};
use super::settings::ConfigError;

/// Risk, model and execution parameters for the trading system.
#[derive(Debug, Clone, PartialEq)]
pub struct TradingConfig {
    /// Upstream provider per asset class, in priority order.
    pub data_sources: Vec<(AssetClass, String)>,
    /// Indicator names computed downstream of ingestion.
    pub technical_indicators: Vec<String>,
    /// Pattern detection window in minutes.
    pub pattern_recognition_window: u32,
    /// LSTM hidden units.
    pub lstm_units: u32,
    /// Dropout rate.
    pub dropout_rate: f64,
    /// Optimizer learning rate.
    pub learning_rate: f64,
    /// Reinforcement learning episodes.
    pub rl_episodes: u32,
    /// RL discount factor.
    pub rl_gamma: f64,
    /// RL exploration rate.
    pub rl_epsilon: f64,
    /// RL replay memory size.
    pub rl_memory_size: u32,
    /// Maximum fraction of the portfolio per position.
    pub max_position_size: f64,
    /// Stop loss as a fraction of entry.
    pub stop_loss_pct: f64,
    /// Take profit as a fraction of entry.
    pub take_profit_pct: f64,
    /// Paper trading mode.
    pub paper_trading: bool,
    /// Assumed slippage fraction.
    pub trade_slippage: f64,
    /// Minutes between adaptation passes.
    pub adaptation_frequency_minutes: u32,
    /// Retrain when accuracy drops below this fraction.
    pub model_retrain_threshold: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            data_sources: vec![
                (AssetClass::Crypto, "ccxt".to_string()),
                (AssetClass::Stock, "yfinance".to_string()),
                (AssetClass::Forex, "yfinance".to_string()),
            ],
            technical_indicators: [
                "sma_20",
                "sma_50",
                "ema_12",
                "ema_26",
                "rsi_14",
                "macd",
                "bollinger_upper",
                "bollinger_lower",
                "atr_14",
                "obv",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            pattern_recognition_window: 60,
            lstm_units: 128,
            dropout_rate: 0.3,
            learning_rate: 0.001,
            rl_episodes: 1000,
            rl_gamma: 0.99,
            rl_epsilon: 0.1,
            rl_memory_size: 10_000,
            max_position_size: 0.1,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.05,
            paper_trading: true,
            trade_slippage: 0.001,
            adaptation_frequency_minutes: 15,
            model_retrain_threshold: 0.85,
        }
    }
}

impl TradingConfig {
    /// Load from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a recognized variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup.
    ///
    /// Recognized variables: `PAPER_TRADING`, `MAX_POSITION_SIZE`,
    /// `MODEL_RETRAIN_THRESHOLD`, `STOP_LOSS_PCT`, `TAKE_PROFIT_PCT`,
    /// `PATTERN_RECOGNITION_WINDOW`, `RL_EPISODES`, `TRADE_SLIPPAGE`,
    /// `ADAPTATION_FREQUENCY_MINUTES`. Unset or empty variables keep the
    /// default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first unparseable variable.
    pub fn from_lookup(lookup: &dyn EnvLookup) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = parse_bool(lookup, "PAPER_TRADING")? {
            config.paper_trading = v;
        }
        if let Some(v) = parse_f64(lookup, "MAX_POSITION_SIZE")? {
            config.max_position_size = v;
        }
        if let Some(v) = parse_f64(lookup, "MODEL_RETRAIN_THRESHOLD")? {
            config.model_retrain_threshold = v;
        }
        if let Some(v) = parse_f64(lookup, "STOP_LOSS_PCT")? {
            config.stop_loss_pct = v;
        }
        if let Some(v) = parse_f64(lookup, "TAKE_PROFIT_PCT")? {
            config.take_profit_pct = v;
        }
        if let Some(v) = parse_u32(lookup, "PATTERN_RECOGNITION_WINDOW")? {
            config.pattern_recognition_window = v;
        }
        if let Some(v) = parse_u32(lookup, "RL_EPISODES")? {
            config.rl_episodes = v;
        }
        if let Some(v) = parse_f64(lookup, "TRADE_SLIPPAGE")? {
            config.trade_slippage = v;
        }
        if let Some(v) = parse_u32(lookup, "ADAPTATION_FREQUENCY_MINUTES")? {
            config.adaptation_frequency_minutes = v;
        }

        Ok(config)
    }

    /// Provider configured for an asset class.
    #[must_use]
    pub fn provider_for(&self, asset_class: AssetClass) -> Option<&str> {
        self.data_sources
            .iter()
            .find(|(class, _)| *class == asset_class)
            .map(|(_, provider)| provider.as_str())
    }

    /// Check every invariant in order, stopping at the first violation.
    ///
    /// # Errors
    ///
    /// Returns the violated rule.
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    pub fn check(&self) -> Result<(), ConfigValidationError> {
        let fail = |rule: ValidationRule| Err(ConfigValidationError { rule });

        if !(self.max_position_size > 0.0 && self.max_position_size <= 1.0) {
            return fail(ValidationRule::PositionSize);
        }
        if !(self.stop_loss_pct > 0.0) {
            return fail(ValidationRule::StopLossPositive);
        }
        if !(self.take_profit_pct > self.stop_loss_pct) {
            return fail(ValidationRule::TakeProfitExceedsStopLoss);
        }
        if self.pattern_recognition_window < 30 {
            return fail(ValidationRule::PatternWindow);
        }
        if self.rl_episodes < 100 {
            return fail(ValidationRule::RlEpisodes);
        }
        Ok(())
    }

    /// Validate the configuration, logging the violated rule.
    ///
    /// A `false` result must abort startup.
    #[must_use]
    pub fn validate(&self) -> bool {
        match self.check() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(rule = e.rule.as_str(), error = %e, "Configuration validation failed");
                false
            }
        }
    }
}

/// Trading configuration invariants, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationRule {
    /// `0 < max_position_size <= 1`.
    PositionSize,
    /// `stop_loss_pct > 0`.
    StopLossPositive,
    /// `take_profit_pct > stop_loss_pct`.
    TakeProfitExceedsStopLoss,
    /// `pattern_recognition_window >= 30`.
    PatternWindow,
    /// `rl_episodes >= 100`.
    RlEpisodes,
}

impl ValidationRule {
    /// Rule identifier for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PositionSize => "position_size",
            Self::StopLossPositive => "stop_loss_positive",
            Self::TakeProfitExceedsStopLoss => "take_profit_exceeds_stop_loss",
            Self::PatternWindow => "pattern_window",
            Self::RlEpisodes => "rl_episodes",
        }
    }

    /// Human-readable description.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::PositionSize => "invalid position size: must be in (0, 1]",
            Self::StopLossPositive => "stop loss must be positive",
            Self::TakeProfitExceedsStopLoss => "take profit must exceed stop loss",
            Self::PatternWindow => "window too small for meaningful patterns (minimum 30)",
            Self::RlEpisodes => "insufficient RL episodes (minimum 100)",
        }
    }
}

/// A trading configuration invariant does not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("configuration validation failed: {}", rule.message())]
pub struct ConfigValidationError {
    /// The first violated rule.
    pub rule: ValidationRule,
}
