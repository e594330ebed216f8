//! Configuration management for the pricing engine and scenario simulator
//! Supports environment variables and default values

use serde::{Deserialize, Serialize};
use std::env;
use tracing::{info, warn};

/// Configuration for the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Market configuration
    pub market: MarketConfig,

    /// Scenario simulation configuration
    pub simulation: SimulationConfig,
}

/// Market-specific configuration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Liquidity parameter used when an input does not name one (default: 100.0)
    pub default_liquidity_b: f64,

    /// Tolerance when checking that prices sum to one (default: 1e-9)
    pub price_tolerance: f64,
}

/// Simulation-specific configuration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Allowed distance of the scenario probability mass from 1 (default: 1e-6)
    pub probability_tolerance: f64,

    /// Reject unnormalised probabilities instead of warning (default: false)
    pub strict_probabilities: bool,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            default_liquidity_b: 100.0,
            price_tolerance: 1e-9,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            probability_tolerance: 1e-6,
            strict_probabilities: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(b) = env::var("MARKET_DEFAULT_LIQUIDITY_B") {
            config.market.default_liquidity_b = b.parse()
                .unwrap_or(config.market.default_liquidity_b);
        }

        if let Ok(tol) = env::var("MARKET_PRICE_TOLERANCE") {
            config.market.price_tolerance = tol.parse()
                .unwrap_or(config.market.price_tolerance);
        }

        if let Ok(tol) = env::var("SIM_PROBABILITY_TOLERANCE") {
            config.simulation.probability_tolerance = tol.parse()
                .unwrap_or(config.simulation.probability_tolerance);
        }

        if let Ok(strict) = env::var("SIM_STRICT_PROBABILITIES") {
            config.simulation.strict_probabilities = strict.parse()
                .unwrap_or(config.simulation.strict_probabilities);
        }

        config.validate();

        config
    }

    /// Validate configuration values
    fn validate(&mut self) {
        let defaults = Config::default();

        if !(self.market.default_liquidity_b.is_finite() && self.market.default_liquidity_b > 0.0) {
            warn!(value = self.market.default_liquidity_b, "invalid default_liquidity_b, using default");
            self.market.default_liquidity_b = defaults.market.default_liquidity_b;
        }

        if !(self.market.price_tolerance.is_finite() && self.market.price_tolerance > 0.0) {
            warn!(value = self.market.price_tolerance, "invalid price_tolerance, using default");
            self.market.price_tolerance = defaults.market.price_tolerance;
        }

        if !(self.simulation.probability_tolerance.is_finite()
            && self.simulation.probability_tolerance >= 0.0)
        {
            warn!(
                value = self.simulation.probability_tolerance,
                "invalid probability_tolerance, using default"
            );
            self.simulation.probability_tolerance = defaults.simulation.probability_tolerance;
        }
    }

    /// Log current configuration for debugging
    pub fn log_config(&self) {
        info!(
            default_liquidity_b = self.market.default_liquidity_b,
            price_tolerance = self.market.price_tolerance,
            probability_tolerance = self.simulation.probability_tolerance,
            strict_probabilities = self.simulation.strict_probabilities,
            "engine configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_replaces_bad_values() {
        let mut config = Config::default();
        config.market.default_liquidity_b = -5.0;
        config.market.price_tolerance = f64::NAN;
        config.simulation.probability_tolerance = -1.0;
        config.validate();

        assert_eq!(config.market.default_liquidity_b, 100.0);
        assert_eq!(config.market.price_tolerance, 1e-9);
        assert_eq!(config.simulation.probability_tolerance, 1e-6);
    }

    #[test]
    fn defaults_are_lenient() {
        let config = Config::default();
        assert!(!config.simulation.strict_probabilities);
    }
}
