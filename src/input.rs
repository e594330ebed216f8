//! JSON boundary for the binaries: parse a simulation request, run it, and
//! hand back a serialisable output.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Config;
use crate::lmsr_core::{Market, TradeResult};
use crate::scenario::{Portfolio, Position, Scenario, ScenarioReport, Simulator};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub outcome: usize,
    pub shares: f64,
}

/// Market section of a request. `b` falls back to the configured default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketInput {
    pub q: Vec<f64>,
    #[serde(default)]
    pub b: Option<f64>,
    #[serde(default)]
    pub trades: Vec<TradeRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationInput {
    pub positions: Portfolio,
    /// Defaults to one winner per position plus the void case.
    #[serde(default)]
    pub scenarios: Option<Vec<Scenario>>,
    #[serde(default)]
    pub probabilities: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub market: Option<MarketInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketOutput {
    pub initial_prices: Vec<f64>,
    pub trades: Vec<TradeResult>,
    pub final_state: Market,
    pub max_loss: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationOutput {
    pub report: ScenarioReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market: Option<MarketOutput>,
}

impl SimulationInput {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("failed to parse simulation input")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&text)
    }

    /// Box-office portfolio used when no input file is given.
    pub fn sample() -> Result<Self> {
        let positions = Portfolio::from_positions([
            ("Zootopia 2", Position::new(350.0, 0.38)),
            ("Minecraft", Position::new(500.0, 0.34)),
            ("Wicked", Position::new(90.0, 0.06)),
            ("Avatar 2", Position::new(80.0, 0.09)),
        ])?;
        Ok(Self {
            positions,
            scenarios: None,
            probabilities: None,
            market: None,
        })
    }

    pub fn run(&self, config: &Config) -> Result<SimulationOutput> {
        let scenarios = match &self.scenarios {
            Some(s) => s.clone(),
            None => self.positions.resolution_scenarios(),
        };
        let report = Simulator::new(config.simulation.clone()).simulate(
            &self.positions,
            &scenarios,
            self.probabilities.as_ref(),
        )?;
        info!(
            scenarios = report.summary.scenario_count,
            total_cost = report.summary.total_cost,
            "portfolio simulated"
        );

        let market = self
            .market
            .as_ref()
            .map(|m| run_market(m, config))
            .transpose()?;

        Ok(SimulationOutput { report, market })
    }
}

fn run_market(input: &MarketInput, config: &Config) -> Result<MarketOutput> {
    let b = input.b.unwrap_or(config.market.default_liquidity_b);
    let mut market = Market::with_inventory(input.q.clone(), b)?;
    let initial_prices = market.prices()?;

    let trades = input
        .trades
        .iter()
        .map(|t| market.apply_trade(t.outcome, t.shares))
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("trade rejected")?;

    Ok(MarketOutput {
        initial_prices,
        trades,
        max_loss: market.max_loss()?,
        final_state: market,
    })
}
