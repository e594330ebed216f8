//! Randomised stress tests for the LMSR engine and scenario simulator
//!
//! This module tests:
//! 1. **Correctness**: prices stay a probability vector, trade-cost signs
//! 2. **Financial Invariants**: buying then unwinding every position nets to zero
//! 3. **Performance**: trade throughput across many independent markets
//! 4. **Concurrency**: markets are simulated in parallel with rayon

use anyhow::{anyhow, Result};
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::Serialize;
use std::env;
use std::time::Instant;
use tracing::{error, info};

use crate::config::Config;
use crate::lmsr_core::Market;
use crate::scenario::{Portfolio, Position, Simulator};

// Simulation Parameters (defaults; override via STRESS_* env vars)
const NUM_MARKETS: usize = 1_000;
const OUTCOMES: usize = 4;
const TRADES_PER_MARKET: usize = 1_000;
const LIQUIDITY_B: f64 = 5000.0;
const SELL_PROBABILITY: f64 = 0.25;
const MAX_STAKE: f64 = 100.0;
const SEED: u64 = 42;

#[derive(Debug, Clone)]
pub struct StressConfig {
    pub num_markets: usize,
    pub outcomes: usize,
    pub trades_per_market: usize,
    pub liquidity_b: f64,
    pub sell_probability: f64,
    pub max_stake: f64,
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            num_markets: NUM_MARKETS,
            outcomes: OUTCOMES,
            trades_per_market: TRADES_PER_MARKET,
            liquidity_b: LIQUIDITY_B,
            sell_probability: SELL_PROBABILITY,
            max_stake: MAX_STAKE,
            seed: SEED,
        }
    }
}

impl StressConfig {
    pub fn from_env() -> Self {
        let num_markets = env_usize("STRESS_NUM_MARKETS", NUM_MARKETS);
        let outcomes = env_usize("STRESS_OUTCOMES", OUTCOMES);
        let trades_per_market = env_usize("STRESS_TRADES_PER_MARKET", TRADES_PER_MARKET);
        let liquidity_b = env_f64_min("STRESS_LIQUIDITY_B", LIQUIDITY_B, 1.0);
        let sell_probability =
            env_f64_clamped("STRESS_SELL_PROBABILITY", SELL_PROBABILITY, 0.0, 1.0);
        let max_stake = env_f64_min("STRESS_MAX_STAKE", MAX_STAKE, 0.01);
        let seed = env::var("STRESS_SEED")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(SEED);

        Self {
            num_markets,
            outcomes,
            trades_per_market,
            liquidity_b,
            sell_probability,
            max_stake,
            seed,
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
}

fn env_f64_clamped(name: &str, default: f64, min: f64, max: f64) -> f64 {
    env_f64(name, default).clamp(min, max)
}

fn env_f64_min(name: &str, default: f64, min: f64) -> f64 {
    env_f64(name, default).max(min)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StressReport {
    pub markets: usize,
    pub trades: usize,
    pub violations: usize,
    pub max_unwind_drift: f64,
    pub elapsed_ms: u128,
    pub trades_per_sec: f64,
}

#[derive(Debug, Default)]
struct MarketRun {
    trades: usize,
    violations: usize,
    unwind_drift: f64,
}

/// Runs every market in parallel and checks invariants along the way.
pub fn run_stress_test(stress: &StressConfig, config: &Config) -> Result<StressReport> {
    info!(
        markets = stress.num_markets,
        outcomes = stress.outcomes,
        trades_per_market = stress.trades_per_market,
        b = stress.liquidity_b,
        "starting LMSR stress run"
    );
    let start = Instant::now();

    let runs = (0..stress.num_markets)
        .into_par_iter()
        .map(|i| simulate_market(i, stress, config))
        .collect::<Result<Vec<_>>>()?;

    let elapsed = start.elapsed();
    let trades: usize = runs.iter().map(|r| r.trades).sum();
    let violations: usize = runs.iter().map(|r| r.violations).sum();
    let max_unwind_drift = runs.iter().map(|r| r.unwind_drift).fold(0.0, f64::max);
    let secs = elapsed.as_secs_f64();

    let report = StressReport {
        markets: runs.len(),
        trades,
        violations,
        max_unwind_drift,
        elapsed_ms: elapsed.as_millis(),
        trades_per_sec: if secs > 0.0 { trades as f64 / secs } else { 0.0 },
    };

    if violations > 0 {
        error!(violations, "invariant violations detected");
    }
    info!(
        trades = report.trades,
        elapsed_ms = report.elapsed_ms,
        trades_per_sec = report.trades_per_sec,
        max_unwind_drift = report.max_unwind_drift,
        "stress run finished"
    );
    Ok(report)
}

fn simulate_market(index: usize, stress: &StressConfig, config: &Config) -> Result<MarketRun> {
    let mut rng = StdRng::seed_from_u64(stress.seed.wrapping_add(index as u64));
    let mut market = Market::new(stress.outcomes, stress.liquidity_b)?;
    let mut held = vec![0.0; stress.outcomes];
    let mut cost_paid = vec![0.0; stress.outcomes];
    let mut cash = 0.0;
    let mut run = MarketRun::default();
    let tolerance = config.market.price_tolerance;

    for _ in 0..stress.trades_per_market {
        let outcome = rng.gen_range(0..stress.outcomes);
        let selling = held[outcome] > 0.0 && rng.gen_bool(stress.sell_probability);

        let result = if selling {
            let shares = held[outcome] * rng.gen_range(0.1..=1.0);
            let result = market.apply_trade(outcome, -shares)?;
            if result.dollars_spent > 0.0 {
                run.violations += 1;
            }
            held[outcome] -= shares;
            result
        } else {
            let stake = rng.gen_range(0.01..=stress.max_stake);
            let (shares, result) = market.apply_stake(outcome, stake)?;
            if result.dollars_spent < 0.0 || (result.dollars_spent - stake).abs() > 1e-6 {
                run.violations += 1;
            }
            held[outcome] += shares;
            cost_paid[outcome] += result.dollars_spent;
            result
        };
        cash -= result.dollars_spent;
        run.trades += 1;

        let total: f64 = result.new_prices.iter().sum();
        if (total - 1.0).abs() > tolerance {
            run.violations += 1;
        }
    }

    // Scenario check on the trader's book before unwinding
    let positions = held
        .iter()
        .zip(&cost_paid)
        .enumerate()
        .filter(|(_, (shares, _))| **shares > 0.0)
        .map(|(i, (shares, paid))| (format!("outcome-{i}"), Position::new(*shares, paid / shares)));
    let portfolio = Portfolio::from_positions(positions)?;
    let report = Simulator::new(config.simulation.clone()).simulate(
        &portfolio,
        &portfolio.resolution_scenarios(),
        None,
    )?;
    if report.rows.len() != portfolio.len() + 1 {
        return Err(anyhow!("market {index}: unexpected scenario row count"));
    }

    // Unwind everything; net cash must return to zero
    for (outcome, shares) in held.iter().enumerate() {
        if *shares != 0.0 {
            cash -= market.apply_trade(outcome, -shares)?.dollars_spent;
        }
    }
    run.unwind_drift = cash.abs();
    if run.unwind_drift > 1e-6 * stress.trades_per_market as f64 {
        run.violations += 1;
    }

    Ok(run)
}
