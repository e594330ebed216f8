//! src/lmsr_core.rs
//! Numerically stable N-outcome LMSR core with f64 math.
//!
//! The free functions work on raw inventory slices; [`Market`] wraps a
//! validated `(q, b)` pair and is the only place inventory is mutated.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use ts_rs::TS;

use crate::error::{invalid, EngineError, Result};

/// `exp` overflows f64 just above 709; keep stake inversions well clear of it.
const MAX_EXPONENT: f64 = 700.0;

/// Plain serialisable form of a market. Converted into [`Market`] through
/// validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MarketState {
    /// Cumulative net shares sold per outcome.
    pub q: Vec<f64>,
    /// Liquidity parameter.
    pub b: f64,
}

/// Core LMSR market state.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MarketState", into = "MarketState")]
pub struct Market {
    q: Vec<f64>,
    b: f64,
}

/// Outcome of pricing or executing a single-outcome trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TradeResult {
    pub new_q: Vec<f64>,
    /// Positive when the trader pays, negative when the trader is paid.
    pub dollars_spent: f64,
    pub new_prices: Vec<f64>,
}

impl fmt::Debug for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Market")
            .field("q", &self.q)
            .field("b", &self.b)
            .field("prices", &prices(&self.q, self.b).ok())
            .finish()
    }
}

impl TryFrom<MarketState> for Market {
    type Error = EngineError;

    fn try_from(state: MarketState) -> Result<Self> {
        Market::with_inventory(state.q, state.b)
    }
}

impl From<Market> for MarketState {
    fn from(market: Market) -> Self {
        MarketState {
            q: market.q,
            b: market.b,
        }
    }
}

impl Market {
    /// Fresh market with `outcomes` outcomes and zero inventory.
    pub fn new(outcomes: usize, b: f64) -> Result<Self> {
        Self::with_inventory(vec![0.0; outcomes], b)
    }

    pub fn with_inventory(q: Vec<f64>, b: f64) -> Result<Self> {
        validate(&q, b)?;
        Ok(Self { q, b })
    }

    pub fn q(&self) -> &[f64] {
        &self.q
    }

    pub fn b(&self) -> f64 {
        self.b
    }

    pub fn outcomes(&self) -> usize {
        self.q.len()
    }

    pub fn cost(&self) -> Result<f64> {
        cost(&self.q, self.b)
    }

    pub fn prices(&self) -> Result<Vec<f64>> {
        prices(&self.q, self.b)
    }

    pub fn jacobian(&self) -> Result<Vec<Vec<f64>>> {
        jacobian(&self.q, self.b)
    }

    /// Worst-case subsidy the market maker can lose on this market.
    pub fn max_loss(&self) -> Result<f64> {
        max_loss(self.outcomes(), self.b)
    }

    /// Price a trade without touching the inventory.
    pub fn quote(&self, outcome: usize, shares: f64) -> Result<TradeResult> {
        trade(&self.q, self.b, outcome, shares)
    }

    /// Buy (shares > 0) or sell (shares < 0) `shares` of `outcome`.
    pub fn apply_trade(&mut self, outcome: usize, shares: f64) -> Result<TradeResult> {
        let result = trade(&self.q, self.b, outcome, shares)?;
        self.q.clone_from(&result.new_q);
        debug!(
            outcome,
            shares,
            dollars = result.dollars_spent,
            "applied LMSR trade"
        );
        Ok(result)
    }

    /// Spend (stake > 0) or raise (stake < 0) a currency amount on one outcome.
    /// Returns the signed share count traded together with the trade result.
    pub fn apply_stake(&mut self, outcome: usize, stake: f64) -> Result<(f64, TradeResult)> {
        let shares = shares_for_cost(&self.q, self.b, outcome, stake)?;
        let result = self.apply_trade(outcome, shares)?;
        Ok((shares, result))
    }
}

// -----------------------
// Numerically stable math
// -----------------------

fn validate(q: &[f64], b: f64) -> Result<()> {
    if !(b.is_finite() && b > 0.0) {
        return Err(invalid(format!("liquidity b must be positive and finite, got {b}")));
    }
    if q.is_empty() {
        return Err(invalid("market needs at least one outcome"));
    }
    if let Some(bad) = q.iter().find(|x| !x.is_finite()) {
        return Err(invalid(format!("inventory entries must be finite, got {bad}")));
    }
    Ok(())
}

fn check_outcome(q: &[f64], outcome: usize) -> Result<()> {
    if outcome >= q.len() {
        return Err(invalid(format!(
            "outcome index {outcome} out of range for {} outcomes",
            q.len()
        )));
    }
    Ok(())
}

/// `ln(Σ exp(x_i))` with the maximum factored out.
#[inline]
pub fn log_sum_exp(xs: &[f64]) -> f64 {
    let m = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if m == f64::NEG_INFINITY {
        // empty or all -inf
        return m;
    }
    m + xs.iter().map(|x| (x - m).exp()).sum::<f64>().ln()
}

/// LMSR cost function `C(q) = b * ln(Σ exp(q_i / b))`.
pub fn cost(q: &[f64], b: f64) -> Result<f64> {
    validate(q, b)?;
    let scaled: Vec<f64> = q.iter().map(|x| x / b).collect();
    Ok(b * log_sum_exp(&scaled))
}

/// Softmax prices of `q / b`. Entries are positive and sum to one.
pub fn prices(q: &[f64], b: f64) -> Result<Vec<f64>> {
    validate(q, b)?;
    Ok(softmax(q, b))
}

fn softmax(q: &[f64], b: f64) -> Vec<f64> {
    let m = q.iter().map(|x| x / b).fold(f64::NEG_INFINITY, f64::max);
    let weights: Vec<f64> = q.iter().map(|x| (x / b - m).exp()).collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// Exact currency needed to move the inventory from `q` to `q + delta`.
///
/// Evaluated as `b * ln(1 + Σ p_j (exp(delta_j / b) - 1))`, which equals
/// `C(q + delta) - C(q)` and keeps the sign of a pure buy or pure sell exact.
/// Falls back to the cost difference when that form overflows.
pub fn trade_cost(q: &[f64], delta: &[f64], b: f64) -> Result<f64> {
    validate(q, b)?;
    if delta.len() != q.len() {
        return Err(invalid(format!(
            "delta has {} entries, inventory has {}",
            delta.len(),
            q.len()
        )));
    }
    if let Some(bad) = delta.iter().find(|x| !x.is_finite()) {
        return Err(invalid(format!("delta entries must be finite, got {bad}")));
    }
    if delta.iter().all(|d| *d == 0.0) {
        return Ok(0.0);
    }

    let p = softmax(q, b);
    let growth: f64 = p
        .iter()
        .zip(delta)
        .map(|(p_j, d_j)| p_j * (d_j / b).exp_m1())
        .sum();
    let stable = b * growth.ln_1p();
    if stable.is_finite() {
        return Ok(stable);
    }

    let moved: Vec<f64> = q.iter().zip(delta).map(|(q_j, d_j)| q_j + d_j).collect();
    Ok(cost(&moved, b)? - cost(q, b)?)
}

/// Buy (shares > 0) or sell (shares < 0) `shares` of `outcome`.
pub fn trade(q: &[f64], b: f64, outcome: usize, shares: f64) -> Result<TradeResult> {
    validate(q, b)?;
    check_outcome(q, outcome)?;
    if !shares.is_finite() {
        return Err(invalid(format!("share count must be finite, got {shares}")));
    }
    if shares == 0.0 {
        return Ok(TradeResult {
            new_q: q.to_vec(),
            dollars_spent: 0.0,
            new_prices: softmax(q, b),
        });
    }

    let mut delta = vec![0.0; q.len()];
    delta[outcome] = shares;
    let dollars_spent = trade_cost(q, &delta, b)?;

    let mut new_q = q.to_vec();
    new_q[outcome] += shares;
    let new_prices = prices(&new_q, b)?;

    Ok(TradeResult {
        new_q,
        dollars_spent,
        new_prices,
    })
}

/// `∂p_i/∂q_j` at state `q`: `J[i][j] = (1/b) * p_i * (δ_ij - p_j)`.
///
/// This is a first-order approximation only. `J[:, j] * shares` estimates the
/// price move for a small trade in outcome `j`; for exact post-trade prices
/// call [`trade`] or [`prices`], especially for large trades where softmax
/// curvature dominates.
pub fn jacobian(q: &[f64], b: f64) -> Result<Vec<Vec<f64>>> {
    let p = prices(q, b)?;
    Ok(p.iter()
        .enumerate()
        .map(|(i, p_i)| {
            p.iter()
                .enumerate()
                .map(|(j, p_j)| {
                    let kronecker = if i == j { 1.0 } else { 0.0 };
                    p_i * (kronecker - p_j) / b
                })
                .collect::<Vec<f64>>()
        })
        .collect())
}

/// Closed-form share count for a signed currency amount on one outcome.
///
/// `Δ = b * ln((exp(S/b) - 1 + p_i) / p_i)`. A positive stake buys, a negative
/// stake sells enough shares to receive `-stake`.
pub fn shares_for_cost(q: &[f64], b: f64, outcome: usize, stake: f64) -> Result<f64> {
    validate(q, b)?;
    check_outcome(q, outcome)?;
    if !stake.is_finite() {
        return Err(invalid(format!("stake must be finite, got {stake}")));
    }
    if stake == 0.0 {
        return Ok(0.0);
    }
    if stake / b > MAX_EXPONENT {
        return Err(invalid(format!(
            "stake too large relative to liquidity parameter: stake/b = {}",
            stake / b
        )));
    }

    let p_i = softmax(q, b)[outcome];
    let growth = (stake / b).exp_m1();
    let ratio = growth / p_i;
    if ratio <= -1.0 {
        return Err(invalid(format!(
            "cannot raise {} by selling outcome {outcome} at price {p_i}",
            -stake
        )));
    }
    let shares = b * ratio.ln_1p();
    if shares.is_finite() {
        return Ok(shares);
    }

    // p_i underflowed: Δ = b * (ln(exp_m1(S/b) + p_i) - ln p_i) in log space
    let scaled: Vec<f64> = q.iter().map(|x| x / b).collect();
    let ln_p_i = scaled[outcome] - log_sum_exp(&scaled);
    let shares = b * ((growth + p_i).ln() - ln_p_i);
    if !shares.is_finite() {
        return Err(invalid(format!(
            "stake {stake} on outcome {outcome} has no finite share count"
        )));
    }
    Ok(shares)
}

/// Bounded loss of an LMSR market maker: `b * ln(N)`.
pub fn max_loss(outcomes: usize, b: f64) -> Result<f64> {
    if outcomes == 0 {
        return Err(invalid("market needs at least one outcome"));
    }
    if !(b.is_finite() && b > 0.0) {
        return Err(invalid(format!("liquidity b must be positive and finite, got {b}")));
    }
    Ok(b * (outcomes as f64).ln())
}

// -----------------------
// Tests
// -----------------------
