//! Linear (Jacobian) versus exact price impact of a single-outcome trade.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{invalid, Result};
use crate::lmsr_core::{jacobian, prices, trade};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ImpactComparison {
    pub outcome: usize,
    pub shares: f64,
    /// `J[:, outcome] * shares`
    pub estimated: Vec<f64>,
    /// `prices(q + delta) - prices(q)`
    pub exact: Vec<f64>,
    pub max_abs_error: f64,
}

/// First-order estimate of the price move from trading `shares` of `outcome`.
pub fn estimate_price_impact(q: &[f64], b: f64, outcome: usize, shares: f64) -> Result<Vec<f64>> {
    let j = jacobian(q, b)?;
    if outcome >= j.len() {
        return Err(invalid(format!(
            "outcome index {outcome} out of range for {} outcomes",
            j.len()
        )));
    }
    Ok(j.iter().map(|row| row[outcome] * shares).collect())
}

/// Price move obtained by actually executing the trade.
pub fn exact_price_impact(q: &[f64], b: f64, outcome: usize, shares: f64) -> Result<Vec<f64>> {
    let before = prices(q, b)?;
    let after = trade(q, b, outcome, shares)?.new_prices;
    Ok(after.iter().zip(&before).map(|(a, p)| a - p).collect())
}

pub fn compare_price_impact(
    q: &[f64],
    b: f64,
    outcome: usize,
    shares: f64,
) -> Result<ImpactComparison> {
    let estimated = estimate_price_impact(q, b, outcome, shares)?;
    let exact = exact_price_impact(q, b, outcome, shares)?;
    let max_abs_error = estimated
        .iter()
        .zip(&exact)
        .map(|(e, x)| (e - x).abs())
        .fold(0.0, f64::max);

    Ok(ImpactComparison {
        outcome,
        shares,
        estimated,
        exact,
        max_abs_error,
    })
}
