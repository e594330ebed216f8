//! Scenario P&L simulation for a portfolio of outcome positions.
//!
//! A [`Portfolio`] is valued against a list of hypothetical terminal
//! resolutions ([`Scenario`]). Each scenario pays 1 per share on at most one
//! outcome. Outcomes a scenario does not list pay 0, so an all-zero scenario
//! models a void resolution.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};
use ts_rs::TS;

use crate::config::SimulationConfig;
use crate::error::{invalid, EngineError, Result};

/// Label used for the all-void scenario generated by
/// [`Portfolio::resolution_scenarios`].
pub const VOID_SCENARIO_NAME: &str = "No clear winner / all void";

/// Holding in one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Position {
    pub shares: f64,
    pub avg_price: f64,
}

impl Position {
    pub fn new(shares: f64, avg_price: f64) -> Self {
        Self { shares, avg_price }
    }

    pub fn cost_basis(&self) -> f64 {
        self.shares * self.avg_price
    }
}

/// Outcome label to position. Serialises as a plain JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Portfolio {
    positions: BTreeMap<String, Position>,
}

// Goes through `insert` so a repeated JSON key is an error instead of last-wins.
impl<'de> Deserialize<'de> for Portfolio {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PortfolioVisitor;

        impl<'de> Visitor<'de> for PortfolioVisitor {
            type Value = Portfolio;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of outcome label to position")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Portfolio, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut portfolio = Portfolio::new();
                while let Some((label, position)) = map.next_entry::<String, Position>()? {
                    portfolio.insert(label, position).map_err(de::Error::custom)?;
                }
                Ok(portfolio)
            }
        }

        deserializer.deserialize_map(PortfolioVisitor)
    }
}

impl Portfolio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_positions<I, S>(positions: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Position)>,
        S: Into<String>,
    {
        let mut portfolio = Self::new();
        for (label, position) in positions {
            portfolio.insert(label, position)?;
        }
        Ok(portfolio)
    }

    /// Add a position. Labels are unique.
    pub fn insert(&mut self, label: impl Into<String>, position: Position) -> Result<()> {
        let label = label.into();
        validate_position(&label, &position)?;
        if self.positions.contains_key(&label) {
            return Err(invalid(format!("duplicate position label '{label}'")));
        }
        self.positions.insert(label, position);
        Ok(())
    }

    pub fn get(&self, label: &str) -> Option<&Position> {
        self.positions.get(label)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Position)> {
        self.positions.iter().map(|(label, p)| (label.as_str(), p))
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.positions.keys().map(String::as_str)
    }

    /// Σ shares × avg_price, recomputed on every call.
    pub fn cost_basis(&self) -> f64 {
        self.positions.values().map(Position::cost_basis).sum()
    }

    /// One "<label> wins" scenario per position plus the all-void case.
    pub fn resolution_scenarios(&self) -> Vec<Scenario> {
        let labels: Vec<&str> = self.labels().collect();
        let mut scenarios: Vec<Scenario> = labels
            .iter()
            .map(|label| Scenario::winner(format!("{label} wins"), label, labels.iter().copied()))
            .collect();
        scenarios.push(Scenario::void(VOID_SCENARIO_NAME, labels.iter().copied()));
        scenarios
    }
}

fn validate_position(label: &str, position: &Position) -> Result<()> {
    if !position.shares.is_finite() || !position.avg_price.is_finite() {
        return Err(invalid(format!(
            "position '{label}' must have finite shares and avg_price"
        )));
    }
    Ok(())
}

/// A named terminal resolution. JSON form is flat:
/// `{"name": "A wins", "A": 1, "B": 0, "probability": 0.4}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    #[serde(flatten)]
    pub payoffs: BTreeMap<String, f64>,
}

impl Scenario {
    pub fn new<I, S>(name: impl Into<String>, payoffs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            probability: None,
            payoffs: payoffs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// `winner` pays 1, every other label in `labels` pays 0.
    pub fn winner<'a>(
        name: impl Into<String>,
        winner: &str,
        labels: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self::new(
            name,
            labels
                .into_iter()
                .map(|label| (label, if label == winner { 1.0 } else { 0.0 })),
        )
    }

    /// Every label in `labels` pays 0.
    pub fn void<'a>(name: impl Into<String>, labels: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(name, labels.into_iter().map(|label| (label, 0.0)))
    }

    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = Some(probability);
        self
    }

    /// Payoff per share for `label`; unlisted outcomes pay 0.
    pub fn payoff(&self, label: &str) -> f64 {
        self.payoffs.get(label).copied().unwrap_or(0.0)
    }

    pub fn is_void(&self) -> bool {
        self.payoffs.values().all(|v| *v == 0.0)
    }

    fn validate(&self) -> Result<()> {
        if let Some((label, v)) = self
            .payoffs
            .iter()
            .find(|(_, v)| **v != 0.0 && **v != 1.0)
        {
            return Err(invalid(format!(
                "scenario '{}' pays {v} on '{label}', payoffs must be 0 or 1",
                self.name
            )));
        }
        let winners = self.payoffs.values().filter(|v| **v == 1.0).count();
        if winners > 1 {
            return Err(invalid(format!(
                "scenario '{}' has {winners} winning outcomes, at most one may pay 1",
                self.name
            )));
        }
        if let Some(p) = self.probability {
            validate_probability(&self.name, p)?;
        }
        Ok(())
    }
}

fn validate_probability(name: &str, p: f64) -> Result<()> {
    if !(p.is_finite() && p >= 0.0) {
        return Err(invalid(format!(
            "probability for scenario '{name}' must be finite and non-negative, got {p}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ScenarioRow {
    pub scenario: String,
    pub payout: f64,
    pub cost_basis: f64,
    pub pnl: f64,
    /// `None` when the cost basis is zero.
    pub roi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prob: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ev_contrib: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ScenarioSummary {
    pub best_case_pnl: Option<f64>,
    pub worst_case_pnl: Option<f64>,
    pub best_case_scenario: Option<String>,
    pub worst_case_scenario: Option<String>,
    /// `None` when no probabilities were supplied.
    pub expected_pnl: Option<f64>,
    pub total_cost: f64,
    pub probability_mass: Option<f64>,
    pub scenario_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ScenarioReport {
    /// Sorted by ascending pnl, worst case first.
    pub rows: Vec<ScenarioRow>,
    pub summary: ScenarioSummary,
}

impl ScenarioReport {
    /// Worst and best rows. Ties on the best pnl resolve to the earliest
    /// scenario.
    pub fn extremes(&self) -> Result<(&ScenarioRow, &ScenarioRow)> {
        let worst = self
            .rows
            .first()
            .ok_or(EngineError::EmptyInput("scenario report has no rows"))?;
        let best_pnl = self.rows.iter().map(|r| r.pnl).fold(f64::NEG_INFINITY, f64::max);
        let best = self
            .rows
            .iter()
            .find(|r| r.pnl == best_pnl)
            .ok_or(EngineError::EmptyInput("scenario report has no rows"))?;
        Ok((worst, best))
    }
}

/// `100 * pnl / cost_basis`.
pub fn roi_percent(pnl: f64, cost_basis: f64) -> Result<f64> {
    if cost_basis == 0.0 {
        return Err(EngineError::DivisionUndefined);
    }
    Ok(100.0 * pnl / cost_basis)
}

/// Decimal rounding with banker's midpoint handling.
pub(crate) fn round_dp(x: f64, dp: u32) -> f64 {
    Decimal::from_f64_retain(x)
        .map(|d| d.round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven))
        .and_then(|d| d.to_f64())
        .unwrap_or(x)
}

/// Scenario simulator carrying the probability normalisation policy.
#[derive(Debug, Clone, Default)]
pub struct Simulator {
    config: SimulationConfig,
}

impl Simulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Value `portfolio` under every scenario.
    ///
    /// An explicit non-empty `probabilities` map (scenario name to
    /// probability) takes precedence; otherwise per-scenario probabilities
    /// are used when any scenario carries one.
    pub fn simulate(
        &self,
        portfolio: &Portfolio,
        scenarios: &[Scenario],
        probabilities: Option<&BTreeMap<String, f64>>,
    ) -> Result<ScenarioReport> {
        for (label, position) in portfolio.iter() {
            validate_position(label, position)?;
        }
        for scenario in scenarios {
            scenario.validate()?;
        }
        let probs = resolve_probabilities(scenarios, probabilities)?;

        let total_cost = portfolio.cost_basis();
        debug!(
            positions = portfolio.len(),
            scenarios = scenarios.len(),
            total_cost,
            "simulating portfolio"
        );

        let mut rows: Vec<ScenarioRow> = scenarios
            .iter()
            .enumerate()
            .map(|(i, scenario)| {
                let payout: f64 = portfolio
                    .iter()
                    .map(|(label, position)| position.shares * scenario.payoff(label))
                    .sum();
                let pnl = payout - total_cost;
                let pnl_rounded = round_dp(pnl, 2);
                let prob = probs.as_ref().map(|p| p[i]);

                ScenarioRow {
                    scenario: scenario.name.clone(),
                    payout: round_dp(payout, 2),
                    cost_basis: round_dp(total_cost, 2),
                    pnl: pnl_rounded,
                    roi: roi_percent(pnl, total_cost).ok().map(|r| round_dp(r, 2)),
                    prob: prob.map(|p| round_dp(p, 4)),
                    ev_contrib: prob.map(|p| round_dp(pnl_rounded * p, 2)),
                }
            })
            .collect();

        rows.sort_by(|a, b| a.pnl.total_cmp(&b.pnl));

        let probability_mass = match (&probs, scenarios.is_empty()) {
            (Some(p), false) => {
                let mass: f64 = p.iter().sum();
                self.check_mass(mass)?;
                Some(mass)
            }
            _ => None,
        };
        let expected_pnl = probability_mass.map(|_| {
            round_dp(rows.iter().filter_map(|r| r.ev_contrib).sum(), 2)
        });

        let mut report = ScenarioReport {
            rows,
            summary: ScenarioSummary {
                best_case_pnl: None,
                worst_case_pnl: None,
                best_case_scenario: None,
                worst_case_scenario: None,
                expected_pnl,
                total_cost: round_dp(total_cost, 2),
                probability_mass,
                scenario_count: scenarios.len(),
            },
        };
        let extremes = report
            .extremes()
            .ok()
            .map(|(w, b)| (w.pnl, w.scenario.clone(), b.pnl, b.scenario.clone()));
        if let Some((worst_pnl, worst_name, best_pnl, best_name)) = extremes {
            report.summary.worst_case_pnl = Some(worst_pnl);
            report.summary.worst_case_scenario = Some(worst_name);
            report.summary.best_case_pnl = Some(best_pnl);
            report.summary.best_case_scenario = Some(best_name);
        }

        Ok(report)
    }

    fn check_mass(&self, mass: f64) -> Result<()> {
        if (mass - 1.0).abs() <= self.config.probability_tolerance {
            return Ok(());
        }
        if self.config.strict_probabilities {
            return Err(EngineError::ProbabilityMass { total: mass });
        }
        warn!(total = mass, "scenario probabilities do not sum to 1");
        Ok(())
    }
}

fn resolve_probabilities(
    scenarios: &[Scenario],
    explicit: Option<&BTreeMap<String, f64>>,
) -> Result<Option<Vec<f64>>> {
    if let Some(map) = explicit.filter(|m| !m.is_empty()) {
        for (name, p) in map {
            validate_probability(name, *p)?;
        }
        return Ok(Some(
            scenarios
                .iter()
                .map(|s| map.get(&s.name).copied().unwrap_or(0.0))
                .collect(),
        ));
    }
    if scenarios.iter().any(|s| s.probability.is_some()) {
        return Ok(Some(
            scenarios
                .iter()
                .map(|s| s.probability.unwrap_or(0.0))
                .collect(),
        ));
    }
    Ok(None)
}

/// [`Simulator::simulate`] with the default (lenient) configuration.
pub fn simulate_portfolio(
    portfolio: &Portfolio,
    scenarios: &[Scenario],
    probabilities: Option<&BTreeMap<String, f64>>,
) -> Result<ScenarioReport> {
    Simulator::default().simulate(portfolio, scenarios, probabilities)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn single_position() -> Portfolio {
        Portfolio::from_positions([("A", Position::new(100.0, 0.5))]).unwrap()
    }

    fn win_lose() -> Vec<Scenario> {
        vec![
            Scenario::new("A wins", [("A", 1.0)]),
            Scenario::new("A loses", [("A", 0.0)]),
        ]
    }

    #[test]
    fn win_and_lose_rows_sorted_worst_first() {
        let report = simulate_portfolio(&single_position(), &win_lose(), None).unwrap();

        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].scenario, "A loses");
        assert_eq!(report.rows[0].pnl, -50.0);
        assert_eq!(report.rows[0].roi, Some(-100.0));
        assert_eq!(report.rows[1].scenario, "A wins");
        assert_eq!(report.rows[1].pnl, 50.0);
        assert_eq!(report.rows[1].payout, 100.0);
        assert_eq!(report.rows[1].roi, Some(100.0));

        let s = &report.summary;
        assert_eq!(s.best_case_pnl, Some(50.0));
        assert_eq!(s.worst_case_pnl, Some(-50.0));
        assert_eq!(s.best_case_scenario.as_deref(), Some("A wins"));
        assert_eq!(s.total_cost, 50.0);
        assert_eq!(s.expected_pnl, None);
        assert!(report.rows.iter().all(|r| r.prob.is_none() && r.ev_contrib.is_none()));
    }

    #[test]
    fn zero_cost_basis_leaves_roi_undefined() {
        let portfolio = Portfolio::from_positions([("A", Position::new(0.0, 0.5))]).unwrap();
        let report = simulate_portfolio(&portfolio, &win_lose(), None).unwrap();
        assert!(report.rows.iter().all(|r| r.roi.is_none()));
        assert_eq!(roi_percent(1.0, 0.0), Err(EngineError::DivisionUndefined));
    }

    #[test]
    fn empty_scenarios_give_neutral_summary() {
        let report = simulate_portfolio(&single_position(), &[], None).unwrap();
        assert!(report.rows.is_empty());
        assert_eq!(report.summary.best_case_pnl, None);
        assert_eq!(report.summary.worst_case_pnl, None);
        assert_eq!(report.summary.expected_pnl, None);
        assert_eq!(report.summary.total_cost, 50.0);
        assert!(matches!(report.extremes(), Err(EngineError::EmptyInput(_))));

        let probs = BTreeMap::from([("A wins".to_string(), 1.0)]);
        let report = simulate_portfolio(&single_position(), &[], Some(&probs)).unwrap();
        assert_eq!(report.summary.expected_pnl, None);
    }

    #[test]
    fn empty_portfolio_pays_nothing() {
        let report = simulate_portfolio(&Portfolio::new(), &win_lose(), None).unwrap();
        assert_eq!(report.summary.total_cost, 0.0);
        for row in &report.rows {
            assert_eq!(row.payout, 0.0);
            assert_eq!(row.pnl, 0.0);
            assert!(row.roi.is_none());
        }
    }

    #[test]
    fn probabilities_weight_expected_pnl() {
        let probs = BTreeMap::from([
            ("A wins".to_string(), 0.25),
            ("A loses".to_string(), 0.75),
        ]);
        let report = simulate_portfolio(&single_position(), &win_lose(), Some(&probs)).unwrap();
        assert_eq!(report.rows[0].prob, Some(0.75));
        assert_eq!(report.rows[0].ev_contrib, Some(-37.5));
        assert_eq!(report.rows[1].ev_contrib, Some(12.5));
        assert_eq!(report.summary.expected_pnl, Some(-25.0));
        assert_eq!(report.summary.probability_mass, Some(1.0));
    }

    #[test]
    fn missing_probability_defaults_to_zero() {
        let probs = BTreeMap::from([("A wins".to_string(), 0.6)]);
        let report = simulate_portfolio(&single_position(), &win_lose(), Some(&probs)).unwrap();
        let loses = report.rows.iter().find(|r| r.scenario == "A loses").unwrap();
        assert_eq!(loses.prob, Some(0.0));
        assert_eq!(loses.ev_contrib, Some(0.0));
        assert_eq!(report.summary.expected_pnl, Some(30.0));
    }

    #[test]
    fn scenario_probabilities_used_without_explicit_map() {
        let scenarios = vec![
            Scenario::new("A wins", [("A", 1.0)]).with_probability(0.5),
            Scenario::new("A loses", [("A", 0.0)]).with_probability(0.5),
        ];
        let report = simulate_portfolio(&single_position(), &scenarios, None).unwrap();
        assert_eq!(report.summary.expected_pnl, Some(0.0));
    }

    #[test]
    fn strict_mode_rejects_unnormalised_probabilities() {
        let probs = BTreeMap::from([
            ("A wins".to_string(), 0.5),
            ("A loses".to_string(), 0.2),
        ]);
        let lenient = simulate_portfolio(&single_position(), &win_lose(), Some(&probs)).unwrap();
        assert!((lenient.summary.probability_mass.unwrap() - 0.7).abs() < 1e-12);

        let strict = Simulator::new(SimulationConfig {
            strict_probabilities: true,
            ..SimulationConfig::default()
        });
        let err = strict
            .simulate(&single_position(), &win_lose(), Some(&probs))
            .unwrap_err();
        assert!(matches!(err, EngineError::ProbabilityMass { .. }));
    }

    #[test]
    fn malformed_scenarios_are_rejected() {
        let two_winners = vec![Scenario::new("both", [("A", 1.0), ("B", 1.0)])];
        assert!(simulate_portfolio(&single_position(), &two_winners, None).is_err());

        let half = vec![Scenario::new("half", [("A", 0.5)])];
        assert!(simulate_portfolio(&single_position(), &half, None).is_err());

        let negative = vec![Scenario::new("neg", [("A", 1.0)]).with_probability(-0.1)];
        assert!(simulate_portfolio(&single_position(), &negative, None).is_err());
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let dup = Portfolio::from_positions([
            ("A", Position::new(1.0, 0.1)),
            ("A", Position::new(2.0, 0.2)),
        ]);
        assert!(matches!(dup, Err(EngineError::InvalidParameter(_))));
    }

    #[test]
    fn box_office_portfolio_matches_hand_computation() {
        let portfolio = Portfolio::from_positions([
            ("Zootopia 2", Position::new(350.0, 0.38)),
            ("Minecraft", Position::new(500.0, 0.34)),
            ("Wicked", Position::new(90.0, 0.06)),
            ("Avatar 2", Position::new(80.0, 0.09)),
        ])
        .unwrap();
        let scenarios = portfolio.resolution_scenarios();
        assert_eq!(scenarios.len(), 5);
        assert!(scenarios.last().unwrap().is_void());

        let report = simulate_portfolio(&portfolio, &scenarios, None).unwrap();
        // 133 + 170 + 5.4 + 7.2
        assert!(close(report.summary.total_cost, 315.6));
        assert_eq!(report.rows[0].scenario, VOID_SCENARIO_NAME);
        assert!(close(report.rows[0].pnl, -315.6));
        assert_eq!(report.summary.best_case_scenario.as_deref(), Some("Minecraft wins"));
        assert!(close(report.summary.best_case_pnl.unwrap(), 184.4));
    }

    #[test]
    fn flat_json_scenario_round_trip() {
        let json = r#"{"name":"A wins","A":1,"B":0,"probability":0.4}"#;
        let s: Scenario = serde_json::from_str(json).unwrap();
        assert_eq!(s.name, "A wins");
        assert_eq!(s.probability, Some(0.4));
        assert_eq!(s.payoff("A"), 1.0);
        assert_eq!(s.payoff("C"), 0.0);
    }

    #[test]
    fn rounding_is_decimal() {
        assert!(close(round_dp(0.125, 2), 0.12));
        assert!(close(round_dp(-315.6000000000001, 2), -315.6));
        assert!(close(round_dp(0.33333333, 4), 0.3333));
        assert!(close(round_dp(2.71828, 2), 2.72));
    }

    #[test]
    fn rounding_uses_the_binary_value() {
        // 2.675 and 1.015 are stored just below the midpoint
        assert!(close(round_dp(2.675, 2), 2.67));
        assert!(close(round_dp(1.015, 2), 1.01));
        assert!(close(round_dp(-2.675, 2), -2.67));
    }

    #[test]
    fn duplicate_labels_in_json_are_rejected() {
        let json = r#"{"A": {"shares": 10, "avg_price": 0.5}, "A": {"shares": 20, "avg_price": 0.4}}"#;
        let err = serde_json::from_str::<Portfolio>(json).unwrap_err();
        assert!(err.to_string().contains("duplicate position label 'A'"));

        let portfolio: Portfolio =
            serde_json::from_str(r#"{"A": {"shares": 10, "avg_price": 0.5}}"#).unwrap();
        assert_eq!(portfolio.get("A"), Some(&Position::new(10.0, 0.5)));
    }
}
