//! Error type shared by the pricing engine and the scenario simulator

use thiserror::Error;

/// Errors surfaced by the numerical core
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Liquidity, outcome index, vector shape or payoff is unusable
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// A ratio was requested against a zero cost basis
    #[error("division undefined: cost basis is zero")]
    DivisionUndefined,
    /// An operation that needs at least one element received none
    #[error("empty input: {0}")]
    EmptyInput(&'static str),
    /// Scenario probabilities do not sum to one (strict mode only)
    #[error("scenario probabilities sum to {total}, expected 1")]
    ProbabilityMass { total: f64 },
}

pub type Result<T> = std::result::Result<T, EngineError>;

pub(crate) fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidParameter(msg.into())
}
