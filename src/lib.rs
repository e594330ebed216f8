//! AMM Simulator Library
//!
//! LMSR pricing for multi-outcome prediction markets and scenario P&L
//! analysis for portfolios of outcome positions.

// Re-export modules for use in binaries
pub mod config;
pub mod error;
pub mod input;
pub mod lmsr_core;
pub mod scenario;
pub mod sensitivity;
pub mod stress;

pub use error::{EngineError, Result};
