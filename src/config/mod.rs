//! # Grids Configuration Module
//!
//! This module centralizes all configuration constants for the crate. Constants
//! are grouped by their functional area and interdependencies are documented
//! and enforced through compile-time assertions.
//!
//! Runtime configuration lives with the objects it configures:
//! [`EnvironmentBuilder`](crate::environment::EnvironmentBuilder) for the
//! memory budget and cushion, [`GridBuilder`](crate::grid::GridBuilder) for
//! shape, encoding and statistics mode.
//!
//! ## Module Organization
//!
//! - [`constants`]: All numeric configuration values with dependency documentation

pub mod constants;
pub use constants::*;
