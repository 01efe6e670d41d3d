//! backfill-engine: resumable historical backfill for statistical time series
//!
//! Pulls observations from a registry of external sources year by year,
//! records checkpoints so interrupted runs resume where they stopped, and
//! keeps the resulting store honest: cross-source contradictions, coverage
//! gaps and stale series are measured against the same observation table.

pub mod adapters;
pub mod backfill;
pub mod calendar;
pub mod commands;
pub mod config;
pub mod contradiction;
pub mod coverage;
pub mod error;
pub mod freshness;
pub mod models;
pub mod progress;
pub mod registry;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
