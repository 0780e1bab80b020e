//! Run context.
//!
//! This module provides:
//! - The append-only accumulator of completed stage results
//! - The per-run processing context handed to every stage
//! - Typed accessors for the canonical artifacts

mod accumulator;
mod canonical;
mod processing;

pub use accumulator::PreviousStages;
pub use canonical::{episode_crux, quote_set, require};
pub use processing::ProcessingContext;
