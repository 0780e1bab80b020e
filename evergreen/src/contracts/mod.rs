//! Output contracts: turning raw model responses into typed stage outputs.

mod structured;

pub use structured::{parse_structured, parse_text, ParseError};
