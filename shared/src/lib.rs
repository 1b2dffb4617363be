//! Shared types and utilities for gueststack
//!
//! This crate contains the data model used by the sampling agent and the
//! aggregator: symbol tables, captured stacks, and the parser for the raw
//! per-CPU stack dumps produced by the guest stack sampler.

pub mod error;
pub mod protocol;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use error::ParseError;
pub use protocol::dump::{parse_stacks, parse_stacks_str};
pub use types::{stack::*, symbol::*};
