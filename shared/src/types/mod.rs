//! Core data types

pub mod stack;
pub mod symbol;
