//! gueststack server library
//!
//! Turns the stacks captured by the guest sampler into collapsed-stack text
//! and flame graphs, and exposes session control over HTTP.

pub mod aggregate;
pub mod annotate;
pub mod audit;
pub mod cache;
pub mod config;
pub mod error;
pub mod flamegraph;
pub mod metrics;
pub mod server;

pub use aggregate::{collapse, Collapser, Relevance, NO_SAMPLES};
pub use error::ServeError;
pub use flamegraph::Renderer;
