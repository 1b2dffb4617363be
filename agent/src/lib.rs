//! Guest stack sampling agent
//!
//! This library owns everything that talks to the sampling side of the
//! system: the gueststack debugfs control files, the external sampler
//! process, and the symbol tables used later to resolve captured addresses.

pub mod collector;
pub mod config;
pub mod debugfs;
pub mod error;
pub mod sampler;
pub mod session;

pub use collector::symbols::{load_tables, SymbolSources};
pub use config::{SamplerSource, SessionConfig};
pub use error::{AcquireError, SessionError};
pub use session::{EventCounters, SamplingSession, SessionStatus};
