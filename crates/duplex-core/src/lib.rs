//! duplex-core: shared types, configuration and ports for Duplex.
//!
//! Duplex runs a two-slot (blue/green) production deployment. This crate
//! holds the vocabulary every other crate speaks: colors, environment
//! snapshots, the `duplex.toml` config, the collaborator traits and the
//! cancellation token threaded through long waits.

pub mod cancel;
pub mod config;
pub mod error;
pub mod ports;
pub mod types;

pub use cancel::{CancelHandle, Cancellation, Cancelled};
pub use config::DuplexConfig;
pub use error::{ConfigError, InfraError, InfraResult};
pub use types::*;
