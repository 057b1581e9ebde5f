//! duplex-rollout: blue/green orchestration.
//!
//! Drives one workflow per invocation: resolve which slot is live, deploy
//! into the other one, wait for it to converge, then optionally flip
//! traffic over. Every destructive step is gated on a known active slot
//! and an injected confirmation.
//!
//! # Components
//!
//! - **`resolver`**: Active slot from declared state, capacity heuristic as fallback
//! - **`flipper`**: Forward/rollback traffic switch
//! - **`orchestrator`**: Deploy, deploy-and-flip, scale-down, deploy-when-ready
//! - **`confirm`**: Injected confirmation strategy
//! - **`events`**: Progress events emitted to the caller
//! - **`error`**: Failures carrying step and last known state

pub mod confirm;
pub mod error;
pub mod events;
pub mod flipper;
pub mod orchestrator;
pub mod resolver;

#[cfg(test)]
mod testing;

pub use confirm::{AutoConfirm, Confirm, ConfirmRequest};
pub use error::{DeployAndFlipError, DeployError, DeployStep, FlipError, output_tail};
pub use events::{DeployEvent, EventSink};
pub use flipper::{FlipReport, SwitchAction, TrafficFlipper};
pub use orchestrator::{
    DeployAndFlipReport, DeployReport, DeploymentOrchestrator, Release, ScaleDownReport,
};
pub use resolver::{ActiveEnvironmentResolver, Resolution, ResolvedVia, resolve_from_capacities};
