//! duplex-registry: waits for a build artifact to appear in a registry.
//!
//! The poller is a precondition gate for the deploy-when-ready workflow.
//! It is stateless between calls and knows nothing about blue/green.

pub mod backoff;
pub mod poller;

pub use backoff::Backoff;
pub use poller::{ArtifactOutcome, ArtifactProgress, ImageReadinessPoller};
