//! duplex-health: sampling and convergence for blue/green slots.
//!
//! # Architecture
//!
//! ```text
//! ConvergenceWaiter
//!   ├── StatusSource (HealthSampler in production)
//!   │   ├── ResourceQuery      → capacity + instance inventory
//!   │   ├── TrafficHealthQuery → per-descriptor target health
//!   │   └── PricingSource      → hourly cost (best effort)
//!   ├── Readiness::evaluate() → converged?
//!   └── progress callback per poll
//! ```
//!
//! # Convergence
//!
//! A slot is converged when every configured descriptor is either all
//! `healthy` (serving) or all `unused` (ready, not serving), and the slot
//! runs at least its desired number of instances. Anything else, including
//! a descriptor with no registered targets, keeps the waiter polling until
//! its timeout.

pub mod convergence;
pub mod sampler;

pub use convergence::{
    ConvergenceOutcome, ConvergenceProgress, ConvergenceWaiter, DescriptorReadiness, Observation,
    Readiness, WaitOptions,
};
pub use sampler::{HealthSampler, StatusSource};
