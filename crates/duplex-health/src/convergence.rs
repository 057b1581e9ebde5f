//! Convergence waiter: polls a slot until it is healthy and ready.
//!
//! The waiter is silent apart from its progress callback, which receives
//! the full snapshot on every poll. It never blocks past its timeout by
//! more than one poll interval and stops early on cancellation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use duplex_core::config::{ConvergenceConfig, DEFAULT_CONVERGENCE_TIMEOUT, DEFAULT_POLL_INTERVAL};
use duplex_core::*;

use crate::sampler::StatusSource;

/// How one traffic-target descriptor looks in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DescriptorReadiness {
    /// Every target healthy: receiving traffic.
    Serving { healthy: usize },
    /// Every target unused: ready, not receiving traffic.
    Ready { unused: usize },
    Initializing { initial: usize, total: usize },
    Failing { unhealthy: usize, total: usize },
    /// Some other combination (healthy next to unused, draining, ...).
    Mixed { total: usize },
    NoTargets,
}

impl DescriptorReadiness {
    pub fn classify(entries: &[TargetHealth]) -> Self {
        if entries.is_empty() {
            return DescriptorReadiness::NoTargets;
        }

        let total = entries.len();
        let count = |state| entries.iter().filter(|e| e.state == state).count();
        let healthy = count(TargetHealthState::Healthy);
        let unused = count(TargetHealthState::Unused);
        let initial = count(TargetHealthState::Initial);
        let unhealthy = count(TargetHealthState::Unhealthy);

        if healthy == total {
            DescriptorReadiness::Serving { healthy }
        } else if unused == total {
            DescriptorReadiness::Ready { unused }
        } else if initial > 0 {
            DescriptorReadiness::Initializing { initial, total }
        } else if unhealthy > 0 {
            DescriptorReadiness::Failing { unhealthy, total }
        } else {
            DescriptorReadiness::Mixed { total }
        }
    }

    /// Serving and Ready are the two settled states.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            DescriptorReadiness::Serving { .. } | DescriptorReadiness::Ready { .. }
        )
    }
}

/// Evaluation of the convergence predicate against one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub exists: bool,
    pub desired: u32,
    pub required_instances: u32,
    pub instances: usize,
    /// One entry per configured descriptor.
    pub descriptors: BTreeMap<String, DescriptorReadiness>,
}

impl Readiness {
    /// Evaluate `status` against the descriptors configured for `env`.
    ///
    /// `min_instances` raises the instance floor above the slot's desired
    /// capacity; it never lowers it.
    pub fn evaluate(env: &Environment, status: &EnvironmentStatus, min_instances: u32) -> Self {
        let descriptors = env
            .targets
            .keys()
            .map(|name| {
                let readiness = status
                    .health
                    .get(name)
                    .map(|entries| DescriptorReadiness::classify(entries))
                    .unwrap_or(DescriptorReadiness::NoTargets);
                (name.clone(), readiness)
            })
            .collect();

        Self {
            exists: status.exists,
            desired: status.capacity.desired,
            required_instances: status.capacity.desired.max(min_instances),
            instances: status.instances.len(),
            descriptors,
        }
    }

    pub fn is_converged(&self) -> bool {
        self.exists
            && self.desired > 0
            && self.descriptors.values().all(DescriptorReadiness::is_settled)
            && self.instances >= self.required_instances as usize
    }
}

/// Timing and floor for one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub min_instances: u32,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CONVERGENCE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            min_instances: 0,
        }
    }
}

impl From<&ConvergenceConfig> for WaitOptions {
    fn from(cfg: &ConvergenceConfig) -> Self {
        Self {
            timeout: cfg.timeout(),
            poll_interval: cfg.poll_interval(),
            min_instances: cfg.min_instances.unwrap_or(0),
        }
    }
}

/// What one poll saw.
#[derive(Debug, Clone)]
pub enum Observation {
    Sampled {
        status: EnvironmentStatus,
        readiness: Readiness,
    },
    /// The sample itself failed; the poll counts as not converged.
    SampleFailed { error: String },
}

/// Reported to the progress callback once per poll.
#[derive(Debug, Clone)]
pub struct ConvergenceProgress {
    pub color: Color,
    pub attempt: u32,
    pub elapsed: Duration,
    pub timeout: Duration,
    pub observation: Observation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceOutcome {
    Converged { attempts: u32, elapsed: Duration },
    TimedOut { attempts: u32, elapsed: Duration },
    Cancelled { attempts: u32, elapsed: Duration },
}

impl ConvergenceOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceOutcome::Converged { .. })
    }

    pub fn attempts(&self) -> u32 {
        match *self {
            ConvergenceOutcome::Converged { attempts, .. }
            | ConvergenceOutcome::TimedOut { attempts, .. }
            | ConvergenceOutcome::Cancelled { attempts, .. } => attempts,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match *self {
            ConvergenceOutcome::Converged { elapsed, .. }
            | ConvergenceOutcome::TimedOut { elapsed, .. }
            | ConvergenceOutcome::Cancelled { elapsed, .. } => elapsed,
        }
    }
}

/// Polls a [`StatusSource`] until the convergence predicate holds.
#[derive(Clone)]
pub struct ConvergenceWaiter {
    source: Arc<dyn StatusSource>,
}

impl ConvergenceWaiter {
    pub fn new(source: Arc<dyn StatusSource>) -> Self {
        Self { source }
    }

    /// Wait until `env` converges, the timeout elapses, or `cancel` fires.
    pub async fn wait_until_healthy<F>(
        &self,
        env: &Environment,
        options: &WaitOptions,
        cancel: &Cancellation,
        mut on_progress: F,
    ) -> ConvergenceOutcome
    where
        F: FnMut(&ConvergenceProgress) + Send,
    {
        let start = Instant::now();
        let mut attempt = 0u32;

        debug!(
            environment = %env.color,
            timeout_secs = options.timeout.as_secs_f64(),
            poll_secs = options.poll_interval.as_secs_f64(),
            "waiting for convergence"
        );

        loop {
            attempt += 1;

            // Bound each sample so a hung query cannot outlive the budget.
            let budget = options
                .timeout
                .saturating_sub(start.elapsed())
                .max(options.poll_interval);
            let sampled = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return self.cancelled(env, attempt, start.elapsed());
                }
                sampled = tokio::time::timeout(budget, self.source.sample(env)) => sampled,
            };

            let elapsed = start.elapsed();
            let (observation, converged) = match sampled {
                Ok(Ok(status)) => {
                    let readiness = Readiness::evaluate(env, &status, options.min_instances);
                    let converged = readiness.is_converged();
                    (Observation::Sampled { status, readiness }, converged)
                }
                Ok(Err(e)) => {
                    warn!(environment = %env.color, attempt, error = %e, "health sample failed");
                    (Observation::SampleFailed { error: e.to_string() }, false)
                }
                Err(_) => {
                    warn!(environment = %env.color, attempt, "health sample timed out");
                    (
                        Observation::SampleFailed {
                            error: format!("sample timed out after {budget:?}"),
                        },
                        false,
                    )
                }
            };

            on_progress(&ConvergenceProgress {
                color: env.color,
                attempt,
                elapsed,
                timeout: options.timeout,
                observation,
            });

            if converged {
                info!(
                    environment = %env.color,
                    attempts = attempt,
                    elapsed_secs = elapsed.as_secs(),
                    "environment converged"
                );
                return ConvergenceOutcome::Converged {
                    attempts: attempt,
                    elapsed,
                };
            }

            if elapsed >= options.timeout {
                warn!(
                    environment = %env.color,
                    attempts = attempt,
                    elapsed_secs = elapsed.as_secs(),
                    "convergence timed out"
                );
                return ConvergenceOutcome::TimedOut {
                    attempts: attempt,
                    elapsed,
                };
            }

            let pause = options.poll_interval.min(options.timeout - elapsed);
            if cancel.sleep(pause).await.is_err() {
                return self.cancelled(env, attempt, start.elapsed());
            }
        }
    }

    fn cancelled(&self, env: &Environment, attempts: u32, elapsed: Duration) -> ConvergenceOutcome {
        info!(environment = %env.color, attempts, "convergence wait cancelled");
        ConvergenceOutcome::Cancelled { attempts, elapsed }
    }
}
