//! Image readiness poller: waits until a tag exists in a registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use duplex_core::Cancellation;
use duplex_core::ports::ArtifactRegistry;

use crate::backoff::Backoff;

/// Reported after every existence check.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactProgress {
    pub attempt: u32,
    pub elapsed: Duration,
    pub found: bool,
    /// Error from the registry, if the check itself failed.
    pub error: Option<String>,
    /// Pause before the next check, `None` once the poll is over.
    pub next_delay: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOutcome {
    Ready { attempts: u32, elapsed: Duration },
    TimedOut { attempts: u32, elapsed: Duration },
    Cancelled { attempts: u32, elapsed: Duration },
}

impl ArtifactOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ArtifactOutcome::Ready { .. })
    }

    pub fn attempts(&self) -> u32 {
        match *self {
            ArtifactOutcome::Ready { attempts, .. }
            | ArtifactOutcome::TimedOut { attempts, .. }
            | ArtifactOutcome::Cancelled { attempts, .. } => attempts,
        }
    }
}

/// Polls an [`ArtifactRegistry`] with exponential backoff.
#[derive(Clone)]
pub struct ImageReadinessPoller {
    registry: Arc<dyn ArtifactRegistry>,
    backoff: Backoff,
}

impl ImageReadinessPoller {
    pub fn new(registry: Arc<dyn ArtifactRegistry>) -> Self {
        Self {
            registry,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Wait for `repository:tag` to exist.
    ///
    /// Returns as soon as a check finds the tag. A failed check is logged
    /// and treated as "not yet". No pause ever extends past `timeout`.
    pub async fn wait_for_artifact<F>(
        &self,
        repository: &str,
        tag: &str,
        timeout: Duration,
        cancel: &Cancellation,
        mut on_progress: F,
    ) -> ArtifactOutcome
    where
        F: FnMut(&ArtifactProgress) + Send,
    {
        let start = Instant::now();
        let mut attempt = 0u32;

        info!(repository, tag, timeout_secs = timeout.as_secs(), "waiting for image");

        loop {
            attempt += 1;

            let checked = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return ArtifactOutcome::Cancelled { attempts: attempt, elapsed: start.elapsed() };
                }
                checked = self.registry.artifact_exists(repository, tag) => checked,
            };

            let (found, error) = match checked {
                Ok(found) => (found, None),
                Err(e) => {
                    warn!(repository, tag, attempt, error = %e, "registry check failed");
                    (false, Some(e.to_string()))
                }
            };

            let elapsed = start.elapsed();
            let remaining = timeout.saturating_sub(elapsed);
            let next_delay = if found || remaining.is_zero() {
                None
            } else {
                Some(self.backoff.delay(attempt).min(remaining))
            };

            on_progress(&ArtifactProgress {
                attempt,
                elapsed,
                found,
                error,
                next_delay,
            });

            if found {
                info!(repository, tag, attempts = attempt, elapsed_secs = elapsed.as_secs(), "image found");
                return ArtifactOutcome::Ready {
                    attempts: attempt,
                    elapsed,
                };
            }

            let Some(delay) = next_delay else {
                warn!(repository, tag, attempts = attempt, "timed out waiting for image");
                return ArtifactOutcome::TimedOut {
                    attempts: attempt,
                    elapsed,
                };
            };

            debug!(repository, tag, attempt, delay_ms = delay.as_millis() as u64, "image not found yet");
            if cancel.sleep(delay).await.is_err() {
                return ArtifactOutcome::Cancelled {
                    attempts: attempt,
                    elapsed: start.elapsed(),
                };
            }
        }
    }
}
