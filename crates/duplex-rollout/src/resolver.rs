//! Active environment resolver.
//!
//! The declared color in infra state is trusted when it can be read in
//! time. A locked or slow state store is normal during concurrent infra
//! runs, so any failure falls back to comparing desired capacities.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use duplex_core::config::DEFAULT_TERRAFORM_TIMEOUT;
use duplex_core::ports::{ActiveColorSource, ResourceQuery};
use duplex_core::*;

/// Which path produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedVia {
    Declared,
    Heuristic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub active: ActiveEnvironment,
    pub via: ResolvedVia,
}

/// Capacity heuristic: exactly one slot with capacity is active.
pub fn resolve_from_capacities(blue: u32, green: u32) -> ActiveEnvironment {
    match (blue > 0, green > 0) {
        (true, false) => ActiveEnvironment::Resolved(Color::Blue),
        (false, true) => ActiveEnvironment::Resolved(Color::Green),
        _ => ActiveEnvironment::Unknown,
    }
}

#[derive(Clone)]
pub struct ActiveEnvironmentResolver {
    source: Arc<dyn ActiveColorSource>,
    resources: Arc<dyn ResourceQuery>,
    environments: Environments,
    timeout: Duration,
}

impl ActiveEnvironmentResolver {
    pub fn new(
        source: Arc<dyn ActiveColorSource>,
        resources: Arc<dyn ResourceQuery>,
        environments: Environments,
    ) -> Self {
        Self {
            source,
            resources,
            environments,
            timeout: DEFAULT_TERRAFORM_TIMEOUT,
        }
    }

    /// Bound on the declared-state read.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn environments(&self) -> &Environments {
        &self.environments
    }

    pub fn resources(&self) -> &Arc<dyn ResourceQuery> {
        &self.resources
    }

    pub async fn resolve(&self) -> Resolution {
        match tokio::time::timeout(self.timeout, self.source.declared_active()).await {
            Ok(Ok(color)) => {
                debug!(active = %color, "active environment declared");
                return Resolution {
                    active: ActiveEnvironment::Resolved(color),
                    via: ResolvedVia::Declared,
                };
            }
            Ok(Err(e)) if e.is_lock_contention() => {
                warn!(error = %e, "infra state locked, falling back to capacity heuristic");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "declared active color unavailable, falling back to capacity heuristic");
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs_f64(),
                    "declared active color timed out (state may be locked), falling back to capacity heuristic"
                );
            }
        }

        Resolution {
            active: self.heuristic().await,
            via: ResolvedVia::Heuristic,
        }
    }

    async fn heuristic(&self) -> ActiveEnvironment {
        let blue = self.environments.get(Color::Blue);
        let green = self.environments.get(Color::Green);
        let (b, g) = tokio::join!(
            self.resources.describe_group(&blue.group),
            self.resources.describe_group(&green.group),
        );

        let (b, g) = match (b, g) {
            (Ok(b), Ok(g)) => (desired(b), desired(g)),
            (Err(e), _) | (_, Err(e)) => {
                // A failed lookup is not the same as zero capacity.
                warn!(error = %e, "capacity lookup failed, active environment unknown");
                return ActiveEnvironment::Unknown;
            }
        };

        let active = resolve_from_capacities(b, g);
        debug!(blue = b, green = g, %active, "active environment from capacities");
        active
    }
}

fn desired(group: Option<GroupInfo>) -> u32 {
    group.map(|g| g.capacity.desired).unwrap_or(0)
}
