//! Health sampler: a fresh, read-only snapshot of one slot.
//!
//! Combines the group description, instance inventory, per-descriptor
//! target health and pricing into an [`EnvironmentStatus`]. The instance
//! and health lookups are independent and run concurrently.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use duplex_core::ports::{PricingSource, ResourceQuery, TrafficHealthQuery};
use duplex_core::*;

/// Anything that can produce a snapshot of a slot.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn sample(&self, env: &Environment) -> InfraResult<EnvironmentStatus>;
}

/// Samples slots through the resource, traffic-health and pricing ports.
#[derive(Clone)]
pub struct HealthSampler {
    resources: Arc<dyn ResourceQuery>,
    traffic: Arc<dyn TrafficHealthQuery>,
    pricing: Arc<dyn PricingSource>,
}

impl HealthSampler {
    pub fn new(
        resources: Arc<dyn ResourceQuery>,
        traffic: Arc<dyn TrafficHealthQuery>,
        pricing: Arc<dyn PricingSource>,
    ) -> Self {
        Self {
            resources,
            traffic,
            pricing,
        }
    }

    /// Sample one slot.
    ///
    /// A missing resource group is not an error: the snapshot comes back
    /// with `exists = false`, zero capacity and no instances or health.
    /// A failed price lookup counts the instance at 0.0 rather than
    /// failing the sample.
    pub async fn sample(&self, env: &Environment) -> InfraResult<EnvironmentStatus> {
        let now = Utc::now();

        let group = match self.resources.describe_group(&env.group).await? {
            Some(group) => group,
            None => {
                debug!(environment = %env.color, group = %env.group, "resource group not found");
                return Ok(EnvironmentStatus::missing(env.color, now));
            }
        };

        let (instances, health) = tokio::join!(
            self.priced_instances(&group.instance_ids, now),
            self.descriptor_health(env),
        );

        let status = EnvironmentStatus {
            color: env.color,
            exists: true,
            capacity: group.capacity,
            instances: instances?,
            health: health?,
            sampled_at: now,
        };

        debug!(
            environment = %env.color,
            desired = status.capacity.desired,
            instances = status.instances.len(),
            descriptors = status.health.len(),
            "environment sampled"
        );
        Ok(status)
    }

    async fn priced_instances(
        &self,
        ids: &[String],
        now: DateTime<Utc>,
    ) -> InfraResult<Vec<InstanceSnapshot>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut infos = self.resources.describe_instances(ids).await?;
        // Keep group order; the inventory is free to reorder.
        infos.sort_by_key(|info| ids.iter().position(|id| *id == info.id));

        let mut snapshots = Vec::with_capacity(infos.len());
        for info in infos {
            let cost = match self.pricing.hourly_cost(&info).await {
                Ok(cost) => cost,
                Err(e) => {
                    warn!(
                        instance = %info.id,
                        instance_type = %info.instance_type,
                        error = %e,
                        "pricing lookup failed, counting instance at zero cost"
                    );
                    0.0
                }
            };
            snapshots.push(InstanceSnapshot::from_info(info, cost, now));
        }
        Ok(snapshots)
    }

    async fn descriptor_health(
        &self,
        env: &Environment,
    ) -> InfraResult<BTreeMap<String, Vec<TargetHealth>>> {
        let mut health = BTreeMap::new();
        for (name, target) in &env.targets {
            let entries = self.traffic.target_health(target).await?;
            health.insert(name.clone(), entries);
        }
        Ok(health)
    }
}

#[async_trait]
impl StatusSource for HealthSampler {
    async fn sample(&self, env: &Environment) -> InfraResult<EnvironmentStatus> {
        HealthSampler::sample(self, env).await
    }
}
