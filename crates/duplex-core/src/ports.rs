//! Ports: the narrow interfaces through which the core reaches the
//! outside world.
//!
//! Every cloud query, infra-tool invocation and external action goes
//! through one of these traits. Adapters live in `duplex-infra`; tests
//! supply scripted fakes.

use async_trait::async_trait;

use crate::error::InfraResult;
use crate::types::*;

/// Capacity and instance inventory for resource groups.
#[async_trait]
pub trait ResourceQuery: Send + Sync {
    /// Describe a resource group. `Ok(None)` when the group does not exist.
    async fn describe_group(&self, group: &str) -> InfraResult<Option<GroupInfo>>;

    /// Describe instances by id. Unknown ids are omitted from the result.
    async fn describe_instances(&self, ids: &[String]) -> InfraResult<Vec<InstanceInfo>>;
}

/// Per-target health for one traffic-target descriptor.
#[async_trait]
pub trait TrafficHealthQuery: Send + Sync {
    async fn target_health(&self, target: &str) -> InfraResult<Vec<TargetHealth>>;
}

/// Hourly price lookup for an instance.
#[async_trait]
pub trait PricingSource: Send + Sync {
    async fn hourly_cost(&self, instance: &InstanceInfo) -> InfraResult<f64>;
}

/// The declared active color from declarative-infra state.
///
/// Implementations may block on a state lock; callers bound the call
/// with their own timeout.
#[async_trait]
pub trait ActiveColorSource: Send + Sync {
    async fn declared_active(&self) -> InfraResult<Color>;
}

/// Long-running deploy of a new version into one slot.
#[async_trait]
pub trait DeployTrigger: Send + Sync {
    /// Runs to completion, handing each output line to `on_line` as it
    /// arrives. A non-success [`ActionOutput`] is a failed deploy.
    async fn deploy(
        &self,
        params: &DeployParams,
        on_line: &(dyn for<'l> Fn(&'l str) + Send + Sync),
    ) -> InfraResult<ActionOutput>;
}

/// The two traffic-switch actions. Forward moves traffic to the rollout
/// slot; rollback returns it to the default slot.
#[async_trait]
pub trait TrafficSwitch: Send + Sync {
    async fn forward(&self) -> InfraResult<ActionOutput>;
    async fn rollback(&self) -> InfraResult<ActionOutput>;
}

/// Scale the inactive slot to zero while preserving the active one.
#[async_trait]
pub trait ScaleDownAction: Send + Sync {
    async fn scale_down(&self, inactive: Color, preserve: &Capacity) -> InfraResult<ActionOutput>;
}

/// Forced restart of the singleton scheduler companion.
#[async_trait]
pub trait CompanionRestarter: Send + Sync {
    async fn restart(&self) -> InfraResult<CompanionRestart>;
}

/// Existence check for a build artifact.
#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    async fn artifact_exists(&self, repository: &str, tag: &str) -> InfraResult<bool>;
}
