//! Deploy, flip and scale-down through `make` targets.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use duplex_core::config::MakeConfig;
use duplex_core::ports::{DeployTrigger, ScaleDownAction, TrafficSwitch};
use duplex_core::*;

use crate::process::{self, CommandSpec};

#[derive(Debug, Clone)]
pub struct MakeTargets {
    workdir: PathBuf,
    config: MakeConfig,
}

impl MakeTargets {
    pub fn new(workdir: impl Into<PathBuf>, config: MakeConfig) -> Self {
        Self {
            workdir: workdir.into(),
            config,
        }
    }

    pub fn from_config(config: &DuplexConfig) -> Self {
        Self::new(config.workdir(), config.make.clone())
    }

    fn make(&self, target: &str) -> CommandSpec {
        CommandSpec::new(self.config.binary())
            .arg(target)
            .current_dir(&self.workdir)
    }

    /// `make deploy:new-<color>` carrying the active slot's capacity.
    pub fn deploy_command(&self, params: &DeployParams) -> CommandSpec {
        let mut spec = self
            .make(&self.config.deploy_target(params.target))
            .args(capacity_args(&params.preserve));
        if let Some(tag) = &params.image_tag {
            spec = spec.arg(format!("IMAGE_TAG={tag}"));
        }
        spec
    }

    /// Both switch targets prompt; the answer is piped in.
    pub fn switch_command(&self, target: &str) -> CommandSpec {
        self.make(target).stdin("y\n")
    }

    pub fn scale_down_command(&self, inactive: Color, preserve: &Capacity) -> CommandSpec {
        self.make(&self.config.scale_down_target(inactive))
            .arg(format!("ACTIVE_DESIRED_CAPACITY={}", preserve.desired))
    }
}

fn capacity_args(preserve: &Capacity) -> [String; 3] {
    [
        format!("ACTIVE_DESIRED_CAPACITY={}", preserve.desired),
        format!("ACTIVE_MIN_SIZE={}", preserve.min),
        format!("ACTIVE_MAX_SIZE={}", preserve.max),
    ]
}

#[async_trait]
impl DeployTrigger for MakeTargets {
    async fn deploy(
        &self,
        params: &DeployParams,
        on_line: &(dyn for<'l> Fn(&'l str) + Send + Sync),
    ) -> InfraResult<ActionOutput> {
        let spec = self.deploy_command(params);
        info!(command = %spec, "running deploy");
        process::run_streaming(&spec, on_line).await
    }
}

#[async_trait]
impl TrafficSwitch for MakeTargets {
    async fn forward(&self) -> InfraResult<ActionOutput> {
        let spec = self.switch_command(self.config.flip());
        info!(command = %spec, "running forward flip");
        process::run(&spec, None).await
    }

    async fn rollback(&self) -> InfraResult<ActionOutput> {
        let spec = self.switch_command(self.config.rollback());
        info!(command = %spec, "running rollback flip");
        process::run(&spec, None).await
    }
}

#[async_trait]
impl ScaleDownAction for MakeTargets {
    async fn scale_down(&self, inactive: Color, preserve: &Capacity) -> InfraResult<ActionOutput> {
        let spec = self.scale_down_command(inactive, preserve);
        info!(command = %spec, "running scale-down");
        process::run(&spec, None).await
    }
}
