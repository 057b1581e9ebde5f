//! duplex-infra: concrete adapters behind the Duplex ports.
//!
//! Everything here shells out through `tokio::process`:
//!
//! - **`aws`**: `aws` CLI: groups, instances, target health, spot prices,
//!   ECR image lookups, companion restarts
//! - **`terraform`**: declared active color from `terraform output`
//! - **`make`**: deploy, flip, rollback and scale-down targets
//! - **`process`**: command spawning, capture and line streaming

pub mod aws;
pub mod make;
pub mod process;
pub mod terraform;

use std::sync::Arc;

use duplex_core::DuplexConfig;

pub use aws::{AwsCli, CompanionGroup};
pub use make::MakeTargets;
pub use terraform::{TerraformOutput, terraform_running};

/// Every adapter wired from one `duplex.toml`.
#[derive(Clone)]
pub struct Adapters {
    pub aws: Arc<AwsCli>,
    pub terraform: Arc<TerraformOutput>,
    pub make: Arc<MakeTargets>,
    pub companion: Option<Arc<CompanionGroup>>,
}

impl Adapters {
    pub fn from_config(config: &DuplexConfig) -> Self {
        let aws = AwsCli::from_config(config);
        let companion = config
            .companion
            .as_ref()
            .map(|c| Arc::new(CompanionGroup::new(aws.clone(), &c.group)));
        Self {
            aws: Arc::new(aws),
            terraform: Arc::new(TerraformOutput::from_config(config)),
            make: Arc::new(MakeTargets::from_config(config)),
            companion,
        }
    }
}
