//! Declared active color from `terraform output`.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use duplex_core::ports::ActiveColorSource;
use duplex_core::*;

use crate::process::{self, CommandSpec};

/// Reads `terraform -chdir=<dir> output -json <name>`.
///
/// No timeout is applied here; the resolver bounds the call and the child
/// is killed when the call is abandoned.
#[derive(Debug, Clone)]
pub struct TerraformOutput {
    binary: String,
    workdir: PathBuf,
    chdir: String,
    output: String,
}

impl TerraformOutput {
    pub fn from_config(config: &DuplexConfig) -> Self {
        Self {
            binary: config.terraform.binary().to_string(),
            workdir: config.workdir(),
            chdir: config.terraform.chdir().to_string(),
            output: config.terraform.output().to_string(),
        }
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.binary)
            .arg(format!("-chdir={}", self.chdir))
            .args(["output", "-json", self.output.as_str()])
            .current_dir(&self.workdir)
    }
}

/// Parse the JSON-encoded output value (`"green"`).
pub(crate) fn parse_color(stdout: &str) -> InfraResult<Color> {
    let value: String = serde_json::from_str(stdout.trim()).map_err(|e| InfraError::Parse {
        what: "terraform output".to_string(),
        message: e.to_string(),
    })?;
    value.parse().map_err(|e: ParseColorError| InfraError::Parse {
        what: "terraform output".to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl ActiveColorSource for TerraformOutput {
    async fn declared_active(&self) -> InfraResult<Color> {
        let spec = self.command();
        let output = process::run(&spec, None).await?;
        if !output.success() && output.stderr.to_ascii_lowercase().contains("lock") {
            return Err(InfraError::Locked(output.stderr.trim().to_string()));
        }
        let output = process::check(&spec, output)?;
        let color = parse_color(&output.stdout)?;
        debug!(active = %color, "terraform declared active color");
        Ok(color)
    }
}

/// Whether a `terraform` process is running on this machine.
pub async fn terraform_running() -> bool {
    let spec = CommandSpec::new("pgrep").args(["-f", "terraform"]);
    matches!(process::run(&spec, None).await, Ok(output) if output.success())
}
