//! duplex.toml configuration parser.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{Color, Environment, Environments};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_TERRAFORM_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_STABILIZE: Duration = Duration::from_secs(30);
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_EXPONENT: u32 = 3;
pub const DEFAULT_JITTER_RATIO: f64 = 0.2;
pub const DEFAULT_ARTIFACT_TIMEOUT: Duration = Duration::from_secs(1200);
pub const DEFAULT_ON_DEMAND_HOURLY: f64 = 0.0094;
pub const DEFAULT_HISTORY_MAX: usize = 50;
/// Service name of a release that ships every service at once.
pub const FULL_STACK_SERVICE: &str = "all";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplexConfig {
    pub region: Option<String>,
    pub profile: Option<String>,
    /// Root of the infrastructure repo; external actions run from here.
    pub workdir: Option<PathBuf>,
    /// The default/safe slot. Flipping to it is a rollback.
    pub default_color: Option<Color>,
    pub stabilize: Option<String>,
    pub environments: EnvironmentsConfig,
    pub companion: Option<CompanionConfig>,
    #[serde(default)]
    pub terraform: TerraformConfig,
    #[serde(default)]
    pub make: MakeConfig,
    #[serde(default)]
    pub convergence: ConvergenceConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentsConfig {
    pub blue: EnvironmentConfig,
    pub green: EnvironmentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub group: String,
    #[serde(default)]
    pub targets: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionConfig {
    pub group: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerraformConfig {
    pub binary: Option<String>,
    pub chdir: Option<String>,
    pub output: Option<String>,
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MakeConfig {
    pub binary: Option<String>,
    pub deploy_prefix: Option<String>,
    pub flip: Option<String>,
    pub rollback: Option<String>,
    pub scale_down_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    pub timeout: Option<String>,
    pub poll_interval: Option<String>,
    pub min_instances: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub base_delay: Option<String>,
    pub max_delay: Option<String>,
    pub max_exponent: Option<u32>,
    pub jitter: Option<f64>,
    pub timeout: Option<String>,
    /// Service name → repository name.
    #[serde(default)]
    pub repositories: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Instance type → on-demand USD per hour.
    #[serde(default)]
    pub on_demand_hourly: BTreeMap<String, f64>,
    pub default_on_demand: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub path: Option<PathBuf>,
    pub max_entries: Option<usize>,
    pub default_service: Option<String>,
}

impl DuplexConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: DuplexConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let blue = self.environments.blue.group.trim();
        let green = self.environments.green.group.trim();
        if blue.is_empty() || green.is_empty() {
            return Err(ConfigError::Invalid(
                "environments.blue.group and environments.green.group must be set".to_string(),
            ));
        }
        if blue == green {
            return Err(ConfigError::Invalid(format!(
                "blue and green share the same group {blue:?}"
            )));
        }
        if self.convergence.poll_interval().is_zero() {
            return Err(ConfigError::Invalid(
                "convergence.poll_interval must be greater than zero".to_string(),
            ));
        }
        let durations = [
            ("stabilize", self.stabilize.as_deref()),
            ("terraform.timeout", self.terraform.timeout.as_deref()),
            ("convergence.timeout", self.convergence.timeout.as_deref()),
            ("convergence.poll_interval", self.convergence.poll_interval.as_deref()),
            ("registry.base_delay", self.registry.base_delay.as_deref()),
            ("registry.max_delay", self.registry.max_delay.as_deref()),
            ("registry.timeout", self.registry.timeout.as_deref()),
        ];
        for (key, value) in durations {
            if let Some(value) = value.filter(|v| parse_duration(v).is_none()) {
                return Err(ConfigError::Invalid(format!(
                    "{key}: invalid duration {value:?} (expected e.g. \"500ms\", \"30s\", \"10m\", \"1h\")"
                )));
            }
        }
        let jitter = self.registry.jitter_ratio();
        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::Invalid(format!(
                "registry.jitter must be within [0, 1], got {jitter}"
            )));
        }
        Ok(())
    }

    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }

    pub fn workdir(&self) -> PathBuf {
        self.workdir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn default_color(&self) -> Color {
        self.default_color.unwrap_or(Color::Blue)
    }

    pub fn stabilize(&self) -> Duration {
        duration_or(self.stabilize.as_deref(), DEFAULT_STABILIZE)
    }

    pub fn environments(&self) -> Environments {
        let build = |color, cfg: &EnvironmentConfig| Environment {
            color,
            group: cfg.group.clone(),
            targets: cfg.targets.clone(),
        };
        Environments::new(
            build(Color::Blue, &self.environments.blue),
            build(Color::Green, &self.environments.green),
        )
    }
}

impl TerraformConfig {
    pub fn binary(&self) -> &str {
        self.binary.as_deref().unwrap_or("terraform")
    }

    pub fn chdir(&self) -> &str {
        self.chdir.as_deref().unwrap_or("terraform/prod")
    }

    pub fn output(&self) -> &str {
        self.output.as_deref().unwrap_or("active_color")
    }

    pub fn timeout(&self) -> Duration {
        duration_or(self.timeout.as_deref(), DEFAULT_TERRAFORM_TIMEOUT)
    }
}

impl MakeConfig {
    pub fn binary(&self) -> &str {
        self.binary.as_deref().unwrap_or("make")
    }

    pub fn deploy_target(&self, color: Color) -> String {
        format!("{}{color}", self.deploy_prefix.as_deref().unwrap_or("deploy:new-"))
    }

    pub fn flip(&self) -> &str {
        self.flip.as_deref().unwrap_or("deploy:flip")
    }

    pub fn rollback(&self) -> &str {
        self.rollback.as_deref().unwrap_or("deploy:rollback")
    }

    pub fn scale_down_target(&self, color: Color) -> String {
        format!(
            "{}{color}",
            self.scale_down_prefix.as_deref().unwrap_or("deploy:scale-down-")
        )
    }
}

impl ConvergenceConfig {
    pub fn timeout(&self) -> Duration {
        duration_or(self.timeout.as_deref(), DEFAULT_CONVERGENCE_TIMEOUT)
    }

    pub fn poll_interval(&self) -> Duration {
        duration_or(self.poll_interval.as_deref(), DEFAULT_POLL_INTERVAL)
    }
}

impl RegistryConfig {
    pub fn base_delay(&self) -> Duration {
        duration_or(self.base_delay.as_deref(), DEFAULT_BASE_DELAY)
    }

    pub fn max_delay(&self) -> Duration {
        duration_or(self.max_delay.as_deref(), DEFAULT_MAX_DELAY)
    }

    pub fn max_exponent(&self) -> u32 {
        self.max_exponent.unwrap_or(DEFAULT_MAX_EXPONENT)
    }

    pub fn jitter_ratio(&self) -> f64 {
        self.jitter.unwrap_or(DEFAULT_JITTER_RATIO)
    }

    pub fn timeout(&self) -> Duration {
        duration_or(self.timeout.as_deref(), DEFAULT_ARTIFACT_TIMEOUT)
    }

    /// Repositories a release of `service` publishes to.
    ///
    /// A mapped service gets its repository. An unmapped full-stack release
    /// gets every configured repository, and is empty when none are. Any
    /// other unmapped service falls back to its own name.
    pub fn repositories_for(&self, service: &str) -> Vec<String> {
        if let Some(repository) = self.repositories.get(service) {
            return vec![repository.clone()];
        }
        if service == FULL_STACK_SERVICE {
            let mut all: Vec<String> = self.repositories.values().cloned().collect();
            all.sort();
            all.dedup();
            return all;
        }
        vec![service.to_string()]
    }
}

impl PricingConfig {
    pub fn on_demand(&self, instance_type: &str) -> f64 {
        self.on_demand_hourly
            .get(instance_type)
            .copied()
            .or(self.default_on_demand)
            .unwrap_or(DEFAULT_ON_DEMAND_HOURLY)
    }
}

impl HistoryConfig {
    pub fn max_entries(&self) -> usize {
        self.max_entries.unwrap_or(DEFAULT_HISTORY_MAX)
    }

    pub fn default_service(&self) -> &str {
        self.default_service.as_deref().unwrap_or(FULL_STACK_SERVICE)
    }
}

/// Parse a duration string like "5s", "500ms", "2m".
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.trim().parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.trim().parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        let mins = mins.trim().parse::<u64>().ok()?;
        mins.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        let hours = hours.trim().parse::<u64>().ok()?;
        hours.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn duration_or(value: Option<&str>, default: Duration) -> Duration {
    value.and_then(parse_duration).unwrap_or(default)
}
