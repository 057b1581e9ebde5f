//! Persisted history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One successful deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRecord {
    /// Image tag that was deployed (e.g. `main-3f2a9c1`).
    pub tag: String,
    /// Service name, or `all` for a full-stack deploy.
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub deployed_by: String,
}

impl DeployRecord {
    /// A record stamped now. The actor defaults to `$USER`/`$USERNAME`.
    pub fn new(tag: &str, service: &str, deployed_by: Option<&str>) -> Self {
        Self {
            tag: tag.to_string(),
            service: service.to_string(),
            timestamp: Utc::now(),
            deployed_by: deployed_by
                .map(str::to_string)
                .unwrap_or_else(current_user),
        }
    }
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
