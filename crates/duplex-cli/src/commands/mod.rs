pub mod deploy;
pub mod flip;
pub mod history;
pub mod image;
pub mod status;

use duplex_core::config::parse_duration;

/// Parse an optional `--timeout`-style flag.
pub(crate) fn duration_flag(flag: &str, value: Option<&str>) -> anyhow::Result<Option<std::time::Duration>> {
    value
        .map(|v| parse_duration(v).ok_or_else(|| anyhow::anyhow!("invalid {flag}: {v:?}")))
        .transpose()
}
