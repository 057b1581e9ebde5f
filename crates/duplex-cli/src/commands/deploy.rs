use std::time::Duration;

use anyhow::Context as _;

use duplex_core::config::DuplexConfig;
use duplex_health::WaitOptions;
use duplex_rollout::{DeployAndFlipError, DeployAndFlipReport, DeployReport, Release};
use duplex_state::DeployHistory;

use super::duration_flag;
use crate::context::Context;
use crate::render;

pub async fn deploy(
    ctx: &Context,
    yes: bool,
    tag: Option<String>,
    previous: bool,
    service: Option<String>,
    timeout: Option<String>,
) -> anyhow::Result<()> {
    let history = ctx.history()?;
    let tag = if previous {
        let tag = history
            .previous_tag()?
            .context("no previous deployment recorded in history")?;
        println!("Rolling back to previous tag {tag}");
        Some(tag)
    } else {
        tag
    };

    let mut wait = WaitOptions::from(&ctx.config.convergence);
    if let Some(timeout) = duration_flag("--timeout", timeout.as_deref())? {
        wait.timeout = timeout;
    }

    let mut orchestrator = ctx
        .orchestrator(history, render::printer())
        .with_wait_options(wait);
    if let Some(tag) = tag {
        orchestrator = orchestrator.with_release(release(&ctx.config, tag, service));
    }

    let confirm = ctx.confirmer(yes);
    let report = orchestrator.deploy_to_inactive(confirm.as_ref()).await?;
    print_deploy(&report);
    println!("Run `duplex flip {}` to switch traffic.", report.target);
    Ok(())
}

pub async fn deploy_and_flip(
    ctx: &Context,
    wait: Option<u64>,
    tag: Option<String>,
    service: Option<String>,
) -> anyhow::Result<()> {
    let mut orchestrator = ctx.orchestrator(ctx.history()?, render::printer());
    if let Some(tag) = tag {
        orchestrator = orchestrator.with_release(release(&ctx.config, tag, service));
    }
    let stabilize = stabilize(&ctx.config, wait);

    let report = orchestrator
        .deploy_and_flip(stabilize)
        .await
        .map_err(explain_partial)?;
    print_deploy_and_flip(&report);
    Ok(())
}

pub async fn scale_down(ctx: &Context, yes: bool) -> anyhow::Result<()> {
    let orchestrator = ctx.orchestrator(ctx.history()?, render::printer());
    let confirm = ctx.confirmer(yes);
    let report = orchestrator.scale_down_inactive(confirm.as_ref()).await?;
    print!("{}", render::action_stdout(&report.output));
    println!(
        "✓ {} scaled to zero, {} kept at desired={}",
        report.inactive, report.active, report.preserve.desired
    );
    Ok(())
}

pub(crate) fn release(config: &DuplexConfig, tag: String, service: Option<String>) -> Release {
    let service = service.unwrap_or_else(|| config.history.default_service().to_string());
    Release {
        repositories: config.registry.repositories_for(&service),
        tag,
        service,
    }
}

pub(crate) fn stabilize(config: &DuplexConfig, wait: Option<u64>) -> Duration {
    wait.map(Duration::from_secs)
        .unwrap_or_else(|| config.stabilize())
}

/// A deploy that landed but never received traffic still needs a manual
/// flip; say so before the error surfaces.
pub(crate) fn explain_partial(err: DeployAndFlipError) -> DeployAndFlipError {
    if let DeployAndFlipError::DeployedNotFlipped { target, .. }
    | DeployAndFlipError::StabilizeCancelled { target, .. } = &err
    {
        eprintln!("! {target} is deployed but not serving traffic. Run `duplex flip {target}` to finish.");
    }
    err
}

fn print_deploy(report: &DeployReport) {
    println!(
        "✓ {} converged after {} polls ({}s total)",
        report.target,
        report.convergence.attempts(),
        report.elapsed.as_secs()
    );
}

pub(crate) fn print_deploy_and_flip(report: &DeployAndFlipReport) {
    print_deploy(&report.deploy);
    print!("{}", render::action_stdout(&report.flip.output));
    println!(
        "✓ {} → {} complete in {}s",
        report.deploy.active,
        report.flip.target,
        report.elapsed.as_secs()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DuplexConfig {
        DuplexConfig::from_toml(
            r#"
stabilize = "45s"

[environments.blue]
group = "prod-blue"
[environments.green]
group = "prod-green"

[registry]
repositories = { api = "prod-api" }
"#,
        )
        .unwrap()
    }

    #[test]
    fn release_maps_service_to_repository() {
        let release = release(&config(), "main-9".to_string(), Some("api".to_string()));
        assert_eq!(release.repositories, ["prod-api"]);
        assert_eq!(release.service, "api");
    }

    #[test]
    fn release_defaults_to_full_stack() {
        let release = release(&config(), "main-9".to_string(), None);
        assert_eq!(release.service, "all");
        assert_eq!(release.repositories, ["prod-api"]);
    }

    #[test]
    fn full_stack_release_without_repositories_has_nothing_to_wait_on() {
        let config = DuplexConfig::from_toml(
            r#"
[environments.blue]
group = "prod-blue"
[environments.green]
group = "prod-green"
"#,
        )
        .unwrap();
        let release = release(&config, "main-9".to_string(), None);
        assert!(release.repositories.is_empty());
        assert!(crate::commands::image::repositories(&release).is_err());
    }

    #[test]
    fn stabilize_flag_overrides_config() {
        assert_eq!(stabilize(&config(), None), Duration::from_secs(45));
        assert_eq!(stabilize(&config(), Some(5)), Duration::from_secs(5));
    }
}
