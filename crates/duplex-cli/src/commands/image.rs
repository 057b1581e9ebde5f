use tokio::time::Instant;

use duplex_registry::ArtifactOutcome;
use duplex_rollout::{DeployEvent, Release};

use super::deploy::{explain_partial, print_deploy_and_flip, release, stabilize};
use super::duration_flag;
use crate::context::Context;
use crate::render;

pub async fn wait(
    ctx: &Context,
    tag: &str,
    service: Option<String>,
    timeout: Option<String>,
) -> anyhow::Result<()> {
    let release = release(&ctx.config, tag.to_string(), service);
    let repositories = repositories(&release)?;
    let timeout = duration_flag("--timeout", timeout.as_deref())?
        .unwrap_or_else(|| ctx.config.registry.timeout());
    let poller = ctx.poller();
    let start = Instant::now();

    for repository in repositories {
        let outcome = poller
            .wait_for_artifact(
                repository,
                &release.tag,
                timeout.saturating_sub(start.elapsed()),
                &ctx.cancel,
                |p| println!("{}", render::describe(&DeployEvent::Artifact(p.clone()))),
            )
            .await;

        match outcome {
            ArtifactOutcome::Ready { elapsed, .. } => {
                println!("✓ {repository}:{} available after {}s", release.tag, elapsed.as_secs());
            }
            ArtifactOutcome::TimedOut { attempts, .. } => anyhow::bail!(
                "{repository}:{} not found after {attempts} checks in {}s",
                release.tag,
                start.elapsed().as_secs()
            ),
            ArtifactOutcome::Cancelled { .. } => {
                anyhow::bail!("cancelled while waiting for {repository}:{}", release.tag)
            }
        }
    }
    Ok(())
}

/// Repositories to poll for a release; a full-stack release needs
/// `[registry].repositories`.
pub(crate) fn repositories(release: &Release) -> anyhow::Result<&[String]> {
    if release.repositories.is_empty() {
        anyhow::bail!(
            "no registry repository for service {:?}; set [registry].repositories or pass --service",
            release.service
        );
    }
    Ok(&release.repositories)
}

pub async fn deploy_when_ready(
    ctx: &Context,
    tag: &str,
    service: Option<String>,
    wait: Option<u64>,
    timeout: Option<String>,
) -> anyhow::Result<()> {
    let release = release(&ctx.config, tag.to_string(), service);
    repositories(&release)?;
    let timeout = duration_flag("--timeout", timeout.as_deref())?
        .or(Some(ctx.config.registry.timeout()));

    let orchestrator = ctx.orchestrator(ctx.history()?, render::printer());
    let report = orchestrator
        .deploy_when_ready(&ctx.poller(), &release, timeout, stabilize(&ctx.config, wait))
        .await
        .map_err(explain_partial)?;
    print_deploy_and_flip(&report);
    Ok(())
}
