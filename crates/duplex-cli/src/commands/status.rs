use serde::Serialize;

use duplex_core::{ActiveEnvironment, Color, EnvironmentStatus};
use duplex_rollout::Resolution;

use crate::context::Context;
use crate::render;

#[derive(Serialize)]
struct StatusReport {
    resolution: Resolution,
    environments: Vec<EnvironmentReport>,
}

#[derive(Serialize)]
struct EnvironmentReport {
    color: Color,
    group: String,
    active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<EnvironmentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub async fn run(ctx: &Context, json: bool) -> anyhow::Result<()> {
    if duplex_infra::terraform_running().await {
        tracing::warn!("terraform is running, declared state may be locked");
    }

    let envs = ctx.resolver.environments();
    let (resolution, blue, green) = tokio::join!(
        ctx.resolver.resolve(),
        ctx.sampler.sample(envs.get(Color::Blue)),
        ctx.sampler.sample(envs.get(Color::Green)),
    );

    let environments: Vec<_> = [(Color::Blue, blue), (Color::Green, green)]
        .into_iter()
        .map(|(color, sampled)| {
            let (status, error) = match sampled {
                Ok(status) => (Some(status), None),
                Err(e) => (None, Some(e.to_string())),
            };
            EnvironmentReport {
                color,
                group: envs.get(color).group.clone(),
                active: resolution.active == ActiveEnvironment::Resolved(color),
                status,
                error,
            }
        })
        .collect();

    if json {
        let report = StatusReport {
            resolution,
            environments,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}\n", render::describe(&duplex_rollout::DeployEvent::ActiveResolved(resolution)));
    let mut monthly = 0.0;
    for env in &environments {
        match (&env.status, &env.error) {
            (Some(status), _) => {
                monthly += status.total_monthly_cost();
                println!("{}", render::environment(status, &env.group, env.active));
            }
            (None, error) => {
                println!(
                    "{}  {}\n  sample failed: {}\n",
                    env.color.as_str().to_uppercase(),
                    env.group,
                    error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
    println!("Total: ${monthly:.2}/month");
    Ok(())
}
