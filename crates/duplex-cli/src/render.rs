//! Terminal output: the confirmation prompt and the progress printer.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use duplex_core::{ActionOutput, Cancellation, EnvironmentStatus};
use duplex_health::{DescriptorReadiness, Observation};
use duplex_rollout::{Confirm, ConfirmRequest, DeployEvent, EventSink, ResolvedVia};

/// Declines once the run is interrupted, including while the operator
/// is still looking at the question. `prompting` is raised for as long
/// as the question is open.
pub struct Interruptible<C> {
    inner: C,
    cancel: Cancellation,
    prompting: Arc<AtomicBool>,
}

impl<C: Confirm> Interruptible<C> {
    pub fn new(inner: C, cancel: Cancellation, prompting: Arc<AtomicBool>) -> Self {
        Self {
            inner,
            cancel,
            prompting,
        }
    }
}

impl<C: Confirm> Confirm for Interruptible<C> {
    fn confirm(&self, request: &ConfirmRequest) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.prompting.store(true, Ordering::SeqCst);
        let approved = self.inner.confirm(request);
        self.prompting.store(false, Ordering::SeqCst);
        approved && !self.cancel.is_cancelled()
    }
}

/// Ask on stdin. Anything but `y`/`yes` declines.
pub fn prompt(request: &ConfirmRequest) -> bool {
    print!("{} [y/N] ", question(request));
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => is_yes(&answer),
        Err(_) => false,
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

pub fn question(request: &ConfirmRequest) -> String {
    match request {
        ConfirmRequest::Deploy {
            active,
            target,
            image_tag,
        } => match image_tag {
            Some(tag) => format!("Deploy {tag} to {target} (active: {active})?"),
            None => format!("Deploy to {target} (active: {active})?"),
        },
        ConfirmRequest::Flip {
            active,
            target,
            action,
        } => format!("Switch traffic {active} → {target} ({action})?"),
        ConfirmRequest::ScaleDown { active, inactive } => {
            format!("Scale {inactive} down to zero (active: {active})?")
        }
    }
}

/// Event sink that prints one line per step.
pub fn printer() -> EventSink {
    Arc::new(|event: &DeployEvent| {
        println!("{}", describe(event));
    })
}

pub fn describe(event: &DeployEvent) -> String {
    match event {
        DeployEvent::ActiveResolved(resolution) => {
            let via = match resolution.via {
                ResolvedVia::Declared => "terraform state",
                ResolvedVia::Heuristic => "capacity",
            };
            format!("Active environment: {} (from {via})", resolution.active)
        }
        DeployEvent::TargetSelected {
            target,
            preserve,
            fallback,
            ..
        } => {
            let note = if *fallback { " (defaults, active group missing)" } else { "" };
            format!(
                "Target: {target}, preserving desired={} min={} max={}{note}",
                preserve.desired, preserve.min, preserve.max
            )
        }
        DeployEvent::DeployOutput { line, .. } => format!("  {line}"),
        DeployEvent::DeployFinished { target, elapsed } => {
            format!("✓ Deploy to {target} finished in {}s", elapsed.as_secs())
        }
        DeployEvent::CompanionRestarted(restart) => match restart {
            duplex_core::CompanionRestart::Restarted { instance_id } => {
                format!("✓ Companion instance {instance_id} terminated for restart")
            }
            duplex_core::CompanionRestart::NotFound => "! No companion instance to restart".to_string(),
        },
        DeployEvent::CompanionFailed { error } => format!("! Companion restart failed: {error}"),
        DeployEvent::Convergence(progress) => {
            let state = match &progress.observation {
                Observation::Sampled { status, readiness } => {
                    let descriptors = readiness
                        .descriptors
                        .iter()
                        .map(|(name, r)| format!("{name}={}", readiness_label(r)))
                        .collect::<Vec<_>>()
                        .join(" ");
                    format!(
                        "{}/{} instances {descriptors}",
                        status.instance_count(),
                        readiness.required_instances
                    )
                }
                Observation::SampleFailed { error } => format!("sample failed: {error}"),
            };
            format!(
                "  [{}s/{}s] {} #{}: {state}",
                progress.elapsed.as_secs(),
                progress.timeout.as_secs(),
                progress.color,
                progress.attempt
            )
        }
        DeployEvent::HistoryRecorded { tag, service } => {
            format!("✓ Recorded {tag} for {service}")
        }
        DeployEvent::Stabilizing { target, duration } => {
            format!("Waiting {}s for {target} to stabilize", duration.as_secs())
        }
        DeployEvent::FlipStarted { target, action } => format!("Switching traffic to {target} ({action})"),
        DeployEvent::Flipped { target, .. } => format!("✓ Traffic now on {target}"),
        DeployEvent::ScaledDown { inactive, .. } => format!("✓ {inactive} scaled down"),
        DeployEvent::Artifact(progress) => {
            if progress.found {
                format!("✓ Image found after {} checks", progress.attempt)
            } else {
                match progress.next_delay {
                    Some(delay) => format!(
                        "  image not ready (check {}), retrying in {:.1}s",
                        progress.attempt,
                        delay.as_secs_f64()
                    ),
                    None => format!("  image not ready (check {})", progress.attempt),
                }
            }
        }
    }
}

/// Standard output of a finished action, indented. Empty when it printed
/// nothing.
pub fn action_stdout(output: &ActionOutput) -> String {
    output
        .stdout
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(|line| format!("  {line}\n"))
        .collect()
}

pub fn readiness_label(readiness: &DescriptorReadiness) -> String {
    match readiness {
        DescriptorReadiness::Serving { healthy } => format!("serving({healthy})"),
        DescriptorReadiness::Ready { unused } => format!("ready({unused})"),
        DescriptorReadiness::Initializing { initial, total } => format!("initializing({initial}/{total})"),
        DescriptorReadiness::Failing { unhealthy, total } => format!("failing({unhealthy}/{total})"),
        DescriptorReadiness::Mixed { total } => format!("mixed({total})"),
        DescriptorReadiness::NoTargets => "no-targets".to_string(),
    }
}

/// Multi-line summary of one slot for `duplex status`.
pub fn environment(status: &EnvironmentStatus, group: &str, active: bool) -> String {
    let mut out = String::new();
    let marker = if active { " (ACTIVE)" } else { "" };
    out.push_str(&format!("{}{marker}  {group}\n", status.color.as_str().to_uppercase()));

    if !status.exists {
        out.push_str("  group not found\n");
        return out;
    }

    let cap = status.capacity;
    out.push_str(&format!(
        "  capacity: desired={} min={} max={}\n",
        cap.desired, cap.min, cap.max
    ));
    for instance in &status.instances {
        out.push_str(&format!(
            "  {} {} {} {} up {} ${:.4}/h\n",
            instance.id,
            instance.instance_type,
            instance.lifecycle,
            instance.state,
            instance.uptime,
            instance.hourly_cost
        ));
    }
    for (name, targets) in &status.health {
        let readiness = DescriptorReadiness::classify(targets);
        out.push_str(&format!("  {name}: {}\n", readiness_label(&readiness)));
    }
    out.push_str(&format!(
        "  cost: ${:.4}/h, ${:.2}/month\n",
        status.total_hourly_cost(),
        status.total_monthly_cost()
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use chrono::Utc;
    use duplex_core::{ActiveEnvironment, Capacity, Color, TargetHealth, TargetHealthState};
    use duplex_rollout::SwitchAction;

    #[test]
    fn only_yes_confirms() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
    }

    fn scale_down() -> ConfirmRequest {
        ConfirmRequest::ScaleDown {
            active: Color::Blue,
            inactive: Color::Green,
        }
    }

    #[test]
    fn interrupted_run_declines_without_asking() {
        let (handle, cancel) = Cancellation::new();
        handle.cancel();
        let asked = AtomicBool::new(false);
        let confirm = Interruptible::new(
            |_: &ConfirmRequest| {
                asked.store(true, Ordering::SeqCst);
                true
            },
            cancel,
            Arc::default(),
        );

        assert!(!confirm.confirm(&scale_down()));
        assert!(!asked.load(Ordering::SeqCst));
    }

    #[test]
    fn interrupt_while_prompting_declines() {
        let (handle, cancel) = Cancellation::new();
        let prompting = Arc::new(AtomicBool::new(false));
        let confirm = Interruptible::new(
            |_: &ConfirmRequest| {
                assert!(prompting.load(Ordering::SeqCst));
                handle.cancel();
                true
            },
            cancel,
            prompting.clone(),
        );

        assert!(!confirm.confirm(&scale_down()));
        assert!(!prompting.load(Ordering::SeqCst));
    }

    #[test]
    fn answer_passes_through_when_not_interrupted() {
        let confirm = Interruptible::new(
            |_: &ConfirmRequest| true,
            Cancellation::never(),
            Arc::default(),
        );
        assert!(confirm.confirm(&scale_down()));
    }

    #[test]
    fn action_stdout_is_indented_and_skips_blank_lines() {
        let output = ActionOutput {
            exit_code: Some(0),
            stdout: "Apply complete!\n\nactive_color = \"green\"\n".to_string(),
            stderr: "ignored".to_string(),
        };
        assert_eq!(
            action_stdout(&output),
            "  Apply complete!\n  active_color = \"green\"\n"
        );
        assert_eq!(action_stdout(&ActionOutput::default()), "");
    }

    #[test]
    fn flip_question_names_unknown_active() {
        let q = question(&ConfirmRequest::Flip {
            active: ActiveEnvironment::Unknown,
            target: Color::Green,
            action: SwitchAction::Forward,
        });
        assert!(q.contains("unknown"));
        assert!(q.contains("green"));
    }

    #[test]
    fn status_shows_marker_and_readiness() {
        let status = EnvironmentStatus {
            color: Color::Green,
            exists: true,
            capacity: Capacity {
                desired: 1,
                min: 1,
                max: 2,
            },
            instances: Vec::new(),
            health: BTreeMap::from([(
                "api".to_string(),
                vec![TargetHealth {
                    target_id: "i-1".to_string(),
                    port: Some(8080),
                    state: TargetHealthState::Initial,
                }],
            )]),
            sampled_at: Utc::now(),
        };
        let text = environment(&status, "prod-green", true);
        assert!(text.starts_with("GREEN (ACTIVE)  prod-green"));
        assert!(text.contains("api: initializing(1/1)"));
    }

    #[test]
    fn missing_group_is_reported() {
        let status = EnvironmentStatus::missing(Color::Blue, Utc::now());
        let text = environment(&status, "prod-blue", false);
        assert!(text.contains("group not found"));
    }
}
