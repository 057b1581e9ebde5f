//! Deployment orchestrator: deploy into the inactive slot and gate on
//! convergence, optionally flipping traffic afterwards.
//!
//! The target is always the complement of the resolved active slot. An
//! unknown active slot aborts before any side effect.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use duplex_core::config::DEFAULT_ARTIFACT_TIMEOUT;
use duplex_core::ports::{CompanionRestarter, DeployTrigger, ScaleDownAction};
use duplex_core::*;
use duplex_health::{ConvergenceOutcome, ConvergenceWaiter, WaitOptions};
use duplex_registry::{ArtifactOutcome, ImageReadinessPoller};
use duplex_state::{DeployHistory, DeployRecord};

use crate::confirm::{AutoConfirm, Confirm, ConfirmRequest};
use crate::error::{DeployAndFlipError, DeployError, DeployStep};
use crate::events::{self, DeployEvent, EventSink};
use crate::flipper::{FlipReport, SwitchAction, TrafficFlipper};
use crate::resolver::ActiveEnvironmentResolver;

/// The build being rolled out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub tag: String,
    /// Service name recorded in history, `all` for a full-stack deploy.
    pub service: String,
    /// Registry repositories that must all hold the tag before a
    /// deploy-when-ready deploys.
    pub repositories: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DeployReport {
    pub active: Color,
    pub target: Color,
    pub preserve: Capacity,
    pub companion: Option<CompanionRestart>,
    pub convergence: ConvergenceOutcome,
    /// Tag appended to history, if any.
    pub recorded: Option<String>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct DeployAndFlipReport {
    pub deploy: DeployReport,
    pub flip: FlipReport,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct ScaleDownReport {
    pub active: Color,
    pub inactive: Color,
    pub preserve: Capacity,
    pub output: ActionOutput,
}

/// Runs deploy workflows against the two slots.
#[derive(Clone)]
pub struct DeploymentOrchestrator {
    resolver: ActiveEnvironmentResolver,
    trigger: Arc<dyn DeployTrigger>,
    waiter: ConvergenceWaiter,
    flipper: TrafficFlipper,
    companion: Option<Arc<dyn CompanionRestarter>>,
    scaler: Option<Arc<dyn ScaleDownAction>>,
    history: Option<Arc<dyn DeployHistory>>,
    release: Option<Release>,
    wait: WaitOptions,
    events: EventSink,
    cancel: Cancellation,
}

impl DeploymentOrchestrator {
    pub fn new(
        resolver: ActiveEnvironmentResolver,
        trigger: Arc<dyn DeployTrigger>,
        waiter: ConvergenceWaiter,
        flipper: TrafficFlipper,
    ) -> Self {
        Self {
            resolver,
            trigger,
            waiter,
            flipper,
            companion: None,
            scaler: None,
            history: None,
            release: None,
            wait: WaitOptions::default(),
            events: events::discard(),
            cancel: Cancellation::never(),
        }
    }

    pub fn with_companion(mut self, companion: Arc<dyn CompanionRestarter>) -> Self {
        self.companion = Some(companion);
        self
    }

    pub fn with_scale_down(mut self, scaler: Arc<dyn ScaleDownAction>) -> Self {
        self.scaler = Some(scaler);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn DeployHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Attach a release: its tag goes to the deploy trigger and to history.
    pub fn with_release(mut self, release: Release) -> Self {
        self.release = Some(release);
        self
    }

    pub fn with_wait_options(mut self, wait: WaitOptions) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn flipper(&self) -> &TrafficFlipper {
        &self.flipper
    }

    fn emit(&self, event: DeployEvent) {
        (self.events)(&event);
    }

    // ── Deploy ─────────────────────────────────────────────────────

    /// Deploy into the inactive slot and wait for it to converge.
    pub async fn deploy_to_inactive(&self, confirm: &dyn Confirm) -> Result<DeployReport, DeployError> {
        self.deploy_release(confirm, self.release.as_ref()).await
    }

    async fn deploy_release(
        &self,
        confirm: &dyn Confirm,
        release: Option<&Release>,
    ) -> Result<DeployReport, DeployError> {
        let start = Instant::now();

        let (active, target) = self.resolve_target(DeployStep::ResolveActive).await?;

        let image_tag = release.map(|r| r.tag.clone());
        let request = ConfirmRequest::Deploy {
            active,
            target,
            image_tag: image_tag.clone(),
        };
        if !confirm.confirm(&request) {
            info!(%active, %target, "deploy declined");
            return Err(DeployError::Declined {
                step: DeployStep::Confirm,
                active,
                target,
            });
        }

        let preserve = self.preserved_capacity(active, target, start).await?;

        let params = DeployParams {
            target,
            preserve,
            image_tag,
        };
        info!(
            %active,
            %target,
            desired = preserve.desired,
            min = preserve.min,
            max = preserve.max,
            image_tag = params.image_tag.as_deref().unwrap_or("-"),
            "deploying to inactive environment"
        );

        let on_line = |line: &str| {
            self.emit(DeployEvent::DeployOutput {
                target,
                line: line.to_string(),
            })
        };
        let deployed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(self.cancelled(DeployStep::Deploy, active, target, start));
            }
            deployed = self.trigger.deploy(&params, &on_line) => deployed,
        };
        let output = deployed.map_err(|source| DeployError::Infra {
            step: DeployStep::Deploy,
            active,
            target,
            elapsed: start.elapsed(),
            source,
        })?;
        if !output.success() {
            error!(%target, exit_code = ?output.exit_code, "deploy action failed");
            return Err(DeployError::ActionFailed {
                step: DeployStep::Deploy,
                active,
                target,
                exit_code: output.exit_code,
                elapsed: start.elapsed(),
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        self.emit(DeployEvent::DeployFinished {
            target,
            elapsed: start.elapsed(),
        });

        let companion = self.restart_companion().await;

        let env = self.resolver.environments().get(target);
        let events = self.events.clone();
        let convergence = self
            .waiter
            .wait_until_healthy(env, &self.wait, &self.cancel, move |progress| {
                events(&DeployEvent::Convergence(progress.clone()))
            })
            .await;

        match convergence {
            ConvergenceOutcome::Converged { .. } => {}
            ConvergenceOutcome::TimedOut { attempts, elapsed } => {
                return Err(DeployError::ConvergenceTimeout {
                    active,
                    target,
                    attempts,
                    elapsed,
                });
            }
            ConvergenceOutcome::Cancelled { .. } => {
                return Err(self.cancelled(DeployStep::Converge, active, target, start));
            }
        }

        let recorded = release.and_then(|r| self.record(r));

        let elapsed = start.elapsed();
        info!(%target, elapsed_secs = elapsed.as_secs(), "deploy converged");
        Ok(DeployReport {
            active,
            target,
            preserve,
            companion,
            convergence,
            recorded,
            elapsed,
        })
    }

    /// Resolve the active slot and return `(active, complement)`.
    async fn resolve_target(&self, step: DeployStep) -> Result<(Color, Color), DeployError> {
        let resolution = self.resolver.resolve().await;
        self.emit(DeployEvent::ActiveResolved(resolution));

        match resolution.active {
            ActiveEnvironment::Resolved(active) => Ok((active, active.complement())),
            ActiveEnvironment::Unknown => {
                error!("active environment is unknown, aborting");
                Err(DeployError::AmbiguousActive { step })
            }
        }
    }

    /// Active slot capacity to carry through the deploy. A missing group
    /// falls back to 1/1/2; a failed lookup aborts.
    async fn preserved_capacity(
        &self,
        active: Color,
        target: Color,
        start: Instant,
    ) -> Result<Capacity, DeployError> {
        let group = &self.resolver.environments().get(active).group;
        let (preserve, fallback) = match self.resolver.resources().describe_group(group).await {
            Ok(Some(info)) => (info.capacity, false),
            Ok(None) => {
                warn!(environment = %active, %group, "active group not found, preserving default capacity");
                (Capacity::FALLBACK, true)
            }
            Err(source) => {
                return Err(DeployError::Infra {
                    step: DeployStep::ReadCapacity,
                    active,
                    target,
                    elapsed: start.elapsed(),
                    source,
                });
            }
        };

        self.emit(DeployEvent::TargetSelected {
            active,
            target,
            preserve,
            fallback,
        });
        Ok(preserve)
    }

    async fn restart_companion(&self) -> Option<CompanionRestart> {
        let companion = self.companion.as_ref()?;
        match companion.restart().await {
            Ok(restart) => {
                match &restart {
                    CompanionRestart::Restarted { instance_id } => {
                        info!(instance = %instance_id, "companion restarted")
                    }
                    CompanionRestart::NotFound => warn!("no companion instance found to restart"),
                }
                self.emit(DeployEvent::CompanionRestarted(restart.clone()));
                Some(restart)
            }
            Err(e) => {
                warn!(error = %e, "companion restart failed, continuing");
                self.emit(DeployEvent::CompanionFailed {
                    error: e.to_string(),
                });
                None
            }
        }
    }

    fn record(&self, release: &Release) -> Option<String> {
        let history = self.history.as_ref()?;
        let record = DeployRecord::new(&release.tag, &release.service, None);
        match history.append(&record) {
            Ok(()) => {
                debug!(tag = %release.tag, service = %release.service, "deploy recorded");
                self.emit(DeployEvent::HistoryRecorded {
                    tag: release.tag.clone(),
                    service: release.service.clone(),
                });
                Some(release.tag.clone())
            }
            Err(e) => {
                warn!(tag = %release.tag, error = %e, "failed to record deploy in history");
                None
            }
        }
    }

    fn cancelled(&self, step: DeployStep, active: Color, target: Color, start: Instant) -> DeployError {
        warn!(%step, %active, %target, "workflow cancelled");
        DeployError::Cancelled {
            step,
            active,
            target,
            elapsed: start.elapsed(),
        }
    }

    // ── Deploy and flip ────────────────────────────────────────────

    /// Deploy with auto-confirm, stabilize, then flip to the new slot.
    pub async fn deploy_and_flip(
        &self,
        stabilize: Duration,
    ) -> Result<DeployAndFlipReport, DeployAndFlipError> {
        self.deploy_and_flip_release(self.release.as_ref(), stabilize)
            .await
    }

    async fn deploy_and_flip_release(
        &self,
        release: Option<&Release>,
        stabilize: Duration,
    ) -> Result<DeployAndFlipReport, DeployAndFlipError> {
        let start = Instant::now();
        let deploy = self.deploy_release(&AutoConfirm, release).await?;
        let (active, target) = (deploy.active, deploy.target);

        info!(%target, stabilize_secs = stabilize.as_secs(), "stabilizing before flip");
        self.emit(DeployEvent::Stabilizing {
            target,
            duration: stabilize,
        });
        if self.cancel.sleep(stabilize).await.is_err() {
            warn!(%target, "cancelled during stabilization, traffic not flipped");
            return Err(DeployAndFlipError::StabilizeCancelled {
                active,
                target,
                elapsed: start.elapsed(),
            });
        }

        let action = SwitchAction::toward(target, self.flipper.default_color());
        self.emit(DeployEvent::FlipStarted { target, action });
        // Flip away from the slot resolved before the deploy.
        let flip = self
            .flipper
            .flip_from(ActiveEnvironment::Resolved(active), target, &AutoConfirm)
            .await
            .map_err(|source| {
                error!(%target, error = %source, "deployed but flip failed");
                DeployAndFlipError::DeployedNotFlipped {
                    active,
                    target,
                    source,
                }
            })?;
        self.emit(DeployEvent::Flipped {
            target,
            action: flip.action,
        });

        Ok(DeployAndFlipReport {
            deploy,
            flip,
            elapsed: start.elapsed(),
        })
    }

    /// Wait for the release image, then deploy and flip.
    pub async fn deploy_when_ready(
        &self,
        poller: &ImageReadinessPoller,
        release: &Release,
        artifact_timeout: Option<Duration>,
        stabilize: Duration,
    ) -> Result<DeployAndFlipReport, DeployAndFlipError> {
        let timeout = artifact_timeout.unwrap_or(DEFAULT_ARTIFACT_TIMEOUT);
        if release.repositories.is_empty() {
            warn!(tag = %release.tag, service = %release.service, "no registry repository to wait on");
            return Err(DeployError::NotConfigured {
                step: DeployStep::WaitForImage,
            }
            .into());
        }

        let start = Instant::now();
        for repository in &release.repositories {
            let events = self.events.clone();
            let remaining = timeout.saturating_sub(start.elapsed());
            let outcome = poller
                .wait_for_artifact(repository, &release.tag, remaining, &self.cancel, move |p| {
                    events(&DeployEvent::Artifact(p.clone()))
                })
                .await;

            match outcome {
                ArtifactOutcome::Ready { .. } => {}
                ArtifactOutcome::TimedOut { attempts, .. } => {
                    return Err(DeployAndFlipError::ImageTimedOut {
                        repository: repository.clone(),
                        tag: release.tag.clone(),
                        attempts,
                        elapsed: start.elapsed(),
                    });
                }
                ArtifactOutcome::Cancelled { .. } => {
                    return Err(DeployAndFlipError::ImageWaitCancelled {
                        repository: repository.clone(),
                        tag: release.tag.clone(),
                        elapsed: start.elapsed(),
                    });
                }
            }
        }

        self.deploy_and_flip_release(Some(release), stabilize).await
    }

    // ── Scale down ─────────────────────────────────────────────────

    /// Scale the inactive slot to zero, preserving the active capacity.
    pub async fn scale_down_inactive(&self, confirm: &dyn Confirm) -> Result<ScaleDownReport, DeployError> {
        let start = Instant::now();
        let scaler = self.scaler.as_ref().ok_or(DeployError::NotConfigured {
            step: DeployStep::ScaleDown,
        })?;

        let (active, inactive) = self.resolve_target(DeployStep::ScaleDown).await?;

        if !confirm.confirm(&ConfirmRequest::ScaleDown { active, inactive }) {
            info!(%active, %inactive, "scale-down declined");
            return Err(DeployError::Declined {
                step: DeployStep::ScaleDown,
                active,
                target: inactive,
            });
        }

        let preserve = self.preserved_capacity(active, inactive, start).await?;

        info!(%active, %inactive, desired = preserve.desired, "scaling down inactive environment");
        let scaled = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(self.cancelled(DeployStep::ScaleDown, active, inactive, start));
            }
            scaled = scaler.scale_down(inactive, &preserve) => scaled,
        };
        let output = scaled.map_err(|source| DeployError::Infra {
            step: DeployStep::ScaleDown,
            active,
            target: inactive,
            elapsed: start.elapsed(),
            source,
        })?;
        if !output.success() {
            return Err(DeployError::ActionFailed {
                step: DeployStep::ScaleDown,
                active,
                target: inactive,
                exit_code: output.exit_code,
                elapsed: start.elapsed(),
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        self.emit(DeployEvent::ScaledDown { inactive, preserve });
        Ok(ScaleDownReport {
            active,
            inactive,
            preserve,
            output,
        })
    }
}
