//! Wiring from `duplex.toml` to a ready-to-run orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context as _;
use tracing::{debug, info};

use duplex_core::{CancelHandle, Cancellation, DuplexConfig};
use duplex_health::{ConvergenceWaiter, HealthSampler, WaitOptions};
use duplex_infra::Adapters;
use duplex_registry::{Backoff, ImageReadinessPoller};
use duplex_rollout::{
    ActiveEnvironmentResolver, AutoConfirm, Confirm, DeploymentOrchestrator, EventSink,
    TrafficFlipper,
};
use duplex_state::HistoryStore;

use crate::render;

const DEFAULT_HISTORY_PATH: &str = ".duplex/history.redb";

pub struct Context {
    pub config: DuplexConfig,
    pub adapters: Adapters,
    pub sampler: HealthSampler,
    pub resolver: ActiveEnvironmentResolver,
    pub flipper: TrafficFlipper,
    pub cancel: Cancellation,
    /// Raised while a confirmation prompt waits on stdin.
    prompting: Arc<AtomicBool>,
}

impl Context {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = DuplexConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        debug!(config = %path.display(), region = config.region(), "configuration loaded");
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: DuplexConfig) -> Self {
        let adapters = Adapters::from_config(&config);
        let sampler = HealthSampler::new(
            adapters.aws.clone(),
            adapters.aws.clone(),
            adapters.aws.clone(),
        );
        let resolver = ActiveEnvironmentResolver::new(
            adapters.terraform.clone(),
            adapters.aws.clone(),
            config.environments(),
        )
        .with_timeout(config.terraform.timeout());
        let flipper = TrafficFlipper::new(
            resolver.clone(),
            adapters.make.clone(),
            config.default_color(),
        );

        let (handle, cancel) = Cancellation::new();
        let prompting = Arc::new(AtomicBool::new(false));
        spawn_ctrl_c(handle, prompting.clone());

        Self {
            config,
            adapters,
            sampler,
            resolver,
            flipper,
            cancel,
            prompting,
        }
    }

    /// `--yes` approves everything; otherwise ask on stdin.
    pub fn confirmer(&self, yes: bool) -> Box<dyn Confirm> {
        if yes {
            Box::new(AutoConfirm)
        } else {
            Box::new(render::Interruptible::new(
                render::prompt,
                self.cancel.clone(),
                self.prompting.clone(),
            ))
        }
    }

    /// Orchestrator with every optional collaborator attached.
    pub fn orchestrator(&self, history: HistoryStore, events: EventSink) -> DeploymentOrchestrator {
        let waiter = ConvergenceWaiter::new(Arc::new(self.sampler.clone()));
        let mut orchestrator = DeploymentOrchestrator::new(
            self.resolver.clone(),
            self.adapters.make.clone(),
            waiter,
            self.flipper.clone(),
        )
        .with_scale_down(self.adapters.make.clone())
        .with_history(Arc::new(history))
        .with_wait_options(WaitOptions::from(&self.config.convergence))
        .with_events(events)
        .with_cancellation(self.cancel.clone());

        if let Some(companion) = &self.adapters.companion {
            orchestrator = orchestrator.with_companion(companion.clone());
        }
        orchestrator
    }

    pub fn poller(&self) -> ImageReadinessPoller {
        ImageReadinessPoller::new(self.adapters.aws.clone())
            .with_backoff(Backoff::from(&self.config.registry))
    }

    /// Open the history store. redb holds an exclusive lock, so open it
    /// once per command.
    pub fn history(&self) -> anyhow::Result<HistoryStore> {
        let path = self.history_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let store = HistoryStore::open(&path)
            .with_context(|| format!("failed to open history at {}", path.display()))?
            .with_max_entries(self.config.history.max_entries());
        Ok(store)
    }

    fn history_path(&self) -> PathBuf {
        self.config
            .history
            .path
            .clone()
            .unwrap_or_else(|| self.config.workdir().join(DEFAULT_HISTORY_PATH))
    }
}

fn spawn_ctrl_c(handle: CancelHandle, prompting: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        if prompting.load(Ordering::SeqCst) {
            // Prompts precede every side effect, so nothing has changed.
            eprintln!();
            info!("interrupted at confirmation prompt");
            std::process::exit(130);
        }
        info!("interrupt received, cancelling");
        handle.cancel();
    });
}
