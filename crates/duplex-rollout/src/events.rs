//! Progress events emitted while a workflow runs.

use std::sync::Arc;
use std::time::Duration;

use duplex_core::{Capacity, Color, CompanionRestart};
use duplex_health::ConvergenceProgress;
use duplex_registry::ArtifactProgress;

use crate::flipper::SwitchAction;
use crate::resolver::Resolution;

/// Observer for workflow progress. Called inline; keep it cheap.
pub type EventSink = Arc<dyn Fn(&DeployEvent) + Send + Sync>;

pub(crate) fn discard() -> EventSink {
    Arc::new(|_: &DeployEvent| {})
}

#[derive(Debug, Clone)]
pub enum DeployEvent {
    ActiveResolved(Resolution),
    TargetSelected {
        active: Color,
        target: Color,
        preserve: Capacity,
        /// The active group was missing and defaults were used.
        fallback: bool,
    },
    /// One line of deploy-trigger output.
    DeployOutput { target: Color, line: String },
    DeployFinished { target: Color, elapsed: Duration },
    CompanionRestarted(CompanionRestart),
    CompanionFailed { error: String },
    Convergence(ConvergenceProgress),
    HistoryRecorded { tag: String, service: String },
    Stabilizing { target: Color, duration: Duration },
    FlipStarted { target: Color, action: SwitchAction },
    Flipped { target: Color, action: SwitchAction },
    ScaledDown { inactive: Color, preserve: Capacity },
    Artifact(ArtifactProgress),
}
