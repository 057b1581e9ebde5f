//! Traffic flipper.
//!
//! Routing is moved by one of two named actions. The default slot is the
//! safe one: switching to it is a rollback, switching away from it is a
//! forward flip. A failed flip is never retried.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use duplex_core::ports::TrafficSwitch;
use duplex_core::*;

use crate::confirm::{Confirm, ConfirmRequest};
use crate::error::FlipError;
use crate::resolver::ActiveEnvironmentResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchAction {
    Forward,
    Rollback,
}

impl SwitchAction {
    /// Action that moves traffic to `target` given the default slot.
    pub fn toward(target: Color, default: Color) -> Self {
        if target == default {
            SwitchAction::Rollback
        } else {
            SwitchAction::Forward
        }
    }
}

impl fmt::Display for SwitchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchAction::Forward => f.write_str("forward"),
            SwitchAction::Rollback => f.write_str("rollback"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlipReport {
    /// Active slot as resolved before the flip.
    pub previous: ActiveEnvironment,
    pub target: Color,
    pub action: SwitchAction,
    pub output: ActionOutput,
}

#[derive(Clone)]
pub struct TrafficFlipper {
    resolver: ActiveEnvironmentResolver,
    switch: Arc<dyn TrafficSwitch>,
    default_color: Color,
}

impl TrafficFlipper {
    pub fn new(
        resolver: ActiveEnvironmentResolver,
        switch: Arc<dyn TrafficSwitch>,
        default_color: Color,
    ) -> Self {
        Self {
            resolver,
            switch,
            default_color,
        }
    }

    pub fn default_color(&self) -> Color {
        self.default_color
    }

    /// Move traffic to `target`. An unknown active slot blocks the flip.
    pub async fn flip(&self, target: Color, confirm: &dyn Confirm) -> Result<FlipReport, FlipError> {
        let active = self.resolver.resolve().await.active;
        let Some(current) = active.color() else {
            warn!(%target, "active environment unknown, refusing to flip");
            return Err(FlipError::AmbiguousActive);
        };
        if current == target {
            info!(%target, "target already active, flipping anyway");
        }
        self.flip_from(active, target, confirm).await
    }

    /// Move traffic to whichever slot is not active.
    pub async fn flip_to_inactive(&self, confirm: &dyn Confirm) -> Result<FlipReport, FlipError> {
        let active = self.resolver.resolve().await.active;
        let Some(current) = active.color() else {
            return Err(FlipError::AmbiguousActive);
        };
        self.flip_from(active, current.complement(), confirm).await
    }

    /// Flip with an active slot the caller already resolved.
    pub(crate) async fn flip_from(
        &self,
        active: ActiveEnvironment,
        target: Color,
        confirm: &dyn Confirm,
    ) -> Result<FlipReport, FlipError> {
        let action = SwitchAction::toward(target, self.default_color);

        let request = ConfirmRequest::Flip {
            active,
            target,
            action,
        };
        if !confirm.confirm(&request) {
            info!(%active, %target, "flip declined");
            return Err(FlipError::Declined { active, target });
        }

        info!(%active, %target, %action, "flipping traffic");
        let result = match action {
            SwitchAction::Forward => self.switch.forward().await,
            SwitchAction::Rollback => self.switch.rollback().await,
        };

        let output = result.map_err(|source| FlipError::Infra {
            action,
            active,
            target,
            source,
        })?;

        if !output.success() {
            error!(%target, %action, exit_code = ?output.exit_code, "flip action failed");
            return Err(FlipError::ActionFailed {
                action,
                active,
                target,
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        info!(%target, %action, "traffic flipped");
        Ok(FlipReport {
            previous: active,
            target,
            action,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::AutoConfirm;
    use crate::testing::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn direction_follows_default_color() {
        assert_eq!(SwitchAction::toward(Color::Green, Color::Blue), SwitchAction::Forward);
        assert_eq!(SwitchAction::toward(Color::Blue, Color::Blue), SwitchAction::Rollback);
        assert_eq!(SwitchAction::toward(Color::Blue, Color::Green), SwitchAction::Forward);
    }

    #[tokio::test]
    async fn flip_to_non_default_issues_forward_only() {
        let world = World::new(2, 2);
        world.declare(Some(Color::Blue));

        let report = world.flipper().flip(Color::Green, &AutoConfirm).await.unwrap();

        assert_eq!(report.action, SwitchAction::Forward);
        assert_eq!(report.previous, ActiveEnvironment::Resolved(Color::Blue));
        assert_eq!(world.forwards.load(Ordering::SeqCst), 1);
        assert_eq!(world.rollbacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn flip_to_default_issues_rollback_only() {
        let world = World::new(2, 2);
        world.declare(Some(Color::Green));

        let report = world.flipper().flip(Color::Blue, &AutoConfirm).await.unwrap();

        assert_eq!(report.action, SwitchAction::Rollback);
        assert_eq!(world.forwards.load(Ordering::SeqCst), 0);
        assert_eq!(world.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn declined_flip_has_no_side_effects() {
        let world = World::new(2, 0);
        world.declare(Some(Color::Blue));

        let err = world
            .flipper()
            .flip(Color::Green, &|_: &ConfirmRequest| false)
            .await
            .unwrap_err();

        assert!(matches!(err, FlipError::Declined { .. }));
        assert_eq!(world.forwards.load(Ordering::SeqCst), 0);
        assert_eq!(world.rollbacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_action_surfaces_output_without_retry() {
        let world = World::new(2, 2);
        world.declare(Some(Color::Blue));
        world.fail_switches(2);

        let err = world.flipper().flip(Color::Green, &AutoConfirm).await.unwrap_err();

        match err {
            FlipError::ActionFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(2));
                assert_eq!(stderr, "boom\n");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(world.forwards.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn explicit_flip_blocks_when_active_unknown() {
        let world = World::new(1, 1);
        world.declare(None);

        let err = world.flipper().flip(Color::Green, &AutoConfirm).await.unwrap_err();
        assert!(matches!(err, FlipError::AmbiguousActive));
        assert_eq!(world.forwards.load(Ordering::SeqCst), 0);
        assert_eq!(world.rollbacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn flip_to_inactive_blocks_when_active_unknown() {
        let world = World::new(0, 0);
        world.declare(None);

        let err = world.flipper().flip_to_inactive(&AutoConfirm).await.unwrap_err();
        assert!(matches!(err, FlipError::AmbiguousActive));
        assert_eq!(world.forwards.load(Ordering::SeqCst), 0);
        assert_eq!(world.rollbacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn flip_to_inactive_targets_complement() {
        let world = World::new(0, 2);
        world.declare(Some(Color::Green));

        let report = world.flipper().flip_to_inactive(&AutoConfirm).await.unwrap();
        assert_eq!(report.target, Color::Blue);
        assert_eq!(report.action, SwitchAction::Rollback);
    }
}
