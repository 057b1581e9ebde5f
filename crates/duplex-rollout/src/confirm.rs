//! Confirmation before destructive steps.
//!
//! Orchestration never prompts on its own. Interactive callers pass a
//! closure that asks the operator; automated flows pass [`AutoConfirm`].

use duplex_core::{ActiveEnvironment, Color};

use crate::flipper::SwitchAction;

/// What the operator is being asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmRequest {
    Deploy {
        active: Color,
        target: Color,
        image_tag: Option<String>,
    },
    Flip {
        active: ActiveEnvironment,
        target: Color,
        action: SwitchAction,
    },
    ScaleDown {
        active: Color,
        inactive: Color,
    },
}

pub trait Confirm: Send + Sync {
    fn confirm(&self, request: &ConfirmRequest) -> bool;
}

/// Approves everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl Confirm for AutoConfirm {
    fn confirm(&self, _request: &ConfirmRequest) -> bool {
        true
    }
}

impl<F> Confirm for F
where
    F: Fn(&ConfirmRequest) -> bool + Send + Sync,
{
    fn confirm(&self, request: &ConfirmRequest) -> bool {
        self(request)
    }
}
