//! Action outcomes
//!
//! Every state handler returns one `ActionResult`. `into_requeue` is the only
//! place where an outcome becomes "what the dispatcher does next".

use crate::error::ControllerError;
use crds::ProvisioningState;
use std::time::Duration;

/// Requeue delay for outcomes that need operator intervention
pub const FAILED_REQUEUE: Duration = Duration::from_secs(60);

/// Requeue delay after a state change
pub const REQUEUE_NOW: Duration = Duration::ZERO;

/// Outcome of one state handler
#[derive(Debug)]
pub enum ActionResult {
    /// In progress; check again after the delay
    Continue(Duration),
    /// Finished; advance to the next state
    Complete,
    /// Unexpected failure; surfaced to the dispatcher
    Error(ControllerError),
    /// Go back to an explicit earlier state
    GoBack(ProvisioningState),
    /// Cannot succeed without operator intervention
    Failed,
}

impl ActionResult {
    /// Requeue delay for this outcome, or the error to surface
    pub fn into_requeue(self) -> Result<Duration, ControllerError> {
        match self {
            Self::Continue(delay) => Ok(delay),
            Self::Complete | Self::GoBack(_) => Ok(REQUEUE_NOW),
            Self::Failed => Ok(FAILED_REQUEUE),
            Self::Error(err) => Err(err),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl From<ControllerError> for ActionResult {
    fn from(err: ControllerError) -> Self {
        Self::Error(err)
    }
}
