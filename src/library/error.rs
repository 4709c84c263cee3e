use std::time::Duration;
use thiserror::Error;

use super::governor::ActionClass;
use super::view::ViewAction;
use crate::clients::RemoteError;
use crate::domain::{EpisodeId, FolderId};

/// Conditions that reject an action locally, before any remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionFailure {
    #[error("cloud drive credentials are not configured")]
    MissingCredentials,

    #[error("no episodes were given to refresh")]
    NoTargets,

    #[error("no episodes are selected")]
    EmptySelection,

    #[error("the new file name is empty")]
    EmptyName,

    #[error("a link refresh job is already running for folder {0}")]
    AlreadyRunning(FolderId),

    #[error("{action} is not available while the view is {state}")]
    ActionBlocked {
        action: ViewAction,
        state: &'static str,
    },
}

/// Errors of the episode library core.
///
/// Every variant is scoped to the operation that raised it; the store and
/// cache stay at their last known good state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LibraryError {
    #[error("{action} requested too frequently, try again in {}s", retry_secs(.retry_after))]
    Throttled {
        action: ActionClass,
        retry_after: Duration,
    },

    #[error("{operation} failed: {source}")]
    RemoteFailure {
        operation: &'static str,
        source: RemoteError,
    },

    #[error("{failed} of {} link refreshes failed", .succeeded + .failed)]
    PartialBatchFailure { succeeded: usize, failed: usize },

    #[error(transparent)]
    Precondition(#[from] PreconditionFailure),

    #[error("episode {0} is no longer in the list")]
    NotFound(EpisodeId),
}

impl LibraryError {
    pub(crate) const fn remote(operation: &'static str, source: RemoteError) -> Self {
        Self::RemoteFailure { operation, source }
    }

    /// True when upstream itself reported throttling.
    #[must_use]
    pub const fn is_upstream_throttle(&self) -> bool {
        matches!(
            self,
            Self::RemoteFailure {
                source: RemoteError::Throttled(_),
                ..
            }
        )
    }

    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Whole seconds to wait, rounded up so "0s" is never shown.
fn retry_secs(retry_after: &Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 || secs == 0 {
        secs + 1
    } else {
        secs
    }
}
