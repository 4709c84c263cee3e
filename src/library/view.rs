use serde::Serialize;
use std::fmt;

use super::error::PreconditionFailure;
use crate::domain::{EpisodeId, JobId};

/// What the view is showing right now, as seen by a renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ViewState {
    Idle,
    Loading,
    Ready,
    Mutating,
    Confirming { targets: Vec<EpisodeId> },
    BatchRunning { job_id: JobId },
}

impl ViewState {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Mutating => "mutating",
            Self::Confirming { .. } => "confirming",
            Self::BatchRunning { .. } => "running a batch refresh",
        }
    }
}

/// User-triggerable actions of the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewAction {
    Load,
    Rename,
    Delete,
    RefreshLink,
    BatchRefresh,
    Select,
}

impl fmt::Display for ViewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Load => "loading",
            Self::Rename => "renaming",
            Self::Delete => "deleting",
            Self::RefreshLink => "refreshing a link",
            Self::BatchRefresh => "batch refreshing",
            Self::Select => "selecting",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Loading,
    Ready,
    Mutating,
    Confirming(Vec<EpisodeId>),
}

/// Drives the view's state and decides which actions are offered.
///
/// A running batch job is tracked next to the phase instead of inside it, so
/// renames and deletes can still run while links refresh in the background.
#[derive(Debug, Clone)]
pub struct ViewMachine {
    phase: Phase,
    batch: Option<JobId>,
    loaded: bool,
}

impl Default for ViewMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewMachine {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: Phase::Idle,
            batch: None,
            loaded: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> ViewState {
        match &self.phase {
            Phase::Idle => ViewState::Idle,
            Phase::Loading => ViewState::Loading,
            Phase::Ready => match self.batch {
                Some(job_id) => ViewState::BatchRunning { job_id },
                None => ViewState::Ready,
            },
            Phase::Mutating => ViewState::Mutating,
            Phase::Confirming(targets) => ViewState::Confirming {
                targets: targets.clone(),
            },
        }
    }

    #[must_use]
    pub const fn running_batch(&self) -> Option<JobId> {
        self.batch
    }

    #[must_use]
    pub const fn allows(&self, action: ViewAction) -> bool {
        match self.phase {
            Phase::Idle => matches!(action, ViewAction::Load),
            Phase::Loading | Phase::Mutating => matches!(action, ViewAction::Select),
            Phase::Confirming(_) => false,
            Phase::Ready => {
                self.batch.is_none()
                    || !matches!(
                        action,
                        ViewAction::Load | ViewAction::BatchRefresh | ViewAction::RefreshLink
                    )
            }
        }
    }

    pub fn ensure(&self, action: ViewAction) -> Result<(), PreconditionFailure> {
        if self.allows(action) {
            Ok(())
        } else {
            Err(PreconditionFailure::ActionBlocked {
                action,
                state: self.state().label(),
            })
        }
    }

    pub fn begin_load(&mut self) {
        self.phase = Phase::Loading;
    }

    /// A failed first load falls back to idle; a failed reload keeps the
    /// previous list on screen.
    pub fn finish_load(&mut self, success: bool) {
        if success {
            self.loaded = true;
        }
        self.phase = if self.loaded { Phase::Ready } else { Phase::Idle };
    }

    pub fn begin_mutation(&mut self) {
        self.phase = Phase::Mutating;
    }

    pub fn finish_mutation(&mut self) {
        self.phase = Phase::Ready;
    }

    pub fn request_confirmation(&mut self, targets: Vec<EpisodeId>) {
        self.phase = Phase::Confirming(targets);
    }

    pub fn cancel_confirmation(&mut self) {
        if matches!(self.phase, Phase::Confirming(_)) {
            self.phase = Phase::Ready;
        }
    }

    #[must_use]
    pub fn pending_confirmation(&self) -> Option<&[EpisodeId]> {
        match &self.phase {
            Phase::Confirming(targets) => Some(targets.as_slice()),
            _ => None,
        }
    }

    /// Leaves the confirmation step and hands back the confirmed targets.
    pub fn confirm(&mut self) -> Option<Vec<EpisodeId>> {
        match std::mem::replace(&mut self.phase, Phase::Ready) {
            Phase::Confirming(targets) => Some(targets),
            other => {
                self.phase = other;
                None
            }
        }
    }

    pub fn batch_started(&mut self, job_id: JobId) {
        self.batch = Some(job_id);
    }

    /// Clears the running job if it is the one that finished.
    pub fn batch_finished(&mut self, job_id: JobId) {
        if self.batch == Some(job_id) {
            self.batch = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> ViewMachine {
        let mut view = ViewMachine::new();
        view.begin_load();
        view.finish_load(true);
        view
    }

    #[test]
    fn idle_only_loads() {
        let view = ViewMachine::new();
        assert_eq!(view.state(), ViewState::Idle);
        assert!(view.allows(ViewAction::Load));
        assert!(!view.allows(ViewAction::Delete));
    }

    #[test]
    fn loading_blocks_mutations() {
        let mut view = ViewMachine::new();
        view.begin_load();
        assert_eq!(view.state(), ViewState::Loading);
        assert!(!view.allows(ViewAction::Rename));
        assert!(view.allows(ViewAction::Select));

        let err = view.ensure(ViewAction::Delete).unwrap_err();
        assert_eq!(
            err.to_string(),
            "deleting is not available while the view is loading"
        );
    }

    #[test]
    fn failed_first_load_returns_to_idle() {
        let mut view = ViewMachine::new();
        view.begin_load();
        view.finish_load(false);
        assert_eq!(view.state(), ViewState::Idle);

        let mut view = ready();
        view.begin_load();
        view.finish_load(false);
        assert_eq!(view.state(), ViewState::Ready);
    }

    #[test]
    fn running_batch_blocks_refresh_and_reload() {
        let mut view = ready();
        let job = JobId::generate();
        view.batch_started(job);

        assert_eq!(view.state(), ViewState::BatchRunning { job_id: job });
        assert!(!view.allows(ViewAction::BatchRefresh));
        assert!(!view.allows(ViewAction::RefreshLink));
        assert!(!view.allows(ViewAction::Load));
        assert!(view.allows(ViewAction::Rename));
        assert!(view.allows(ViewAction::Delete));

        view.batch_finished(JobId::generate());
        assert!(view.running_batch().is_some());
        view.batch_finished(job);
        assert_eq!(view.state(), ViewState::Ready);
    }

    #[test]
    fn confirmation_round_trip() {
        let mut view = ready();
        let targets = vec![EpisodeId::from("a")];
        view.request_confirmation(targets.clone());
        assert!(!view.allows(ViewAction::Select));
        assert_eq!(view.pending_confirmation(), Some(targets.as_slice()));
        assert_eq!(
            view.state(),
            ViewState::Confirming {
                targets: targets.clone()
            }
        );
        assert_eq!(view.confirm(), Some(targets));
        assert_eq!(view.state(), ViewState::Ready);
        assert_eq!(view.pending_confirmation(), None);
        assert_eq!(view.confirm(), None);
    }

    #[test]
    fn cancel_confirmation_returns_to_ready() {
        let mut view = ready();
        view.request_confirmation(vec![EpisodeId::from("a")]);
        view.cancel_confirmation();
        assert_eq!(view.state(), ViewState::Ready);
    }

    #[test]
    fn state_serializes_with_tag() {
        let json = serde_json::to_value(ViewState::Mutating).unwrap();
        assert_eq!(json["state"], "mutating");
    }
}
