//! The episode management view controller.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::batch::{BatchJob, BatchOutcome, BatchProgress, BatchRefreshOrchestrator, RefreshResult};
use super::cache::{CacheFreshness, EpisodeCache};
use super::coordinator::{DeleteSummary, MutationCoordinator};
use super::error::{LibraryError, PreconditionFailure};
use super::governor::{ActionClass, RequestGovernor};
use super::store::EpisodeStore;
use super::view::{ViewAction, ViewMachine, ViewState};
use crate::clients::{HttpLibraryClient, RemoteError, RemoteLibrary};
use crate::config::Config;
use crate::domain::events::LibraryEvent;
use crate::domain::{Credentials, EpisodeId, FolderId};
use crate::models::{EpisodeRecord, compose_rename};

/// Everything shared between the views of one process.
#[derive(Clone)]
pub struct LibraryContext {
    client: Arc<dyn RemoteLibrary>,
    cache: EpisodeCache,
    governor: RequestGovernor,
    orchestrator: BatchRefreshOrchestrator,
    credentials: Option<Credentials>,
    event_bus: broadcast::Sender<LibraryEvent>,
    cancel_on_close: bool,
}

impl LibraryContext {
    #[must_use]
    pub fn new(client: Arc<dyn RemoteLibrary>, config: &Config) -> Self {
        let (event_bus, _) = broadcast::channel(config.general.event_bus_buffer_size.max(1));
        let orchestrator =
            BatchRefreshOrchestrator::new(client.clone(), config.batch.policy(), event_bus.clone());

        Self {
            client,
            cache: EpisodeCache::new(),
            governor: RequestGovernor::new(config.governor.clone()),
            orchestrator,
            credentials: config.credentials.resolve(),
            event_bus,
            cancel_on_close: config.batch.cancel_on_close,
        }
    }

    /// Builds the context around the HTTP client of the configured backend.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = HttpLibraryClient::new(&config.remote)?;
        Ok(Self::new(Arc::new(client), config))
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials.filter(Credentials::is_complete);
        self
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.event_bus.subscribe()
    }

    #[must_use]
    pub const fn cache(&self) -> &EpisodeCache {
        &self.cache
    }

    #[must_use]
    pub const fn governor(&self) -> &RequestGovernor {
        &self.governor
    }

    #[must_use]
    pub const fn orchestrator(&self) -> &BatchRefreshOrchestrator {
        &self.orchestrator
    }

    #[must_use]
    pub const fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Opens a view on one folder. Nothing is fetched until [`FolderSession::load`].
    #[must_use]
    pub fn open(&self, folder_id: FolderId) -> FolderSession {
        debug!(folder_id = %folder_id, "Opening folder session");
        FolderSession {
            ctx: self.clone(),
            coordinator: MutationCoordinator::new(self.cache.clone()),
            state: Arc::new(Mutex::new(SessionState {
                store: EpisodeStore::new(folder_id.clone()),
                view: ViewMachine::new(),
            })),
            folder_id,
        }
    }

    fn emit(&self, event: LibraryEvent) {
        let _ = self.event_bus.send(event);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    /// Served from the snapshot without calling upstream.
    Cache,
    Remote,
    /// Upstream throttled the call; the last snapshot is shown instead.
    StaleCache,
    /// A newer listing for the same folder was started while this one ran.
    Superseded,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadOutcome {
    pub source: LoadSource,
    pub records: Vec<EpisodeRecord>,
    pub fetched_at: Option<DateTime<Utc>>,
}

struct SessionState {
    store: EpisodeStore,
    view: ViewMachine,
}

/// One open episode management view.
///
/// Clones share the same store and view state. The state lock is only ever
/// taken between awaits.
#[derive(Clone)]
pub struct FolderSession {
    ctx: LibraryContext,
    folder_id: FolderId,
    coordinator: MutationCoordinator,
    state: Arc<Mutex<SessionState>>,
}

impl FolderSession {
    #[must_use]
    pub const fn folder_id(&self) -> &FolderId {
        &self.folder_id
    }

    #[must_use]
    pub fn records(&self) -> Vec<EpisodeRecord> {
        self.with_state(|state| state.store.records().to_vec())
    }

    #[must_use]
    pub fn view_state(&self) -> ViewState {
        self.with_state(|state| state.view.state())
    }

    #[must_use]
    pub fn allows(&self, action: ViewAction) -> bool {
        self.with_state(|state| state.view.allows(action))
    }

    #[must_use]
    pub fn freshness(&self) -> Option<CacheFreshness> {
        self.ctx.cache.freshness(&self.folder_id, Utc::now())
    }

    #[must_use]
    pub fn batch_progress(&self) -> Option<BatchProgress> {
        self.ctx.orchestrator.progress(&self.folder_id)
    }

    #[must_use]
    pub fn watch_batch(&self) -> Option<watch::Receiver<BatchProgress>> {
        self.ctx.orchestrator.watch(&self.folder_id)
    }

    /// Shows the folder's episodes.
    ///
    /// Without `force` a cached snapshot is served as is. Otherwise the
    /// request governor gates the listing call; `force` skips the gate but
    /// still counts as an attempt. The previous snapshot stays in place until
    /// the new listing commits, so an upstream throttle can fall back to it.
    pub async fn load(&self, force: bool) -> Result<LoadOutcome, LibraryError> {
        self.with_state(|state| state.view.ensure(ViewAction::Load))?;

        if !force && let Some(entry) = self.ctx.cache.get(&self.folder_id) {
            self.with_state(|state| {
                state.store.replace(entry.records.clone());
                state.view.finish_load(true);
            });
            debug!(
                folder_id = %self.folder_id,
                count = entry.records.len(),
                "Serving episodes from cache"
            );
            self.ctx.emit(LibraryEvent::EpisodesLoaded {
                folder_id: self.folder_id.clone(),
                count: entry.records.len(),
                from_cache: true,
            });
            return Ok(LoadOutcome {
                source: LoadSource::Cache,
                records: entry.records,
                fetched_at: Some(entry.fetched_at),
            });
        }

        self.credentials()?;

        if let Err(err) = self
            .ctx
            .governor
            .acquire(ActionClass::ListEpisodes, &self.folder_id, force)
        {
            self.ctx.emit(LibraryEvent::LoadThrottled {
                folder_id: self.folder_id.clone(),
                retry_after_ms: err.retry_after().map_or(0, |d| d.as_millis() as u64),
            });
            return Err(err);
        }

        let ticket = self.ctx.cache.begin_fetch(&self.folder_id);
        self.with_state(|state| state.view.begin_load());

        let started = Instant::now();
        let response = self.ctx.client.list_episodes(&self.folder_id).await;

        match response {
            Ok(records) => {
                if !self.ctx.cache.commit(&ticket, records.clone()) {
                    if let Some(outcome) = self.adopt_snapshot(LoadSource::Superseded) {
                        return Ok(outcome);
                    }
                    // The newer listing has not landed yet.
                    self.with_state(|state| {
                        state.store.replace(records.clone());
                        state.view.finish_load(true);
                    });
                    return Ok(LoadOutcome {
                        source: LoadSource::Superseded,
                        records,
                        fetched_at: None,
                    });
                }

                let count = records.len();
                self.with_state(|state| {
                    state.store.replace(records.clone());
                    state.view.finish_load(true);
                });
                info!(
                    folder_id = %self.folder_id,
                    count,
                    forced = force,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Loaded episodes from upstream"
                );
                self.ctx.emit(LibraryEvent::EpisodesLoaded {
                    folder_id: self.folder_id.clone(),
                    count,
                    from_cache: false,
                });
                Ok(LoadOutcome {
                    source: LoadSource::Remote,
                    records,
                    fetched_at: self
                        .ctx
                        .cache
                        .get(&self.folder_id)
                        .map(|entry| entry.fetched_at),
                })
            }
            Err(e) => {
                if !self.ctx.cache.is_current(&ticket)
                    && let Some(outcome) = self.adopt_snapshot(LoadSource::Superseded)
                {
                    debug!(folder_id = %self.folder_id, error = %e, "Ignoring superseded listing failure");
                    return Ok(outcome);
                }

                let err = LibraryError::remote("list episodes", e);
                if err.is_upstream_throttle()
                    && let Some(outcome) = self.adopt_snapshot(LoadSource::StaleCache)
                {
                    warn!(
                        folder_id = %self.folder_id,
                        "Upstream throttled the listing, showing the cached snapshot"
                    );
                    return Ok(outcome);
                }

                self.with_state(|state| state.view.finish_load(false));
                warn!(folder_id = %self.folder_id, error = %err, "Failed to load episodes");
                self.ctx.emit(LibraryEvent::Error {
                    folder_id: self.folder_id.clone(),
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Shows the cached snapshot and leaves the loading state. Returns `None`
    /// and leaves the view alone when there is no snapshot to show.
    fn adopt_snapshot(&self, source: LoadSource) -> Option<LoadOutcome> {
        let entry = self.ctx.cache.get(&self.folder_id)?;
        self.with_state(|state| {
            state.store.replace(entry.records.clone());
            state.view.finish_load(true);
        });
        Some(LoadOutcome {
            source,
            records: entry.records,
            fetched_at: Some(entry.fetched_at),
        })
    }

    /// Renames one file, keeping its original extension. Returns the full new
    /// name as stored.
    pub async fn rename(&self, id: &EpisodeId, new_base: &str) -> Result<String, LibraryError> {
        let new_base = new_base.trim();
        if new_base.is_empty() {
            return Err(PreconditionFailure::EmptyName.into());
        }
        let credentials = self.credentials()?;

        let new_name = self.with_state(|state| -> Result<_, LibraryError> {
            state.view.ensure(ViewAction::Rename)?;
            let record = state
                .store
                .get(id)
                .ok_or_else(|| LibraryError::NotFound(id.clone()))?;
            let new_name = compose_rename(record.name(), new_base);

            self.ctx
                .governor
                .acquire(ActionClass::Rename, &self.folder_id, false)?;
            state.view.begin_mutation();
            Ok(new_name)
        })?;

        let response = self
            .ctx
            .client
            .rename_file(&self.folder_id, id, &new_name, &credentials)
            .await;

        self.with_state(|state| {
            state.view.finish_mutation();
            match response {
                Ok(()) => self
                    .coordinator
                    .apply_rename(&mut state.store, id, &new_name),
                Err(e) => Err(LibraryError::remote("rename", e)),
            }
        })
        .inspect_err(|err| {
            warn!(folder_id = %self.folder_id, episode_id = %id, error = %err, "Rename failed");
        })?;

        info!(folder_id = %self.folder_id, episode_id = %id, new_name = %new_name, "Renamed episode");
        self.ctx.emit(LibraryEvent::EpisodeRenamed {
            folder_id: self.folder_id.clone(),
            episode_id: id.clone(),
            name: new_name.clone(),
        });
        Ok(new_name)
    }

    /// Deletes the selected files with a single upstream call.
    pub async fn delete_selected(&self) -> Result<DeleteSummary, LibraryError> {
        let credentials = self.credentials()?;

        let requested = self.with_state(|state| -> Result<_, LibraryError> {
            state.view.ensure(ViewAction::Delete)?;
            let selected = state.store.selected_ids();
            if selected.is_empty() {
                return Err(LibraryError::from(PreconditionFailure::EmptySelection));
            }

            self.ctx
                .governor
                .acquire(ActionClass::Delete, &self.folder_id, false)?;
            state.view.begin_mutation();
            Ok(selected)
        })?;

        let response = self
            .ctx
            .client
            .delete_files(&self.folder_id, &requested, &credentials)
            .await;

        let summary = self.with_state(|state| -> Result<_, LibraryError> {
            state.view.finish_mutation();
            let report = response.map_err(|e| LibraryError::remote("delete", e))?;
            let summary = self
                .coordinator
                .apply_delete(&mut state.store, &requested, &report);

            if summary.deleted_count == 0
                && let Some(message) = &summary.message
            {
                return Err(LibraryError::remote(
                    "delete",
                    RemoteError::Rejected(message.clone()),
                ));
            }
            if summary.is_complete() {
                state.store.clear_selection();
            }
            Ok(summary)
        });

        let summary = summary.inspect_err(|err| {
            warn!(folder_id = %self.folder_id, error = %err, "Delete failed");
            self.ctx.emit(LibraryEvent::Error {
                folder_id: self.folder_id.clone(),
                message: err.to_string(),
            });
        })?;

        info!(
            folder_id = %self.folder_id,
            requested = summary.requested,
            deleted = summary.deleted_count,
            "Deleted episodes"
        );
        self.ctx.emit(LibraryEvent::EpisodesDeleted {
            folder_id: self.folder_id.clone(),
            requested: summary.requested,
            deleted: summary.deleted_count,
        });
        Ok(summary)
    }

    /// Refreshes a single link right away, without confirmation.
    pub async fn refresh_link(&self, id: &EpisodeId) -> Result<RefreshResult, LibraryError> {
        let credentials = self.credentials()?;

        let job = self.with_state(|state| -> Result<_, LibraryError> {
            state.view.ensure(ViewAction::RefreshLink)?;
            if !state.store.contains(id) {
                return Err(LibraryError::NotFound(id.clone()));
            }

            let job = self.start_job(vec![id.clone()], &credentials)?;
            state.view.begin_mutation();
            Ok(job)
        })?;

        let outcome = job.run().await;
        self.with_state(|state| {
            self.coordinator.apply_refresh(&mut state.store, &outcome);
            state.view.finish_mutation();
        });

        match outcome.result_for(id).cloned() {
            Some(RefreshResult::Failed { message }) => Err(LibraryError::remote(
                "refresh link",
                RemoteError::Rejected(message),
            )),
            Some(result) => Ok(result),
            None => Ok(RefreshResult::Skipped),
        }
    }

    /// Asks for confirmation of a batch refresh.
    ///
    /// Without explicit targets the selection is used, or every video when
    /// nothing is selected. Ids not in the list are dropped.
    pub fn request_batch_refresh(
        &self,
        targets: Option<Vec<EpisodeId>>,
    ) -> Result<Vec<EpisodeId>, LibraryError> {
        self.credentials()?;

        self.with_state(|state| -> Result<_, LibraryError> {
            state.view.ensure(ViewAction::BatchRefresh)?;

            let candidates = targets.unwrap_or_else(|| {
                let selected = state.store.selected_ids();
                if selected.is_empty() {
                    state.store.video_ids()
                } else {
                    selected
                }
            });
            let mut seen = HashSet::new();
            let targets: Vec<EpisodeId> = candidates
                .into_iter()
                .filter(|id| state.store.contains(id) && seen.insert(id.clone()))
                .collect();

            if targets.is_empty() {
                return Err(PreconditionFailure::NoTargets.into());
            }
            if self.ctx.orchestrator.is_running(&self.folder_id) {
                return Err(PreconditionFailure::AlreadyRunning(self.folder_id.clone()).into());
            }

            state.view.request_confirmation(targets.clone());
            Ok(targets)
        })
    }

    pub fn cancel_batch_refresh(&self) {
        self.with_state(|state| state.view.cancel_confirmation());
    }

    /// Stops the folder's running job after its current chunk.
    pub fn cancel_running_batch(&self) -> bool {
        self.ctx.orchestrator.cancel(&self.folder_id)
    }

    /// Runs the confirmed job to completion and applies its outcome in one step.
    pub async fn confirm_batch_refresh(&self) -> Result<BatchOutcome, LibraryError> {
        let job = self.start_confirmed()?;
        let outcome = job.run().await;
        Ok(self.finish_batch(outcome))
    }

    /// Like [`Self::confirm_batch_refresh`], but the job runs as a background
    /// task that keeps going after the view is closed.
    pub fn spawn_confirmed_batch_refresh(&self) -> Result<JoinHandle<BatchOutcome>, LibraryError> {
        let job = self.start_confirmed()?;
        let session = self.clone();
        Ok(tokio::spawn(async move {
            let outcome = job.run().await;
            session.finish_batch(outcome)
        }))
    }

    /// Starts the confirmed job. On any rejection the view stays in its
    /// confirmation step.
    fn start_confirmed(&self) -> Result<BatchJob, LibraryError> {
        let credentials = self.credentials()?;

        self.with_state(|state| -> Result<_, LibraryError> {
            let targets = state
                .view
                .pending_confirmation()
                .map(<[EpisodeId]>::to_vec)
                .ok_or_else(|| PreconditionFailure::ActionBlocked {
                    action: ViewAction::BatchRefresh,
                    state: state.view.state().label(),
                })?;

            let job = self.start_job(targets, &credentials)?;
            let _ = state.view.confirm();
            state.view.batch_started(job.job_id());
            Ok(job)
        })
    }

    /// Claims the folder's running slot, then the refresh cooldown. A throttled
    /// start drops the job again, which releases the slot.
    fn start_job(
        &self,
        targets: Vec<EpisodeId>,
        credentials: &Credentials,
    ) -> Result<BatchJob, LibraryError> {
        let job = self
            .ctx
            .orchestrator
            .start(&self.folder_id, targets, Some(credentials))?;
        self.ctx
            .governor
            .acquire(ActionClass::RefreshLinks, &self.folder_id, false)?;
        Ok(job)
    }

    fn finish_batch(&self, outcome: BatchOutcome) -> BatchOutcome {
        self.with_state(|state| {
            let applied = self.coordinator.apply_refresh(&mut state.store, &outcome);
            state.view.batch_finished(outcome.job_id);
            debug!(
                folder_id = %self.folder_id,
                job_id = %outcome.job_id,
                applied,
                "Applied batch refresh outcome"
            );
        });
        outcome
    }

    /// Tears the view down. A running job keeps going unless the context
    /// was configured to cancel on close.
    pub fn close(self) {
        self.with_state(|state| state.view.cancel_confirmation());
        if self.ctx.cancel_on_close && self.ctx.orchestrator.cancel(&self.folder_id) {
            info!(folder_id = %self.folder_id, "Cancelled batch refresh on close");
        }
        debug!(folder_id = %self.folder_id, "Closed folder session");
    }

    pub fn select(&self, id: &EpisodeId) -> Result<bool, LibraryError> {
        self.with_state(|state| -> Result<_, LibraryError> {
            state.view.ensure(ViewAction::Select)?;
            Ok(state.store.select(id))
        })
    }

    pub fn deselect(&self, id: &EpisodeId) -> Result<bool, LibraryError> {
        self.with_state(|state| -> Result<_, LibraryError> {
            state.view.ensure(ViewAction::Select)?;
            Ok(state.store.deselect(id))
        })
    }

    pub fn toggle(&self, id: &EpisodeId) -> Result<bool, LibraryError> {
        self.with_state(|state| -> Result<_, LibraryError> {
            state.view.ensure(ViewAction::Select)?;
            Ok(state.store.toggle(id))
        })
    }

    pub fn select_all(&self) -> Result<(), LibraryError> {
        self.with_state(|state| -> Result<_, LibraryError> {
            state.view.ensure(ViewAction::Select)?;
            state.store.select_all();
            Ok(())
        })
    }

    pub fn clear_selection(&self) -> Result<(), LibraryError> {
        self.with_state(|state| -> Result<_, LibraryError> {
            state.view.ensure(ViewAction::Select)?;
            state.store.clear_selection();
            Ok(())
        })
    }

    #[must_use]
    pub fn selected_ids(&self) -> Vec<EpisodeId> {
        self.with_state(|state| state.store.selected_ids())
    }

    fn credentials(&self) -> Result<Credentials, LibraryError> {
        self.ctx
            .credentials
            .clone()
            .ok_or(LibraryError::Precondition(PreconditionFailure::MissingCredentials))
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}
