//! Chunked, throttle-aware refresh of play links.
//!
//! A job splits its targets into chunks of [`BatchPolicy::chunk_size`] and
//! sends one upstream call per chunk, strictly one after another, pausing
//! [`BatchPolicy::inter_chunk_delay`] between calls. Per-id results are kept
//! private to the job until it finishes; callers apply the [`BatchOutcome`]
//! in one step.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{LibraryError, PreconditionFailure};
use crate::clients::{LinkOutcome, LinkRefresh, RemoteLibrary};
use crate::domain::events::LibraryEvent;
use crate::domain::{Credentials, EpisodeId, FolderId, JobId};
use crate::models::EpisodeRecord;

const MISSING_FROM_RESPONSE: &str = "missing from upstream response";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub chunk_size: usize,
    pub inter_chunk_delay: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            chunk_size: 3,
            inter_chunk_delay: Duration::from_secs(8),
        }
    }
}

impl BatchPolicy {
    /// Number of upstream calls needed for `targets` ids.
    #[must_use]
    pub const fn chunk_count(&self, targets: usize) -> usize {
        targets.div_ceil(self.effective_chunk_size())
    }

    const fn effective_chunk_size(&self) -> usize {
        if self.chunk_size == 0 { 1 } else { self.chunk_size }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Aborted,
}

impl BatchStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

/// Display-only progress of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub status: BatchStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RefreshResult {
    Refreshed {
        play_url: String,
        updated_at: DateTime<Utc>,
    },
    Failed {
        message: String,
    },
    /// The job was cancelled before this id's chunk was sent.
    Skipped,
}

impl From<LinkOutcome> for RefreshResult {
    fn from(outcome: LinkOutcome) -> Self {
        match outcome {
            LinkOutcome::Refreshed {
                play_url,
                updated_at,
            } => Self::Refreshed {
                play_url,
                updated_at,
            },
            LinkOutcome::Failed { message } => Self::Failed { message },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshItem {
    pub id: EpisodeId,
    #[serde(flatten)]
    pub result: RefreshResult,
}

/// Aggregate of a finished (or aborted) job.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub job_id: JobId,
    pub folder_id: FolderId,
    pub status: BatchStatus,
    /// One entry per target, in submission order.
    pub items: Vec<RefreshItem>,
    pub success_count: usize,
    pub failure_count: usize,
    pub skipped_count: usize,
}

impl BatchOutcome {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn result_for(&self, id: &EpisodeId) -> Option<&RefreshResult> {
        self.items
            .iter()
            .find(|item| &item.id == id)
            .map(|item| &item.result)
    }

    /// Writes new links into matching records. Failed and skipped ids are
    /// left untouched. Returns how many records changed.
    pub fn apply_to(&self, records: &mut [EpisodeRecord]) -> usize {
        let refreshed: HashMap<&EpisodeId, (&String, DateTime<Utc>)> = self
            .items
            .iter()
            .filter_map(|item| match &item.result {
                RefreshResult::Refreshed {
                    play_url,
                    updated_at,
                } => Some((&item.id, (play_url, *updated_at))),
                _ => None,
            })
            .collect();

        let mut applied = 0;
        for record in records.iter_mut() {
            if let Some((play_url, updated_at)) = refreshed.get(record.id()) {
                record.set_play_url((*play_url).clone(), *updated_at);
                applied += 1;
            }
        }
        applied
    }

    /// Fails with [`LibraryError::PartialBatchFailure`] when any id failed.
    pub fn into_result(self) -> Result<Self, LibraryError> {
        if self.failure_count > 0 {
            Err(LibraryError::PartialBatchFailure {
                succeeded: self.success_count,
                failed: self.failure_count,
            })
        } else {
            Ok(self)
        }
    }
}

struct RunningJob {
    job_id: JobId,
    cancel: CancellationToken,
    progress: watch::Receiver<BatchProgress>,
}

type RunningJobs = Arc<Mutex<HashMap<FolderId, RunningJob>>>;

/// Starts batch jobs and enforces at most one running job per folder.
#[derive(Clone)]
pub struct BatchRefreshOrchestrator {
    client: Arc<dyn RemoteLibrary>,
    policy: BatchPolicy,
    running: RunningJobs,
    event_bus: broadcast::Sender<LibraryEvent>,
}

impl BatchRefreshOrchestrator {
    #[must_use]
    pub fn new(
        client: Arc<dyn RemoteLibrary>,
        policy: BatchPolicy,
        event_bus: broadcast::Sender<LibraryEvent>,
    ) -> Self {
        Self {
            client,
            policy,
            running: Arc::new(Mutex::new(HashMap::new())),
            event_bus,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> BatchPolicy {
        self.policy
    }

    #[must_use]
    pub fn is_running(&self, folder_id: &FolderId) -> bool {
        self.lock().contains_key(folder_id)
    }

    #[must_use]
    pub fn running_job(&self, folder_id: &FolderId) -> Option<JobId> {
        self.lock().get(folder_id).map(|job| job.job_id)
    }

    #[must_use]
    pub fn progress(&self, folder_id: &FolderId) -> Option<BatchProgress> {
        self.lock()
            .get(folder_id)
            .map(|job| *job.progress.borrow())
    }

    #[must_use]
    pub fn watch(&self, folder_id: &FolderId) -> Option<watch::Receiver<BatchProgress>> {
        self.lock().get(folder_id).map(|job| job.progress.clone())
    }

    /// Requests cancellation of the folder's running job. The chunk in
    /// flight, if any, still completes.
    pub fn cancel(&self, folder_id: &FolderId) -> bool {
        match self.lock().get(folder_id) {
            Some(job) => {
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Validates a job and registers it as the folder's running job.
    ///
    /// Nothing is sent upstream until [`BatchJob::run`] is awaited.
    pub fn start(
        &self,
        folder_id: &FolderId,
        targets: Vec<EpisodeId>,
        credentials: Option<&Credentials>,
    ) -> Result<BatchJob, PreconditionFailure> {
        let mut seen = HashSet::new();
        let targets: Vec<EpisodeId> = targets
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        if targets.is_empty() {
            return Err(PreconditionFailure::NoTargets);
        }

        let credentials = credentials
            .filter(|credentials| credentials.is_complete())
            .cloned()
            .ok_or(PreconditionFailure::MissingCredentials)?;

        let job_id = JobId::generate();
        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(BatchProgress {
            completed: 0,
            total: targets.len(),
            status: BatchStatus::Pending,
        });

        {
            let mut running = self.lock();
            if running.contains_key(folder_id) {
                return Err(PreconditionFailure::AlreadyRunning(folder_id.clone()));
            }
            running.insert(
                folder_id.clone(),
                RunningJob {
                    job_id,
                    cancel: cancel.clone(),
                    progress: progress_rx,
                },
            );
        }

        debug!(
            folder_id = %folder_id,
            job_id = %job_id,
            targets = targets.len(),
            "Registered batch refresh job"
        );

        Ok(BatchJob {
            job_id,
            folder_id: folder_id.clone(),
            targets,
            credentials,
            client: self.client.clone(),
            policy: self.policy,
            cancel,
            progress: progress_tx,
            event_bus: self.event_bus.clone(),
            _registration: Registration {
                running: self.running.clone(),
                folder_id: folder_id.clone(),
                job_id,
            },
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<FolderId, RunningJob>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the folder's running slot when the job is dropped.
struct Registration {
    running: RunningJobs,
    folder_id: FolderId,
    job_id: JobId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running
            .get(&self.folder_id)
            .is_some_and(|job| job.job_id == self.job_id)
        {
            running.remove(&self.folder_id);
        }
    }
}

/// A validated job that owns its folder's running slot.
pub struct BatchJob {
    job_id: JobId,
    folder_id: FolderId,
    targets: Vec<EpisodeId>,
    credentials: Credentials,
    client: Arc<dyn RemoteLibrary>,
    policy: BatchPolicy,
    cancel: CancellationToken,
    progress: watch::Sender<BatchProgress>,
    event_bus: broadcast::Sender<LibraryEvent>,
    _registration: Registration,
}

impl BatchJob {
    #[must_use]
    pub const fn job_id(&self) -> JobId {
        self.job_id
    }

    #[must_use]
    pub const fn folder_id(&self) -> &FolderId {
        &self.folder_id
    }

    #[must_use]
    pub fn targets(&self) -> &[EpisodeId] {
        &self.targets
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn progress(&self) -> watch::Receiver<BatchProgress> {
        self.progress.subscribe()
    }

    pub async fn run(self) -> BatchOutcome {
        let started = Instant::now();
        let total = self.targets.len();
        let chunk_size = self.policy.effective_chunk_size();

        info!(
            folder_id = %self.folder_id,
            job_id = %self.job_id,
            total,
            chunks = self.policy.chunk_count(total),
            "Starting batch link refresh"
        );
        self.publish(0, BatchStatus::Running);
        let _ = self.event_bus.send(LibraryEvent::BatchRefreshStarted {
            folder_id: self.folder_id.clone(),
            job_id: self.job_id,
            total,
        });

        let mut results: HashMap<EpisodeId, RefreshResult> = HashMap::with_capacity(total);
        let mut completed = 0;
        let mut aborted = false;

        for (index, chunk) in self.targets.chunks(chunk_size).enumerate() {
            if index > 0 {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => {
                        aborted = true;
                        break;
                    }
                    () = tokio::time::sleep(self.policy.inter_chunk_delay) => {}
                }
            } else if self.cancel.is_cancelled() {
                aborted = true;
                break;
            }

            let response = self
                .client
                .refresh_links(&self.folder_id, chunk, &self.credentials)
                .await;
            Self::record_chunk(&self.folder_id, chunk, response, &mut results);

            completed += chunk.len();
            self.publish(completed, BatchStatus::Running);
            let _ = self.event_bus.send(LibraryEvent::BatchRefreshProgress {
                folder_id: self.folder_id.clone(),
                job_id: self.job_id,
                completed,
                total,
            });
        }

        let status = if aborted {
            BatchStatus::Aborted
        } else {
            BatchStatus::Completed
        };

        let items: Vec<RefreshItem> = self
            .targets
            .iter()
            .map(|id| RefreshItem {
                id: id.clone(),
                result: results.remove(id).unwrap_or(RefreshResult::Skipped),
            })
            .collect();

        let (mut success_count, mut failure_count, mut skipped_count) = (0, 0, 0);
        for item in &items {
            match item.result {
                RefreshResult::Refreshed { .. } => success_count += 1,
                RefreshResult::Failed { .. } => failure_count += 1,
                RefreshResult::Skipped => skipped_count += 1,
            }
        }

        self.publish(completed, status);
        let _ = self.event_bus.send(LibraryEvent::BatchRefreshFinished {
            folder_id: self.folder_id.clone(),
            job_id: self.job_id,
            succeeded: success_count,
            failed: failure_count,
            skipped: skipped_count,
        });

        metrics::counter!("link_refresh_items_total", "result" => "refreshed")
            .increment(success_count as u64);
        metrics::counter!("link_refresh_items_total", "result" => "failed")
            .increment(failure_count as u64);
        metrics::counter!("link_refresh_items_total", "result" => "skipped")
            .increment(skipped_count as u64);

        info!(
            event = "batch_refresh_finished",
            folder_id = %self.folder_id,
            job_id = %self.job_id,
            status = ?status,
            succeeded = success_count,
            failed = failure_count,
            skipped = skipped_count,
            duration_ms = started.elapsed().as_millis() as u64,
            "Batch link refresh finished"
        );

        BatchOutcome {
            job_id: self.job_id,
            folder_id: self.folder_id.clone(),
            status,
            items,
            success_count,
            failure_count,
            skipped_count,
        }
    }

    fn record_chunk(
        folder_id: &FolderId,
        chunk: &[EpisodeId],
        response: Result<Vec<LinkRefresh>, crate::clients::RemoteError>,
        results: &mut HashMap<EpisodeId, RefreshResult>,
    ) {
        match response {
            Ok(refreshes) => {
                let mut by_id: HashMap<EpisodeId, LinkOutcome> =
                    HashMap::with_capacity(refreshes.len());
                for refresh in refreshes {
                    by_id.entry(refresh.id).or_insert(refresh.outcome);
                }

                for id in chunk {
                    let result = by_id.remove(id).map_or_else(
                        || RefreshResult::Failed {
                            message: MISSING_FROM_RESPONSE.to_string(),
                        },
                        RefreshResult::from,
                    );
                    results.insert(id.clone(), result);
                }
            }
            Err(e) => {
                warn!(
                    folder_id = %folder_id,
                    chunk = chunk.len(),
                    error = %e,
                    "Link refresh call failed, marking whole chunk as failed"
                );
                let message = e.to_string();
                for id in chunk {
                    results.insert(
                        id.clone(),
                        RefreshResult::Failed {
                            message: message.clone(),
                        },
                    );
                }
            }
        }
    }

    fn publish(&self, completed: usize, status: BatchStatus) {
        self.progress.send_replace(BatchProgress {
            completed,
            total: self.targets.len(),
            status,
        });
    }
}
