use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, warn};

use super::batch::BatchOutcome;
use super::cache::EpisodeCache;
use super::error::LibraryError;
use super::store::EpisodeStore;
use crate::clients::DeleteReport;
use crate::domain::EpisodeId;

/// What a delete actually did, for the caller to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteSummary {
    pub requested: usize,
    pub deleted_count: usize,
    /// Requested ids that are still present and selected.
    pub not_deleted: Vec<EpisodeId>,
    pub message: Option<String>,
}

impl DeleteSummary {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.deleted_count == self.requested
    }
}

/// Applies confirmed upstream outcomes to a view's store and to the shared
/// snapshot in the same step.
///
/// The cache is patched in place rather than refetched, so a later cache hit
/// serves the mutated list instead of resurrecting old records.
#[derive(Debug, Clone)]
pub struct MutationCoordinator {
    cache: EpisodeCache,
}

impl MutationCoordinator {
    #[must_use]
    pub const fn new(cache: EpisodeCache) -> Self {
        Self { cache }
    }

    pub fn apply_rename(
        &self,
        store: &mut EpisodeStore,
        id: &EpisodeId,
        name: &str,
    ) -> Result<(), LibraryError> {
        store.rename(id, name.to_string())?;
        self.cache.patch(store.folder_id(), |records| {
            if let Some(record) = records.iter_mut().find(|record| record.id() == id) {
                record.set_name(name.to_string());
            }
        });
        debug!(
            folder_id = %store.folder_id(),
            episode_id = %id,
            new_name = name,
            "Applied rename"
        );
        Ok(())
    }

    /// Removes exactly the reported ids that were also requested.
    pub fn apply_delete(
        &self,
        store: &mut EpisodeStore,
        requested: &[EpisodeId],
        report: &DeleteReport,
    ) -> DeleteSummary {
        let requested_set: HashSet<&EpisodeId> = requested.iter().collect();
        let deleted: HashSet<EpisodeId> = report
            .deleted_ids
            .iter()
            .filter(|id| requested_set.contains(id))
            .cloned()
            .collect();

        if deleted.len() < report.deleted_ids.len() {
            warn!(
                folder_id = %store.folder_id(),
                reported = report.deleted_ids.len(),
                "Upstream reported deletions that were not requested, ignoring them"
            );
        }

        store.remove(&deleted);
        self.cache.patch(store.folder_id(), |records| {
            records.retain(|record| !deleted.contains(record.id()));
        });

        let not_deleted: Vec<EpisodeId> = requested
            .iter()
            .filter(|id| !deleted.contains(*id))
            .cloned()
            .collect();

        DeleteSummary {
            requested: requested.len(),
            deleted_count: deleted.len(),
            not_deleted,
            message: report.error.clone(),
        }
    }

    /// Applies a batch outcome in one step. Returns how many records got a new link.
    pub fn apply_refresh(&self, store: &mut EpisodeStore, outcome: &BatchOutcome) -> usize {
        let applied = outcome.apply_to(store.records_mut());
        self.cache.patch(store.folder_id(), |records| {
            outcome.apply_to(records);
        });
        applied
    }
}
