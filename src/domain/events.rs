//! Domain events for the episode library.
//!
//! These events are sent via the event bus so the presentation layer can
//! re-render without polling the session.

use serde::Serialize;

use super::{EpisodeId, FolderId, JobId};

/// Events broadcast to subscribers of a [`crate::library::LibraryContext`].
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum LibraryEvent {
    EpisodesLoaded {
        folder_id: FolderId,
        count: usize,
        from_cache: bool,
    },
    LoadThrottled {
        folder_id: FolderId,
        retry_after_ms: u64,
    },

    EpisodeRenamed {
        folder_id: FolderId,
        episode_id: EpisodeId,
        name: String,
    },
    EpisodesDeleted {
        folder_id: FolderId,
        requested: usize,
        deleted: usize,
    },

    BatchRefreshStarted {
        folder_id: FolderId,
        job_id: JobId,
        total: usize,
    },
    BatchRefreshProgress {
        folder_id: FolderId,
        job_id: JobId,
        completed: usize,
        total: usize,
    },
    BatchRefreshFinished {
        folder_id: FolderId,
        job_id: JobId,
        succeeded: usize,
        failed: usize,
        skipped: usize,
    },

    Error {
        folder_id: FolderId,
        message: String,
    },
}
