//! Boundary contract of the remote library API.
//!
//! Every response is decoded once, inside the client, into the typed results
//! below. Nothing past this module ever inspects optional JSON fields.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{Credentials, EpisodeId, FolderId};
use crate::models::EpisodeRecord;

/// Failure of a single remote call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("upstream returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("upstream throttled the request: {0}")]
    Throttled(String),

    #[error("upstream rejected the request: {0}")]
    Rejected(String),

    #[error("failed to decode upstream response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Outcome of refreshing the link of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Refreshed {
        play_url: String,
        updated_at: DateTime<Utc>,
    },
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRefresh {
    pub id: EpisodeId,
    pub outcome: LinkOutcome,
}

impl LinkRefresh {
    #[must_use]
    pub fn refreshed(
        id: impl Into<EpisodeId>,
        play_url: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            outcome: LinkOutcome::Refreshed {
                play_url: play_url.into(),
                updated_at,
            },
        }
    }

    #[must_use]
    pub fn failed(id: impl Into<EpisodeId>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outcome: LinkOutcome::Failed {
                message: message.into(),
            },
        }
    }
}

/// Result of a batch delete as reported by upstream.
///
/// `deleted_ids` may be a strict subset of the requested ids; `error` carries
/// the upstream explanation for the remainder when one was given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted_ids: Vec<EpisodeId>,
    pub error: Option<String>,
}

/// The operations the episode library consumes from the cloud drive backend.
///
/// Callers of [`RemoteLibrary::list_episodes`] must have passed the
/// [`crate::library::RequestGovernor`] first.
#[async_trait]
pub trait RemoteLibrary: Send + Sync {
    /// Lists all files of a folder in upstream order.
    async fn list_episodes(&self, folder: &FolderId) -> Result<Vec<EpisodeRecord>, RemoteError>;

    /// Refreshes the play links of one chunk of files.
    async fn refresh_links(
        &self,
        folder: &FolderId,
        ids: &[EpisodeId],
        credentials: &Credentials,
    ) -> Result<Vec<LinkRefresh>, RemoteError>;

    /// Renames a single file. `new_name` is the full name including extension.
    async fn rename_file(
        &self,
        folder: &FolderId,
        id: &EpisodeId,
        new_name: &str,
        credentials: &Credentials,
    ) -> Result<(), RemoteError>;

    /// Deletes a set of files in one call.
    async fn delete_files(
        &self,
        folder: &FolderId,
        ids: &[EpisodeId],
        credentials: &Credentials,
    ) -> Result<DeleteReport, RemoteError>;
}
