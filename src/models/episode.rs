use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::EpisodeId;

/// One file of a library folder as shown in the episode management view.
///
/// `id` never changes after construction. Only a rename touches `name`, and
/// only a link refresh touches `play_url` / `updated_at`; both go through the
/// crate-internal setters below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    id: EpisodeId,
    name: String,
    is_video: bool,
    play_url: Option<String>,
    updated_at: Option<DateTime<Utc>>,

    pub size: Option<u64>,
    pub mime_type: Option<String>,
    pub created_at: Option<String>,
}

impl EpisodeRecord {
    #[must_use]
    pub fn new(id: impl Into<EpisodeId>, name: impl Into<String>, is_video: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_video,
            play_url: None,
            updated_at: None,
            size: None,
            mime_type: None,
            created_at: None,
        }
    }

    /// Seeds an already known link, e.g. when decoding a listing response.
    #[must_use]
    pub fn with_play_url(
        mut self,
        play_url: impl Into<String>,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.play_url = Some(play_url.into());
        self.updated_at = updated_at;
        self
    }

    #[must_use]
    pub const fn id(&self) -> &EpisodeId {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn is_video(&self) -> bool {
        self.is_video
    }

    #[must_use]
    pub fn play_url(&self) -> Option<&str> {
        self.play_url.as_deref()
    }

    #[must_use]
    pub const fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// The play action is only offered for videos that currently carry a link.
    #[must_use]
    pub const fn is_playable(&self) -> bool {
        self.is_video && self.play_url.is_some()
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub(crate) fn set_play_url(&mut self, play_url: String, updated_at: DateTime<Utc>) {
        self.play_url = Some(play_url);
        self.updated_at = Some(updated_at);
    }
}

/// Splits a file name at its last dot into `(base, extension)`.
///
/// The extension keeps its leading dot. Names without a dot have an empty
/// extension.
#[must_use]
pub fn split_extension(name: &str) -> (&str, &str) {
    name.rfind('.')
        .map_or((name, ""), |idx| (&name[..idx], &name[idx..]))
}

/// Builds the full upstream name for a rename: the trimmed new base name plus
/// the extension of the original file.
#[must_use]
pub fn compose_rename(original: &str, new_base: &str) -> String {
    let (_, extension) = split_extension(original);
    format!("{}{extension}", new_base.trim())
}
