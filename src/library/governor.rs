use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::error::LibraryError;
use crate::config::GovernorConfig;
use crate::domain::FolderId;

/// Kinds of upstream calls that are rate limited independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    ListEpisodes,
    RefreshLinks,
    Rename,
    Delete,
}

impl ActionClass {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ListEpisodes => "list episodes",
            Self::RefreshLinks => "refresh links",
            Self::Rename => "rename",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ActionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionKey {
    pub action: ActionClass,
    pub folder_id: FolderId,
}

impl ActionKey {
    #[must_use]
    pub fn new(action: ActionClass, folder_id: &FolderId) -> Self {
        Self {
            action,
            folder_id: folder_id.clone(),
        }
    }
}

/// Process-wide debounce for upstream calls.
///
/// The attempt is stamped when the call is dispatched, not when it returns,
/// so two rapid triggers can never both reach upstream. A forced request is
/// always admitted but still stamps the key.
#[derive(Debug, Clone)]
pub struct RequestGovernor {
    config: GovernorConfig,
    attempts: Arc<RwLock<HashMap<ActionKey, Instant>>>,
}

impl RequestGovernor {
    #[must_use]
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            attempts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    #[must_use]
    pub const fn cooldown(&self, action: ActionClass) -> Duration {
        self.config.cooldown(action)
    }

    /// Time left before a non-forced call for `key` would be admitted.
    #[must_use]
    pub fn retry_after(&self, key: &ActionKey) -> Option<Duration> {
        let attempts = self.attempts.read().unwrap_or_else(PoisonError::into_inner);
        let last = attempts.get(key)?;
        Self::left(self.cooldown(key.action), *last)
    }

    #[must_use]
    pub fn can_proceed(&self, key: &ActionKey) -> bool {
        self.retry_after(key).is_none()
    }

    pub fn record_attempt(&self, key: ActionKey) {
        self.attempts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Instant::now());
    }

    /// Admits or rejects a call and stamps the attempt when admitted.
    ///
    /// Check and stamp happen under one write lock.
    pub fn acquire(
        &self,
        action: ActionClass,
        folder_id: &FolderId,
        force: bool,
    ) -> Result<(), LibraryError> {
        let key = ActionKey::new(action, folder_id);
        let mut attempts = self
            .attempts
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if !force
            && let Some(&last) = attempts.get(&key)
            && let Some(retry_after) = Self::left(self.cooldown(action), last)
        {
            debug!(
                folder_id = %folder_id,
                action = %action,
                retry_after_ms = retry_after.as_millis() as u64,
                "Rejecting request inside cooldown window"
            );
            return Err(LibraryError::Throttled {
                action,
                retry_after,
            });
        }

        attempts.insert(key, Instant::now());
        Ok(())
    }

    /// Forgets every stamp for a folder.
    pub fn reset(&self, folder_id: &FolderId) {
        self.attempts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|key, _| &key.folder_id != folder_id);
    }

    fn left(cooldown: Duration, last: Instant) -> Option<Duration> {
        let elapsed = last.elapsed();
        (elapsed < cooldown).then(|| cooldown - elapsed)
    }
}
