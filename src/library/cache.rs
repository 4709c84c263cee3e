//! Per-folder snapshot cache of episode listings.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use crate::domain::FolderId;
use crate::models::EpisodeRecord;

/// The full record list of a folder as of its last successful listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub folder_id: FolderId,
    pub records: Vec<EpisodeRecord>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheFreshness {
    pub fetched_at: DateTime<Utc>,
    pub age: chrono::Duration,
}

/// Sequence number of one in-flight listing request.
///
/// Only the ticket issued last for a folder may write its response into the
/// cache; older tickets lose even if their response arrives later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    folder_id: FolderId,
    seq: u64,
}

impl FetchTicket {
    #[must_use]
    pub const fn folder_id(&self) -> &FolderId {
        &self.folder_id
    }

    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<FolderId, CacheEntry>,
    issued: HashMap<FolderId, u64>,
}

/// Keyed snapshot store shared by every session of one [`super::LibraryContext`].
///
/// Entries live until invalidated; there is no time-based eviction.
#[derive(Debug, Clone, Default)]
pub struct EpisodeCache {
    inner: Arc<RwLock<CacheInner>>,
}

impl EpisodeCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, folder_id: &FolderId) -> Option<CacheEntry> {
        self.read().entries.get(folder_id).cloned()
    }

    /// Replaces the snapshot wholesale and stamps `fetched_at` with now.
    pub fn set(&self, folder_id: &FolderId, records: Vec<EpisodeRecord>) {
        let mut inner = self.write();
        Self::store(&mut inner, folder_id, records);
    }

    pub fn invalidate(&self, folder_id: &FolderId) {
        if self.write().entries.remove(folder_id).is_some() {
            debug!(folder_id = %folder_id, "Invalidated episode cache entry");
        }
    }

    /// Applies a record-level mutation to the snapshot, keeping `fetched_at`.
    ///
    /// Returns false when the folder has no snapshot.
    pub fn patch<F>(&self, folder_id: &FolderId, f: F) -> bool
    where
        F: FnOnce(&mut Vec<EpisodeRecord>),
    {
        let mut inner = self.write();
        match inner.entries.get_mut(folder_id) {
            Some(entry) => {
                f(&mut entry.records);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn freshness(&self, folder_id: &FolderId, now: DateTime<Utc>) -> Option<CacheFreshness> {
        self.read()
            .entries
            .get(folder_id)
            .map(|entry| CacheFreshness {
                fetched_at: entry.fetched_at,
                age: now.signed_duration_since(entry.fetched_at),
            })
    }

    /// Issues the next listing sequence number for a folder.
    pub fn begin_fetch(&self, folder_id: &FolderId) -> FetchTicket {
        let mut inner = self.write();
        let seq = inner.issued.entry(folder_id.clone()).or_insert(0);
        *seq += 1;
        FetchTicket {
            folder_id: folder_id.clone(),
            seq: *seq,
        }
    }

    #[must_use]
    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        self.read().issued.get(&ticket.folder_id) == Some(&ticket.seq)
    }

    /// Stores a listing response if its ticket is still the latest one.
    ///
    /// Returns false, leaving the cache untouched, for a superseded ticket.
    pub fn commit(&self, ticket: &FetchTicket, records: Vec<EpisodeRecord>) -> bool {
        let mut inner = self.write();
        if inner.issued.get(&ticket.folder_id) != Some(&ticket.seq) {
            debug!(
                folder_id = %ticket.folder_id,
                seq = ticket.seq,
                "Discarding superseded episode listing"
            );
            return false;
        }
        Self::store(&mut inner, &ticket.folder_id, records);
        true
    }

    fn store(inner: &mut CacheInner, folder_id: &FolderId, records: Vec<EpisodeRecord>) {
        inner.entries.insert(
            folder_id.clone(),
            CacheEntry {
                folder_id: folder_id.clone(),
                records,
                fetched_at: Utc::now(),
            },
        );
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, CacheInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CacheInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
