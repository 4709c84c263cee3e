//! In-memory stand-in for the cloud drive backend.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use pikarr::clients::{DeleteReport, LinkRefresh, RemoteError, RemoteLibrary};
use pikarr::config::Config;
use pikarr::domain::{Credentials, EpisodeId, FolderId};
use pikarr::library::LibraryContext;
use pikarr::models::EpisodeRecord;

/// One scripted listing response.
pub struct ListScript {
    pub delay: Duration,
    pub response: Result<Vec<EpisodeRecord>, RemoteError>,
}

#[derive(Default)]
pub struct MockRemote {
    episodes: Mutex<Vec<EpisodeRecord>>,
    list_script: Mutex<VecDeque<ListScript>>,
    failing_links: Mutex<HashSet<EpisodeId>>,
    refresh_error: Mutex<Option<RemoteError>>,
    undeletable: Mutex<HashSet<EpisodeId>>,
    rename_error: Mutex<Option<RemoteError>>,
    rename_delay: Mutex<Duration>,

    pub list_calls: Mutex<Vec<Instant>>,
    pub refresh_calls: Mutex<Vec<(Instant, Vec<EpisodeId>)>>,
    pub rename_calls: Mutex<Vec<(EpisodeId, String)>>,
    pub delete_calls: Mutex<Vec<Vec<EpisodeId>>>,
}

impl MockRemote {
    pub fn with_videos(count: usize) -> Arc<Self> {
        let remote = Self::default();
        *remote.episodes.lock().unwrap() = (1..=count)
            .map(|i| EpisodeRecord::new(format!("ep{i}"), format!("Episode {i:02}.mkv"), true))
            .collect();
        Arc::new(remote)
    }

    pub fn with_records(records: Vec<EpisodeRecord>) -> Arc<Self> {
        let remote = Self::default();
        *remote.episodes.lock().unwrap() = records;
        Arc::new(remote)
    }

    pub fn script_listing(&self, delay: Duration, response: Result<Vec<EpisodeRecord>, RemoteError>) {
        self.list_script
            .lock()
            .unwrap()
            .push_back(ListScript { delay, response });
    }

    pub fn fail_links(&self, ids: &[&str]) {
        let mut failing = self.failing_links.lock().unwrap();
        failing.clear();
        failing.extend(ids.iter().map(|id| EpisodeId::from(*id)));
    }

    pub fn slow_rename(&self, delay: Duration) {
        *self.rename_delay.lock().unwrap() = delay;
    }

    pub fn fail_refresh_calls(&self, error: RemoteError) {
        *self.refresh_error.lock().unwrap() = Some(error);
    }

    pub fn refuse_delete(&self, ids: &[&str]) {
        self.undeletable
            .lock()
            .unwrap()
            .extend(ids.iter().map(|id| EpisodeId::from(*id)));
    }

    pub fn fail_rename(&self, error: RemoteError) {
        *self.rename_error.lock().unwrap() = Some(error);
    }

    pub fn list_call_count(&self) -> usize {
        self.list_calls.lock().unwrap().len()
    }

    pub fn refresh_chunks(&self) -> Vec<Vec<EpisodeId>> {
        self.refresh_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, ids)| ids.clone())
            .collect()
    }

    pub fn refresh_times(&self) -> Vec<Instant> {
        self.refresh_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }
}

#[async_trait]
impl RemoteLibrary for MockRemote {
    async fn list_episodes(&self, _folder: &FolderId) -> Result<Vec<EpisodeRecord>, RemoteError> {
        self.list_calls.lock().unwrap().push(Instant::now());

        let scripted = self.list_script.lock().unwrap().pop_front();
        match scripted {
            Some(script) => {
                tokio::time::sleep(script.delay).await;
                script.response
            }
            None => Ok(self.episodes.lock().unwrap().clone()),
        }
    }

    async fn refresh_links(
        &self,
        _folder: &FolderId,
        ids: &[EpisodeId],
        _credentials: &Credentials,
    ) -> Result<Vec<LinkRefresh>, RemoteError> {
        let call = {
            let mut calls = self.refresh_calls.lock().unwrap();
            calls.push((Instant::now(), ids.to_vec()));
            calls.len()
        };

        if let Some(error) = self.refresh_error.lock().unwrap().clone() {
            return Err(error);
        }

        let failing = self.failing_links.lock().unwrap();
        Ok(ids
            .iter()
            .map(|id| {
                if failing.contains(id) {
                    LinkRefresh::failed(id.clone(), "link generation failed")
                } else {
                    LinkRefresh::refreshed(
                        id.clone(),
                        format!("https://cdn.example/{id}?call={call}"),
                        Utc::now(),
                    )
                }
            })
            .collect())
    }

    async fn rename_file(
        &self,
        _folder: &FolderId,
        id: &EpisodeId,
        new_name: &str,
        _credentials: &Credentials,
    ) -> Result<(), RemoteError> {
        self.rename_calls
            .lock()
            .unwrap()
            .push((id.clone(), new_name.to_string()));
        let delay = *self.rename_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.rename_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn delete_files(
        &self,
        _folder: &FolderId,
        ids: &[EpisodeId],
        _credentials: &Credentials,
    ) -> Result<DeleteReport, RemoteError> {
        self.delete_calls.lock().unwrap().push(ids.to_vec());

        let undeletable = self.undeletable.lock().unwrap();
        let deleted_ids: Vec<EpisodeId> = ids
            .iter()
            .filter(|id| !undeletable.contains(*id))
            .cloned()
            .collect();
        let error = (deleted_ids.len() < ids.len()).then(|| "some files are locked".to_string());

        self.episodes
            .lock()
            .unwrap()
            .retain(|record| !deleted_ids.contains(record.id()));

        Ok(DeleteReport { deleted_ids, error })
    }
}

pub fn credentials() -> Credentials {
    Credentials::new("tester", "secret")
}

pub fn context(remote: Arc<MockRemote>) -> LibraryContext {
    context_with(remote, Config::default())
}

pub fn context_with(remote: Arc<MockRemote>, config: Config) -> LibraryContext {
    LibraryContext::new(remote, &config).with_credentials(Some(credentials()))
}

pub fn folder() -> FolderId {
    FolderId::from("A")
}

pub fn ids(values: &[&str]) -> Vec<EpisodeId> {
    values.iter().map(|v| EpisodeId::from(*v)).collect()
}
