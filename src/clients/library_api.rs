use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use super::remote::{DeleteReport, LinkRefresh, RemoteError, RemoteLibrary};
use crate::config::RemoteConfig;
use crate::domain::{Credentials, EpisodeId, FolderId};
use crate::models::{EpisodeRecord, split_extension};

const LIST_PATH: &str = "api/episodes/list";
const RENAME_PATH: &str = "api/episodes/rename";
const DELETE_PATH: &str = "api/episodes/delete";
const UPDATE_LINKS_PATH: &str = "api/pikpak/update-links";

const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "webm", "flv", "m4v", "ts", "wmv", "rmvb",
];

#[derive(Debug, Deserialize)]
struct EpisodeFileWire {
    id: String,
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    create_time: Option<String>,
    #[serde(default)]
    update_time: Option<String>,
    #[serde(default)]
    play_url: Option<String>,
    #[serde(default)]
    is_video: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    success: bool,
    #[serde(default)]
    data: Vec<EpisodeFileWire>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    deleted_ids: Option<Vec<String>>,
    #[serde(default)]
    deleted_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct UpdateLinksResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<UpdateLinksData>,
}

#[derive(Debug, Deserialize)]
struct UpdateLinksData {
    #[serde(default)]
    results: Vec<LinkResultWire>,
}

#[derive(Debug, Deserialize)]
struct LinkResultWire {
    file_id: String,
    success: bool,
    #[serde(default)]
    play_url: Option<String>,
    #[serde(default)]
    updated_time: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// `{code, msg}` envelope the backend uses for every non-2xx response.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    msg: String,
}

#[derive(Serialize)]
struct ListRequest<'a> {
    folder_id: &'a str,
}

#[derive(Serialize)]
struct RenameRequest<'a> {
    username: &'a str,
    password: &'a str,
    file_id: &'a str,
    new_name: &'a str,
    folder_id: &'a str,
}

#[derive(Serialize)]
struct FileIdsRequest<'a> {
    username: &'a str,
    password: &'a str,
    file_ids: Vec<&'a str>,
    folder_id: &'a str,
}

impl<'a> FileIdsRequest<'a> {
    fn new(folder: &'a FolderId, ids: &'a [EpisodeId], credentials: &'a Credentials) -> Self {
        Self {
            username: &credentials.username,
            password: &credentials.password,
            file_ids: ids.iter().map(EpisodeId::as_str).collect(),
            folder_id: folder.as_str(),
        }
    }
}

/// JSON/HTTP client for the library backend that fronts the cloud drive.
#[derive(Debug, Clone)]
pub struct HttpLibraryClient {
    client: Client,
    base_url: Url,
}

impl HttpLibraryClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(config.user_agent.as_str())
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;
        Self::with_shared_client(client, &config.base_url)
    }

    pub fn with_shared_client(client: Client, base_url: &str) -> Result<Self> {
        // Url::join drops the last path segment unless it ends with a slash.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .with_context(|| format!("Invalid remote base URL: {base_url}"))?;
        Ok(Self { client, base_url })
    }

    async fn post<B, R>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
    ) -> Result<R, RemoteError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| RemoteError::Transport(format!("invalid endpoint {path}: {e}")))?;

        let start = Instant::now();
        let response = self.client.post(url).json(body).send().await;
        let elapsed = start.elapsed();

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                metrics::counter!(
                    "remote_requests_total",
                    "operation" => operation,
                    "status" => "error"
                )
                .increment(1);
                warn!(operation, error = %e, "Remote library request failed");
                return Err(e.into());
            }
        };

        let status = response.status();
        metrics::counter!(
            "remote_requests_total",
            "operation" => operation,
            "status" => status.as_u16().to_string()
        )
        .increment(1);
        metrics::histogram!("remote_request_duration_seconds", "operation" => operation)
            .record(elapsed.as_secs_f64());
        debug!(
            operation,
            status = status.as_u16(),
            duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "Remote library response"
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|envelope| envelope.msg)
                .unwrap_or(body);
            return Err(classify_failure(status, message));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RemoteLibrary for HttpLibraryClient {
    async fn list_episodes(&self, folder: &FolderId) -> Result<Vec<EpisodeRecord>, RemoteError> {
        let request = ListRequest {
            folder_id: folder.as_str(),
        };
        let response: ListResponse = self.post("list_episodes", LIST_PATH, &request).await?;

        if !response.success {
            return Err(rejection(response.message, "listing failed"));
        }

        Ok(response.data.into_iter().map(decode_episode).collect())
    }

    async fn refresh_links(
        &self,
        folder: &FolderId,
        ids: &[EpisodeId],
        credentials: &Credentials,
    ) -> Result<Vec<LinkRefresh>, RemoteError> {
        let request = FileIdsRequest::new(folder, ids, credentials);
        let response: UpdateLinksResponse = self
            .post("refresh_links", UPDATE_LINKS_PATH, &request)
            .await?;

        // `success` is false whenever every id failed, but the per-id results
        // are still present and are what the caller needs.
        let Some(data) = response.data else {
            return Err(rejection(response.message, "no per-file results returned"));
        };

        Ok(data.results.into_iter().map(decode_link_result).collect())
    }

    async fn rename_file(
        &self,
        folder: &FolderId,
        id: &EpisodeId,
        new_name: &str,
        credentials: &Credentials,
    ) -> Result<(), RemoteError> {
        let request = RenameRequest {
            username: &credentials.username,
            password: &credentials.password,
            file_id: id.as_str(),
            new_name,
            folder_id: folder.as_str(),
        };
        let response: StatusResponse = self.post("rename_file", RENAME_PATH, &request).await?;

        if response.success {
            Ok(())
        } else {
            Err(rejection(response.message, "rename failed"))
        }
    }

    async fn delete_files(
        &self,
        folder: &FolderId,
        ids: &[EpisodeId],
        credentials: &Credentials,
    ) -> Result<DeleteReport, RemoteError> {
        let request = FileIdsRequest::new(folder, ids, credentials);
        let response: DeleteResponse = self.post("delete_files", DELETE_PATH, &request).await?;
        Ok(reconcile_delete(ids, response))
    }
}

fn classify_failure(status: StatusCode, message: String) -> RemoteError {
    if status == StatusCode::TOO_MANY_REQUESTS || is_throttle_message(&message) {
        RemoteError::Throttled(message)
    } else {
        RemoteError::Status {
            status: status.as_u16(),
            message,
        }
    }
}

fn rejection(message: Option<String>, fallback: &str) -> RemoteError {
    let message = message.unwrap_or_else(|| fallback.to_string());
    if is_throttle_message(&message) {
        RemoteError::Throttled(message)
    } else {
        RemoteError::Rejected(message)
    }
}

fn is_throttle_message(message: &str) -> bool {
    message.to_ascii_lowercase().contains("too frequent")
}

fn decode_episode(wire: EpisodeFileWire) -> EpisodeRecord {
    let is_video = wire.is_video.unwrap_or_else(|| {
        wire.mime_type
            .as_deref()
            .is_some_and(|mime| mime.starts_with("video/"))
            || has_video_extension(&wire.name)
    });

    let mut record = EpisodeRecord::new(wire.id, wire.name, is_video);
    if let Some(play_url) = wire.play_url.filter(|url| !url.is_empty()) {
        let updated_at = wire.update_time.as_deref().and_then(parse_upstream_time);
        record = record.with_play_url(play_url, updated_at);
    }
    record.size = wire.size;
    record.mime_type = wire.mime_type.or(wire.kind);
    record.created_at = wire.create_time;
    record
}

fn decode_link_result(wire: LinkResultWire) -> LinkRefresh {
    match (wire.success, wire.play_url) {
        (true, Some(play_url)) if !play_url.is_empty() => {
            let updated_at = wire
                .updated_time
                .as_deref()
                .and_then(parse_upstream_time)
                .unwrap_or_else(Utc::now);
            LinkRefresh::refreshed(wire.file_id, play_url, updated_at)
        }
        (true, _) => LinkRefresh::failed(wire.file_id, "upstream returned no play link"),
        (false, _) => LinkRefresh::failed(
            wire.file_id,
            wire.message
                .unwrap_or_else(|| "failed to fetch play link".to_string()),
        ),
    }
}

/// Older backends only report a count. The full requested set is assumed
/// deleted only when the count covers it; any other count is surfaced
/// without guessing which ids went away.
fn reconcile_delete(requested: &[EpisodeId], response: DeleteResponse) -> DeleteReport {
    if let Some(ids) = response.deleted_ids {
        let error = (ids.len() < requested.len()).then(|| {
            response
                .message
                .clone()
                .unwrap_or_else(|| "some files were not deleted".to_string())
        });
        return DeleteReport {
            deleted_ids: ids.into_iter().map(EpisodeId::from).collect(),
            error,
        };
    }

    match response.deleted_count {
        Some(count) if response.success && count == requested.len() => DeleteReport {
            deleted_ids: requested.to_vec(),
            error: None,
        },
        Some(count) => DeleteReport {
            deleted_ids: Vec::new(),
            error: Some(format!(
                "upstream deleted {count} of {} files without reporting which",
                requested.len()
            )),
        },
        None => DeleteReport {
            deleted_ids: Vec::new(),
            error: Some(
                response
                    .message
                    .unwrap_or_else(|| "delete failed".to_string()),
            ),
        },
    }
}

fn has_video_extension(name: &str) -> bool {
    let (_, extension) = split_extension(name);
    let extension = extension.trim_start_matches('.');
    VIDEO_EXTENSIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(extension))
}

/// Accepts RFC 3339 as well as the naive ISO timestamps the backend writes,
/// which are taken as UTC.
fn parse_upstream_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
