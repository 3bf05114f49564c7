//! Peer backend boundary and the slskd REST client
//!
//! The rest of the crate talks to the peer network only through
//! [`PeerBackend`]; [`SlskdClient`] is the production implementation over
//! slskd's `/api/v0` endpoints. Tests substitute a scripted backend.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::transfer::map_backend_state;
use crate::models::TransferState;

/// Peer backend errors
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP 429 or an equivalent backend signal
    #[error("Rate limited by peer backend")]
    RateLimited,

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),
}

/// Parameters for one text search
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub id: String,
    pub search_text: String,
    /// Backend-side search timeout in milliseconds
    pub search_timeout: u64,
    pub response_limit: u32,
    pub file_limit: u32,
    pub filter_responses: bool,
    pub minimum_response_file_count: u32,
    pub maximum_peer_queue_length: u32,
    pub minimum_peer_upload_speed: u64,
}

/// Progress of a running search
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchState {
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub response_count: usize,
}

/// One file inside a peer's search response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerFile {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub bit_rate: Option<u32>,
}

/// One peer's answer to a search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerResponse {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub upload_speed: Option<u64>,
    #[serde(default)]
    pub queue_length: Option<u32>,
    #[serde(default)]
    pub files: Vec<PeerFile>,
}

/// Backend view of one download
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStatus {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub filename: String,
    /// Raw state, e.g. `"Queued, Remotely"` or `"Completed, Succeeded"`
    #[serde(default)]
    pub state: String,
    #[serde(default, rename = "percentComplete")]
    pub percent: f64,
    /// ISO 8601 timestamps as slskd reports them
    #[serde(default)]
    pub requested_at: Option<String>,
    #[serde(default)]
    pub enqueued_at: Option<String>,
}

impl DownloadStatus {
    /// Whether slskd has finished with this entry, successfully or not
    pub fn is_terminal(&self) -> bool {
        matches!(
            map_backend_state(&self.state),
            Some(TransferState::Completed | TransferState::Failed)
        )
    }

    fn requested(&self) -> Option<&str> {
        self.requested_at.as_deref().or(self.enqueued_at.as_deref())
    }
}

/// Operations the pipeline needs from a peer network daemon
#[async_trait]
pub trait PeerBackend: Send + Sync {
    /// Start a search; the request carries its own id
    async fn start_search(&self, request: &SearchRequest) -> Result<(), BackendError>;

    async fn search_state(&self, search_id: &str) -> Result<SearchState, BackendError>;

    async fn search_responses(&self, search_id: &str) -> Result<Vec<PeerResponse>, BackendError>;

    async fn stop_search(&self, search_id: &str) -> Result<(), BackendError>;

    async fn enqueue_download(
        &self,
        username: &str,
        filename: &str,
        size: u64,
    ) -> Result<(), BackendError>;

    /// Current status of a download, `None` when the backend does not know it
    async fn download_status(
        &self,
        username: &str,
        filename: &str,
    ) -> Result<Option<DownloadStatus>, BackendError>;

    async fn cancel_download(&self, username: &str, filename: &str) -> Result<(), BackendError>;
}

#[derive(Debug, Deserialize)]
struct UserDownloads {
    #[serde(default)]
    directories: Vec<DownloadDirectory>,
}

#[derive(Debug, Deserialize)]
struct DownloadDirectory {
    #[serde(default)]
    files: Vec<DownloadStatus>,
}

#[derive(Debug, Serialize)]
struct EnqueueFile<'a> {
    filename: &'a str,
    size: u64,
}

/// slskd REST client
pub struct SlskdClient {
    http_client: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl SlskdClient {
    pub fn new(host: &str, api_key: impl Into<String>) -> Result<Self, BackendError> {
        let base_url = Url::parse(host).map_err(|e| BackendError::InvalidUrl(format!("{}: {}", host, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(host.to_string()));
        }

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("lossless-dl/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
            api_key: api_key.into(),
        })
    }

    /// `<base>/api/v0/<segments...>`, each segment percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["api", "v0"])
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let response = request
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(BackendError::RateLimited);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(BackendError::Api(status.as_u16(), error_text));
        }
        Ok(response)
    }

    async fn user_downloads(&self, username: &str) -> Result<Vec<DownloadStatus>, BackendError> {
        let url = self.endpoint(&["transfers", "downloads", username])?;
        let response = match self.send(self.http_client.get(url)).await {
            Ok(r) => r,
            Err(BackendError::Api(404, _)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let downloads: UserDownloads = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;
        Ok(downloads
            .directories
            .into_iter()
            .flat_map(|d| d.files)
            .collect())
    }
}

/// Entry for exactly `filename`.
///
/// Earlier attempts at the same file stay listed after they finish, so a
/// live entry wins over terminal ones, then the most recently requested.
pub(crate) fn find_download<'a>(
    downloads: &'a [DownloadStatus],
    filename: &str,
) -> Option<&'a DownloadStatus> {
    downloads
        .iter()
        .filter(|d| d.filename == filename)
        .max_by(|a, b| {
            (!a.is_terminal())
                .cmp(&!b.is_terminal())
                .then_with(|| a.requested().cmp(&b.requested()))
        })
}

#[async_trait]
impl PeerBackend for SlskdClient {
    async fn start_search(&self, request: &SearchRequest) -> Result<(), BackendError> {
        let url = self.endpoint(&["searches"])?;
        tracing::debug!(search_id = %request.id, query = %request.search_text, "Starting slskd search");
        self.send(self.http_client.post(url).json(request)).await?;
        Ok(())
    }

    async fn search_state(&self, search_id: &str) -> Result<SearchState, BackendError> {
        let url = self.endpoint(&["searches", search_id])?;
        self.send(self.http_client.get(url))
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))
    }

    async fn search_responses(&self, search_id: &str) -> Result<Vec<PeerResponse>, BackendError> {
        let url = self.endpoint(&["searches", search_id, "responses"])?;
        self.send(self.http_client.get(url))
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))
    }

    async fn stop_search(&self, search_id: &str) -> Result<(), BackendError> {
        let url = self.endpoint(&["searches", search_id])?;
        self.send(self.http_client.put(url)).await?;
        Ok(())
    }

    async fn enqueue_download(
        &self,
        username: &str,
        filename: &str,
        size: u64,
    ) -> Result<(), BackendError> {
        let url = self.endpoint(&["transfers", "downloads", username])?;
        let body = [EnqueueFile { filename, size }];
        self.send(self.http_client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn download_status(
        &self,
        username: &str,
        filename: &str,
    ) -> Result<Option<DownloadStatus>, BackendError> {
        let downloads = self.user_downloads(username).await?;
        Ok(find_download(&downloads, filename).cloned())
    }

    async fn cancel_download(&self, username: &str, filename: &str) -> Result<(), BackendError> {
        let downloads = self.user_downloads(username).await?;
        let Some(download) = find_download(&downloads, filename) else {
            return Ok(());
        };
        let mut url = self.endpoint(&["transfers", "downloads", username, &download.id])?;
        url.query_pairs_mut().append_pair("remove", "false");
        self.send(self.http_client.delete(url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_encodes_segments() {
        let client = SlskdClient::new("http://localhost:5030/", "key").unwrap();
        let url = client
            .endpoint(&["transfers", "downloads", "dj shadow/1"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5030/api/v0/transfers/downloads/dj%20shadow%2F1"
        );
    }

    #[test]
    fn test_invalid_host_rejected() {
        assert!(matches!(
            SlskdClient::new("not a url", "key"),
            Err(BackendError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_parse_search_responses() {
        let json = r#"[{
            "username": "peer1",
            "uploadSpeed": 123456,
            "queueLength": 2,
            "hasFreeUploadSlot": true,
            "files": [
                {"filename": "Music\\A\\01 Song.flac", "size": 3000, "bitRate": 1411, "extension": "flac"},
                {"filename": "Music\\A\\cover.jpg", "size": 12}
            ]
        }]"#;
        let responses: Vec<PeerResponse> = serde_json::from_str(json).unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].upload_speed, Some(123456));
        assert_eq!(responses[0].queue_length, Some(2));
        assert_eq!(responses[0].files[0].bit_rate, Some(1411));
        assert_eq!(responses[0].files[1].bit_rate, None);
    }

    #[test]
    fn test_parse_user_downloads() {
        let json = r#"{
            "username": "peer1",
            "directories": [{
                "directory": "Music\\A",
                "fileCount": 1,
                "files": [{
                    "id": "abc",
                    "filename": "Music\\A\\01 Song.flac",
                    "state": "InProgress",
                    "requestedAt": "2024-05-01T10:00:00.1234567",
                    "percentComplete": 42.5
                }]
            }]
        }"#;
        let downloads: UserDownloads = serde_json::from_str(json).unwrap();
        let files: Vec<DownloadStatus> = downloads.directories.into_iter().flat_map(|d| d.files).collect();
        assert_eq!(files[0].state, "InProgress");
        assert_eq!(files[0].percent, 42.5);
        assert_eq!(files[0].requested_at.as_deref(), Some("2024-05-01T10:00:00.1234567"));
        assert!(!files[0].is_terminal());
    }

    fn status(filename: &str, state: &str, requested_at: &str) -> DownloadStatus {
        DownloadStatus {
            id: format!("{}@{}", filename, requested_at),
            filename: filename.into(),
            state: state.into(),
            requested_at: Some(requested_at.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_find_download_ignores_basename_twin() {
        // Finished transfer of a different album's 01.flac
        let downloads = vec![status("Music\\A\\01.flac", "Completed, Succeeded", "2024-05-01T10:00:00")];
        assert!(find_download(&downloads, "Music\\B\\01.flac").is_none());
        assert!(find_download(&downloads, "Music\\A\\01.flac").is_some());
    }

    #[test]
    fn test_find_download_prefers_live_entry_over_stale_one() {
        let downloads = vec![
            status("Music\\A\\01.flac", "Completed, Errored", "2024-05-01T10:00:00"),
            status("Music\\A\\01.flac", "Queued, Remotely", "2024-05-01T09:00:00"),
        ];
        let found = find_download(&downloads, "Music\\A\\01.flac").unwrap();
        assert_eq!(found.state, "Queued, Remotely");
    }

    #[test]
    fn test_find_download_prefers_newest_terminal_entry() {
        let downloads = vec![
            status("Music\\A\\01.flac", "Completed, Succeeded", "2024-05-02T08:00:00"),
            status("Music\\A\\01.flac", "Completed, Errored", "2024-05-01T10:00:00"),
        ];
        let found = find_download(&downloads, "Music\\A\\01.flac").unwrap();
        assert_eq!(found.state, "Completed, Succeeded");
    }
}
