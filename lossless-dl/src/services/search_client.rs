//! Search client adapter
//!
//! Issues throttled text searches against the peer backend, retries
//! rate-limited calls with exponential backoff and flattens peer responses
//! into deduplicated [`Candidate`]s.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

use super::slskd_client::{BackendError, PeerBackend, PeerResponse, SearchRequest};
use super::throttle::SearchThrottle;
use crate::models::{Candidate, LosslessExtensions};

/// Search errors
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search timed out after {0:?} without responses")]
    Timeout(Duration),

    /// Includes rate-limit exhaustion
    #[error("Search backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Tunables for the search adapter
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub timeout: Duration,
    /// Attempts per backend call when rate limited (at least 1)
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    /// Interval between search state polls
    pub poll_interval: Duration,
    pub response_limit: u32,
    pub file_limit: u32,
    pub max_peer_queue: u32,
    pub min_upload_speed: u64,
    pub lossless: LosslessExtensions,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(15_000),
            max_attempts: 4,
            retry_base_delay: Duration::from_millis(500),
            poll_interval: Duration::from_millis(500),
            response_limit: 60,
            file_limit: 10_000,
            max_peer_queue: 1_000_000,
            min_upload_speed: 0,
            lossless: LosslessExtensions::default(),
        }
    }
}

/// Throttled, retrying search front-end over a [`PeerBackend`]
pub struct SearchClient {
    backend: Arc<dyn PeerBackend>,
    throttle: Arc<SearchThrottle>,
    settings: SearchSettings,
}

impl SearchClient {
    pub fn new(
        backend: Arc<dyn PeerBackend>,
        throttle: Arc<SearchThrottle>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            backend,
            throttle,
            settings,
        }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn default_timeout(&self) -> Duration {
        self.settings.timeout
    }

    /// Run one search and return candidates in discovery order.
    ///
    /// When the deadline passes the search is stopped on the backend and
    /// whatever responses arrived are used; only an empty result at that
    /// point is a [`SearchError::Timeout`].
    pub async fn search(&self, query: &str, timeout: Duration) -> Result<Vec<Candidate>, SearchError> {
        let request = SearchRequest {
            id: Uuid::new_v4().to_string(),
            search_text: query.to_string(),
            search_timeout: timeout.as_millis() as u64,
            response_limit: self.settings.response_limit,
            file_limit: self.settings.file_limit,
            filter_responses: true,
            minimum_response_file_count: 1,
            maximum_peer_queue_length: self.settings.max_peer_queue,
            minimum_peer_upload_speed: self.settings.min_upload_speed,
        };
        let search_id = request.id.as_str();

        self.with_backoff("start_search", || self.backend.start_search(&request))
            .await?;

        let timed_out = self.wait_for_search(search_id, timeout).await?;

        let responses = self
            .with_backoff("search_responses", || self.backend.search_responses(search_id))
            .await?;

        if timed_out && responses.is_empty() {
            tracing::debug!(query = %query, "Search timed out with no responses");
            return Err(SearchError::Timeout(timeout));
        }

        let candidates = self.collect_candidates(responses);
        tracing::debug!(query = %query, hits = candidates.len(), "Search finished");
        Ok(candidates)
    }

    /// Poll until the backend reports completion; returns `true` on timeout
    async fn wait_for_search(&self, search_id: &str, timeout: Duration) -> Result<bool, SearchError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.backend.search_state(search_id).await {
                Ok(state) if state.is_complete => return Ok(false),
                Ok(_) => {}
                // Skip this tick; the deadline still bounds the loop
                Err(BackendError::RateLimited) => {}
                Err(e) => return Err(e.into()),
            }

            let now = Instant::now();
            if now >= deadline {
                if let Err(e) = self.backend.stop_search(search_id).await {
                    tracing::warn!(search_id = %search_id, error = %e, "Failed to stop timed-out search");
                }
                return Ok(true);
            }
            tokio::time::sleep(self.settings.poll_interval.min(deadline - now)).await;
        }
    }

    /// Throttle, then call; retry rate-limited calls with doubling delays
    async fn with_backoff<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, SearchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut delay = self.settings.retry_base_delay;
        let mut attempt = 1;
        loop {
            self.throttle.acquire().await;
            match call().await {
                Ok(value) => return Ok(value),
                Err(BackendError::RateLimited) if attempt < max_attempts => {
                    tracing::warn!(
                        operation = operation,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Peer backend rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Flatten peer responses, dropping repeats of `(username, filename)`
    fn collect_candidates(&self, responses: Vec<PeerResponse>) -> Vec<Candidate> {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut candidates = Vec::new();
        for response in responses {
            for file in response.files {
                if file.filename.is_empty() {
                    continue;
                }
                if !seen.insert((response.username.clone(), file.filename.clone())) {
                    continue;
                }
                candidates.push(Candidate::new(
                    response.username.clone(),
                    file.filename,
                    file.size,
                    response.upload_speed,
                    response.queue_length,
                    file.bit_rate,
                    &self.settings.lossless,
                ));
            }
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::slskd_client::{DownloadStatus, PeerFile, SearchState};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Backend answering searches from a fixed script
    struct ScriptedSearch {
        rate_limited_starts: AtomicUsize,
        complete: bool,
        responses: Vec<PeerResponse>,
        start_calls: AtomicUsize,
        stopped: Mutex<Vec<String>>,
    }

    impl ScriptedSearch {
        fn new(responses: Vec<PeerResponse>) -> Self {
            Self {
                rate_limited_starts: AtomicUsize::new(0),
                complete: true,
                responses,
                start_calls: AtomicUsize::new(0),
                stopped: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PeerBackend for ScriptedSearch {
        async fn start_search(&self, _request: &SearchRequest) -> Result<(), BackendError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.rate_limited_starts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.rate_limited_starts.store(remaining - 1, Ordering::SeqCst);
                return Err(BackendError::RateLimited);
            }
            Ok(())
        }

        async fn search_state(&self, _search_id: &str) -> Result<SearchState, BackendError> {
            Ok(SearchState {
                is_complete: self.complete,
                response_count: self.responses.len(),
            })
        }

        async fn search_responses(&self, _search_id: &str) -> Result<Vec<PeerResponse>, BackendError> {
            Ok(self.responses.clone())
        }

        async fn stop_search(&self, search_id: &str) -> Result<(), BackendError> {
            self.stopped.lock().unwrap().push(search_id.to_string());
            Ok(())
        }

        async fn enqueue_download(&self, _: &str, _: &str, _: u64) -> Result<(), BackendError> {
            unreachable!()
        }

        async fn download_status(&self, _: &str, _: &str) -> Result<Option<DownloadStatus>, BackendError> {
            unreachable!()
        }

        async fn cancel_download(&self, _: &str, _: &str) -> Result<(), BackendError> {
            unreachable!()
        }
    }

    fn response(user: &str, files: &[&str]) -> PeerResponse {
        PeerResponse {
            username: user.to_string(),
            upload_speed: Some(1000),
            queue_length: Some(0),
            files: files
                .iter()
                .map(|f| PeerFile {
                    filename: f.to_string(),
                    size: 10,
                    bit_rate: None,
                })
                .collect(),
        }
    }

    fn settings() -> SearchSettings {
        SearchSettings {
            retry_base_delay: Duration::from_millis(10),
            poll_interval: Duration::from_millis(10),
            ..SearchSettings::default()
        }
    }

    fn client(backend: Arc<ScriptedSearch>, settings: SearchSettings) -> SearchClient {
        SearchClient::new(backend, SearchThrottle::shared(Duration::ZERO), settings)
    }

    #[tokio::test]
    async fn test_dedup_by_user_and_filename() {
        let backend = Arc::new(ScriptedSearch::new(vec![
            response("u1", &["a\\x.flac", "a\\x.flac", "a\\y.flac"]),
            response("u2", &["a\\x.flac"]),
            response("u1", &["a\\x.flac", ""]),
        ]));
        let client = client(backend, settings());

        let found = client.search("q", Duration::from_secs(1)).await.unwrap();
        let keys: Vec<(&str, &str)> = found.iter().map(|c| c.key()).collect();
        assert_eq!(
            keys,
            vec![("u1", "a\\x.flac"), ("u1", "a\\y.flac"), ("u2", "a\\x.flac")]
        );
    }

    #[tokio::test]
    async fn test_rate_limit_backoff_then_success() {
        let backend = Arc::new(ScriptedSearch::new(vec![response("u1", &["x.flac"])]));
        backend.rate_limited_starts.store(2, Ordering::SeqCst);
        let client = client(Arc::clone(&backend), settings());

        let found = client.search("q", Duration::from_secs(1)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(backend.start_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_is_backend_error() {
        let backend = Arc::new(ScriptedSearch::new(vec![]));
        backend.rate_limited_starts.store(10, Ordering::SeqCst);
        let mut s = settings();
        s.max_attempts = 3;
        let client = client(Arc::clone(&backend), s);

        let err = client.search("q", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SearchError::Backend(BackendError::RateLimited)));
        assert_eq!(backend.start_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_without_responses() {
        let mut backend = ScriptedSearch::new(vec![]);
        backend.complete = false;
        let backend = Arc::new(backend);
        let client = client(Arc::clone(&backend), settings());

        let err = client.search("q", Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, SearchError::Timeout(_)));
        assert_eq!(backend.stopped.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_with_partial_responses_succeeds() {
        let mut backend = ScriptedSearch::new(vec![response("u1", &["x.wav"])]);
        backend.complete = false;
        let client = client(Arc::new(backend), settings());

        let found = client.search("q", Duration::from_millis(50)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].reported_speed, Some(1000));
    }
}
