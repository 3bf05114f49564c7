//! Scripted peer backend
//!
//! Answers searches from a query table and plays a per-file transfer script.
//! Completed transfers write a real file into the download directory so the
//! orchestrator can locate and move it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use lossless_dl::services::slskd_client::{
    DownloadStatus, PeerFile, PeerResponse, SearchRequest, SearchState,
};
use lossless_dl::services::{BackendError, PeerBackend};
use lossless_dl::utils::basename_any;
use parking_lot::Mutex;

/// How a transfer of one remote file plays out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferScript {
    /// Reports progress for `polls` status calls, then completes
    Succeed { polls: usize },
    /// Completes with an error state on the first poll
    Fail,
    /// Stays queued on the remote peer forever
    Hang,
    /// Every enqueue call is rejected
    RejectEnqueue,
}

impl Default for TransferScript {
    fn default() -> Self {
        TransferScript::Succeed { polls: 1 }
    }
}

type FileKey = (String, String);

#[derive(Debug, Default)]
struct ActiveTransfer {
    polls: usize,
    finished: bool,
}

/// One peer answering with the given files
pub fn peer(username: &str, speed: u64, queue: u32, files: &[&str]) -> PeerResponse {
    PeerResponse {
        username: username.to_string(),
        upload_speed: Some(speed),
        queue_length: Some(queue),
        files: files
            .iter()
            .map(|f| PeerFile {
                filename: f.to_string(),
                size: 4096,
                bit_rate: None,
            })
            .collect(),
    }
}

pub struct MockBackend {
    download_dir: PathBuf,
    results: Mutex<HashMap<String, Vec<PeerResponse>>>,
    searches: Mutex<HashMap<String, String>>,
    scripts: Mutex<HashMap<FileKey, TransferScript>>,
    transfers: Mutex<HashMap<FileKey, ActiveTransfer>>,
    queries: Mutex<Vec<String>>,
    enqueued: Mutex<Vec<FileKey>>,
    cancelled: Mutex<Vec<FileKey>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    offline: AtomicBool,
}

impl MockBackend {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            results: Mutex::new(HashMap::new()),
            searches: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
            transfers: Mutex::new(HashMap::new()),
            queries: Mutex::new(Vec::new()),
            enqueued: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            offline: AtomicBool::new(false),
        }
    }

    /// Answer searches for exactly `query` with `responses`
    pub fn on_search(&self, query: &str, responses: Vec<PeerResponse>) {
        self.results.lock().insert(query.to_string(), responses);
    }

    /// Script the transfer of `filename` from `username`
    pub fn script(&self, username: &str, filename: &str, script: TransferScript) {
        self.scripts
            .lock()
            .insert((username.to_string(), filename.to_string()), script);
    }

    /// Refuse every search with a network error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Search texts in the order they were started
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }

    pub fn enqueued(&self) -> Vec<FileKey> {
        self.enqueued.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<FileKey> {
        self.cancelled.lock().clone()
    }

    /// Highest number of transfers running at the same time
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn script_for(&self, key: &FileKey) -> TransferScript {
        self.scripts.lock().get(key).copied().unwrap_or_default()
    }

    fn finish(&self, transfer: &mut ActiveTransfer) {
        if !transfer.finished {
            transfer.finished = true;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn write_completed(&self, username: &str, filename: &str) -> Result<(), BackendError> {
        let dir = self.download_dir.join(username);
        std::fs::create_dir_all(&dir).map_err(|e| BackendError::Network(e.to_string()))?;
        std::fs::write(dir.join(basename_any(filename)), b"fLaC test payload")
            .map_err(|e| BackendError::Network(e.to_string()))
    }
}

#[async_trait]
impl PeerBackend for MockBackend {
    async fn start_search(&self, request: &SearchRequest) -> Result<(), BackendError> {
        self.queries.lock().push(request.search_text.clone());
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Network("connection refused".to_string()));
        }
        self.searches
            .lock()
            .insert(request.id.clone(), request.search_text.clone());
        Ok(())
    }

    async fn search_state(&self, search_id: &str) -> Result<SearchState, BackendError> {
        let query = self.searches.lock().get(search_id).cloned().unwrap_or_default();
        let response_count = self.results.lock().get(&query).map(|r| r.len()).unwrap_or(0);
        Ok(SearchState {
            is_complete: true,
            response_count,
        })
    }

    async fn search_responses(&self, search_id: &str) -> Result<Vec<PeerResponse>, BackendError> {
        let query = self.searches.lock().get(search_id).cloned().unwrap_or_default();
        Ok(self.results.lock().get(&query).cloned().unwrap_or_default())
    }

    async fn stop_search(&self, _search_id: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn enqueue_download(
        &self,
        username: &str,
        filename: &str,
        _size: u64,
    ) -> Result<(), BackendError> {
        let key = (username.to_string(), filename.to_string());
        if self.script_for(&key) == TransferScript::RejectEnqueue {
            return Err(BackendError::Api(500, "peer offline".to_string()));
        }
        self.enqueued.lock().push(key.clone());
        self.transfers.lock().insert(key, ActiveTransfer::default());

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        Ok(())
    }

    async fn download_status(
        &self,
        username: &str,
        filename: &str,
    ) -> Result<Option<DownloadStatus>, BackendError> {
        let key = (username.to_string(), filename.to_string());
        let script = self.script_for(&key);

        let mut transfers = self.transfers.lock();
        let Some(transfer) = transfers.get_mut(&key) else {
            return Ok(None);
        };
        transfer.polls += 1;

        let (state, percent) = match script {
            TransferScript::Succeed { polls } if transfer.polls > polls => {
                self.write_completed(username, filename)?;
                self.finish(transfer);
                ("Completed, Succeeded", 100.0)
            }
            TransferScript::Succeed { polls } => {
                ("InProgress", 100.0 * transfer.polls as f64 / (polls + 1) as f64)
            }
            TransferScript::Fail => {
                self.finish(transfer);
                ("Completed, Errored", 0.0)
            }
            TransferScript::Hang | TransferScript::RejectEnqueue => ("Queued, Remotely", 0.0),
        };

        Ok(Some(DownloadStatus {
            id: format!("{}:{}", username, filename),
            filename: filename.to_string(),
            state: state.to_string(),
            percent,
            ..Default::default()
        }))
    }

    async fn cancel_download(&self, username: &str, filename: &str) -> Result<(), BackendError> {
        let key = (username.to_string(), filename.to_string());
        if let Some(transfer) = self.transfers.lock().get_mut(&key) {
            self.finish(transfer);
        }
        self.cancelled.lock().push(key);
        Ok(())
    }
}
