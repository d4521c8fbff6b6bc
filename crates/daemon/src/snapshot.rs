//! Where cycle snapshots come from.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use discovery_core::model::Snapshot;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no leading master known")]
    NoLeader,
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned {status}")]
    Status { url: String, status: u16 },
    #[error("snapshot unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Fetches the current topology from the first of `leaders` that answers.
    async fn current_snapshot(&self, leaders: &[String]) -> Result<Snapshot, SnapshotError>;
}

/// Fetches a JSON snapshot document over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSnapshotProvider {
    http: Client,
    url_template: String,
}

impl HttpSnapshotProvider {
    /// `url_template` contains `{leader}`, replaced with a master's `host:port`.
    pub fn new(url_template: impl Into<String>, timeout: Duration) -> Result<Self, SnapshotError> {
        let http = Client::builder().timeout(timeout).build().map_err(SnapshotError::Client)?;
        Ok(Self {
            http,
            url_template: url_template.into(),
        })
    }

    fn url_for(&self, leader: &str) -> String {
        self.url_template.replace("{leader}", leader)
    }

    async fn fetch(&self, url: &str) -> Result<Snapshot, SnapshotError> {
        let resp = self.http.get(url).send().await.map_err(|source| SnapshotError::Request {
            url: url.to_string(),
            source,
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SnapshotError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        resp.json::<Snapshot>().await.map_err(|source| SnapshotError::Request {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl SnapshotProvider for HttpSnapshotProvider {
    async fn current_snapshot(&self, leaders: &[String]) -> Result<Snapshot, SnapshotError> {
        let mut last = SnapshotError::NoLeader;
        for leader in leaders.iter().filter(|l| !l.is_empty()) {
            let url = self.url_for(leader);
            match self.fetch(&url).await {
                Ok(snapshot) => {
                    debug!(%url, nodes = snapshot.nodes.len(), "fetched snapshot");
                    return Ok(snapshot);
                }
                Err(e) => {
                    warn!(%leader, error = %e, "failed to fetch snapshot");
                    last = e;
                }
            }
        }
        Err(last)
    }
}

/// Serves a fixed snapshot, or a fixed failure. Counts fetches.
#[derive(Debug, Default)]
pub struct StaticSnapshotProvider {
    snapshot: Mutex<Option<Snapshot>>,
    fetches: AtomicUsize,
}

impl StaticSnapshotProvider {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            fetches: AtomicUsize::new(0),
        }
    }

    /// `None` makes every fetch fail.
    pub fn set(&self, snapshot: Option<Snapshot>) {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotProvider for StaticSnapshotProvider {
    async fn current_snapshot(&self, leaders: &[String]) -> Result<Snapshot, SnapshotError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if leaders.first().map_or(true, |l| l.is_empty()) {
            return Err(SnapshotError::NoLeader);
        }
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| SnapshotError::Unavailable("static snapshot unset".into()))
    }
}
