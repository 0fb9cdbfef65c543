//! Crumb log: append-only storage for turn records, plus the background writer that keeps
//! persistence off the response path.
//!
//! The store stamps `created_at` at write time; callers never supply it.

use crate::config::WrdoConfig;
use crate::error::{ConfigError, StoreError, StoreResult};
use crate::turn::{NewTurnRecord, TurnRecord};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const CRUMBS_TREE: &str = "crumbs";

#[async_trait]
pub trait TurnStore: Send + Sync {
    /// Append one record. Returns the record as stored (with its timestamp).
    async fn append(&self, record: NewTurnRecord) -> StoreResult<TurnRecord>;
}

// -----------------------------------------------------------------------------
// Sled
// -----------------------------------------------------------------------------

/// Local crumb log on sled. Keys are big-endian ids from `generate_id`, so key order is append order.
pub struct SledTurnStore {
    db: sled::Db,
    crumbs: sled::Tree,
}

impl SledTurnStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = sled::open(path.as_ref())?;
        let crumbs = db.open_tree(CRUMBS_TREE)?;
        Ok(Self { db, crumbs })
    }

    pub fn len(&self) -> usize {
        self.crumbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crumbs.is_empty()
    }

    /// All records in append order (operator audit; the pipeline never reads).
    pub fn records(&self) -> StoreResult<Vec<TurnRecord>> {
        self.crumbs
            .iter()
            .values()
            .map(|v| -> StoreResult<TurnRecord> { Ok(serde_json::from_slice(&v?)?) })
            .collect()
    }
}

#[async_trait]
impl TurnStore for SledTurnStore {
    async fn append(&self, record: NewTurnRecord) -> StoreResult<TurnRecord> {
        let id = self.db.generate_id()?;
        let stamped = record.stamp(Utc::now());
        let payload = serde_json::to_vec(&stamped)?;
        self.crumbs.insert(id.to_be_bytes(), payload)?;
        self.crumbs.flush_async().await?;
        Ok(stamped)
    }
}

// -----------------------------------------------------------------------------
// Remote document log
// -----------------------------------------------------------------------------

fn default_collection() -> String {
    CRUMBS_TREE.to_string()
}

/// JSON credential bundle for a remote document log.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreCredentials {
    /// Base URL of the document API.
    pub endpoint: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl StoreCredentials {
    pub fn from_file(path: &Path) -> StoreResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Credentials(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> StoreResult<Self> {
        let creds: Self = serde_json::from_str(raw)?;
        if creds.endpoint.trim().is_empty() {
            return Err(StoreError::Credentials("endpoint is empty".to_string()));
        }
        Ok(creds)
    }

    pub fn collection_url(&self) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.collection.trim_matches('/')
        )
    }
}

/// Posts each record as a JSON document to `{endpoint}/{collection}`.
pub struct DocumentLogStore {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl DocumentLogStore {
    pub fn new(credentials: StoreCredentials, timeout: Duration) -> StoreResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: credentials.collection_url(),
            api_key: credentials
                .api_key
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            client,
        })
    }
}

#[async_trait]
impl TurnStore for DocumentLogStore {
    async fn append(&self, record: NewTurnRecord) -> StoreResult<TurnRecord> {
        let stamped = record.stamp(Utc::now());
        let mut req = self.client.post(&self.url).json(&stamped);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(stamped)
    }
}

/// Open the configured store: remote document log when a credential bundle is configured, else sled.
pub fn from_config(cfg: &WrdoConfig) -> Result<Arc<dyn TurnStore>, ConfigError> {
    if let Some(path) = cfg.store.credentials_path.as_deref() {
        let creds = StoreCredentials::from_file(path)?;
        info!(target: "wrdo::store", url = %creds.collection_url(), "Crumb log: [document log] (remote)");
        return Ok(Arc::new(DocumentLogStore::new(creds, cfg.upstream_timeout())?));
    }
    if let Some(parent) = cfg.store.path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = SledTurnStore::open(&cfg.store.path)?;
    info!(
        target: "wrdo::store",
        path = %cfg.store.path.display(),
        existing = store.len(),
        "Crumb log: [sled] (local)"
    );
    Ok(Arc::new(store))
}

// -----------------------------------------------------------------------------
// Background writer
// -----------------------------------------------------------------------------

/// Counters for the operator: how many records landed and how many were lost.
#[derive(Debug, Default)]
pub struct PersistenceStats {
    appended: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PersistenceSnapshot {
    pub appended: u64,
    pub failed: u64,
}

impl PersistenceStats {
    pub fn snapshot(&self) -> PersistenceSnapshot {
        PersistenceSnapshot {
            appended: self.appended.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn record_append(&self) {
        self.appended.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle for queueing records. Cheap to clone; the writer task exits once every clone is dropped.
#[derive(Clone)]
pub struct TurnWriter {
    tx: mpsc::Sender<NewTurnRecord>,
    stats: Arc<PersistenceStats>,
}

impl TurnWriter {
    /// Queue a record without waiting for the store. A full queue or a closed writer drops the
    /// record and counts it as a failure.
    pub fn submit(&self, record: NewTurnRecord) -> StoreResult<()> {
        self.tx.try_send(record).map_err(|e| {
            self.stats.record_failure();
            match e {
                TrySendError::Full(_) => {
                    error!(
                        target: "wrdo::store",
                        capacity = self.tx.max_capacity(),
                        "Turn writer backlogged; crumb dropped"
                    );
                    StoreError::QueueFull
                }
                TrySendError::Closed(_) => {
                    error!(target: "wrdo::store", "Turn writer closed; crumb dropped");
                    StoreError::Closed
                }
            }
        })
    }

    /// Records queued but not yet handed to the store.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn stats(&self) -> &Arc<PersistenceStats> {
        &self.stats
    }
}

/// Spawn the writer task with room for `capacity` queued records. Each accepted record is
/// appended exactly once; failures are logged and counted, never retried. The join handle
/// resolves after the queue drains.
pub fn spawn_turn_writer(
    store: Arc<dyn TurnStore>,
    capacity: usize,
) -> (TurnWriter, JoinHandle<PersistenceSnapshot>) {
    let (tx, mut rx) = mpsc::channel::<NewTurnRecord>(capacity.max(1));
    let stats = Arc::new(PersistenceStats::default());
    let task_stats = Arc::clone(&stats);

    let handle = tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            let source = record.source;
            match store.append(record).await {
                Ok(stored) => {
                    task_stats.record_append();
                    debug!(
                        target: "wrdo::store",
                        source = source.as_str(),
                        created_at = %stored.created_at,
                        "Crumb appended"
                    );
                }
                Err(e) => {
                    task_stats.record_failure();
                    error!(target: "wrdo::store", source = source.as_str(), "Crumb append failed: {}", e);
                }
            }
        }
        let snapshot = task_stats.snapshot();
        info!(
            target: "wrdo::store",
            appended = snapshot.appended,
            failed = snapshot.failed,
            "Turn writer drained"
        );
        snapshot
    });

    (TurnWriter { tx, stats }, handle)
}
