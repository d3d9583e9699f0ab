#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parkspot_contracts::parking::{LogId, LogRecord, LogRecordInput};
use parkspot_contracts::{ContractViolation, MonotonicTimeNs, Validate};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::debug;

/// Length of the hex ids minted by [`MemoryDocumentStore`].
const LOG_ID_HEX_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("write to {collection} failed: {reason}")]
    WriteFailed { collection: String, reason: String },
    #[error("read from {collection} failed: {reason}")]
    ReadFailed { collection: String, reason: String },
    #[error("live query on {collection} failed: {reason}")]
    SubscriptionFailed { collection: String, reason: String },
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}

/// Typed client contract for the collection-oriented document store.
///
/// Every call is a suspension point. Implementations are shared between the
/// shell and its subscription pump, so they must be `Send + Sync`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts a record; the store assigns `id` and a server timestamp.
    async fn insert(&self, collection: &str, input: LogRecordInput) -> Result<LogId, StorageError>;

    /// Opens a live query over the newest `limit` records, ordered by timestamp descending.
    async fn query_newest(&self, collection: &str, limit: usize) -> Result<LiveQuery, StorageError>;

    /// Every record in the collection, oldest first.
    async fn list_all(&self, collection: &str) -> Result<Vec<LogRecord>, StorageError>;

    /// Deleting an id that does not exist succeeds.
    async fn delete_by_id(&self, collection: &str, id: &LogId) -> Result<(), StorageError>;

    /// Atomically replaces the whole collection with one freshly inserted record.
    async fn replace_all(
        &self,
        collection: &str,
        input: LogRecordInput,
    ) -> Result<LogId, StorageError>;
}

type Snapshot = Arc<Vec<LogRecord>>;

/// Cancellable handle over a live query. Yields immutable snapshots, newest first.
#[derive(Debug)]
pub struct LiveQuery {
    collection: String,
    limit: usize,
    rx: Option<watch::Receiver<Snapshot>>,
    delivered_initial: bool,
}

impl LiveQuery {
    fn new(collection: &str, limit: usize, rx: watch::Receiver<Snapshot>) -> Self {
        Self {
            collection: collection.to_string(),
            limit,
            rx: Some(rx),
            delivered_initial: false,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.is_none()
    }

    /// First call yields the current state; later calls wait for the next change.
    ///
    /// Returns `None` once cancelled. A broken feed yields one error, then `None`.
    pub async fn next_snapshot(&mut self) -> Option<Result<Vec<LogRecord>, StorageError>> {
        let rx = self.rx.as_mut()?;
        if self.delivered_initial && rx.changed().await.is_err() {
            self.rx = None;
            return Some(Err(StorageError::SubscriptionFailed {
                collection: self.collection.clone(),
                reason: "live feed closed by store".to_string(),
            }));
        }
        self.delivered_initial = true;
        let snapshot = rx
            .borrow_and_update()
            .iter()
            .take(self.limit)
            .cloned()
            .collect();
        Some(Ok(snapshot))
    }

    pub fn cancel(&mut self) {
        self.rx = None;
    }
}

#[derive(Debug)]
struct Collection {
    rows: BTreeMap<LogId, LogRecord>,
    feed: watch::Sender<Snapshot>,
}

impl Collection {
    fn new() -> Self {
        let (feed, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            rows: BTreeMap::new(),
            feed,
        }
    }

    fn oldest_first(&self) -> Vec<LogRecord> {
        let mut rows: Vec<LogRecord> = self.rows.values().cloned().collect();
        rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        rows
    }

    fn publish(&self) {
        let mut newest_first = self.oldest_first();
        newest_first.reverse();
        self.feed.send_replace(Arc::new(newest_first));
    }
}

#[derive(Debug, Default)]
struct StoreFaults {
    failing_inserts: u32,
    failing_deletes: BTreeSet<LogId>,
    fail_listing: bool,
    fail_live_queries: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreCounters {
    pub inserts: u64,
    pub deletes: u64,
    pub replaces: u64,
}

impl StoreCounters {
    pub fn writes(&self) -> u64 {
        self.inserts + self.deletes + self.replaces
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    collections: BTreeMap<String, Collection>,
    next_seq: u64,
    last_timestamp: MonotonicTimeNs,
    counters: StoreCounters,
    faults: StoreFaults,
}

impl StoreInner {
    fn collection_mut(&mut self, name: &str) -> &mut Collection {
        self.collections
            .entry(name.to_string())
            .or_insert_with(Collection::new)
    }

    fn next_timestamp(&mut self) -> MonotonicTimeNs {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos().min(u64::MAX as u128) as u64)
            .unwrap_or(0);
        let ts = wall.max(self.last_timestamp.0.saturating_add(1));
        self.last_timestamp = MonotonicTimeNs(ts);
        self.last_timestamp
    }

    fn mint_id(
        &mut self,
        collection: &str,
        timestamp: MonotonicTimeNs,
    ) -> Result<LogId, StorageError> {
        self.next_seq = self.next_seq.saturating_add(1);
        let mut hasher = Sha256::new();
        hasher.update(collection.as_bytes());
        hasher.update(self.next_seq.to_be_bytes());
        hasher.update(timestamp.0.to_be_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Ok(LogId::new(&hex[..LOG_ID_HEX_LEN])?)
    }

    fn take_insert_fault(&mut self, collection: &str) -> Result<(), StorageError> {
        if self.faults.failing_inserts > 0 {
            self.faults.failing_inserts -= 1;
            return Err(StorageError::WriteFailed {
                collection: collection.to_string(),
                reason: "injected insert failure".to_string(),
            });
        }
        Ok(())
    }
}

/// In-process document store with live queries and fault injection.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    inner: Mutex<StoreInner>,
}

impl MemoryDocumentStore {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // Every mutation completes under one guard, so a poisoned lock still holds consistent rows.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn counters(&self) -> StoreCounters {
        self.lock().counters
    }

    pub fn len(&self, collection: &str) -> usize {
        self.lock()
            .collections
            .get(collection)
            .map_or(0, |c| c.rows.len())
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Synchronous view of every record, oldest first.
    pub fn rows(&self, collection: &str) -> Vec<LogRecord> {
        self.lock()
            .collections
            .get(collection)
            .map(Collection::oldest_first)
            .unwrap_or_default()
    }

    pub fn fail_next_inserts(&self, count: u32) {
        self.lock().faults.failing_inserts = count;
    }

    pub fn fail_delete_of(&self, id: LogId) {
        self.lock().faults.failing_deletes.insert(id);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.lock().faults.fail_listing = fail;
    }

    pub fn fail_live_queries(&self, fail: bool) {
        self.lock().faults.fail_live_queries = fail;
    }

    /// Drops the live feed of `collection`; open queries observe one error and end.
    pub fn break_live_queries(&self, collection: &str) {
        let mut inner = self.lock();
        let c = inner.collection_mut(collection);
        let (feed, _) = watch::channel(Arc::new(Vec::new()));
        c.feed = feed;
        c.publish();
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert(
        &self,
        collection: &str,
        input: LogRecordInput,
    ) -> Result<LogId, StorageError> {
        input.validate()?;
        let mut inner = self.lock();
        inner.take_insert_fault(collection)?;
        let timestamp = inner.next_timestamp();
        let id = inner.mint_id(collection, timestamp)?;
        let record = LogRecord::from_input(id.clone(), input, timestamp);
        let c = inner.collection_mut(collection);
        c.rows.insert(id.clone(), record);
        c.publish();
        inner.counters.inserts += 1;
        debug!(collection, id = %id, "log record inserted");
        Ok(id)
    }

    async fn query_newest(
        &self,
        collection: &str,
        limit: usize,
    ) -> Result<LiveQuery, StorageError> {
        let mut inner = self.lock();
        if inner.faults.fail_live_queries {
            return Err(StorageError::SubscriptionFailed {
                collection: collection.to_string(),
                reason: "injected live query failure".to_string(),
            });
        }
        if limit == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "query_newest.limit",
                reason: "must be >= 1",
            }
            .into());
        }
        let rx = inner.collection_mut(collection).feed.subscribe();
        Ok(LiveQuery::new(collection, limit, rx))
    }

    async fn list_all(&self, collection: &str) -> Result<Vec<LogRecord>, StorageError> {
        let inner = self.lock();
        if inner.faults.fail_listing {
            return Err(StorageError::ReadFailed {
                collection: collection.to_string(),
                reason: "injected listing failure".to_string(),
            });
        }
        Ok(inner
            .collections
            .get(collection)
            .map(Collection::oldest_first)
            .unwrap_or_default())
    }

    async fn delete_by_id(&self, collection: &str, id: &LogId) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.faults.failing_deletes.contains(id) {
            return Err(StorageError::WriteFailed {
                collection: collection.to_string(),
                reason: format!("injected delete failure for {id}"),
            });
        }
        let c = inner.collection_mut(collection);
        if c.rows.remove(id).is_some() {
            c.publish();
        }
        inner.counters.deletes += 1;
        debug!(collection, id = %id, "log record deleted");
        Ok(())
    }

    async fn replace_all(
        &self,
        collection: &str,
        input: LogRecordInput,
    ) -> Result<LogId, StorageError> {
        input.validate()?;
        let mut inner = self.lock();
        inner.take_insert_fault(collection)?;
        let timestamp = inner.next_timestamp();
        let id = inner.mint_id(collection, timestamp)?;
        let record = LogRecord::from_input(id.clone(), input, timestamp);
        let c = inner.collection_mut(collection);
        c.rows.clear();
        c.rows.insert(id.clone(), record);
        c.publish();
        inner.counters.replaces += 1;
        debug!(collection, id = %id, "collection replaced");
        Ok(id)
    }
}
