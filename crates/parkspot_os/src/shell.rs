#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use parkspot_contracts::identity::{Identity, SignInRequest};
use parkspot_contracts::parking::{
    Direction, DisplayName, Floor, LogId, LogRecord, LogRecordInput, DEFAULT_LOG_COLLECTION,
};
use parkspot_storage::{DocumentStore, IdentityError, IdentityProvider, StorageError};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The shell only ever shows the single newest record.
pub const NEWEST_RECORD_LIMIT: usize = 1;

/// How the single-record invariant is restored after a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// Insert, list every record, then delete all others concurrently. Not
    /// transactional: two concurrent writers may delete each other's record.
    #[default]
    DeleteOthers,
    /// Replace the collection in one store-side critical section.
    AtomicReplace,
}

impl CleanupPolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DeleteOthers => "delete_others",
            Self::AtomicReplace => "atomic_replace",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "delete_others" => Some(Self::DeleteOthers),
            "atomic_replace" => Some(Self::AtomicReplace),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    pub collection: String,
    pub cleanup: CleanupPolicy,
}

impl ShellConfig {
    pub fn mvp_v1() -> Self {
        Self {
            collection: DEFAULT_LOG_COLLECTION.to_string(),
            cleanup: CleanupPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShellError {
    #[error("not signed in")]
    NotAuthenticated,
    #[error("no direction selected")]
    MissingDirection,
    #[error("a submission is already in flight")]
    Busy,
    #[error("write failed: {0}")]
    WriteFailed(StorageError),
    #[error("live query failed: {0}")]
    SubscriptionError(StorageError),
    #[error("sign-in failed: {0}")]
    SignInFailed(#[from] IdentityError),
}

impl ShellError {
    /// Text shown to the user. Causes stay in the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "Please sign in first",
            Self::MissingDirection => "Please choose Left or Right first",
            Self::Busy => "Still saving, please wait",
            Self::WriteFailed(_) => "Something went wrong saving your spot. Please try again",
            Self::SubscriptionError(_) => "Live updates are unavailable",
            Self::SignInFailed(IdentityError::UserCancelled) => "Sign-in was cancelled",
            Self::SignInFailed(IdentityError::NetworkError(_)) => {
                "Could not reach the sign-in service"
            }
        }
    }
}

/// Immutable snapshot of everything the page renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellView {
    pub signed_in_as: Option<DisplayName>,
    pub current: Option<LogRecord>,
    pub status_line: String,
    pub selected_direction: Option<Direction>,
    pub selected_floor: Option<Floor>,
    pub busy: bool,
    pub message: Option<String>,
    pub subscription_healthy: bool,
}

pub fn status_line(signed_in: bool, current: Option<&LogRecord>) -> String {
    match (signed_in, current) {
        (_, Some(r)) => format!("Currently parked on Floor {} to the {}", r.floor, r.direction),
        (true, None) => "No parking spot recorded yet".to_string(),
        (false, None) => "Sign in to see where the car is parked".to_string(),
    }
}

#[derive(Debug, Default)]
struct ShellState {
    identity: Option<Identity>,
    current: Option<LogRecord>,
    direction: Option<Direction>,
    floor: Option<Floor>,
    busy: bool,
    message: Option<String>,
    subscription_failed: bool,
    // Bumped on every session transition; stale pumps compare and stop.
    generation: u64,
}

#[derive(Debug, Default)]
struct ShellTasks {
    subscription: Option<JoinHandle<()>>,
    identity_follower: Option<JoinHandle<()>>,
}

enum SessionTransition {
    Opened(u64),
    Closed,
    Unchanged,
}

fn lock_state(state: &Mutex<ShellState>) -> MutexGuard<'_, ShellState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears `busy` when a submission future is dropped before completing.
struct BusyGuard {
    state: Arc<Mutex<ShellState>>,
    armed: bool,
}

impl BusyGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if self.armed {
            lock_state(&self.state).busy = false;
        }
    }
}

/// Application shell: session state, the live view of the current record and
/// the submission workflow. Service handles are passed in, never global.
pub struct ParkingShell {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    config: ShellConfig,
    state: Arc<Mutex<ShellState>>,
    tasks: Mutex<ShellTasks>,
}

impl ParkingShell {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        config: ShellConfig,
    ) -> Self {
        Self {
            store,
            identity,
            config,
            state: Arc::new(Mutex::new(ShellState::default())),
            tasks: Mutex::new(ShellTasks::default()),
        }
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, ShellState> {
        lock_state(&self.state)
    }

    fn tasks(&self) -> MutexGuard<'_, ShellTasks> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn view(&self) -> ShellView {
        let st = self.state();
        ShellView {
            signed_in_as: st.identity.as_ref().map(|i| i.display_name.clone()),
            current: st.current.clone(),
            status_line: status_line(st.identity.is_some(), st.current.as_ref()),
            selected_direction: st.direction,
            selected_floor: st.floor,
            busy: st.busy,
            message: st.message.clone(),
            subscription_healthy: !st.subscription_failed,
        }
    }

    /// Adopts `next` as the session identity and opens or tears down the live query.
    pub async fn apply_identity(&self, next: Option<Identity>) {
        let transition = {
            let mut st = self.state();
            let was_signed_in = st.identity.is_some();
            let now_signed_in = next.is_some();
            st.identity = next;
            match (was_signed_in, now_signed_in) {
                (false, true) => {
                    st.generation += 1;
                    st.subscription_failed = false;
                    SessionTransition::Opened(st.generation)
                }
                (true, false) => {
                    st.generation += 1;
                    st.current = None;
                    SessionTransition::Closed
                }
                _ => SessionTransition::Unchanged,
            }
        };
        match transition {
            SessionTransition::Opened(generation) => self.open_subscription(generation).await,
            SessionTransition::Closed => self.cancel_subscription(),
            SessionTransition::Unchanged => {}
        }
    }

    async fn open_subscription(&self, generation: u64) {
        let collection = self.config.collection.as_str();
        let mut query = match self
            .store
            .query_newest(collection, NEWEST_RECORD_LIMIT)
            .await
        {
            Ok(query) => query,
            Err(err) => {
                let err = ShellError::SubscriptionError(err);
                warn!(error = %err, collection, "could not open live query");
                let mut st = self.state();
                if st.generation == generation {
                    st.subscription_failed = true;
                }
                return;
            }
        };

        let state = Arc::clone(&self.state);
        let pump = tokio::spawn(async move {
            while let Some(next) = query.next_snapshot().await {
                let mut st = lock_state(&state);
                if st.generation != generation {
                    break;
                }
                match next {
                    Ok(snapshot) => {
                        st.current = snapshot.into_iter().next();
                        debug!(has_record = st.current.is_some(), "snapshot applied");
                    }
                    Err(err) => {
                        st.subscription_failed = true;
                        warn!(error = %ShellError::SubscriptionError(err), "live query ended");
                    }
                }
            }
            query.cancel();
        });

        // Tasks before state: a sign-out racing this call either sees the new
        // handle and aborts it, or has already bumped the generation.
        let mut tasks = self.tasks();
        if self.state().generation != generation {
            pump.abort();
            return;
        }
        if let Some(previous) = tasks.subscription.replace(pump) {
            previous.abort();
        }
    }

    fn cancel_subscription(&self) {
        if let Some(pump) = self.tasks().subscription.take() {
            pump.abort();
            debug!("live query cancelled");
        }
    }

    pub async fn sign_in(&self, request: SignInRequest) -> Result<Identity, ShellError> {
        match self.identity.sign_in(request).await {
            Ok(identity) => {
                self.apply_identity(Some(identity.clone())).await;
                self.state().message = None;
                Ok(identity)
            }
            Err(err) => {
                let err = ShellError::from(err);
                warn!(error = %err, "sign-in did not complete");
                self.state().message = Some(err.user_message().to_string());
                Err(err)
            }
        }
    }

    pub async fn sign_out(&self) {
        self.identity.sign_out().await;
        self.apply_identity(None).await;
    }

    /// Keeps the session in step with the provider's change stream until shutdown.
    pub fn follow_identity(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let mut rx = self.identity.watch_identity();
        let follower = tokio::spawn(async move {
            loop {
                let next = rx.borrow_and_update().clone();
                let Some(shell) = weak.upgrade() else {
                    break;
                };
                shell.apply_identity(next).await;
                drop(shell);
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });
        if let Some(previous) = self.tasks().identity_follower.replace(follower) {
            previous.abort();
        }
    }

    pub fn select_direction(&self, direction: Direction) {
        let mut st = self.state();
        st.direction = Some(direction);
        st.message = None;
    }

    /// Validates and writes a new record, then restores the single-record invariant.
    ///
    /// No write is issued when the shell is busy, signed out, or has no
    /// direction selected. A busy rejection leaves the in-flight floor selected;
    /// every other outcome records `floor` locally.
    pub async fn submit(&self, floor: Floor) -> Result<LogId, ShellError> {
        let input = {
            let mut st = self.state();
            if st.busy {
                return Err(ShellError::Busy);
            }
            st.floor = Some(floor);
            let Some(user) = st.identity.as_ref().map(|i| i.display_name.clone()) else {
                let err = ShellError::NotAuthenticated;
                st.message = Some(err.user_message().to_string());
                return Err(err);
            };
            let Some(direction) = st.direction else {
                let err = ShellError::MissingDirection;
                st.message = Some(err.user_message().to_string());
                return Err(err);
            };
            st.busy = true;
            st.message = None;
            LogRecordInput::v1(floor, direction, user)
        };
        let mut busy = BusyGuard {
            state: Arc::clone(&self.state),
            armed: true,
        };

        info!(
            floor = floor.label(),
            direction = input.direction.as_str(),
            cleanup = self.config.cleanup.as_str(),
            "submitting parking record"
        );
        let outcome = self.persist(input).await;

        busy.disarm();
        let mut st = self.state();
        st.busy = false;
        match outcome {
            Ok(id) => {
                st.direction = None;
                st.floor = None;
                st.message = None;
                info!(id = %id, "parking record saved");
                Ok(id)
            }
            Err(err) => {
                error!(error = %err, "parking record not saved");
                st.message = Some(err.user_message().to_string());
                Err(err)
            }
        }
    }

    async fn persist(&self, input: LogRecordInput) -> Result<LogId, ShellError> {
        let collection = self.config.collection.as_str();
        match self.config.cleanup {
            CleanupPolicy::AtomicReplace => self
                .store
                .replace_all(collection, input)
                .await
                .map_err(ShellError::WriteFailed),
            CleanupPolicy::DeleteOthers => {
                let id = self
                    .store
                    .insert(collection, input)
                    .await
                    .map_err(ShellError::WriteFailed)?;
                self.delete_others(&id).await?;
                Ok(id)
            }
        }
    }

    /// Deletes every record except `keep`. Deletes run concurrently and are all
    /// awaited; any failure rejects the whole batch.
    async fn delete_others(&self, keep: &LogId) -> Result<usize, ShellError> {
        let collection = self.config.collection.as_str();
        let stale: Vec<LogId> = self
            .store
            .list_all(collection)
            .await
            .map_err(ShellError::WriteFailed)?
            .into_iter()
            .map(|r| r.id)
            .filter(|id| id != keep)
            .collect();

        let results = join_all(
            stale
                .iter()
                .map(|id| self.store.delete_by_id(collection, id)),
        )
        .await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if let Some(Err(first)) = results.into_iter().find(Result::is_err) {
            warn!(failed, total = stale.len(), "stale record cleanup rejected");
            return Err(ShellError::WriteFailed(first));
        }
        debug!(deleted = stale.len(), "stale records removed");
        Ok(stale.len())
    }

    /// Cancels the live query and the identity follower.
    pub fn shutdown(&self) {
        self.state().generation += 1;
        let mut tasks = self.tasks();
        if let Some(pump) = tasks.subscription.take() {
            pump.abort();
        }
        if let Some(follower) = tasks.identity_follower.take() {
            follower.abort();
        }
    }
}

impl Drop for ParkingShell {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parkspot_contracts::parking::DisplayName;
    use parkspot_storage::{LiveQuery, MemoryDocumentStore, MemoryIdentityProvider};
    use tokio::sync::Notify;

    use super::*;

    const LOGS: &str = DEFAULT_LOG_COLLECTION;

    fn floor(label: u8) -> Floor {
        Floor::new(label).unwrap()
    }

    fn request(name: &str) -> SignInRequest {
        SignInRequest {
            display_name: DisplayName::new(name).unwrap(),
        }
    }

    fn shell_with(
        store: Arc<dyn DocumentStore>,
        cleanup: CleanupPolicy,
    ) -> (Arc<MemoryIdentityProvider>, ParkingShell) {
        let identity = Arc::new(MemoryIdentityProvider::new_in_memory());
        let config = ShellConfig {
            cleanup,
            ..ShellConfig::mvp_v1()
        };
        let shell = ParkingShell::new(store, identity.clone(), config);
        (identity, shell)
    }

    fn setup() -> (Arc<MemoryDocumentStore>, ParkingShell) {
        let store = Arc::new(MemoryDocumentStore::new_in_memory());
        let (_, shell) = shell_with(store.clone(), CleanupPolicy::DeleteOthers);
        (store, shell)
    }

    fn input(label: u8, direction: Direction, user: &str) -> LogRecordInput {
        LogRecordInput::v1(floor(label), direction, DisplayName::new(user).unwrap())
    }

    async fn wait_for_view(shell: &ParkingShell, pred: impl Fn(&ShellView) -> bool) -> ShellView {
        for _ in 0..400 {
            let view = shell.view();
            if pred(&view) {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("view never matched: {:?}", shell.view());
    }

    /// Delegates to a memory store but parks every insert until released.
    struct GatedStore {
        inner: MemoryDocumentStore,
        release: Notify,
        insert_calls: AtomicUsize,
    }

    #[async_trait]
    impl DocumentStore for GatedStore {
        async fn insert(
            &self,
            collection: &str,
            input: LogRecordInput,
        ) -> Result<LogId, StorageError> {
            self.insert_calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            self.inner.insert(collection, input).await
        }

        async fn query_newest(
            &self,
            collection: &str,
            limit: usize,
        ) -> Result<LiveQuery, StorageError> {
            self.inner.query_newest(collection, limit).await
        }

        async fn list_all(&self, collection: &str) -> Result<Vec<LogRecord>, StorageError> {
            self.inner.list_all(collection).await
        }

        async fn delete_by_id(&self, collection: &str, id: &LogId) -> Result<(), StorageError> {
            self.inner.delete_by_id(collection, id).await
        }

        async fn replace_all(
            &self,
            collection: &str,
            input: LogRecordInput,
        ) -> Result<LogId, StorageError> {
            self.inner.replace_all(collection, input).await
        }
    }

    #[tokio::test]
    async fn at_shell_01_sign_in_select_left_submit_floor_three() {
        let (store, shell) = setup();
        shell.sign_in(request("Ada")).await.unwrap();
        shell.select_direction(Direction::Left);

        let id = shell.submit(floor(3)).await.unwrap();

        let rows = store.rows(LOGS);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        assert!(rows[0].matches_input(&input(3, Direction::Left, "Ada")));

        let view = wait_for_view(&shell, |v| v.current.is_some()).await;
        assert_eq!(view.status_line, "Currently parked on Floor 3 to the Left");
        assert_eq!(view.selected_direction, None);
        assert_eq!(view.selected_floor, None);
        assert!(!view.busy);
        assert!(view.message.is_none());
    }

    #[tokio::test]
    async fn at_shell_02_submission_removes_every_preexisting_record() {
        let (store, shell) = setup();
        let a = store.insert(LOGS, input(1, Direction::Left, "x")).await.unwrap();
        let b = store.insert(LOGS, input(2, Direction::Right, "y")).await.unwrap();

        shell.sign_in(request("Ada")).await.unwrap();
        shell.select_direction(Direction::Right);
        let c = shell.submit(floor(5)).await.unwrap();

        let ids: Vec<LogId> = store.rows(LOGS).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![c.clone()]);
        assert_ne!(c, a);
        assert_ne!(c, b);
    }

    #[tokio::test]
    async fn at_shell_03_missing_direction_never_writes() {
        let (store, shell) = setup();
        shell.sign_in(request("Ada")).await.unwrap();

        for f in Floor::all() {
            assert_eq!(shell.submit(f).await, Err(ShellError::MissingDirection));
            let view = shell.view();
            assert_eq!(view.selected_floor, Some(f));
            assert_eq!(
                view.message.as_deref(),
                Some(ShellError::MissingDirection.user_message())
            );
            assert!(!view.busy);
        }
        assert_eq!(store.counters().writes(), 0);
    }

    #[tokio::test]
    async fn at_shell_04_signed_out_never_writes_but_records_floor() {
        let (store, shell) = setup();

        for &direction in Direction::all() {
            for f in Floor::all() {
                shell.select_direction(direction);
                assert_eq!(shell.submit(f).await, Err(ShellError::NotAuthenticated));
                let view = shell.view();
                assert_eq!(view.selected_floor, Some(f));
                assert_eq!(
                    view.message.as_deref(),
                    Some(ShellError::NotAuthenticated.user_message())
                );
            }
        }
        assert_eq!(store.counters().writes(), 0);
        assert!(store.is_empty(LOGS));
    }

    #[tokio::test]
    async fn at_shell_05_repeated_submission_leaves_only_the_second() {
        let (store, shell) = setup();
        shell.sign_in(request("Ada")).await.unwrap();

        shell.select_direction(Direction::Left);
        let first = shell.submit(floor(2)).await.unwrap();
        shell.select_direction(Direction::Left);
        let second = shell.submit(floor(2)).await.unwrap();

        let rows = store.rows(LOGS);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, second);
        assert_ne!(first, second);
        assert!(rows[0].matches_input(&input(2, Direction::Left, "Ada")));
    }

    #[tokio::test]
    async fn at_shell_06_sign_out_clears_record_and_stops_snapshots() {
        let (store, shell) = setup();
        shell.sign_in(request("Ada")).await.unwrap();
        shell.select_direction(Direction::Left);
        shell.submit(floor(1)).await.unwrap();
        wait_for_view(&shell, |v| v.current.is_some()).await;

        shell.sign_out().await;
        let view = shell.view();
        assert!(view.current.is_none());
        assert!(view.signed_in_as.is_none());
        assert_eq!(view.status_line, "Sign in to see where the car is parked");

        store.insert(LOGS, input(4, Direction::Right, "Bob")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(shell.view().current.is_none());
    }

    #[tokio::test]
    async fn at_shell_07_second_submission_while_busy_is_rejected() {
        let store = Arc::new(GatedStore {
            inner: MemoryDocumentStore::new_in_memory(),
            release: Notify::new(),
            insert_calls: AtomicUsize::new(0),
        });
        let (_, shell) = shell_with(store.clone(), CleanupPolicy::DeleteOthers);
        let shell = Arc::new(shell);
        shell.sign_in(request("Ada")).await.unwrap();
        shell.select_direction(Direction::Right);

        let in_flight = {
            let shell = Arc::clone(&shell);
            tokio::spawn(async move { shell.submit(floor(4)).await })
        };
        wait_for_view(&shell, |v| v.busy).await;

        assert_eq!(shell.submit(floor(2)).await, Err(ShellError::Busy));
        assert_eq!(store.insert_calls.load(Ordering::SeqCst), 1);
        assert_eq!(shell.view().selected_floor, Some(floor(4)));

        store.release.notify_one();
        in_flight.await.unwrap().unwrap();
        assert_eq!(store.insert_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.inner.len(LOGS), 1);
        assert!(!shell.view().busy);
    }

    #[tokio::test]
    async fn at_shell_08_insert_failure_clears_busy_and_keeps_selection() {
        let (store, shell) = setup();
        shell.sign_in(request("Ada")).await.unwrap();
        shell.select_direction(Direction::Left);
        store.fail_next_inserts(1);

        let err = shell.submit(floor(3)).await.unwrap_err();
        assert!(matches!(err, ShellError::WriteFailed(StorageError::WriteFailed { .. })));

        let view = shell.view();
        assert!(!view.busy);
        assert_eq!(view.selected_direction, Some(Direction::Left));
        assert_eq!(view.message.as_deref(), Some(err.user_message()));
        assert!(store.is_empty(LOGS));

        // The shell stays usable after a failure.
        shell.submit(floor(3)).await.unwrap();
        assert_eq!(store.len(LOGS), 1);
    }

    #[tokio::test]
    async fn at_shell_09_rejected_cleanup_batch_is_reported_as_write_failure() {
        let (store, shell) = setup();
        let stale = store.insert(LOGS, input(1, Direction::Left, "x")).await.unwrap();
        let other = store.insert(LOGS, input(2, Direction::Left, "y")).await.unwrap();
        store.fail_delete_of(stale.clone());

        shell.sign_in(request("Ada")).await.unwrap();
        shell.select_direction(Direction::Right);
        let err = shell.submit(floor(5)).await.unwrap_err();
        assert!(matches!(err, ShellError::WriteFailed(_)));
        assert!(!shell.view().busy);

        let ids: Vec<LogId> = store.rows(LOGS).into_iter().map(|r| r.id).collect();
        assert!(ids.contains(&stale));
        assert!(!ids.contains(&other));
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn at_shell_10_listing_failure_clears_busy() {
        let (store, shell) = setup();
        shell.sign_in(request("Ada")).await.unwrap();
        shell.select_direction(Direction::Left);
        store.fail_listing(true);

        let err = shell.submit(floor(2)).await.unwrap_err();
        assert!(matches!(err, ShellError::WriteFailed(StorageError::ReadFailed { .. })));
        assert!(!shell.view().busy);
        assert_eq!(store.len(LOGS), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn at_shell_11_atomic_replace_keeps_one_record_under_concurrent_writers() {
        let store = Arc::new(MemoryDocumentStore::new_in_memory());
        let mut writers = Vec::new();
        for name in ["Ada", "Bob", "Cy", "Dee"] {
            let (_, shell) = shell_with(store.clone(), CleanupPolicy::AtomicReplace);
            let shell = Arc::new(shell);
            shell.sign_in(request(name)).await.unwrap();
            writers.push(shell);
        }

        let mut handles = Vec::new();
        for shell in &writers {
            let shell = Arc::clone(shell);
            handles.push(tokio::spawn(async move {
                shell.select_direction(Direction::Left);
                shell.submit(Floor::new(3).unwrap()).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(store.len(LOGS), 1);
        assert_eq!(store.counters().inserts, 0);
        assert_eq!(store.counters().replaces, 4);
    }

    #[tokio::test]
    async fn at_shell_12_subscription_failure_is_logged_not_surfaced() {
        let (store, shell) = setup();
        store.fail_live_queries(true);

        shell.sign_in(request("Ada")).await.unwrap();
        let view = shell.view();
        assert!(!view.subscription_healthy);
        assert!(view.message.is_none());
        assert!(view.signed_in_as.is_some());
    }

    #[tokio::test]
    async fn at_shell_13_broken_feed_marks_subscription_unhealthy() {
        let (store, shell) = setup();
        shell.sign_in(request("Ada")).await.unwrap();
        wait_for_view(&shell, |v| v.subscription_healthy).await;

        store.break_live_queries(LOGS);
        let view = wait_for_view(&shell, |v| !v.subscription_healthy).await;
        assert!(view.message.is_none());
    }

    #[tokio::test]
    async fn at_shell_14_cancelled_sign_in_sets_message_and_stays_signed_out() {
        let store = Arc::new(MemoryDocumentStore::new_in_memory());
        let (identity, shell) = shell_with(store, CleanupPolicy::DeleteOthers);
        identity.fail_next_sign_in(IdentityError::UserCancelled);

        let err = shell.sign_in(request("Ada")).await.unwrap_err();
        assert_eq!(err, ShellError::SignInFailed(IdentityError::UserCancelled));
        let view = shell.view();
        assert!(view.signed_in_as.is_none());
        assert_eq!(view.message.as_deref(), Some("Sign-in was cancelled"));
    }

    #[tokio::test]
    async fn at_shell_15_follower_tracks_provider_changes() {
        let store = Arc::new(MemoryDocumentStore::new_in_memory());
        store.insert(LOGS, input(2, Direction::Right, "Bob")).await.unwrap();
        let (identity, shell) = shell_with(store, CleanupPolicy::DeleteOthers);
        let shell = Arc::new(shell);
        shell.follow_identity();

        identity.sign_in(request("Ada")).await.unwrap();
        let view = wait_for_view(&shell, |v| v.current.is_some()).await;
        assert_eq!(view.signed_in_as.map(String::from), Some("Ada".to_string()));
        assert_eq!(view.status_line, "Currently parked on Floor 2 to the Right");

        identity.sign_out().await;
        wait_for_view(&shell, |v| v.signed_in_as.is_none() && v.current.is_none()).await;
        shell.shutdown();
    }

    #[test]
    fn at_shell_16_cleanup_policy_names_are_stable() {
        for policy in [CleanupPolicy::DeleteOthers, CleanupPolicy::AtomicReplace] {
            assert_eq!(CleanupPolicy::parse(policy.as_str()), Some(policy));
        }
        assert_eq!(CleanupPolicy::parse("nope"), None);
        assert_eq!(CleanupPolicy::default(), CleanupPolicy::DeleteOthers);
    }

    #[tokio::test]
    async fn at_shell_17_dropped_submission_clears_busy() {
        let store = Arc::new(GatedStore {
            inner: MemoryDocumentStore::new_in_memory(),
            release: Notify::new(),
            insert_calls: AtomicUsize::new(0),
        });
        let (_, shell) = shell_with(store.clone(), CleanupPolicy::DeleteOthers);
        let shell = Arc::new(shell);
        shell.sign_in(request("Ada")).await.unwrap();
        shell.select_direction(Direction::Left);

        let in_flight = {
            let shell = Arc::clone(&shell);
            tokio::spawn(async move { shell.submit(floor(3)).await })
        };
        wait_for_view(&shell, |v| v.busy).await;

        in_flight.abort();
        assert!(in_flight.await.unwrap_err().is_cancelled());
        assert!(!shell.view().busy);
        assert!(store.inner.is_empty(LOGS));

        let retry = {
            let shell = Arc::clone(&shell);
            tokio::spawn(async move { shell.submit(floor(3)).await })
        };
        wait_for_view(&shell, |v| v.busy).await;
        store.release.notify_one();
        let id = retry.await.unwrap().unwrap();
        assert_eq!(store.inner.rows(LOGS)[0].id, id);
        assert!(!shell.view().busy);
    }
}
