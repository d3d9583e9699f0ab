#![forbid(unsafe_code)]

use std::time::Duration;

use parkspot_contracts::parking::{Direction, DisplayName, Floor, LogId, LogRecordInput};
use parkspot_contracts::Validate;
use parkspot_storage::{DocumentStore, MemoryDocumentStore, StorageError};

const LOGS: &str = "logs";

fn input(floor: u8, direction: Direction, user: &str) -> LogRecordInput {
    LogRecordInput::v1(
        Floor::new(floor).unwrap(),
        direction,
        DisplayName::new(user).unwrap(),
    )
}

#[tokio::test]
async fn at_store_db_01_insert_assigns_id_and_monotonic_timestamp() {
    let s = MemoryDocumentStore::new_in_memory();

    let a = s.insert(LOGS, input(1, Direction::Left, "ada")).await.unwrap();
    let b = s.insert(LOGS, input(2, Direction::Right, "bob")).await.unwrap();
    assert_ne!(a, b);

    let rows = s.list_all(LOGS).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].id, a);
    assert_eq!(rows[1].id, b);
    assert!(rows[0].timestamp < rows[1].timestamp);
    for row in &rows {
        row.validate().unwrap();
    }
}

#[tokio::test]
async fn at_store_db_02_collections_are_isolated() {
    let s = MemoryDocumentStore::new_in_memory();
    s.insert(LOGS, input(1, Direction::Left, "ada")).await.unwrap();
    s.insert("other", input(3, Direction::Left, "ada")).await.unwrap();

    assert_eq!(s.len(LOGS), 1);
    assert_eq!(s.len("other"), 1);
    assert!(s.is_empty("missing"));
}

#[tokio::test]
async fn at_store_db_03_delete_of_unknown_id_succeeds() {
    let s = MemoryDocumentStore::new_in_memory();
    let id = s.insert(LOGS, input(1, Direction::Left, "ada")).await.unwrap();

    s.delete_by_id(LOGS, &LogId::new("doesnotexist").unwrap())
        .await
        .unwrap();
    assert_eq!(s.len(LOGS), 1);

    s.delete_by_id(LOGS, &id).await.unwrap();
    assert!(s.is_empty(LOGS));
    assert_eq!(s.counters().deletes, 2);
}

#[tokio::test]
async fn at_store_db_04_live_query_yields_current_then_changes_newest_first() {
    let s = MemoryDocumentStore::new_in_memory();
    let first = s.insert(LOGS, input(1, Direction::Left, "ada")).await.unwrap();

    let mut q = s.query_newest(LOGS, 1).await.unwrap();
    let initial = q.next_snapshot().await.unwrap().unwrap();
    assert_eq!(initial.len(), 1);
    assert_eq!(initial[0].id, first);

    let second = s.insert(LOGS, input(4, Direction::Right, "bob")).await.unwrap();
    let next = q.next_snapshot().await.unwrap().unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].id, second);
    assert_eq!(next[0].floor.label(), 4);
}

#[tokio::test]
async fn at_store_db_05_live_query_on_empty_collection_yields_empty_snapshot() {
    let s = MemoryDocumentStore::new_in_memory();
    let mut q = s.query_newest(LOGS, 1).await.unwrap();
    assert!(q.next_snapshot().await.unwrap().unwrap().is_empty());
}

#[tokio::test]
async fn at_store_db_06_cancelled_query_yields_nothing() {
    let s = MemoryDocumentStore::new_in_memory();
    let mut q = s.query_newest(LOGS, 1).await.unwrap();
    q.next_snapshot().await.unwrap().unwrap();
    q.cancel();
    assert!(q.is_cancelled());

    s.insert(LOGS, input(1, Direction::Left, "ada")).await.unwrap();
    assert!(q.next_snapshot().await.is_none());
}

#[tokio::test]
async fn at_store_db_07_broken_feed_reports_once_then_ends() {
    let s = MemoryDocumentStore::new_in_memory();
    let mut q = s.query_newest(LOGS, 1).await.unwrap();
    q.next_snapshot().await.unwrap().unwrap();

    s.break_live_queries(LOGS);
    let err = tokio::time::timeout(Duration::from_secs(1), q.next_snapshot())
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, StorageError::SubscriptionFailed { .. }));
    assert!(q.next_snapshot().await.is_none());
}

#[tokio::test]
async fn at_store_db_08_injected_faults_fail_closed() {
    let s = MemoryDocumentStore::new_in_memory();

    s.fail_next_inserts(1);
    let err = s
        .insert(LOGS, input(1, Direction::Left, "ada"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::WriteFailed { .. }));
    assert!(s.is_empty(LOGS));

    let id = s.insert(LOGS, input(1, Direction::Left, "ada")).await.unwrap();
    s.fail_delete_of(id.clone());
    assert!(s.delete_by_id(LOGS, &id).await.is_err());
    assert_eq!(s.len(LOGS), 1);

    s.fail_listing(true);
    assert!(matches!(
        s.list_all(LOGS).await,
        Err(StorageError::ReadFailed { .. })
    ));

    s.fail_live_queries(true);
    assert!(matches!(
        s.query_newest(LOGS, 1).await,
        Err(StorageError::SubscriptionFailed { .. })
    ));
}

#[tokio::test]
async fn at_store_db_09_replace_all_leaves_single_record() {
    let s = MemoryDocumentStore::new_in_memory();
    s.insert(LOGS, input(1, Direction::Left, "ada")).await.unwrap();
    s.insert(LOGS, input(2, Direction::Left, "bob")).await.unwrap();

    let id = s
        .replace_all(LOGS, input(5, Direction::Right, "cy"))
        .await
        .unwrap();
    let rows = s.rows(LOGS);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, id);
    assert_eq!(s.counters().replaces, 1);
}

#[tokio::test]
async fn at_store_db_10_zero_limit_query_is_a_contract_violation() {
    let s = MemoryDocumentStore::new_in_memory();
    assert!(matches!(
        s.query_newest(LOGS, 0).await,
        Err(StorageError::ContractViolation(_))
    ));
}
