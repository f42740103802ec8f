//! Integration tests for the ClickHouseBackup state machine
//!
//! The reconciler runs against an in-memory store and a scripted
//! clickhouse-backup service.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::api::ObjectMeta;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use backups_operator::crd::{
    ClickHouseApiEndpoint, ClickHouseBackup, ClickHouseBackupSpec, ClickHouseBackupStatus,
    ExponentialBackOffSpec, Phase, FINALIZER_NAME,
};
use backups_operator::error::Error;
use backups_operator::reconcilers::clickhouse_backup::ClickHouseBackupReconciler;
use backups_operator::reconcilers::finalizer;
use backups_operator::store::ObjectStore;

use common::{assert_valid_path, row, FakeClickHouseApi, FixedResolver, MemoryStore, NAMESPACE};

fn backup(name: &str, max_elapsed: &str) -> ClickHouseBackup {
    ClickHouseBackup {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: ClickHouseBackupSpec {
            api_address: "http://clickhouse:7171".to_string(),
            exponential_back_off: Some(ExponentialBackOffSpec {
                initial_interval: "10ms".to_string(),
                max_interval: "20ms".to_string(),
                max_elapsed_time: max_elapsed.to_string(),
            }),
            ..Default::default()
        },
        status: None,
    }
}

struct Harness {
    store: Arc<MemoryStore<ClickHouseBackup>>,
    api: Arc<FakeClickHouseApi>,
    reconciler: ClickHouseBackupReconciler,
}

fn harness(api: FakeClickHouseApi, resolver: FixedResolver) -> Harness {
    let store: Arc<MemoryStore<ClickHouseBackup>> = Arc::new(MemoryStore::new());
    let api = Arc::new(api);
    let reconciler = ClickHouseBackupReconciler::new(store.clone(), api.clone(), Arc::new(resolver));
    Harness {
        store,
        api,
        reconciler,
    }
}

fn phases(store: &MemoryStore<ClickHouseBackup>) -> Vec<Phase> {
    store.status_writes().iter().map(|b| b.phase()).collect()
}

#[tokio::test]
async fn completes_create_and_upload() {
    let h = harness(FakeClickHouseApi::default().pending(2), FixedResolver::ip(10, 1, 2, 3));
    let obj = h.store.insert(backup("nightly", "5s"));

    let done = assert_ok!(h.reconciler.apply(obj, &CancellationToken::new()).await);

    assert_eq!(done.phase(), Phase::Completed);
    assert_eq!(
        phases(&h.store),
        vec![
            Phase::Started,
            Phase::Creating,
            Phase::Created,
            Phase::Uploading,
            Phase::Completed
        ]
    );
    assert_valid_path(Phase::Unstarted, &phases(&h.store));
    assert_eq!(h.api.calls(), vec!["create nightly", "upload nightly"]);

    let stored = h.store.fetch("nightly").unwrap();
    assert!(finalizer::has_finalizer(&stored));
    let status = stored.status.unwrap();
    assert_eq!(status.api.address, "http://10.1.2.3:7171");
    assert_eq!(status.api.hostname, "clickhouse.db.svc");
    assert!(status.error.is_empty());
}

#[tokio::test]
async fn create_request_error_is_terminal() {
    let h = harness(
        FakeClickHouseApi::default().failing_create("backup already exists"),
        FixedResolver::ip(10, 1, 2, 3),
    );
    let obj = h.store.insert(backup("nightly", "5s"));

    let done = assert_ok!(h.reconciler.apply(obj, &CancellationToken::new()).await);

    assert_eq!(done.phase(), Phase::CreateFailed);
    assert_eq!(
        phases(&h.store),
        vec![Phase::Started, Phase::Creating, Phase::CreateFailed]
    );
    assert!(done.status.unwrap().error.contains("backup already exists"));
    assert_eq!(h.api.calls(), vec!["create nightly"]);
}

#[tokio::test]
async fn remote_error_row_fails_the_upload() {
    let h = harness(
        FakeClickHouseApi::default()
            .pending(1)
            .upload_status("error", "bucket missing"),
        FixedResolver::ip(10, 1, 2, 3),
    );
    let obj = h.store.insert(backup("nightly", "5s"));

    let done = assert_ok!(h.reconciler.apply(obj, &CancellationToken::new()).await);

    assert_eq!(done.phase(), Phase::UploadFailed);
    assert_eq!(done.status.as_ref().unwrap().error, "bucket missing");
    assert_valid_path(Phase::Unstarted, &phases(&h.store));
}

#[tokio::test]
async fn rows_of_other_backups_are_ignored() {
    // A foreign failure listed after our rows must not fail this backup
    let h = harness(
        FakeClickHouseApi::default()
            .pending(2)
            .foreign_rows(vec![row("create weekly", "error")]),
        FixedResolver::ip(10, 1, 2, 3),
    );
    let obj = h.store.insert(backup("nightly", "5s"));

    let done = assert_ok!(h.reconciler.apply(obj, &CancellationToken::new()).await);
    assert_eq!(done.phase(), Phase::Completed);
}

#[tokio::test]
async fn success_of_a_longer_named_backup_does_not_complete_this_one() {
    // Schedules "db" and "prod-db" firing in the same second
    let h = harness(
        FakeClickHouseApi::default()
            .pending(usize::MAX)
            .foreign_rows(vec![row("create prod-db-1700000000", "success")]),
        FixedResolver::ip(10, 1, 2, 3),
    );
    let obj = h.store.insert(backup("db-1700000000", "300ms"));

    let done = assert_ok!(h.reconciler.apply(obj, &CancellationToken::new()).await);

    assert_eq!(done.phase(), Phase::CreateFailed);
    assert_eq!(
        phases(&h.store),
        vec![Phase::Started, Phase::Creating, Phase::CreateFailed]
    );
    assert!(done.status.unwrap().error.contains("timed out"));
    assert_eq!(h.api.calls(), vec!["create db-1700000000"]);
}

#[tokio::test]
async fn resumes_from_persisted_phase() {
    let h = harness(FakeClickHouseApi::default(), FixedResolver::failing());
    let mut obj = backup("nightly", "5s");
    obj.metadata.finalizers = Some(vec![FINALIZER_NAME.to_string()]);
    obj.status = Some(ClickHouseBackupStatus {
        phase: Phase::Created,
        api: ClickHouseApiEndpoint {
            address: "http://10.1.2.3:7171".to_string(),
            hostname: "clickhouse.db.svc".to_string(),
        },
        error: String::new(),
    });
    let obj = h.store.insert(obj);

    let done = assert_ok!(h.reconciler.apply(obj, &CancellationToken::new()).await);

    assert_eq!(done.phase(), Phase::Completed);
    assert_eq!(h.api.calls(), vec!["upload nightly"]);
    assert_valid_path(Phase::Created, &phases(&h.store));
}

#[tokio::test]
async fn expired_request_fails_without_polling() {
    let h = harness(FakeClickHouseApi::default(), FixedResolver::ip(10, 1, 2, 3));
    let mut obj = backup("nightly", "1m");
    obj.status = Some(ClickHouseBackupStatus {
        phase: Phase::Creating,
        api: ClickHouseApiEndpoint {
            address: "http://10.1.2.3:7171".to_string(),
            hostname: "clickhouse.db.svc".to_string(),
        },
        error: String::new(),
    });
    let obj = h
        .store
        .insert_created_at(obj, Utc::now() - chrono::Duration::hours(2));

    let done = assert_ok!(h.reconciler.apply(obj, &CancellationToken::new()).await);

    assert_eq!(done.phase(), Phase::CreateFailed);
    assert!(done.status.unwrap().error.contains("timed out"));
    assert_eq!(h.api.polls(), 0);
}

#[tokio::test]
async fn polling_stops_at_max_elapsed_time() {
    let h = harness(
        FakeClickHouseApi::default().pending(usize::MAX),
        FixedResolver::ip(10, 1, 2, 3),
    );
    let obj = h.store.insert(backup("nightly", "200ms"));

    let started = std::time::Instant::now();
    let done = assert_ok!(h.reconciler.apply(obj, &CancellationToken::new()).await);

    assert_eq!(done.phase(), Phase::CreateFailed);
    assert!(done.status.unwrap().error.contains("in progress"));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn resolution_failure_is_not_committed() {
    let h = harness(FakeClickHouseApi::default(), FixedResolver::failing());
    let obj = h.store.insert(backup("nightly", "5s"));

    let err = assert_err!(h.reconciler.apply(obj, &CancellationToken::new()).await);

    assert!(matches!(err, Error::Endpoint(_)));
    assert_eq!(phases(&h.store), vec![Phase::Started]);
    assert_eq!(h.store.fetch("nightly").unwrap().phase(), Phase::Started);
    assert!(h.api.calls().is_empty());
}

#[tokio::test]
async fn malformed_backoff_is_a_setup_error() {
    let h = harness(FakeClickHouseApi::default(), FixedResolver::ip(10, 1, 2, 3));
    let obj = h.store.insert(backup("nightly", "fifteen minutes"));

    let err = assert_err!(h.reconciler.apply(obj, &CancellationToken::new()).await);

    assert!(matches!(err, Error::Config(_)));
    assert!(h.store.status_writes().is_empty());
    assert_eq!(h.store.update_calls(), 0);
}

#[tokio::test]
async fn cancellation_leaves_phase_in_place() {
    let h = harness(
        FakeClickHouseApi::default().pending(usize::MAX),
        FixedResolver::ip(10, 1, 2, 3),
    );
    let obj = h.store.insert(backup("nightly", "10m"));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = assert_err!(h.reconciler.apply(obj, &cancel).await);

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(h.store.fetch("nightly").unwrap().phase(), Phase::Creating);
}

#[tokio::test]
async fn cleanup_failure_still_releases_finalizer() {
    let h = harness(
        FakeClickHouseApi::default().failing_delete("connection refused"),
        FixedResolver::ip(10, 1, 2, 3),
    );
    let obj = h.store.insert(backup("nightly", "5s"));
    let done = assert_ok!(h.reconciler.apply(obj, &CancellationToken::new()).await);

    assert_ok!(h.store.delete(&done).await);
    let pending = h.store.fetch("nightly").unwrap();
    assert!(pending.metadata.deletion_timestamp.is_some());

    assert_ok!(h.reconciler.cleanup(&pending).await);

    assert!(h.api.calls().contains(&"delete nightly".to_string()));
    assert!(h.store.fetch("nightly").is_none());
}

#[tokio::test]
async fn cleanup_of_vanished_object_succeeds() {
    let h = harness(FakeClickHouseApi::default(), FixedResolver::ip(10, 1, 2, 3));

    assert_ok!(h.reconciler.cleanup(&backup("gone", "5s")).await);
    assert_eq!(h.api.calls(), vec!["delete gone"]);
}
