mod common;

use common::{TestStore, collect, content, path};
use strata_core::{
    ContentHash, ContextSnapshot, HashAlgorithm, NewBlob, Operation, StoreContext,
    TransactionResult,
};
use strata_store::{Lockable, Readable, StoreError, Transactable, Writable};

fn sha(data: &[u8]) -> ContentHash {
    ContentHash::compute(HashAlgorithm::Sha256, data)
}

#[tokio::test]
async fn test_report_lifecycle_end_to_end() {
    let t = TestStore::new().await;
    let store = &t.store;
    let ctx = StoreContext::from_snapshot(Some(
        &ContextSnapshot::default().with_principal("alice"),
    ))
    .unwrap();
    let docs = path("/docs");
    let report = path("/docs/42");

    let created = store
        .create_with_id(
            &ctx,
            &docs,
            "42",
            NewBlob::new("report.pdf", ""),
            content(b"%PDF-1.4 first draft"),
        )
        .await
        .unwrap()
        .expect("created");
    assert_eq!(created.operation, Operation::Created);
    assert_eq!(created.blob.hash, sha(b"%PDF-1.4 first draft"));
    assert_eq!(created.blob.mime_type, "application/pdf");
    assert_eq!(created.principal, "alice");
    assert_eq!(created.transaction_result, TransactionResult::AutoCommitted);
    assert!(created.transaction_id.is_none());

    let updated = store
        .update(&ctx, &report, content(b"%PDF-1.4 final"))
        .await
        .unwrap()
        .expect("updated");
    assert_eq!(updated.operation, Operation::Updated);
    assert_eq!(updated.blob.hash, sha(b"%PDF-1.4 final"));
    assert_eq!(updated.blob.name, "report.pdf");
    assert!(updated.timestamp >= created.timestamp);

    let history = store.get_all_versions(&ctx, &report).await.unwrap();
    let hashes: Vec<_> = history.iter().map(|v| v.blob.hash.clone()).collect();
    assert_eq!(hashes, vec![created.blob.hash.clone(), updated.blob.hash.clone()]);
    assert_eq!(
        store.get_content(&created.blob.hash).await.unwrap().unwrap(),
        "%PDF-1.4 first draft"
    );

    let deleted = store
        .delete(&ctx, &report, Some("superseded"))
        .await
        .unwrap()
        .expect("deleted");
    assert_eq!(deleted.operation, Operation::Deleted);
    assert_eq!(deleted.reason.as_deref(), Some("superseded"));
    assert!(store.read(&ctx, &report).await.unwrap().is_none());

    let undeleted = store
        .undelete(&ctx, &report)
        .await
        .unwrap()
        .expect("undeleted");
    assert_eq!(undeleted.operation, Operation::Undeleted);
    let bytes = collect(store.read(&ctx, &report).await.unwrap()).await;
    assert_eq!(bytes.unwrap(), "%PDF-1.4 final");
}

#[tokio::test]
async fn test_state_machine_rejections_are_empty_results() {
    let t = TestStore::new().await;
    let store = &t.store;
    let ctx = StoreContext::anonymous();
    let a = path("/a");
    let a1 = path("/a/1");

    assert!(
        store
            .create_with_id(&ctx, &a, "1", NewBlob::new("one", ""), content(b"1"))
            .await
            .unwrap()
            .is_some()
    );
    assert!(
        store
            .create_with_id(&ctx, &a, "1", NewBlob::new("one", ""), content(b"again"))
            .await
            .unwrap()
            .is_none()
    );

    assert!(store.undelete(&ctx, &a1).await.unwrap().is_none());
    store.delete(&ctx, &a1, None).await.unwrap().unwrap();
    assert!(store.delete(&ctx, &a1, None).await.unwrap().is_none());
    assert!(
        store
            .update(&ctx, &a1, content(b"2"))
            .await
            .unwrap()
            .is_none()
    );
    assert!(store.read(&ctx, &a1).await.unwrap().is_none());

    store.undelete(&ctx, &a1).await.unwrap().unwrap();
    assert_eq!(
        collect(store.read(&ctx, &a1).await.unwrap()).await.unwrap(),
        "1"
    );

    let ghost = path("/a/ghost");
    assert!(store.update(&ctx, &ghost, content(b"x")).await.unwrap().is_none());
    assert!(store.delete(&ctx, &ghost, None).await.unwrap().is_none());
    assert!(store.read(&ctx, &ghost).await.unwrap().is_none());
    assert!(store.get_all_versions(&ctx, &ghost).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_after_delete_starts_again() {
    let t = TestStore::new().await;
    let store = &t.store;
    let ctx = StoreContext::anonymous();
    let dir = path("/recreate");

    store
        .create_with_id(&ctx, &dir, "x", NewBlob::new("x", ""), content(b"old"))
        .await
        .unwrap()
        .unwrap();
    store.delete(&ctx, &path("/recreate/x"), None).await.unwrap().unwrap();
    let again = store
        .create_with_id(&ctx, &dir, "x", NewBlob::new("x", ""), content(b"new"))
        .await
        .unwrap()
        .expect("create over tombstone");
    assert_eq!(again.operation, Operation::Created);
    assert_eq!(
        store.get_all_versions(&ctx, &path("/recreate/x")).await.unwrap().len(),
        3
    );
}

#[tokio::test]
async fn test_restore_brings_back_historical_content() {
    let t = TestStore::new().await;
    let store = &t.store;
    let ctx = StoreContext::anonymous();
    let p = path("/r/doc");

    let v1 = store
        .create_with_id(&ctx, &path("/r"), "doc", NewBlob::new("doc.txt", "text/plain"), content(b"h1"))
        .await
        .unwrap()
        .unwrap();
    store.update(&ctx, &p, content(b"h2")).await.unwrap().unwrap();
    store.delete(&ctx, &p, None).await.unwrap().unwrap();

    let restored = store
        .restore(&ctx, &p, &v1.blob.hash)
        .await
        .unwrap()
        .expect("restored");
    assert_eq!(restored.operation, Operation::Restored);
    assert_eq!(restored.blob.hash, v1.blob.hash);
    assert_eq!(restored.blob.name, "doc.txt");
    assert_eq!(collect(store.read(&ctx, &p).await.unwrap()).await.unwrap(), "h1");

    let operations: Vec<_> = store
        .get_all_versions(&ctx, &p)
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.operation)
        .collect();
    assert_eq!(
        operations,
        vec![
            Operation::Created,
            Operation::Updated,
            Operation::Deleted,
            Operation::Restored
        ]
    );

    assert!(
        store
            .restore(&ctx, &p, &sha(b"never written"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_generated_ids_and_children_listing() {
    let t = TestStore::new().await;
    let store = &t.store;
    let ctx = StoreContext::anonymous();
    let clients = path("/clients");

    let first = store
        .create(&ctx, &clients, NewBlob::new("a", ""), content(b"a"))
        .await
        .unwrap()
        .unwrap();
    let second = store
        .create(&ctx, &clients, NewBlob::new("b", ""), content(b"b"))
        .await
        .unwrap()
        .unwrap();
    assert_ne!(first.path, second.path);
    assert_eq!(first.path.parent(), Some(clients.clone()));

    store.delete(&ctx, &second.path, None).await.unwrap().unwrap();

    let live = store.list(&ctx, &clients).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].path, first.path);

    let all = store.get_children_latest_version(&ctx, &clients).await.unwrap();
    assert_eq!(all.len(), 2);

    let mut expected = vec![first.path.clone(), second.path.clone()];
    expected.sort_by(|a, b| a.name().cmp(&b.name()));
    assert_eq!(store.get_children_path(&clients).await.unwrap(), expected);

    assert!(store.list(&ctx, &path("/nobody")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_content_meta_by_hash() {
    let t = TestStore::new().await;
    let store = &t.store;
    let ctx = StoreContext::anonymous();

    let v = store
        .create_with_id(&ctx, &path("/m"), "x", NewBlob::new("notes.txt", ""), content(b"plain notes"))
        .await
        .unwrap()
        .unwrap();
    let meta = store.get_content_meta(&v.blob.hash).await.unwrap().unwrap();
    assert_eq!(meta.name, "notes.txt");
    assert_eq!(meta.mime_type, "text/plain");
    assert_eq!(meta.size, 11);

    assert!(store.get_content_meta(&sha(b"nope")).await.unwrap().is_none());
    assert!(store.get_content(&sha(b"nope")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_in_flight_writes_publish_on_commit() {
    let t = TestStore::new().await;
    let store = &t.store;
    let outside = StoreContext::anonymous();
    let txn = store.begin(None).await.unwrap();
    assert!(txn.is_in_flight());

    let p = path("/tx/doc");
    let v = store
        .create_with_id(&txn, &path("/tx"), "doc", NewBlob::new("doc", ""), content(b"v1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(v.transaction_result, TransactionResult::InFlight);
    store.update(&txn, &p, content(b"v2")).await.unwrap().unwrap();

    // Only the writer sees its own pending state.
    assert_eq!(collect(store.read(&txn, &p).await.unwrap()).await.unwrap(), "v2");
    assert!(store.read(&outside, &p).await.unwrap().is_none());
    assert!(store.get_all_versions(&outside, &p).await.unwrap().is_empty());
    assert_eq!(store.list(&txn, &path("/tx")).await.unwrap().len(), 1);
    assert!(store.list(&outside, &path("/tx")).await.unwrap().is_empty());

    let published = store.commit(&txn).await.unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].transaction_result, TransactionResult::Committed);
    assert_eq!(collect(store.read(&outside, &p).await.unwrap()).await.unwrap(), "v2");
    assert_eq!(store.get_all_versions(&outside, &p).await.unwrap().len(), 2);

    assert!(matches!(
        store.commit(&txn).await,
        Err(StoreError::UnknownTransaction(_))
    ));
    assert!(matches!(
        store.update(&txn, &p, content(b"late")).await,
        Err(StoreError::UnknownTransaction(_))
    ));
}

#[tokio::test]
async fn test_rollback_publishes_nothing() {
    let t = TestStore::new().await;
    let store = &t.store;
    let outside = StoreContext::anonymous();
    let p = path("/rb/doc");

    store
        .create_with_id(&outside, &path("/rb"), "doc", NewBlob::new("doc", ""), content(b"base"))
        .await
        .unwrap()
        .unwrap();

    let txn = store.begin(None).await.unwrap();
    store.update(&txn, &p, content(b"discarded")).await.unwrap().unwrap();
    store.rollback(&txn).await.unwrap();

    assert_eq!(collect(store.read(&outside, &p).await.unwrap()).await.unwrap(), "base");
    assert_eq!(store.get_all_versions(&outside, &p).await.unwrap().len(), 1);
    assert!(matches!(
        store.rollback(&txn).await,
        Err(StoreError::UnknownTransaction(_))
    ));
}

#[tokio::test]
async fn test_commit_of_auto_committed_context_is_rejected() {
    let t = TestStore::new().await;
    assert!(matches!(
        t.store.commit(&StoreContext::anonymous()).await,
        Err(StoreError::UnknownTransaction(_))
    ));

    let empty = t.store.begin(None).await.unwrap();
    assert!(t.store.commit(&empty).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_held_lock_blocks_writers_until_released() {
    let t = TestStore::with_config(|config| {
        config.locking.acquire_attempts = 2;
        config.locking.acquire_delay_ms = 1;
        config.publish.max_attempts = 1;
    })
    .await;
    let store = &t.store;
    let ctx = StoreContext::anonymous();

    let handle = store.lock(&[path("/locked")]).await.unwrap();
    let err = store
        .create_with_id(&ctx, &path("/locked"), "child", NewBlob::new("c", ""), content(b"c"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::LockUnavailable { .. }));
    assert!(store.lock(&[path("/locked/child")]).await.is_err());

    assert!(store.unlock(&handle).await.unwrap());
    assert!(
        store
            .get_all_versions(&ctx, &path("/locked/child"))
            .await
            .unwrap()
            .is_empty()
    );
    let v = store
        .update(&ctx, &path("/locked/child"), content(b"c2"))
        .await
        .unwrap();
    assert!(v.is_none());
    store
        .create_with_id(&ctx, &path("/locked"), "child", NewBlob::new("c", ""), content(b"c"))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_failed_update_leaves_history_unchanged() {
    let t = TestStore::with_config(|config| {
        config.locking.acquire_attempts = 2;
        config.locking.acquire_delay_ms = 1;
        config.publish.max_attempts = 1;
    })
    .await;
    let store = &t.store;
    let ctx = StoreContext::anonymous();
    let report = path("/docs/42");
    let created = store
        .create_with_id(&ctx, &path("/docs"), "42", NewBlob::new("r", ""), content(b"v1"))
        .await
        .unwrap()
        .unwrap();

    let handle = store.lock(&[path("/docs")]).await.unwrap();
    let err = store
        .update(&ctx, &report, content(b"never published"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::LockUnavailable { .. }));
    assert!(store.unlock(&handle).await.unwrap());

    let history = store.get_all_versions(&ctx, &report).await.unwrap();
    assert_eq!(history, vec![created]);
    let failed = sha(b"never published");
    assert!(store.restore(&ctx, &report, &failed).await.unwrap().is_none());
    assert!(store.get_content_meta(&failed).await.unwrap().is_none());
    assert_eq!(
        collect(store.read(&ctx, &report).await.unwrap()).await.unwrap(),
        "v1"
    );
}

async fn race_creates(store: &strata_store::VersionStore, racers: usize) -> usize {
    let mut handles = Vec::new();
    for _ in 0..racers {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .create_with_id(
                    &StoreContext::anonymous(),
                    &path("/race"),
                    "x",
                    NewBlob::new("x", ""),
                    content(b"x"),
                )
                .await
                .unwrap()
        }));
    }
    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            created += 1;
        }
    }
    created
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_on_one_path_admit_one() {
    let t = TestStore::with_config(|config| {
        config.locking.acquire_attempts = 200;
    })
    .await;
    let ctx = StoreContext::anonymous();

    assert_eq!(race_creates(&t.store, 8).await, 1);
    let history = t.store.get_all_versions(&ctx, &path("/race/x")).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].operation, Operation::Created);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_admit_one_without_locking() {
    let t = TestStore::degraded().await;
    let ctx = StoreContext::anonymous();

    assert_eq!(race_creates(&t.store, 8).await, 1);
    let history = t.store.get_all_versions(&ctx, &path("/race/x")).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_degraded_mode_publishes_without_fence() {
    let t = TestStore::degraded().await;
    let store = &t.store;
    let ctx = StoreContext::anonymous();
    assert!(store.publisher().is_degraded());
    assert!(matches!(
        store.lock(&[path("/x")]).await,
        Err(StoreError::LockingDisabled)
    ));

    let v = store
        .create_with_id(&ctx, &path("/d"), "x", NewBlob::new("x", ""), content(b"x"))
        .await
        .unwrap()
        .unwrap();
    let head = store.metadata().get_head(v.inode_id).await.unwrap().unwrap();
    assert_eq!(head.version_id, v.id);
    assert_eq!(head.fence_token, None);

    store.update(&ctx, &path("/d/x"), content(b"y")).await.unwrap().unwrap();
    assert_eq!(
        collect(store.read(&ctx, &path("/d/x")).await.unwrap()).await.unwrap(),
        "y"
    );
}

#[tokio::test]
async fn test_concurrent_updates_keep_full_history() {
    let t = TestStore::with_config(|config| {
        config.locking.acquire_attempts = 200;
    })
    .await;
    let store = t.store.clone();
    let ctx = StoreContext::anonymous();
    let p = path("/busy/doc");
    store
        .create_with_id(&ctx, &path("/busy"), "doc", NewBlob::new("doc", ""), content(b"0"))
        .await
        .unwrap()
        .unwrap();

    let payloads: [&'static [u8]; 6] = [b"1", b"2", b"3", b"4", b"5", b"6"];
    let mut handles = Vec::new();
    for payload in payloads {
        let store = store.clone();
        let p = p.clone();
        handles.push(tokio::spawn(async move {
            let ctx = StoreContext::anonymous();
            store.update(&ctx, &p, content(payload)).await.unwrap().unwrap()
        }));
    }
    let mut written = Vec::new();
    for handle in handles {
        written.push(handle.await.unwrap().id);
    }

    let history = store.get_all_versions(&ctx, &p).await.unwrap();
    assert_eq!(history.len(), 7);
    let head = store.get_latest_version(&ctx, &p).await.unwrap().unwrap();
    assert!(written.contains(&head.id));
    assert!(store.locking().unwrap().active_locks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_context_defaults_and_validation() {
    let t = TestStore::new().await;
    let store = &t.store;

    let snapshot = ContextSnapshot::default()
        .with_principal("svc-ingest")
        .with_correlation_id("corr-9")
        .with_workflow_id("wf-3")
        .with_context_name("ingest");
    let ctx = StoreContext::from_snapshot(Some(&snapshot)).unwrap();
    let v = store
        .create_with_id(&ctx, &path("/ctx"), "a", NewBlob::new("a", ""), content(b"a"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(v.principal, "svc-ingest");
    assert_eq!(v.correlation_id, "corr-9");
    assert_eq!(v.workflow_id, "wf-3");
    assert_eq!(v.context_name, "ingest");

    let anonymous = StoreContext::from_snapshot(None).unwrap();
    let v = store
        .create_with_id(&anonymous, &path("/ctx"), "b", NewBlob::new("b", ""), content(b"b"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(v.principal, "anonymous");
    assert!(!v.correlation_id.is_empty());

    let bad = ContextSnapshot {
        transaction_id: Some("txn-1".to_string()),
        transaction_result: Some(TransactionResult::AutoCommitted),
        ..ContextSnapshot::default()
    };
    assert!(matches!(
        store.begin(Some(&ContextSnapshot::default().with_principal(" "))).await,
        Err(StoreError::InvalidContext(_))
    ));
    assert!(StoreContext::from_snapshot(Some(&bad)).is_err());
}

#[tokio::test]
async fn test_invalid_ids_are_rejected() {
    let t = TestStore::new().await;
    let ctx = StoreContext::anonymous();
    for id in ["", "..", "a/b"] {
        let err = t
            .store
            .create_with_id(&ctx, &path("/ids"), id, NewBlob::new("x", ""), content(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath(_)), "id {id:?}");
    }
}
