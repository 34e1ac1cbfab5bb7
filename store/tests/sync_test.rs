//! Sync coordinator scenarios: offline/reconnect, pagination, conflict
//! merges, cancellation, isolation, single-flight.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{harness, harness_with, remote_record, DEVICE};
use satchel_engine::{MergePolicy, PolicyTable, Resolution, SyncPhase, SyncStatus, VectorClock};
use satchel_store::{db, ChangePage, Query, SyncOptions};
use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

fn options_for(collections: &[&str]) -> SyncOptions {
    SyncOptions {
        collections: Some(collections.iter().map(|c| c.to_string()).collect()),
        ..Default::default()
    }
}

#[tokio::test]
async fn offline_write_then_reconnect_drains_and_succeeds() {
    let h = harness().await;

    // Offline: the network rejects everything.
    h.remote.fail_all.store(true, Ordering::SeqCst);
    h.store.put("orders", "O1", json!({"total": 12})).await.unwrap();
    assert_eq!(h.outbox.pending_count(Some("orders")).await.unwrap(), 1);

    let report = h.coordinator.sync(SyncOptions::default()).await.unwrap();
    assert!(!report.skipped);
    assert!(report.outcomes["orders"].error.is_some());

    let state = h.coordinator.state("orders");
    assert_eq!(state.status, SyncPhase::Error);
    assert_eq!(state.items_pending, 1);

    // Reconnect and sync again.
    h.remote.fail_all.store(false, Ordering::SeqCst);
    h.connectivity.set_online(true);

    let report = h.coordinator.sync(SyncOptions::default()).await.unwrap();
    assert!(report.outcomes["orders"].error.is_none());
    assert_eq!(report.outcomes["orders"].pushed, 1);

    assert_eq!(h.outbox.pending_count(None).await.unwrap(), 0);
    let state = h.coordinator.state("orders");
    assert_eq!(state.status, SyncPhase::Success);
    assert_eq!(state.items_pending, 0);
    assert_eq!(state.progress_percent, 100);

    let record = h.store.get("orders", "O1").await.unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn pull_walks_every_page_and_reaches_full_progress() {
    let h = harness().await;

    // Three pages of fifty items each.
    for page in 0..3u64 {
        let items = (0..50u64)
            .map(|i| {
                let n = page * 50 + i;
                remote_record(
                    "catalog",
                    &format!("p-{n}"),
                    json!({"name": format!("product {n}")}),
                    1,
                    2_000_000 + n,
                )
            })
            .collect();
        h.remote.queue_page(
            "catalog",
            ChangePage {
                items,
                has_more: page < 2,
            },
        );
    }

    let report = h.coordinator.sync(options_for(&["catalog"])).await.unwrap();
    assert_eq!(report.outcomes["catalog"].pulled, 150);

    let local = h.store.query("catalog", Query::default()).await.unwrap();
    assert_eq!(local.len(), 150);
    assert!(local.iter().all(|r| r.sync_status == SyncStatus::Synced));

    let state = h.coordinator.state("catalog");
    assert_eq!(state.status, SyncPhase::Success);
    assert_eq!(state.progress_percent, 100);
    assert_eq!(state.items_synced, 150);

    // The delta watermark advanced to the newest server timestamp.
    assert_eq!(
        db::last_sync_at(&h.pool, "catalog").await.unwrap(),
        Some(2_000_149)
    );
    assert_eq!(h.remote.changes_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn cancel_mid_pull_keeps_merged_items_and_stops_requests() {
    let h = harness().await;

    for page in 0..3u64 {
        let items = (0..50u64)
            .map(|i| {
                let n = page * 50 + i;
                remote_record("catalog", &format!("p-{n}"), json!({"n": n}), 1, 2_000_000 + n)
            })
            .collect();
        h.remote.queue_page(
            "catalog",
            ChangePage {
                items,
                has_more: page < 2,
            },
        );
    }

    // The remote cancels the cycle after serving the first page.
    let token = CancellationToken::new();
    *h.remote.cancel_after_page.lock().unwrap() = Some((1, token.clone()));

    let mut options = options_for(&["catalog"]);
    options.cancel = token;
    let report = h.coordinator.sync(options).await.unwrap();

    assert_eq!(
        report.outcomes["catalog"].error.as_deref(),
        Some("sync cancelled")
    );

    // Page one stayed committed; no further pages were fetched.
    let local = h.store.query("catalog", Query::default()).await.unwrap();
    assert_eq!(local.len(), 50);
    assert_eq!(h.remote.changes_calls.load(Ordering::SeqCst), 1);

    let state = h.coordinator.state("catalog");
    assert_eq!(state.status, SyncPhase::Error);
    assert_eq!(state.last_error.as_deref(), Some("sync cancelled"));
}

#[tokio::test]
async fn concurrent_inventory_edits_merge_numerically() {
    let h = harness_with(PolicyTable::new().with_collection(
        "inventory",
        MergePolicy::NumericDelta {
            field: "qty".into(),
        },
    ))
    .await;

    // Baseline 10 synced to the server.
    h.connectivity.set_online(true);
    h.store.put("inventory", "sku-1", json!({"qty": 10})).await.unwrap();

    // Offline decrement to 7.
    h.connectivity.set_online(false);
    h.clock.advance(1_000);
    h.store.put("inventory", "sku-1", json!({"qty": 7})).await.unwrap();

    // Meanwhile another device moved the server to 8.
    let mut remote = remote_record("inventory", "sku-1", json!({"qty": 8}), 1, 2_000_000);
    remote.vector_clock.merge(&VectorClock::with_counter(DEVICE, 1));
    h.remote.queue_page(
        "inventory",
        ChangePage {
            items: vec![remote],
            has_more: false,
        },
    );

    // Uploads fail this cycle, so the divergence is settled during pull.
    h.remote.fail_pushes.store(true, Ordering::SeqCst);
    let report = h.coordinator.sync(options_for(&["inventory"])).await.unwrap();
    assert!(report.outcomes["inventory"].error.is_none());

    // Local decrements landed on the remote baseline: 8 + (7 - 10) = 5.
    let merged = h.store.get("inventory", "sku-1").await.unwrap().unwrap();
    assert_eq!(merged.payload["qty"], json!(5));
    assert_eq!(merged.sync_status, SyncStatus::Synced);

    let conflicts = h.coordinator.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].resolution, Resolution::Merged);
    assert_eq!(conflicts[0].entity_id, "sku-1");
}

#[tokio::test]
async fn one_collection_failure_does_not_abort_the_others() {
    let h = harness().await;
    h.connectivity.set_online(false);

    h.store.put("alpha", "a-1", json!({"n": 1})).await.unwrap();
    h.store.put("beta", "b-1", json!({"n": 2})).await.unwrap();
    h.remote
        .fail_changes_for
        .lock()
        .unwrap()
        .insert("alpha".to_string());

    let report = h.coordinator.sync(SyncOptions::default()).await.unwrap();

    assert!(report.outcomes["alpha"].error.is_some());
    assert!(report.outcomes["beta"].error.is_none());
    assert_eq!(h.coordinator.state("alpha").status, SyncPhase::Error);
    assert_eq!(h.coordinator.state("beta").status, SyncPhase::Success);
}

#[tokio::test]
async fn sync_is_single_flight() {
    let h = harness().await;

    // Park the first cycle inside its pull request.
    let gate = Arc::new(Notify::new());
    *h.remote.block_changes.lock().unwrap() = Some(Arc::clone(&gate));

    let coordinator = Arc::clone(&h.coordinator);
    let first = tokio::spawn(async move { coordinator.sync(options_for(&["catalog"])).await });
    tokio::task::yield_now().await;

    let second = h.coordinator.sync(SyncOptions::default()).await.unwrap();
    assert!(second.skipped);

    gate.notify_one();
    let first = first.await.unwrap().unwrap();
    assert!(!first.skipped);
}

#[tokio::test]
async fn observers_receive_state_snapshots_on_every_transition() {
    let h = harness().await;
    h.connectivity.set_online(false);
    h.store.put("orders", "O1", json!({"total": 1})).await.unwrap();

    let (subscription, mut snapshots) = h.coordinator.subscribe();
    h.coordinator.sync(SyncOptions::default()).await.unwrap();

    let mut last = None;
    while let Ok(snapshot) = snapshots.try_recv() {
        last = Some(snapshot);
    }
    let last = last.expect("at least one snapshot");
    assert_eq!(last["orders"].status, SyncPhase::Success);
    assert_eq!(last["orders"].progress_percent, 100);

    assert!(h.coordinator.unsubscribe(&subscription));
    h.coordinator.sync(SyncOptions::default()).await.unwrap();
    assert!(snapshots.try_recv().is_err());
}

#[tokio::test]
async fn pull_resolves_remote_wins_for_catalog_data() {
    let h = harness_with(
        PolicyTable::new().with_collection("catalog", MergePolicy::RemoteWins),
    )
    .await;

    h.store.put("catalog", "p-1", json!({"price": 11})).await.unwrap();

    let mut remote = remote_record("catalog", "p-1", json!({"price": 9}), 1, 2_000_000);
    remote.vector_clock = VectorClock::with_counter("server", 1);
    h.remote.queue_page(
        "catalog",
        ChangePage {
            items: vec![remote],
            has_more: false,
        },
    );

    h.remote.fail_pushes.store(true, Ordering::SeqCst);
    h.coordinator.sync(options_for(&["catalog"])).await.unwrap();

    let record = h.store.get("catalog", "p-1").await.unwrap().unwrap();
    assert_eq!(record.payload["price"], json!(9));
    assert_eq!(record.sync_status, SyncStatus::Synced);
    // The winner's clock still covers the local edit.
    assert_eq!(record.vector_clock.counter(DEVICE), 1);
}

#[tokio::test]
async fn pull_inserts_unknown_records_as_synced() {
    let h = harness().await;

    h.remote.queue_page(
        "catalog",
        ChangePage {
            items: vec![remote_record("catalog", "p-9", json!({"name": "new"}), 3, 2_000_000)],
            has_more: false,
        },
    );

    h.coordinator.sync(options_for(&["catalog"])).await.unwrap();

    let record = h.store.get("catalog", "p-9").await.unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Synced);
    assert_eq!(record.payload["name"], json!("new"));
}
