//! Bulk action tests for shelfsync-core

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{book_content, GatedRemote, Harness, SlowFreshnessRemote};
use shelfsync_core::remote::ObjectRemoteStore;
use shelfsync_core::storage::{book_content_path, MemoryStorage, StorageProvider};
use shelfsync_core::transfer::{JobCounts, TransferEventKind};
use shelfsync_core::{BulkOutcome, SelectionController, TransferOutcome};
use std::sync::Arc;
use std::time::Duration;

fn object_remote() -> ObjectRemoteStore {
    ObjectRemoteStore::new(Arc::new(MemoryStorage::new()), 16)
}

fn selection<R>(h: &Harness<R>) -> SelectionController {
    SelectionController::new(Arc::clone(&h.shelf), Arc::clone(&h.orchestrator))
}

#[tokio::test]
async fn test_bulk_download_skips_fresh_books() {
    let h = Harness::new(3, object_remote());
    let a = h.add_remote_book("A", &h.remote).await;
    let b = h.add_remote_book("B", &h.remote).await;
    let c = h.add_remote_book("C", &h.remote).await;
    h.shelf.update(&b, |r| r.downloaded_at = Some(Utc::now()));

    let selection = selection(&h);
    selection.select_all([&a, &b, &c]);

    let batch = selection.bulk_download(false).await;
    let admission: Vec<_> = batch.report().to_vec();
    assert_eq!(admission[0], (a.clone(), BulkOutcome::Queued));
    assert!(matches!(&admission[1], (hash, BulkOutcome::Skipped(_)) if *hash == b));
    assert_eq!(admission[2], (c.clone(), BulkOutcome::Queued));
    assert_eq!(batch.queued(), 2);

    let results = batch.completion().await;
    assert_eq!(
        results[0],
        (a.clone(), BulkOutcome::Finished(TransferOutcome::Succeeded))
    );
    assert!(matches!(results[1].1, BulkOutcome::Skipped(_)));
    assert_eq!(
        results[2],
        (c.clone(), BulkOutcome::Finished(TransferOutcome::Succeeded))
    );

    for (hash, name) in [(&a, "A"), (&c, "C")] {
        let stored = h.local.read(&book_content_path(hash)).await.unwrap();
        assert_eq!(stored, book_content(name));
        assert!(h.shelf.get(hash).unwrap().downloaded_at.is_some());
    }
    assert!(!h.local.exists(&book_content_path(&b)).await.unwrap());
}

#[tokio::test]
async fn test_bulk_download_queues_in_selection_order() {
    let h = Harness::new(1, SlowFreshnessRemote::new(Duration::from_millis(20)));
    // A has a stale local copy and needs the remote freshness query; B does not
    let a = h.add_remote_book("A", h.remote.inner()).await;
    let b = h.add_remote_book("B", h.remote.inner()).await;
    h.shelf.update(&a, |r| {
        r.downloaded_at = Some(Utc::now() - ChronoDuration::hours(1))
    });

    let selection = selection(&h);
    selection.select_all([&a, &b]);
    let mut events = h.orchestrator.subscribe();

    let batch = selection.bulk_download(false).await;
    assert_eq!(
        batch.report(),
        &[(a.clone(), BulkOutcome::Queued), (b.clone(), BulkOutcome::Queued)]
    );

    let mut queued = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.kind == TransferEventKind::Queued {
            queued.push(event.hash);
        }
    }
    assert_eq!(queued, vec![a.clone(), b.clone()]);

    let results = batch.completion().await;
    assert!(results
        .iter()
        .all(|(_, o)| *o == BulkOutcome::Finished(TransferOutcome::Succeeded)));
}

#[tokio::test]
async fn test_bulk_upload_reports_every_item() {
    let h = Harness::new(2, object_remote());
    let fresh = h.add_local_book("fresh").await;
    let done = h.add_local_book("done").await;
    h.shelf.update(&done, |r| r.uploaded_at = Some(Utc::now()));

    let selection = selection(&h);
    selection.select(&fresh);
    selection.select(&done);

    let batch = selection.bulk_upload(false);
    let results = batch.completion().await;

    assert_eq!(
        results[0],
        (fresh.clone(), BulkOutcome::Finished(TransferOutcome::Succeeded))
    );
    assert!(matches!(results[1].1, BulkOutcome::Skipped(_)));
    assert!(!results.iter().any(|(_, o)| o.is_failure()));
}

#[tokio::test]
async fn test_bulk_upload_signed_out_fails_each_item() {
    let h = Harness::new(2, object_remote());
    let one = h.add_local_book("one").await;
    let two = h.add_local_book("two").await;
    h.session.sign_out();

    let selection = selection(&h);
    selection.select_all([&one, &two]);
    let batch = selection.bulk_upload(false);

    assert_eq!(batch.queued(), 0);
    assert!(batch
        .report()
        .iter()
        .all(|(_, o)| matches!(o, BulkOutcome::Failed(_))));
    assert_eq!(h.orchestrator.counts(), JobCounts::default());
}

#[tokio::test]
async fn test_bulk_delete_skips_active_books() {
    let h = Harness::new(1, GatedRemote::new());
    let busy = h.add_local_book("busy").await;
    let idle = h.add_local_book("idle").await;
    h.orchestrator
        .request_upload(&busy, Default::default())
        .unwrap();

    let selection = selection(&h);
    selection.select_all([&busy, &idle]);
    let report = selection.bulk_delete().await;

    assert!(matches!(report[0].1, BulkOutcome::Skipped(_)));
    assert_eq!(report[1], (idle.clone(), BulkOutcome::Removed));
    assert_eq!(selection.selected(), vec![busy.clone()]);
    assert!(h.shelf.contains(&busy));
    assert!(!h.shelf.contains(&idle));

    h.remote.release(1);
}
