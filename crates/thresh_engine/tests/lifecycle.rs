//! Group lifecycle: ingestion and grouping, batch validation, undo, reopen
//! on late arrivals, and the stats overview.

mod common;

use common::{engine, file_by_path, group_by_hash, record};
use thresh_engine::CancellationToken;
use thresh_schema::{GroupStatus, OverrideScope, SelectStrategy, SelectionSource};

#[tokio::test]
async fn test_ingest_groups_by_content_hash() {
    let h = engine().await;
    let outcome = h
        .engine
        .ingest(&[
            record("/a/one.txt", "h1", 10),
            record("/b/one.txt", "h1", 10),
            record("/c/unique.txt", "h2", 5),
        ])
        .await
        .unwrap();
    assert_eq!(outcome.files_added, 3);
    assert_eq!(outcome.groups_created, 1);
    assert_eq!(outcome.groups_reopened, 0);

    let group = group_by_hash(&h.engine, "h1").await;
    assert_eq!(group.status, GroupStatus::Pending);
    assert_eq!(group.file_count, 2);
    assert_eq!(group.total_size, 20);

    // The singleton stays ungrouped until its hash is seen again.
    assert!(h.engine.db().groups.get_by_hash("h2").await.unwrap().is_none());
    let unique = file_by_path(&h.engine, "/c/unique.txt").await;
    assert_eq!(unique.group_id, None);
}

#[tokio::test]
async fn test_ingest_skips_known_paths() {
    let h = engine().await;
    h.engine
        .ingest(&[record("/a/one.txt", "h1", 10)])
        .await
        .unwrap();
    let outcome = h
        .engine
        .ingest(&[record("/a/one.txt", "h1", 10)])
        .await
        .unwrap();
    assert_eq!(outcome.files_added, 0);
    assert_eq!(outcome.files_skipped, 1);
}

#[tokio::test]
async fn test_ingest_attaches_member_to_existing_group() {
    let h = engine().await;
    h.engine
        .ingest(&[record("/a/one.txt", "h1", 10), record("/b/one.txt", "h1", 10)])
        .await
        .unwrap();
    let outcome = h
        .engine
        .ingest(&[record("/c/one.txt", "h1", 10)])
        .await
        .unwrap();
    assert_eq!(outcome.files_added, 1);
    assert_eq!(outcome.groups_created, 0);

    let group = group_by_hash(&h.engine, "h1").await;
    assert_eq!(group.file_count, 3);
    assert_eq!(group.total_size, 30);
}

#[tokio::test]
async fn test_ingest_reopens_validated_group() {
    let h = engine().await;
    h.engine
        .ingest(&[record("/a/one.txt", "h1", 10), record("/b/one.txt", "h1", 10)])
        .await
        .unwrap();
    let group = group_by_hash(&h.engine, "h1").await;
    let keep = file_by_path(&h.engine, "/a/one.txt").await;
    h.engine.set_original(group.id, keep.id).await.unwrap();

    let outcome = h
        .engine
        .ingest(&[record("/c/one.txt", "h1", 10)])
        .await
        .unwrap();
    assert_eq!(outcome.groups_reopened, 1);

    // Decision predates the new member: back to Pending, but the incumbent
    // kept file survives as the standing candidate.
    let group = group_by_hash(&h.engine, "h1").await;
    assert_eq!(group.status, GroupStatus::Pending);
    assert_eq!(group.kept_file_id, Some(keep.id));
    assert_eq!(group.validated_at, None);
}

#[tokio::test]
async fn test_validate_batch_approves_standing_proposals() {
    let h = engine().await;
    h.engine
        .ingest(&[
            record("/photos/a.jpg", "h1", 10),
            record("/downloads/a.jpg", "h1", 10),
            record("/photos/b.jpg", "h2", 10),
            record("/downloads/b.jpg", "h2", 10),
            // Tied group: stays Pending with no proposal.
            record("/photos/c.jpg", "h3", 10),
            record("/photos/c2.jpg", "h3", 10),
        ])
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let recalc = h
        .engine
        .recalculate_originals(OverrideScope::Pending, false, &cancel)
        .await
        .unwrap();
    assert_eq!(recalc.updated, 2);
    assert_eq!(recalc.conflicts, 1);

    let outcome = h.engine.validate_batch(10, None).await.unwrap();
    assert_eq!(outcome.validated, 2);
    assert_eq!(outcome.remaining, 0);

    let g1 = group_by_hash(&h.engine, "h1").await;
    assert_eq!(g1.status, GroupStatus::Validated);
    assert_eq!(g1.selection_source, Some(SelectionSource::Score));
    assert!(g1.validated_at.is_some());
    assert_eq!(
        group_by_hash(&h.engine, "h3").await.status,
        GroupStatus::Pending
    );
}

#[tokio::test]
async fn test_validate_batch_respects_count_limit() {
    let h = engine().await;
    h.engine
        .ingest(&[
            record("/photos/a.jpg", "h1", 10),
            record("/downloads/a.jpg", "h1", 10),
            record("/photos/b.jpg", "h2", 10),
            record("/downloads/b.jpg", "h2", 10),
        ])
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    h.engine
        .recalculate_originals(OverrideScope::Pending, false, &cancel)
        .await
        .unwrap();

    let outcome = h.engine.validate_batch(1, None).await.unwrap();
    assert_eq!(outcome.validated, 1);
    assert_eq!(outcome.remaining, 1);
}

#[tokio::test]
async fn test_validate_batch_pending_filter_covers_reopened_groups() {
    let h = engine().await;
    h.engine
        .ingest(&[record("/a/one.txt", "h1", 10), record("/b/one.txt", "h1", 10)])
        .await
        .unwrap();
    let group = group_by_hash(&h.engine, "h1").await;
    let keep = file_by_path(&h.engine, "/a/one.txt").await;
    h.engine.set_original(group.id, keep.id).await.unwrap();
    h.engine
        .ingest(&[record("/c/one.txt", "h1", 10)])
        .await
        .unwrap();

    // Default filter (AutoSelected) sees nothing.
    let outcome = h.engine.validate_batch(10, None).await.unwrap();
    assert_eq!(outcome.validated, 0);

    // The Pending filter re-approves the incumbent original.
    let outcome = h
        .engine
        .validate_batch(10, Some(GroupStatus::Pending))
        .await
        .unwrap();
    assert_eq!(outcome.validated, 1);

    let group = group_by_hash(&h.engine, "h1").await;
    assert_eq!(group.status, GroupStatus::Validated);
    assert_eq!(group.kept_file_id, Some(keep.id));
}

#[tokio::test]
async fn test_undo_automated_provenance_keeps_proposal() {
    let h = engine().await;
    h.engine
        .ingest(&[
            record("/photos/a.jpg", "h1", 10),
            record("/downloads/a.jpg", "h1", 10),
        ])
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    h.engine
        .recalculate_originals(OverrideScope::Pending, false, &cancel)
        .await
        .unwrap();
    h.engine.validate_batch(10, None).await.unwrap();

    let group = group_by_hash(&h.engine, "h1").await;
    let results = h.engine.undo_validation(&[group.id]).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].reverted_to, Some(GroupStatus::AutoSelected));
    assert!(results[0].error.is_none());

    let group = group_by_hash(&h.engine, "h1").await;
    assert_eq!(group.status, GroupStatus::AutoSelected);
    assert!(group.kept_file_id.is_some());
    assert_eq!(group.validated_at, None);
}

#[tokio::test]
async fn test_undo_human_provenance_clears_proposal() {
    let h = engine().await;
    h.engine
        .ingest(&[record("/x/a.jpg", "h1", 10), record("/x/b.jpg", "h1", 10)])
        .await
        .unwrap();
    let group = group_by_hash(&h.engine, "h1").await;
    let keep = file_by_path(&h.engine, "/x/a.jpg").await;
    h.engine.set_original(group.id, keep.id).await.unwrap();

    let results = h.engine.undo_validation(&[group.id]).await.unwrap();
    assert_eq!(results[0].reverted_to, Some(GroupStatus::Pending));

    let group = group_by_hash(&h.engine, "h1").await;
    assert_eq!(group.status, GroupStatus::Pending);
    assert_eq!(group.kept_file_id, None);
    assert_eq!(group.selection_source, None);
}

#[tokio::test]
async fn test_undo_reports_per_group_errors() {
    let h = engine().await;
    h.engine
        .ingest(&[record("/x/a.jpg", "h1", 10), record("/x/b.jpg", "h1", 10)])
        .await
        .unwrap();
    let pending = group_by_hash(&h.engine, "h1").await;

    let results = h
        .engine
        .undo_validation(&[pending.id, 9999])
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].reverted_to.is_none());
    assert!(results[0].error.as_deref().unwrap().contains("invalid transition"));
    assert!(results[1].error.as_deref().unwrap().contains("not found"));
}

#[tokio::test]
async fn test_undo_then_strategy_reproposes() {
    let h = engine().await;
    h.engine
        .ingest(&[record("/x/a.jpg", "h1", 10), record("/x/b.jpg", "h1", 10)])
        .await
        .unwrap();
    let group = group_by_hash(&h.engine, "h1").await;
    let keep = file_by_path(&h.engine, "/x/a.jpg").await;
    h.engine.set_original(group.id, keep.id).await.unwrap();
    h.engine.undo_validation(&[group.id]).await.unwrap();

    // Back in Pending, automation applies again.
    let winner = h
        .engine
        .auto_select(group.id, SelectStrategy::FirstIndexed)
        .await
        .unwrap();
    assert_eq!(winner, keep.id);
}

#[tokio::test]
async fn test_stats_overview() {
    let h = engine().await;
    h.engine
        .ingest(&[
            record("/photos/a.jpg", "h1", 100),
            record("/downloads/a.jpg", "h1", 40),
            record("/x/b.jpg", "h2", 10),
            record("/y/b.jpg", "h2", 10),
        ])
        .await
        .unwrap();
    let g1 = group_by_hash(&h.engine, "h1").await;
    let keep = file_by_path(&h.engine, "/photos/a.jpg").await;
    h.engine.set_original(g1.id, keep.id).await.unwrap();

    let stats = h.engine.stats().await.unwrap();
    assert_eq!(stats.groups_pending, 1);
    assert_eq!(stats.groups_validated, 1);
    assert_eq!(stats.total_files, 4);
    assert_eq!(stats.deleted_files, 0);
    // Only the decided group counts toward reclaimable space.
    assert_eq!(stats.reclaimable_bytes, 40);
}
