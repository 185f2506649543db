//! Reconciliation engine integration tests
//!
//! Drives full runs against an in-memory catalog source and a temporary
//! database, checking progress, persisted entities, edges and run history.

mod helpers;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bgref_common::config::ReconcileConfig;
use bgref_common::events::{CatalogEvent, EventBus, ProgressEvent, ProgressStatus};
use bgref_common::Error;
use bgref_cr::db::{entities, relations, runs};
use bgref_cr::services::{ReconcileRequest, Reconciler};
use bgref_cr::types::{EntityKind, ExternalRecord, RelationType, TraversalMode};
use helpers::*;

fn reconciler(pool: &sqlx::SqlitePool, catalog: &Arc<FakeCatalog>) -> Reconciler<Arc<FakeCatalog>> {
    Reconciler::new(pool.clone(), Arc::clone(catalog), &ReconcileConfig::default()).unwrap()
}

/// Gloomhaven with one low-engagement and one popular expansion
fn gloomhaven_catalog() -> FakeCatalog {
    let mut base = base_game(174430, "Gloomhaven", 60000);
    base.expansions = vec![link(1001, "Gloomhaven: Solo Scenarios"), link(1002, "Forgotten Circles")];

    FakeCatalog::new()
        .with(base)
        .with(expansion_of(1001, "Gloomhaven: Solo Scenarios", (174430, "Gloomhaven"), 10))
        .with(expansion_of(1002, "Forgotten Circles", (174430, "Gloomhaven"), 200))
}

fn gloomhaven_request() -> ReconcileRequest {
    ReconcileRequest {
        max_depth: 1,
        ..ReconcileRequest::new(vec![id(174430)])
    }
}

/// Chain of reimplementations 1 <- 2 <- ... <- n
fn reimplementation_chain(n: u64) -> FakeCatalog {
    let catalog = FakeCatalog::new();
    for value in 1..=n {
        let mut record = base_game(value, &format!("Edition {}", value), 1000);
        if value > 1 {
            record.reimplements = vec![link(value - 1, &format!("Edition {}", value - 1))];
        }
        if value < n {
            record.reimplemented_by = vec![link(value + 1, &format!("Edition {}", value + 1))];
        }
        catalog.insert(record);
    }
    catalog
}

#[tokio::test]
async fn test_low_engagement_expansion_is_not_imported() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let catalog = Arc::new(gloomhaven_catalog());
    let engine = reconciler(&pool, &catalog);

    let (summary, events) = run_and_collect(&engine, gloomhaven_request(), CancellationToken::new())
        .await
        .unwrap();

    let terminal = terminal_events(&events);
    let ids: Vec<u64> = terminal.iter().map(|e| e.external_id.get()).collect();
    assert_eq!(ids, vec![174430, 1002]);
    assert!(terminal.iter().all(|e| e.status == ProgressStatus::Success));

    assert_eq!(summary.imported, 2);
    assert_eq!(summary.failed, 0);
    assert!(entities::find_by_external_id(&pool, id(1001)).await.unwrap().is_none());

    let base = entities::find_by_external_id(&pool, id(174430)).await.unwrap().unwrap();
    let expansion = entities::find_by_external_id(&pool, id(1002)).await.unwrap().unwrap();
    let edges = relations::list_relations_for(&pool, expansion.local_id).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].source_id, expansion.local_id);
    assert_eq!(edges[0].target_id, base.local_id);
    assert_eq!(edges[0].relation_type, RelationType::ExpansionOf);
}

#[tokio::test]
async fn test_progress_brackets_each_import_and_ends_with_complete() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let catalog = Arc::new(gloomhaven_catalog());
    let engine = reconciler(&pool, &catalog);

    let (_summary, events) = run_and_collect(&engine, gloomhaven_request(), CancellationToken::new())
        .await
        .unwrap();

    let statuses: Vec<(u64, ProgressStatus)> = events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::Progress(item) => Some((item.external_id.get(), item.status)),
            ProgressEvent::Complete(_) => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            (174430, ProgressStatus::Importing),
            (174430, ProgressStatus::Success),
            (1002, ProgressStatus::Importing),
            (1002, ProgressStatus::Success),
        ]
    );

    assert_eq!(events.iter().filter(|e| e.is_complete()).count(), 1);
    assert!(events.last().unwrap().is_complete());

    let imported = terminal_events(&events);
    assert!(imported.iter().all(|e| e.local_id.is_some()));
    assert_eq!(imported[0].name, "Gloomhaven");
}

#[tokio::test]
async fn test_second_run_skips_everything() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let catalog = Arc::new(gloomhaven_catalog());
    let engine = reconciler(&pool, &catalog);

    run_and_collect(&engine, gloomhaven_request(), CancellationToken::new())
        .await
        .unwrap();
    let (summary, events) = run_and_collect(&engine, gloomhaven_request(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.imported, 0);
    assert_eq!(summary.skipped, 2);
    assert!(terminal_events(&events)
        .iter()
        .all(|e| e.status == ProgressStatus::Skipped));
    assert!(!events.iter().any(|e| matches!(
        e,
        ProgressEvent::Progress(item) if item.status == ProgressStatus::Importing
    )));

    assert_eq!(count_rows(&pool, "entities").await, 2);
    assert_eq!(count_rows(&pool, "relations").await, 1);
}

#[tokio::test]
async fn test_resync_refreshes_existing_entities() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let catalog = Arc::new(gloomhaven_catalog());
    let engine = reconciler(&pool, &catalog);

    run_and_collect(&engine, gloomhaven_request(), CancellationToken::new())
        .await
        .unwrap();

    let mut renamed = base_game(174430, "Gloomhaven (Revised)", 61000);
    renamed.expansions = vec![link(1001, "Gloomhaven: Solo Scenarios"), link(1002, "Forgotten Circles")];
    catalog.insert(renamed);

    let request = ReconcileRequest {
        resync: true,
        ..gloomhaven_request()
    };
    let (summary, events) = run_and_collect(&engine, request, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.synced, 2);
    assert_eq!(summary.imported, 0);

    let base_statuses: Vec<ProgressStatus> = events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::Progress(item) if item.external_id == id(174430) => Some(item.status),
            _ => None,
        })
        .collect();
    assert_eq!(base_statuses, vec![ProgressStatus::Syncing, ProgressStatus::Success]);

    let base = entities::find_by_external_id(&pool, id(174430)).await.unwrap().unwrap();
    assert_eq!(base.name, "Gloomhaven (Revised)");
    assert_eq!(count_rows(&pool, "entities").await, 2);
    assert_eq!(count_rows(&pool, "relations").await, 1);
}

#[tokio::test]
async fn test_one_failing_id_does_not_stop_the_run() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let catalog = FakeCatalog::new();
    for value in 1..=5 {
        catalog.insert(base_game(value, &format!("Game {}", value), 500));
    }
    catalog.fail(3);
    let catalog = Arc::new(catalog);
    let engine = reconciler(&pool, &catalog);

    let request = ReconcileRequest {
        mode: TraversalMode::None,
        ..ReconcileRequest::new((1..=5).map(id).collect())
    };
    let (summary, events) = run_and_collect(&engine, request, CancellationToken::new())
        .await
        .unwrap();

    let terminal = terminal_events(&events);
    assert_eq!(terminal.len(), 5);
    let ids: Vec<u64> = terminal.iter().map(|e| e.external_id.get()).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);

    let failed: Vec<_> = terminal.iter().filter(|e| e.status == ProgressStatus::Failed).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].external_id, id(3));
    assert_eq!(failed[0].error.as_deref(), Some("Catalog record 3 unavailable"));
    assert!(terminal
        .iter()
        .filter(|e| e.external_id != id(3))
        .all(|e| matches!(e.status, ProgressStatus::Success | ProgressStatus::Skipped)));

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.imported, 4);
    match events.last().unwrap() {
        ProgressEvent::Complete(complete) => assert_eq!(complete.failed, 1),
        other => panic!("last event should be complete, got {:?}", other),
    }

    // The failed seed is not fetched a second time
    assert_eq!(catalog.request_count(), 1);
}

/// Dominion with two expansions
fn dominion_catalog() -> FakeCatalog {
    let mut base = base_game(10, "Dominion", 90000);
    base.expansions = vec![link(11, "Dominion: Seaside"), link(12, "Dominion: Prosperity")];

    FakeCatalog::new()
        .with(base)
        .with(expansion_of(11, "Dominion: Seaside", (10, "Dominion"), 20000))
        .with(expansion_of(12, "Dominion: Prosperity", (10, "Dominion"), 18000))
}

#[tokio::test]
async fn test_unavailable_related_id_is_reported_as_failed() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let catalog = dominion_catalog();
    catalog.fail(11);
    let catalog = Arc::new(catalog);
    let engine = reconciler(&pool, &catalog);

    let (summary, events) = run_and_collect(&engine, ReconcileRequest::new(vec![id(10)]), CancellationToken::new())
        .await
        .unwrap();

    let terminal: Vec<(u64, ProgressStatus)> = terminal_events(&events)
        .iter()
        .map(|e| (e.external_id.get(), e.status))
        .collect();
    assert_eq!(
        terminal,
        vec![
            (10, ProgressStatus::Success),
            (11, ProgressStatus::Failed),
            (12, ProgressStatus::Success),
        ]
    );
    let failed = terminal_events(&events)
        .into_iter()
        .find(|e| e.status == ProgressStatus::Failed)
        .unwrap();
    assert_eq!(failed.error.as_deref(), Some("Catalog record 11 unavailable"));

    assert_eq!(summary.imported, 2);
    assert_eq!(summary.failed, 1);
    match events.last().unwrap() {
        ProgressEvent::Complete(complete) => assert_eq!(complete.failed, 1),
        other => panic!("last event should be complete, got {:?}", other),
    }
    assert_eq!(count_rows(&pool, "relations").await, 1);
}

#[tokio::test]
async fn test_excluded_ids_are_never_fetched() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let mut base = base_game(10, "Root", 40000);
    base.expansions = vec![link(11, "The Riverfolk Expansion"), link(12, "The Underworld Expansion")];
    let catalog = Arc::new(
        FakeCatalog::new()
            .with(base)
            .with(expansion_of(11, "The Riverfolk Expansion", (10, "Root"), 9000))
            .with(expansion_of(12, "The Underworld Expansion", (10, "Root"), 7000)),
    );
    let engine = reconciler(&pool, &catalog);

    let request = ReconcileRequest {
        exclude: vec![id(12)],
        ..ReconcileRequest::new(vec![id(10)])
    };
    let (summary, _events) = run_and_collect(&engine, request, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.imported, 2);
    assert!(!catalog.requested_ids().contains(&id(12)));
    assert!(entities::find_by_external_id(&pool, id(12)).await.unwrap().is_none());
    assert_eq!(count_rows(&pool, "relations").await, 1);
}

#[tokio::test]
async fn test_every_seed_excluded_is_rejected() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let catalog = Arc::new(FakeCatalog::new().with(base_game(10, "Root", 40000)));
    let engine = reconciler(&pool, &catalog);

    let request = ReconcileRequest {
        exclude: vec![id(10)],
        ..ReconcileRequest::new(vec![id(10)])
    };
    let result = run_and_collect(&engine, request, CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::InvalidInput(_))));
    assert_eq!(catalog.request_count(), 0);
}

#[tokio::test]
async fn test_empty_seed_set_fails_before_any_fetch() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let catalog = Arc::new(FakeCatalog::new());
    let engine = reconciler(&pool, &catalog);

    let result = run_and_collect(&engine, ReconcileRequest::new(Vec::new()), CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::InvalidInput(_))));
    assert_eq!(catalog.request_count(), 0);
    assert_eq!(count_rows(&pool, "reconcile_runs").await, 0);
}

#[tokio::test]
async fn test_depth_bound_stops_traversal() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let catalog = Arc::new(reimplementation_chain(4));
    let engine = reconciler(&pool, &catalog);

    let request = ReconcileRequest {
        max_depth: 2,
        ..ReconcileRequest::new(vec![id(1)])
    };
    let (summary, _events) = run_and_collect(&engine, request, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.imported, 3);
    assert!(!catalog.requested_ids().contains(&id(4)));
    assert!(entities::find_by_external_id(&pool, id(4)).await.unwrap().is_none());

    let second = entities::find_by_external_id(&pool, id(2)).await.unwrap().unwrap();
    let first = entities::find_by_external_id(&pool, id(1)).await.unwrap().unwrap();
    let edges = relations::list_relations_for(&pool, second.local_id).await.unwrap();
    assert!(edges.iter().any(|e| e.source_id == second.local_id
        && e.target_id == first.local_id
        && e.relation_type == RelationType::ReimplementationOf));
    assert_eq!(count_rows(&pool, "relations").await, 2);
}

#[tokio::test]
async fn test_zero_depth_walks_until_exhausted() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let catalog = Arc::new(reimplementation_chain(5));
    let engine = reconciler(&pool, &catalog);

    let request = ReconcileRequest {
        max_depth: 0,
        ..ReconcileRequest::new(vec![id(3)])
    };
    let (summary, _events) = run_and_collect(&engine, request, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.imported, 5);
    assert_eq!(count_rows(&pool, "relations").await, 4);
}

#[tokio::test]
async fn test_upstream_mode_follows_base_game_only() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let mut base = base_game(10, "Root", 40000);
    base.expansions = vec![link(11, "The Riverfolk Expansion"), link(12, "The Underworld Expansion")];
    let catalog = Arc::new(
        FakeCatalog::new()
            .with(base)
            .with(expansion_of(11, "The Riverfolk Expansion", (10, "Root"), 9000))
            .with(expansion_of(12, "The Underworld Expansion", (10, "Root"), 7000)),
    );
    let engine = reconciler(&pool, &catalog);

    let request = ReconcileRequest {
        mode: TraversalMode::Upstream,
        ..ReconcileRequest::new(vec![id(11)])
    };
    let (summary, events) = run_and_collect(&engine, request, CancellationToken::new())
        .await
        .unwrap();

    let ids: Vec<u64> = terminal_events(&events).iter().map(|e| e.external_id.get()).collect();
    assert_eq!(ids, vec![11, 10]);
    assert_eq!(summary.imported, 2);
    assert!(entities::find_by_external_id(&pool, id(12)).await.unwrap().is_none());
    assert_eq!(count_rows(&pool, "relations").await, 1);
}

#[tokio::test]
async fn test_import_links_hand_entered_entity_by_name() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let manual = entities::insert_unlinked(&pool, "Spirit Island: Branch and Claw")
        .await
        .unwrap();

    let mut base = base_game(162886, "Spirit Island", 50000);
    base.expansions = vec![link(205896, "Spirit Island: Branch & Claw")];
    let catalog = Arc::new(FakeCatalog::new().with(base).with(expansion_of(
        205896,
        "Spirit Island: Branch & Claw",
        (162886, "Spirit Island"),
        12000,
    )));
    let engine = reconciler(&pool, &catalog);

    let (summary, events) = run_and_collect(&engine, ReconcileRequest::new(vec![id(162886)]), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.imported, 2);
    assert_eq!(count_rows(&pool, "entities").await, 2);

    let linked = entities::find_by_external_id(&pool, id(205896)).await.unwrap().unwrap();
    assert_eq!(linked.local_id, manual.local_id);
    assert_eq!(linked.name, "Spirit Island: Branch and Claw");

    let item = terminal_events(&events)
        .into_iter()
        .find(|e| e.external_id == id(205896))
        .unwrap();
    assert_eq!(item.local_id, Some(manual.local_id));
    assert!(entities::list_unlinked(&pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fuzzy_match_creates_new_entity_by_default() {
    let (_dir, pool) = create_test_db().await.unwrap();
    entities::insert_unlinked(&pool, "Summer Pavilion").await.unwrap();
    let catalog = Arc::new(FakeCatalog::new().with(base_game(266524, "Azul: Summer Pavilion", 30000)));
    let engine = reconciler(&pool, &catalog);

    let (summary, _events) = run_and_collect(&engine, ReconcileRequest::new(vec![id(266524)]), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.imported, 1);
    assert_eq!(count_rows(&pool, "entities").await, 2);
    assert_eq!(entities::list_unlinked(&pool).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_fuzzy_match_links_when_enabled() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let manual = entities::insert_unlinked(&pool, "Summer Pavilion").await.unwrap();
    let catalog = Arc::new(FakeCatalog::new().with(base_game(266524, "Azul: Summer Pavilion", 30000)));

    let config = ReconcileConfig {
        link_fuzzy_matches: true,
        ..ReconcileConfig::default()
    };
    let engine = Reconciler::new(pool.clone(), Arc::clone(&catalog), &config).unwrap();

    run_and_collect(&engine, ReconcileRequest::new(vec![id(266524)]), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(count_rows(&pool, "entities").await, 1);
    let linked = entities::find_by_external_id(&pool, id(266524)).await.unwrap().unwrap();
    assert_eq!(linked.local_id, manual.local_id);
}

#[tokio::test]
async fn test_invalid_threshold_is_a_config_error() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let config = ReconcileConfig {
        fuzzy_overlap_threshold: 1.5,
        ..ReconcileConfig::default()
    };
    let result = Reconciler::new(pool, Arc::new(FakeCatalog::new()), &config);
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_cancelled_run_still_completes() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let catalog = Arc::new(gloomhaven_catalog());
    let engine = reconciler(&pool, &catalog);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let (summary, events) = run_and_collect(&engine, gloomhaven_request(), cancel).await.unwrap();

    assert_eq!(events.len(), 1);
    assert!(events[0].is_complete());
    assert_eq!(summary.imported + summary.failed + summary.skipped + summary.synced, 0);
    assert_eq!(count_rows(&pool, "entities").await, 0);
}

#[tokio::test]
async fn test_dropped_receiver_does_not_stop_run() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let catalog = Arc::new(gloomhaven_catalog());
    let engine = reconciler(&pool, &catalog);

    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let summary = engine
        .run(gloomhaven_request(), tx, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.imported, 2);
    assert_eq!(count_rows(&pool, "entities").await, 2);
}

#[tokio::test]
async fn test_resume_skips_completed_ids() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let catalog = FakeCatalog::new();
    for value in 1..=3 {
        catalog.insert(base_game(value, &format!("Game {}", value), 500));
    }
    catalog.fail(2);
    let catalog = Arc::new(catalog);
    let engine = reconciler(&pool, &catalog);

    let request = ReconcileRequest {
        mode: TraversalMode::None,
        ..ReconcileRequest::new((1..=3).map(id).collect())
    };
    let prepared = engine.prepare(request.clone()).await.unwrap();
    let first_run = prepared.run_id;
    let (tx, mut rx) = mpsc::channel(16);
    let first = engine.execute(prepared, tx, CancellationToken::new()).await;
    while rx.recv().await.is_some() {}
    assert_eq!(first.failed, 1);

    catalog.recover(2);
    let batches_before = catalog.request_count();
    let resumed = ReconcileRequest {
        resume_from: Some(first_run),
        ..request
    };
    let (summary, events) = run_and_collect(&engine, resumed, CancellationToken::new())
        .await
        .unwrap();

    let ids: Vec<u64> = terminal_events(&events).iter().map(|e| e.external_id.get()).collect();
    assert_eq!(ids, vec![2]);
    assert_eq!(summary.imported, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(catalog.request_count(), batches_before + 1);
}

#[tokio::test]
async fn test_resume_retries_related_id_that_failed() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let catalog = dominion_catalog();
    catalog.fail(11);
    let catalog = Arc::new(catalog);
    let engine = reconciler(&pool, &catalog);

    let request = ReconcileRequest::new(vec![id(10)]);
    let prepared = engine.prepare(request.clone()).await.unwrap();
    let first_run = prepared.run_id;
    let (tx, mut rx) = mpsc::channel(16);
    let first = engine.execute(prepared, tx, CancellationToken::new()).await;
    while rx.recv().await.is_some() {}
    assert_eq!(first.imported, 2);
    assert_eq!(first.failed, 1);

    catalog.recover(11);
    let resumed = ReconcileRequest {
        resume_from: Some(first_run),
        ..request
    };
    let (summary, events) = run_and_collect(&engine, resumed, CancellationToken::new())
        .await
        .unwrap();

    let ids: Vec<u64> = terminal_events(&events).iter().map(|e| e.external_id.get()).collect();
    assert_eq!(ids, vec![11]);
    assert_eq!(summary.imported, 1);
    assert_eq!(summary.failed, 0);

    let base = entities::find_by_external_id(&pool, id(10)).await.unwrap().unwrap();
    let seaside = entities::find_by_external_id(&pool, id(11)).await.unwrap().unwrap();
    let edges = relations::list_relations_for(&pool, seaside.local_id).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].source_id, seaside.local_id);
    assert_eq!(edges[0].target_id, base.local_id);
    assert_eq!(count_rows(&pool, "entities").await, 3);
    assert_eq!(count_rows(&pool, "relations").await, 2);
}

#[tokio::test]
async fn test_resume_from_unknown_run_is_rejected() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let catalog = Arc::new(FakeCatalog::new().with(base_game(1, "Game 1", 500)));
    let engine = reconciler(&pool, &catalog);

    let request = ReconcileRequest {
        resume_from: Some(uuid::Uuid::new_v4()),
        ..ReconcileRequest::new(vec![id(1)])
    };
    let result = run_and_collect(&engine, request, CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::InvalidInput(_))));
    assert_eq!(catalog.request_count(), 0);
}

#[tokio::test]
async fn test_self_links_never_become_edges() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let mut record = base_game(7, "Ouroboros", 900);
    record.expansions = vec![link(7, "Ouroboros")];
    record.reimplements = vec![link(7, "Ouroboros")];
    let catalog = Arc::new(FakeCatalog::new().with(record));
    let engine = reconciler(&pool, &catalog);

    let (summary, _events) = run_and_collect(&engine, ReconcileRequest::new(vec![id(7)]), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.imported, 1);
    assert_eq!(count_rows(&pool, "relations").await, 0);
}

#[tokio::test]
async fn test_expansion_seed_links_to_existing_base() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let base = ExternalRecord::new(id(13), "Catan", EntityKind::Base);
    entities::create_from_record(&pool, &base).await.unwrap();

    let catalog = Arc::new(FakeCatalog::new().with(base.clone()).with(expansion_of(
        325,
        "Catan: Seafarers",
        (13, "Catan"),
        15000,
    )));
    let engine = reconciler(&pool, &catalog);

    let request = ReconcileRequest {
        mode: TraversalMode::None,
        ..ReconcileRequest::new(vec![id(325)])
    };
    run_and_collect(&engine, request, CancellationToken::new()).await.unwrap();

    let expansion = entities::find_by_external_id(&pool, id(325)).await.unwrap().unwrap();
    let edges = relations::list_relations_for(&pool, expansion.local_id).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].relation_type, RelationType::ExpansionOf);
    assert_eq!(edges[0].source_id, expansion.local_id);
}

#[tokio::test]
async fn test_lifecycle_is_mirrored_on_event_bus() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let catalog = Arc::new(gloomhaven_catalog());
    let bus = EventBus::new(100);
    let mut rx = bus.subscribe();
    let engine = reconciler(&pool, &catalog).with_event_bus(bus);

    run_and_collect(&engine, gloomhaven_request(), CancellationToken::new())
        .await
        .unwrap();

    let mut received = Vec::new();
    while let Ok(event) = rx.try_recv() {
        received.push(event);
    }

    assert!(matches!(received.first(), Some(CatalogEvent::RunStarted { seed_count: 1, .. })));
    assert!(matches!(received.last(), Some(CatalogEvent::RunCompleted { summary, .. }) if summary.imported == 2));
    let progress = received
        .iter()
        .filter(|e| e.event_type() == "RunProgress")
        .count();
    assert_eq!(progress, 4);
}

#[tokio::test]
async fn test_run_history_is_persisted() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let catalog = Arc::new(gloomhaven_catalog());
    let engine = reconciler(&pool, &catalog);

    let prepared = engine.prepare(gloomhaven_request()).await.unwrap();
    let run_id = prepared.run_id;
    let (tx, mut rx) = mpsc::channel(16);
    let summary = engine.execute(prepared, tx, CancellationToken::new()).await;
    while rx.recv().await.is_some() {}

    let report = runs::load_run(&pool, run_id).await.unwrap().unwrap();
    assert_eq!(report.summary.as_ref().map(|s| s.imported), Some(summary.imported));
    assert_eq!(report.items.len(), 2);
    assert_eq!(report.items[0].external_id, id(174430));
    assert_eq!(report.items[0].name, "Gloomhaven");
    assert_eq!(report.request["max_depth"], 1);
}

#[tokio::test]
async fn test_analysis_reports_without_writing() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let typo = entities::insert_unlinked(&pool, "Forgoten Circles").await.unwrap();
    let catalog = Arc::new(gloomhaven_catalog());
    let engine = reconciler(&pool, &catalog);

    let report = engine.analyze(gloomhaven_request()).await.unwrap();

    let ids: Vec<u64> = report.entries.iter().map(|e| e.external_id.get()).collect();
    assert_eq!(ids, vec![174430, 1002]);
    assert!(report.entries[0].seed);

    let unmatched: Vec<_> = report.unmatched().collect();
    assert_eq!(unmatched.len(), 2);
    let expansion = unmatched.iter().find(|e| e.external_id == id(1002)).unwrap();
    assert_eq!(expansion.suggestions.len(), 1);
    assert_eq!(expansion.suggestions[0].local_id, typo.local_id);

    assert_eq!(report.filtered.len(), 1);
    assert_eq!(report.filtered[0].external_id, id(1001));
    assert_eq!(report.filtered[0].reason, "low engagement (10 < 50)");

    assert_eq!(count_rows(&pool, "entities").await, 1);
    assert_eq!(count_rows(&pool, "relations").await, 0);
    assert_eq!(count_rows(&pool, "reconcile_runs").await, 0);
}
