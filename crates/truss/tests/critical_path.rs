//! Integration tests for critical-path computation through the engine.

mod common;

use common::{add_tasks, engine, link, project, task};
use truss::config::{EngineConfig, TieBreak};
use truss::domain::{DependencyType, TaskId};
use truss::engine::DependencyEngine;
use truss::error::Error;
use tokio_util::sync::CancellationToken;

// ========== Classic CPM ==========

#[tokio::test]
async fn test_diamond_critical_path_and_slacks() {
    let engine = engine();
    add_tasks(&engine, &[("a", 3.0), ("b", 5.0), ("c", 1.0), ("d", 2.0)]).await;
    link(&engine, "a", "b", DependencyType::DependsOn).await;
    link(&engine, "b", "d", DependencyType::DependsOn).await;
    link(&engine, "a", "c", DependencyType::DependsOn).await;
    link(&engine, "c", "d", DependencyType::DependsOn).await;

    let cp = engine
        .compute_critical_path(&project(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        cp.path,
        vec![TaskId::new("a"), TaskId::new("b"), TaskId::new("d")]
    );
    assert!((cp.total_duration - 10.0).abs() < 1e-9);

    let slack = |id: &str| cp.slacks[&TaskId::new(id)];
    assert!(slack("a").abs() < 1e-9);
    assert!(slack("b").abs() < 1e-9);
    assert!(slack("d").abs() < 1e-9);
    assert!((slack("c") - 4.0).abs() < 1e-9);

    let start = |id: &str| cp.earliest_starts[&TaskId::new(id)];
    assert!(start("a").abs() < 1e-9);
    assert!((start("b") - 3.0).abs() < 1e-9);
    assert!((start("d") - 8.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_informational_edges_do_not_order_the_schedule() {
    let engine = engine();
    add_tasks(&engine, &[("a", 4.0), ("b", 6.0)]).await;
    link(&engine, "a", "b", DependencyType::RelatedTo).await;

    let cp = engine
        .compute_critical_path(&project(), &CancellationToken::new())
        .await
        .unwrap();

    // Both tasks are sources; the longest single task wins
    assert!((cp.total_duration - 6.0).abs() < 1e-9);
    assert_eq!(cp.path, vec![TaskId::new("b")]);
    assert!(cp.earliest_starts[&TaskId::new("b")].abs() < 1e-9);
}

#[tokio::test]
async fn test_empty_project_has_empty_path() {
    let engine = engine();
    engine.upsert_task(task("a", 2.0)).await.unwrap();
    engine
        .remove_task(&project(), &TaskId::new("a"))
        .await
        .unwrap();

    let cp = engine
        .compute_critical_path(&project(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(cp.path.is_empty());
    assert!(cp.total_duration.abs() < 1e-9);
}

// ========== Tie-breaking ==========

async fn tied_engine(tie_break: TieBreak) -> DependencyEngine {
    let config = EngineConfig {
        critical_path: truss::config::CriticalPathConfig {
            tie_break,
            ..Default::default()
        },
        ..Default::default()
    };
    let engine = DependencyEngine::new(config).unwrap();
    add_tasks(&engine, &[("a", 5.0), ("b", 5.0)]).await;
    engine
}

#[tokio::test]
async fn test_tie_break_lowest_task_id() {
    let engine = tied_engine(TieBreak::LowestTaskId).await;
    let cp = engine
        .compute_critical_path(&project(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(cp.path, vec![TaskId::new("a")]);
}

#[tokio::test]
async fn test_tie_break_highest_task_id() {
    let engine = tied_engine(TieBreak::HighestTaskId).await;
    let cp = engine
        .compute_critical_path(&project(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(cp.path, vec![TaskId::new("b")]);
}

// ========== Determinism & Cancellation ==========

#[tokio::test]
async fn test_repeated_computation_is_identical() {
    let engine = engine();
    add_tasks(&engine, &[("a", 3.0), ("b", 5.0), ("c", 1.0), ("d", 2.0)]).await;
    link(&engine, "a", "b", DependencyType::DependsOn).await;
    link(&engine, "b", "d", DependencyType::Blocks).await;
    link(&engine, "a", "c", DependencyType::Prerequisite).await;

    let first = engine
        .compute_critical_path(&project(), &CancellationToken::new())
        .await
        .unwrap();
    let second = engine
        .compute_critical_path(&project(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_cancellation_surfaces_as_cancelled() {
    let engine = engine();
    add_tasks(&engine, &[("a", 1.0), ("b", 1.0)]).await;
    link(&engine, "a", "b", DependencyType::DependsOn).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = engine.compute_critical_path(&project(), &cancel).await;
    assert!(matches!(result, Err(Error::Cancelled)));
}
