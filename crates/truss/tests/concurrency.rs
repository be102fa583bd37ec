//! Integration tests for the engine's concurrency model: per-project
//! single-writer locking, lock-free analyses over snapshot clones, and
//! cross-project isolation.

mod common;

use common::{add_tasks, engine, link, task, PROJECT};
use std::sync::Arc;
use truss::domain::{DependencyType, ProjectId, Task, TaskId, TaskStatus};
use truss::engine::DependencyEngine;
use tokio_util::sync::CancellationToken;

fn task_in(project: &str, id: &str, hours: f64) -> Task {
    Task {
        project: ProjectId::new(project),
        ..task(id, hours)
    }
}

#[tokio::test]
async fn test_concurrent_mutations_all_land() {
    let engine = Arc::new(engine());

    let mut handles = Vec::new();
    for i in 0..32 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .upsert_task(task_in(PROJECT, &format!("t{:02}", i), 1.0))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let snapshot = engine.snapshot(&ProjectId::new(PROJECT)).await.unwrap();
    assert_eq!(snapshot.graph().task_count(), 32);
    snapshot.graph().validate().unwrap();
}

#[tokio::test]
async fn test_analyses_run_against_a_stable_snapshot() {
    let engine = Arc::new(engine());
    add_tasks(&engine, &[("a", 3.0), ("b", 5.0)]).await;
    link(&engine, "a", "b", DependencyType::DependsOn).await;

    // Interleave analyses with mutations; every analysis sees some
    // consistent version of the graph and never a half-applied write
    let analyst = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            for _ in 0..50 {
                let cp = engine
                    .compute_critical_path(&ProjectId::new(PROJECT), &CancellationToken::new())
                    .await
                    .unwrap();
                assert!(cp.total_duration >= 8.0);
            }
        })
    };
    let writer = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            for i in 0..50 {
                engine
                    .upsert_task(task_in(PROJECT, &format!("extra{:02}", i), 1.0))
                    .await
                    .unwrap();
            }
        })
    };

    analyst.await.unwrap();
    writer.await.unwrap();
}

#[tokio::test]
async fn test_projects_are_isolated() {
    let engine = Arc::new(engine());
    engine.upsert_task(task_in("alpha", "a", 2.0)).await.unwrap();
    engine.upsert_task(task_in("beta", "a", 9.0)).await.unwrap();

    let alpha = engine
        .compute_critical_path(&ProjectId::new("alpha"), &CancellationToken::new())
        .await
        .unwrap();
    let beta = engine
        .compute_critical_path(&ProjectId::new("beta"), &CancellationToken::new())
        .await
        .unwrap();

    assert!((alpha.total_duration - 2.0).abs() < 1e-9);
    assert!((beta.total_duration - 9.0).abs() < 1e-9);

    // Mutating beta never shows up in alpha
    engine
        .update_task_status(&ProjectId::new("beta"), &TaskId::new("a"), TaskStatus::Completed)
        .await
        .unwrap();
    let snapshot = engine.snapshot(&ProjectId::new("alpha")).await.unwrap();
    assert_eq!(
        snapshot.graph().task(&TaskId::new("a")).unwrap().status,
        TaskStatus::Pending
    );
}

#[tokio::test]
async fn test_snapshot_versions_increase_monotonically() {
    let engine = engine();
    add_tasks(&engine, &[("a", 1.0)]).await;
    let first = engine.snapshot(&ProjectId::new(PROJECT)).await.unwrap();

    add_tasks(&engine, &[("b", 1.0)]).await;
    link(&engine, "a", "b", DependencyType::DependsOn).await;
    let second = engine.snapshot(&ProjectId::new(PROJECT)).await.unwrap();

    assert!(second.version() > first.version());
    assert!(second.taken_at() >= first.taken_at());
}

#[tokio::test]
async fn test_shared_engine_handles_parallel_projects() {
    let engine = Arc::new(DependencyEngine::new(truss::config::EngineConfig::default()).unwrap());

    let mut handles = Vec::new();
    for p in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let name = format!("proj{}", p);
            for i in 0..4 {
                engine
                    .upsert_task(task_in(&name, &format!("t{}", i), 1.0))
                    .await
                    .unwrap();
            }
            engine
                .add_dependency(
                    &ProjectId::new(&name),
                    &TaskId::new("t0"),
                    &TaskId::new("t1"),
                    DependencyType::DependsOn,
                    1.0,
                    false,
                )
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(engine.list_projects().await.len(), 8);
    for p in 0..8 {
        let snapshot = engine
            .snapshot(&ProjectId::new(format!("proj{}", p)))
            .await
            .unwrap();
        assert_eq!(snapshot.graph().task_count(), 4);
        assert_eq!(snapshot.graph().edge_count(), 1);
    }
}
