//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use truss::config::EngineConfig;
use truss::domain::{
    DependencyType, EdgeRecord, ProjectId, Task, TaskId, TaskStatus, TaskWindow,
};
use truss::engine::DependencyEngine;

/// Project id used by most tests
pub const PROJECT: &str = "proj";

/// A fixed reference instant
pub fn ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

/// A window on the reference day, bounded by whole hours
pub fn window(start_hour: u32, end_hour: u32) -> TaskWindow {
    TaskWindow {
        start: Utc.with_ymd_and_hms(2026, 3, 2, start_hour, 0, 0).unwrap(),
        end: Utc.with_ymd_and_hms(2026, 3, 2, end_hour, 0, 0).unwrap(),
    }
}

/// An engine with default configuration
pub fn engine() -> DependencyEngine {
    DependencyEngine::new(EngineConfig::default()).expect("default config is valid")
}

/// A minimal pending task in [`PROJECT`]
pub fn task(id: &str, hours: f64) -> Task {
    Task {
        id: TaskId::new(id),
        project: ProjectId::new(PROJECT),
        name: format!("Task {}", id),
        status: TaskStatus::Pending,
        duration_hours: hours,
        priority: 2,
        resources: Vec::new(),
        window: None,
        created_at: ts(),
        updated_at: ts(),
    }
}

/// A task with explicit priority, resources, and window
pub fn task_full(
    id: &str,
    hours: f64,
    priority: u8,
    resources: &[&str],
    window: Option<TaskWindow>,
) -> Task {
    Task {
        priority,
        resources: resources.iter().map(|r| (*r).to_string()).collect(),
        window,
        ..task(id, hours)
    }
}

/// The default project id as a typed value
pub fn project() -> ProjectId {
    ProjectId::new(PROJECT)
}

/// Admit a batch of `(id, duration_hours)` tasks into [`PROJECT`]
pub async fn add_tasks(engine: &DependencyEngine, specs: &[(&str, f64)]) {
    for (id, hours) in specs {
        engine
            .upsert_task(task(id, *hours))
            .await
            .expect("task admission");
    }
}

/// Add a full-strength edge between two admitted tasks
pub async fn link(
    engine: &DependencyEngine,
    from: &str,
    to: &str,
    dep_type: DependencyType,
) -> EdgeRecord {
    engine
        .add_dependency(
            &project(),
            &TaskId::new(from),
            &TaskId::new(to),
            dep_type,
            1.0,
            false,
        )
        .await
        .expect("edge accepted")
        .edge
}
