//! The dependency engine instance.
//!
//! [`DependencyEngine`] is an explicit, caller-constructed value (no global
//! state): it holds one graph handle per project and enforces
//! single-writer/multiple-reader semantics per project. Mutations take the
//! project's write lock for their validation-and-commit; analyses clone the
//! graph under a brief read lock and then run lock-free against the copy, so
//! they parallelize freely with each other and with other projects'
//! mutations. Nothing blocks across project boundaries.
//!
//! Tasks are created and owned externally. The engine admits them through
//! [`DependencyEngine::upsert_task`], or lazily through an optional
//! [`TaskSource`] consulted when a dependency references a task the engine
//! has not seen.

use crate::analysis::conflict::{self, Conflict, ConflictId};
use crate::analysis::critical_path::{self, CriticalPath};
use crate::analysis::impact::{self, ChangeType, ImpactReport};
use crate::analysis::resolve::{self, ResolutionKind, ResolutionOutcome, ResolutionResult};
use crate::config::EngineConfig;
use crate::domain::{
    DependencyAdded, DependencyLink, DependencyType, EdgeId, EdgeRecord, ProjectId, Task, TaskId,
    TaskStatus, TaskUpdate,
};
use crate::error::{Error, Result};
use crate::export::GraphExport;
use crate::graph::{GraphSnapshot, ProjectGraph};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Supplies externally-owned tasks on demand.
///
/// The engine never creates tasks. When an operation references a task the
/// store has not seen and a source is configured, the engine asks the source
/// once and admits the result.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Fetch a task by project and id, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Implementations should surface backend failures as `Error::Source`.
    async fn fetch_task(&self, project: &ProjectId, id: &TaskId) -> Result<Option<Task>>;
}

/// Injected time source for window-overlap checks and audit timestamps.
pub trait Clock: Send + Sync {
    /// The current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock [`Clock`], the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The task-dependency graph engine.
///
/// Construct one per scope you want isolated (service, test); hand the same
/// instance to every caller that should share state.
pub struct DependencyEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    task_source: Option<Arc<dyn TaskSource>>,
    projects: RwLock<HashMap<ProjectId, Arc<RwLock<ProjectGraph>>>>,
}

impl DependencyEngine {
    /// Create an engine with the given configuration and the system clock.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration fails validation.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock: Arc::new(SystemClock),
            task_source: None,
            projects: RwLock::new(HashMap::new()),
        })
    }

    /// Replace the time source (builder style).
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach a task source for lazy admission (builder style).
    #[must_use]
    pub fn with_task_source(mut self, source: Arc<dyn TaskSource>) -> Self {
        self.task_source = Some(source);
        self
    }

    /// The engine's configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Projects with a graph in this engine, in ascending id order
    pub async fn list_projects(&self) -> Vec<ProjectId> {
        let projects = self.projects.read().await;
        let mut ids: Vec<ProjectId> = projects.keys().cloned().collect();
        ids.sort();
        ids
    }

    // ========== Task admission ==========

    /// Insert or replace a task, creating the project graph on first use.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the task's attributes are out of range.
    pub async fn upsert_task(&self, task: Task) -> Result<Task> {
        let handle = self.ensure_project(&task.project).await;
        let mut graph = handle.write().await;
        let stored = graph.upsert_task(task, self.clock.now())?;
        debug!(project = %stored.project, task = %stored.id, "Upserted task");
        Ok(stored)
    }

    /// Apply a partial update to a task.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProjectNotFound`, `Error::TaskNotFound`, or a
    /// validation error; the task is unchanged on failure.
    pub async fn update_task(
        &self,
        project: &ProjectId,
        task_id: &TaskId,
        update: TaskUpdate,
    ) -> Result<Task> {
        let handle = self.project_handle(project).await?;
        let mut graph = handle.write().await;
        graph.update_task(task_id, update, self.clock.now())
    }

    /// Set a task's status.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProjectNotFound` or `Error::TaskNotFound`.
    pub async fn update_task_status(
        &self,
        project: &ProjectId,
        task_id: &TaskId,
        status: TaskStatus,
    ) -> Result<Task> {
        let update = TaskUpdate {
            status: Some(status),
            ..TaskUpdate::default()
        };
        self.update_task(project, task_id, update).await
    }

    /// Remove a task that no edge references.
    ///
    /// # Errors
    ///
    /// Returns `Error::TaskHasEdges` while any edge still touches the task.
    pub async fn remove_task(&self, project: &ProjectId, task_id: &TaskId) -> Result<Task> {
        let handle = self.project_handle(project).await?;
        let mut graph = handle.write().await;
        let removed = graph.remove_task(task_id)?;
        debug!(project = %project, task = %task_id, "Removed task");
        Ok(removed)
    }

    /// Record the concurrent capacity of a resource tag.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProjectNotFound` for unknown projects.
    pub async fn set_resource_capacity(
        &self,
        project: &ProjectId,
        tag: &str,
        capacity: u32,
    ) -> Result<()> {
        let handle = self.project_handle(project).await?;
        let mut graph = handle.write().await;
        graph.set_resource_capacity(tag, capacity);
        Ok(())
    }

    // ========== Dependency mutations ==========

    /// Add a dependency edge between two tasks.
    ///
    /// When a [`TaskSource`] is configured, endpoints the engine has not
    /// seen are fetched and admitted as part of the same all-or-nothing
    /// commit. An edge that would close a cycle is rejected unless `force`
    /// is set, in which case cycles are broken by demoting the weakest cycle
    /// edge to `related_to` (reported in the returned
    /// [`DependencyAdded::auto_broken`] and logged at `warn`).
    ///
    /// # Errors
    ///
    /// `Error::SelfLoop`, `Error::TaskNotFound`, `Error::InvalidStrength`,
    /// `Error::DuplicateEdge`, or `Error::CycleDetected` with the offending
    /// path.
    pub async fn add_dependency(
        &self,
        project: &ProjectId,
        from: &TaskId,
        to: &TaskId,
        dep_type: DependencyType,
        strength: f64,
        force: bool,
    ) -> Result<DependencyAdded> {
        let handle = self.project_handle(project).await?;
        let mut graph = handle.write().await;
        let now = self.clock.now();

        let needs_admission = (!graph.contains_task(from) || !graph.contains_task(to))
            && self.task_source.is_some();
        let added = if needs_admission {
            // Stage admission and the edge together so a rejected edge does
            // not leave half-admitted tasks behind
            let mut staged = graph.clone();
            self.admit_missing(&mut staged, project, &[from, to], now)
                .await?;
            let added = staged.add_edge(from, to, dep_type, strength, force, now)?;
            *graph = staged;
            added
        } else {
            graph.add_edge(from, to, dep_type, strength, force, now)?
        };

        for broken in &added.auto_broken {
            warn!(
                project = %project,
                demoted = %broken.demoted,
                cycle = ?broken.cycle_path,
                "Cycle auto-broken by demoting edge to related_to"
            );
        }
        debug!(project = %project, edge = %added.edge.id, "Added dependency");
        Ok(added)
    }

    /// Remove a dependency edge by id.
    ///
    /// # Errors
    ///
    /// Returns `Error::EdgeNotFound` for unknown edge ids.
    pub async fn remove_dependency(
        &self,
        project: &ProjectId,
        edge_id: &EdgeId,
    ) -> Result<EdgeRecord> {
        let handle = self.project_handle(project).await?;
        let mut graph = handle.write().await;
        let removed = graph.remove_edge(edge_id)?;
        debug!(project = %project, edge = %edge_id, "Removed dependency");
        Ok(removed)
    }

    /// Change a dependency's type and/or strength.
    ///
    /// # Errors
    ///
    /// Returns `Error::EdgeNotFound`, `Error::DuplicateEdge`, or
    /// `Error::CycleDetected` when promoting an informational edge would
    /// close a cycle.
    pub async fn update_dependency(
        &self,
        project: &ProjectId,
        edge_id: &EdgeId,
        new_type: Option<DependencyType>,
        new_strength: Option<f64>,
    ) -> Result<EdgeRecord> {
        let handle = self.project_handle(project).await?;
        let mut graph = handle.write().await;
        graph.update_edge(edge_id, new_type, new_strength)
    }

    // ========== Queries & snapshots ==========

    /// The dependencies of a task, direct (depth 1) or the full upstream
    /// closure over ordering-relevant edges.
    ///
    /// # Errors
    ///
    /// Returns `Error::TaskNotFound` for unknown tasks.
    pub async fn get_dependencies(
        &self,
        project: &ProjectId,
        task_id: &TaskId,
        include_transitive: bool,
    ) -> Result<Vec<DependencyLink>> {
        let handle = self.project_handle(project).await?;
        let graph = handle.read().await;
        let links = graph
            .dependencies_of(task_id, include_transitive)?
            .into_iter()
            .map(|(edge, depth)| DependencyLink { edge, depth })
            .collect();
        Ok(links)
    }

    /// Take an immutable snapshot of a project graph.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProjectNotFound` for unknown projects.
    pub async fn snapshot(&self, project: &ProjectId) -> Result<GraphSnapshot> {
        let handle = self.project_handle(project).await?;
        let graph = handle.read().await;
        Ok(GraphSnapshot::new(graph.clone(), self.clock.now()))
    }

    // ========== Analyses ==========

    /// Compute the critical path of a project.
    ///
    /// # Errors
    ///
    /// `Error::ProjectNotFound`, `Error::Cancelled`, or `Error::Internal`
    /// when the at-rest graph unexpectedly holds a cycle.
    pub async fn compute_critical_path(
        &self,
        project: &ProjectId,
        cancel: &CancellationToken,
    ) -> Result<CriticalPath> {
        let snapshot = self.snapshot(project).await?;
        critical_path::compute_critical_path(
            snapshot.graph(),
            &self.config.critical_path,
            cancel,
        )
    }

    /// Detect conflicts, optionally restricted to those touching the given
    /// tasks (an empty slice means the whole project).
    ///
    /// # Errors
    ///
    /// `Error::ProjectNotFound` or `Error::Cancelled`.
    pub async fn detect_conflicts(
        &self,
        project: &ProjectId,
        scope: &[TaskId],
        cancel: &CancellationToken,
    ) -> Result<Vec<Conflict>> {
        let snapshot = self.snapshot(project).await?;
        conflict::detect_conflicts(snapshot.graph(), scope, &self.config, cancel)
    }

    /// Propagate a hypothetical change from a task through the graph.
    ///
    /// # Errors
    ///
    /// `Error::ProjectNotFound`, `Error::TaskNotFound`, or
    /// `Error::Cancelled`.
    pub async fn analyze_impact(
        &self,
        project: &ProjectId,
        task_id: &TaskId,
        change: ChangeType,
        cancel: &CancellationToken,
    ) -> Result<ImpactReport> {
        let snapshot = self.snapshot(project).await?;
        impact::analyze_impact(snapshot.graph(), task_id, change, &self.config, cancel)
    }

    /// Export a project graph as a serializable node-and-edge list with
    /// derived slack and critical flags.
    ///
    /// # Errors
    ///
    /// `Error::ProjectNotFound` or `Error::Cancelled`. A graph that holds a
    /// cycle at rest still exports, with the derived fields absent.
    pub async fn export_graph(
        &self,
        project: &ProjectId,
        cancel: &CancellationToken,
    ) -> Result<GraphExport> {
        let snapshot = self.snapshot(project).await?;
        let cp = match critical_path::compute_critical_path(
            snapshot.graph(),
            &self.config.critical_path,
            cancel,
        ) {
            Ok(cp) => Some(cp),
            Err(Error::Internal(_)) => None,
            Err(err) => return Err(err),
        };
        Ok(GraphExport::build(
            snapshot.graph(),
            cp.as_ref(),
            self.config.critical_path.epsilon,
            self.clock.now(),
        ))
    }

    // ========== Conflict resolution ==========

    /// Apply a resolution to one conflict, optionally restricted to a
    /// strategy. Manual-only candidates (`MergeTasks`) are permitted here,
    /// unlike in [`Self::auto_resolve`].
    ///
    /// # Errors
    ///
    /// Returns `Error::ConflictNotFound` when the id matches no currently
    /// detected conflict.
    pub async fn resolve(
        &self,
        project: &ProjectId,
        conflict_id: &ConflictId,
        strategy: Option<ResolutionKind>,
    ) -> Result<ResolutionResult> {
        let handle = self.project_handle(project).await?;
        let mut graph = handle.write().await;
        let results = resolve::resolve_conflicts(
            &mut graph,
            std::slice::from_ref(conflict_id),
            strategy,
            true,
            &self.config,
            self.clock.now(),
            &CancellationToken::new(),
        )?;
        let result = results
            .into_iter()
            .next()
            .ok_or_else(|| Error::Internal("resolve produced no result".to_string()))?;
        if result.outcome == ResolutionOutcome::NoLongerDetected {
            return Err(Error::ConflictNotFound(conflict_id.as_str().to_string()));
        }
        Ok(result)
    }

    /// Resolve conflicts in severity-descending order, applying the first
    /// safe candidate per conflict. An empty id slice means every currently
    /// detected conflict. Conflicts with no safe candidate come back as
    /// [`ResolutionOutcome::NoSafeResolution`]; stale ids as
    /// [`ResolutionOutcome::NoLongerDetected`]. Each applied resolution is
    /// all-or-nothing against the project graph.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProjectNotFound` for unknown projects.
    pub async fn auto_resolve(
        &self,
        project: &ProjectId,
        conflict_ids: &[ConflictId],
    ) -> Result<Vec<ResolutionResult>> {
        let handle = self.project_handle(project).await?;
        let mut graph = handle.write().await;
        resolve::resolve_conflicts(
            &mut graph,
            conflict_ids,
            None,
            false,
            &self.config,
            self.clock.now(),
            &CancellationToken::new(),
        )
    }

    // ========== Internals ==========

    async fn project_handle(&self, project: &ProjectId) -> Result<Arc<RwLock<ProjectGraph>>> {
        let projects = self.projects.read().await;
        projects
            .get(project)
            .cloned()
            .ok_or_else(|| Error::ProjectNotFound(project.clone()))
    }

    async fn ensure_project(&self, project: &ProjectId) -> Arc<RwLock<ProjectGraph>> {
        {
            let projects = self.projects.read().await;
            if let Some(handle) = projects.get(project) {
                return Arc::clone(handle);
            }
        }
        let mut projects = self.projects.write().await;
        Arc::clone(projects.entry(project.clone()).or_insert_with(|| {
            Arc::new(RwLock::new(ProjectGraph::new(
                project.clone(),
                self.config.edge_prefix.clone(),
            )))
        }))
    }

    async fn admit_missing(
        &self,
        graph: &mut ProjectGraph,
        project: &ProjectId,
        ids: &[&TaskId],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(source) = &self.task_source else {
            return Ok(());
        };
        for id in ids {
            if graph.contains_task(id) {
                continue;
            }
            let task = source
                .fetch_task(project, id)
                .await?
                .ok_or_else(|| Error::TaskNotFound((*id).clone()))?;
            debug!(project = %project, task = %id, "Admitted task from source");
            graph.upsert_task(task, now)?;
        }
        Ok(())
    }
}

// ========== Test Utilities ==========

/// A [`TaskSource`] backed by a fixed set of canned tasks.
///
/// Available when running tests or with the `test-util` feature enabled.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone, Default)]
pub struct MockTaskSource {
    tasks: HashMap<(ProjectId, TaskId), Task>,
}

#[cfg(any(test, feature = "test-util"))]
impl MockTaskSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a canned task (builder style).
    #[must_use]
    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks
            .insert((task.project.clone(), task.id.clone()), task);
        self
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl TaskSource for MockTaskSource {
    async fn fetch_task(&self, project: &ProjectId, id: &TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.get(&(project.clone(), id.clone())).cloned())
    }
}

/// A [`Clock`] that only moves when told to.
///
/// Available when running tests or with the `test-util` feature enabled.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(any(test, feature = "test-util"))]
impl ManualClock {
    /// Create a clock frozen at the given instant.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    /// Move the clock forward.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now += duration;
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}
