//! Conflict resolution.
//!
//! Resolutions are a closed enum rather than a registry of callables: each
//! conflict kind generates candidates from an exhaustive match, and new
//! resolution shapes are added by extending the enum. Application is
//! transactional: a candidate is applied to a clone of the project graph,
//! the clone runs the full invariant sweep, and only a clean clone replaces
//! the original. A conflict with no safe candidate is a normal outcome
//! (`NoSafeResolution`), not an error.

use super::conflict::{self, Conflict, ConflictId, ConflictKind};
use super::critical_path::compute_critical_path;
use crate::config::EngineConfig;
use crate::domain::{DependencyType, EdgeId, TaskId, TaskUpdate, TaskWindow};
use crate::error::{Error, Result};
use crate::graph::ProjectGraph;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A concrete, applicable fix for a detected conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Resolution {
    /// Demote an ordering-relevant edge to `related_to`
    DemoteEdge {
        /// The edge to demote
        edge: EdgeId,
    },

    /// Remove a dependency edge entirely
    BreakDependency {
        /// The edge to remove
        edge: EdgeId,
    },

    /// Move the dependent task's window to start when its upstream window ends
    ShiftWindow {
        /// The downstream task whose window moves
        task: TaskId,
        /// The ordering edge whose upstream end anchors the new start
        edge: EdgeId,
    },

    /// Let the two tasks run concurrently by demoting the ordering edge
    AllowParallel {
        /// The edge to demote
        edge: EdgeId,
    },

    /// Push the task's window past every scheduled window in the project
    ExtendTimeline {
        /// The task appended to the end of the timeline
        task: TaskId,
    },

    /// Drop a resource tag from a task so another assignment can cover it
    ReassignResource {
        /// The task giving up the resource
        task: TaskId,
        /// The contended resource tag
        resource: String,
    },

    /// Raise the concurrent capacity of a resource tag by one
    AddResource {
        /// The contended resource tag
        resource: String,
    },

    /// Move the task's window to start after its upstream windows end
    Reschedule {
        /// The task to reschedule
        task: TaskId,
    },

    /// Swap the priorities of a blocking and a blocked task
    InvertPriority {
        /// The upstream (blocking) task
        upstream: TaskId,
        /// The downstream (blocked) task
        downstream: TaskId,
    },

    /// Fold one task into another (manual-only, never auto-applied)
    MergeTasks {
        /// The surviving task
        keep: TaskId,
        /// The task absorbed into `keep`
        absorb: TaskId,
    },
}

/// Discriminant of a [`Resolution`], used to select candidates by strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    /// Demote an edge to `related_to`
    DemoteEdge,
    /// Remove an edge
    BreakDependency,
    /// Shift the dependent task's window
    ShiftWindow,
    /// Demote an edge to allow parallel execution
    AllowParallel,
    /// Append the task at the end of the project timeline
    ExtendTimeline,
    /// Drop a resource tag from a task
    ReassignResource,
    /// Raise a resource tag's capacity
    AddResource,
    /// Reschedule a task after its upstream windows
    Reschedule,
    /// Swap two tasks' priorities
    InvertPriority,
    /// Merge two tasks
    MergeTasks,
}

impl ResolutionKind {
    /// Returns `true` if the resolution must never be chosen by `AutoResolve`
    #[must_use]
    pub fn is_manual_only(&self) -> bool {
        matches!(self, ResolutionKind::MergeTasks)
    }
}

impl Resolution {
    /// The discriminant of this resolution
    #[must_use]
    pub fn kind(&self) -> ResolutionKind {
        match self {
            Resolution::DemoteEdge { .. } => ResolutionKind::DemoteEdge,
            Resolution::BreakDependency { .. } => ResolutionKind::BreakDependency,
            Resolution::ShiftWindow { .. } => ResolutionKind::ShiftWindow,
            Resolution::AllowParallel { .. } => ResolutionKind::AllowParallel,
            Resolution::ExtendTimeline { .. } => ResolutionKind::ExtendTimeline,
            Resolution::ReassignResource { .. } => ResolutionKind::ReassignResource,
            Resolution::AddResource { .. } => ResolutionKind::AddResource,
            Resolution::Reschedule { .. } => ResolutionKind::Reschedule,
            Resolution::InvertPriority { .. } => ResolutionKind::InvertPriority,
            Resolution::MergeTasks { .. } => ResolutionKind::MergeTasks,
        }
    }
}

/// Why a conflict went unresolved, or what fixed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// A candidate was applied and committed
    Applied {
        /// The resolution that was committed
        resolution: Resolution,
    },

    /// Every candidate was unsafe or inapplicable; a human must decide
    NoSafeResolution,

    /// The conflict id no longer matches a detected conflict (conflicts are
    /// recomputed per call, so a stale id is a normal race)
    NoLongerDetected,
}

/// Per-conflict result of a `Resolve` or `AutoResolve` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    /// The conflict the result refers to
    pub conflict_id: ConflictId,

    /// What happened to it
    pub outcome: ResolutionOutcome,
}

impl ResolutionResult {
    /// Returns `true` if a resolution was applied
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self.outcome, ResolutionOutcome::Applied { .. })
    }
}

/// Candidate resolutions for one detected conflict, in the order the
/// resolver tries them.
pub(super) fn candidates_for(
    graph: &ProjectGraph,
    kind: ConflictKind,
    tasks: &[TaskId],
    edges: &[EdgeId],
    resource: Option<&str>,
) -> Vec<Resolution> {
    match kind {
        ConflictKind::Dependency => dependency_candidates(graph, tasks, edges),
        ConflictKind::Scheduling => scheduling_candidates(graph, edges),
        ConflictKind::Resource => resource_candidates(graph, tasks, resource),
        ConflictKind::Priority => priority_candidates(graph, edges),
    }
}

fn dependency_candidates(
    graph: &ProjectGraph,
    tasks: &[TaskId],
    edges: &[EdgeId],
) -> Vec<Resolution> {
    let mut candidates = Vec::new();

    // Weakest ordering edge loses; equal strengths demote the newest edge,
    // matching the forced-add cycle breaker.
    let victim = edges
        .iter()
        .filter_map(|id| graph.edge(id))
        .filter(|record| record.dep_type.is_ordering())
        .min_by(|a, b| {
            a.strength
                .partial_cmp(&b.strength)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| b.id.cmp(&a.id))
        });
    if let Some(record) = victim {
        candidates.push(Resolution::DemoteEdge {
            edge: record.id.clone(),
        });
    }

    for task in tasks {
        if graph.task(task).is_some_and(|t| t.window.is_some()) {
            candidates.push(Resolution::Reschedule { task: task.clone() });
        }
    }

    if let [keep, absorb] = tasks {
        candidates.push(Resolution::MergeTasks {
            keep: keep.clone(),
            absorb: absorb.clone(),
        });
    }
    candidates
}

fn scheduling_candidates(graph: &ProjectGraph, edges: &[EdgeId]) -> Vec<Resolution> {
    let Some(record) = edges.first().and_then(|id| graph.edge(id)) else {
        return Vec::new();
    };
    vec![
        Resolution::ShiftWindow {
            task: record.to.clone(),
            edge: record.id.clone(),
        },
        Resolution::AllowParallel {
            edge: record.id.clone(),
        },
        Resolution::ExtendTimeline {
            task: record.to.clone(),
        },
    ]
}

fn resource_candidates(
    graph: &ProjectGraph,
    tasks: &[TaskId],
    resource: Option<&str>,
) -> Vec<Resolution> {
    let Some(tag) = resource else {
        return Vec::new();
    };

    // The least urgent participant yields; ties go to the highest id
    let victim = tasks
        .iter()
        .max_by(|a, b| {
            let pa = graph.task(a).map_or(0, |t| t.priority);
            let pb = graph.task(b).map_or(0, |t| t.priority);
            pa.cmp(&pb).then_with(|| a.cmp(b))
        })
        .cloned();
    let Some(victim) = victim else {
        return Vec::new();
    };

    vec![
        Resolution::ReassignResource {
            task: victim.clone(),
            resource: tag.to_string(),
        },
        Resolution::AddResource {
            resource: tag.to_string(),
        },
        Resolution::Reschedule { task: victim },
    ]
}

fn priority_candidates(graph: &ProjectGraph, edges: &[EdgeId]) -> Vec<Resolution> {
    let Some(record) = edges.first().and_then(|id| graph.edge(id)) else {
        return Vec::new();
    };
    vec![
        Resolution::InvertPriority {
            upstream: record.from.clone(),
            downstream: record.to.clone(),
        },
        Resolution::BreakDependency {
            edge: record.id.clone(),
        },
        Resolution::AllowParallel {
            edge: record.id.clone(),
        },
    ]
}

/// Resolve the given conflicts against `graph`, mutating it in place.
///
/// `requested` ids are attempted in severity-descending order; an empty
/// slice means every currently detected conflict. Conflicts are re-detected
/// before each attempt, so an earlier resolution can legitimately make a
/// later id come back as [`ResolutionOutcome::NoLongerDetected`]. When
/// `strategy` is set, only candidates of that kind are tried. Manual-only
/// candidates (`MergeTasks`) are skipped unless `allow_manual` is set.
///
/// Each applied resolution is transactional: it runs on a clone, the clone
/// is fully validated, and only then does it replace `graph`.
///
/// # Errors
///
/// Returns `Error::Cancelled` if `cancel` fires between conflicts.
pub(crate) fn resolve_conflicts(
    graph: &mut ProjectGraph,
    requested: &[ConflictId],
    strategy: Option<ResolutionKind>,
    allow_manual: bool,
    config: &EngineConfig,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<Vec<ResolutionResult>> {
    let initial = conflict::detect_conflicts(graph, &[], config, cancel)?;

    // Detected order is already severity-descending; unknown ids go last
    let mut order: Vec<ConflictId> = initial
        .iter()
        .map(|c| c.id.clone())
        .filter(|id| requested.is_empty() || requested.contains(id))
        .collect();
    for id in requested {
        if !order.contains(id) {
            order.push(id.clone());
        }
    }

    let mut results = Vec::with_capacity(order.len());
    for id in order {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let current = conflict::detect_conflicts(graph, &[], config, cancel)?;
        let Some(found) = current.iter().find(|c| c.id == id) else {
            results.push(ResolutionResult {
                conflict_id: id,
                outcome: ResolutionOutcome::NoLongerDetected,
            });
            continue;
        };

        let critical = critical_task_set(graph, config, cancel)?;
        let outcome = resolve_one(graph, found, strategy, allow_manual, &critical, config, now);
        results.push(ResolutionResult {
            conflict_id: id,
            outcome,
        });
    }
    Ok(results)
}

fn resolve_one(
    graph: &mut ProjectGraph,
    conflict: &Conflict,
    strategy: Option<ResolutionKind>,
    allow_manual: bool,
    critical: &HashSet<TaskId>,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> ResolutionOutcome {
    for candidate in &conflict.candidates {
        if let Some(kind) = strategy {
            if candidate.kind() != kind {
                continue;
            }
        }
        if candidate.kind().is_manual_only() && !allow_manual {
            continue;
        }
        if !passes_critical_path_guard(graph, candidate, critical, config) {
            debug!(
                conflict = %conflict.id,
                resolution = ?candidate.kind(),
                "Skipped resolution touching the critical path"
            );
            continue;
        }

        let mut staged = graph.clone();
        match apply(&mut staged, candidate, config, now) {
            Ok(()) => {}
            Err(reason) => {
                debug!(
                    conflict = %conflict.id,
                    resolution = ?candidate.kind(),
                    reason, "Resolution not applicable"
                );
                continue;
            }
        }
        if let Err(err) = staged.validate() {
            debug!(
                conflict = %conflict.id,
                resolution = ?candidate.kind(),
                error = %err,
                "Resolution rejected by invariant sweep"
            );
            continue;
        }

        *graph = staged;
        debug!(conflict = %conflict.id, resolution = ?candidate.kind(), "Applied resolution");
        return ResolutionOutcome::Applied {
            resolution: candidate.clone(),
        };
    }

    warn!(conflict = %conflict.id, kind = %conflict.kind, "No safe resolution");
    ResolutionOutcome::NoSafeResolution
}

/// A resolution that removes or demotes a critical-path edge, or merges away
/// a critical-path task, needs the explicit override flag.
fn passes_critical_path_guard(
    graph: &ProjectGraph,
    resolution: &Resolution,
    critical: &HashSet<TaskId>,
    config: &EngineConfig,
) -> bool {
    if config.resolver.allow_critical_path_changes {
        return true;
    }
    match resolution {
        Resolution::DemoteEdge { edge }
        | Resolution::BreakDependency { edge }
        | Resolution::AllowParallel { edge } => {
            let Some(record) = graph.edge(edge) else {
                return true;
            };
            !(critical.contains(&record.from) && critical.contains(&record.to))
        }
        Resolution::MergeTasks { keep, absorb } => {
            !critical.contains(keep) && !critical.contains(absorb)
        }
        _ => true,
    }
}

/// Zero-slack tasks of the current graph; empty when the graph holds a cycle
/// at rest (no meaningful critical path exists then).
fn critical_task_set(
    graph: &ProjectGraph,
    config: &EngineConfig,
    cancel: &CancellationToken,
) -> Result<HashSet<TaskId>> {
    if graph.find_cycle().is_some() {
        return Ok(HashSet::new());
    }
    let cp = compute_critical_path(graph, &config.critical_path, cancel)?;
    let eps = config.critical_path.epsilon;
    Ok(cp
        .slacks
        .into_iter()
        .filter(|(_, slack)| slack.abs() <= eps)
        .map(|(id, _)| id)
        .collect())
}

/// Apply one resolution to `graph`. Errors are human-readable reasons the
/// candidate could not be applied; the caller discards the mutated graph in
/// that case.
fn apply(
    graph: &mut ProjectGraph,
    resolution: &Resolution,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> std::result::Result<(), String> {
    match resolution {
        Resolution::DemoteEdge { edge } | Resolution::AllowParallel { edge } => {
            graph
                .update_edge(edge, Some(DependencyType::RelatedTo), None)
                .map_err(|e| e.to_string())?;
        }
        Resolution::BreakDependency { edge } => {
            graph.remove_edge(edge).map_err(|e| e.to_string())?;
        }
        Resolution::ShiftWindow { task, edge } => {
            let record = graph
                .edge(edge)
                .cloned()
                .ok_or_else(|| format!("edge {} no longer exists", edge))?;
            let upstream_end = window_of(graph, &record.from)?.end;
            let shifted = window_of(graph, task)?.shifted_to(upstream_end);
            set_window(graph, task, shifted, now)?;
        }
        Resolution::ExtendTimeline { task } => {
            let latest_end = graph
                .tasks()
                .filter(|t| t.id != *task)
                .filter_map(|t| t.window.map(|w| w.end))
                .max()
                .ok_or_else(|| "no other scheduled window to extend past".to_string())?;
            let shifted = window_of(graph, task)?.shifted_to(latest_end);
            set_window(graph, task, shifted, now)?;
        }
        Resolution::ReassignResource { task, resource } => {
            let current = graph
                .task(task)
                .ok_or_else(|| format!("task {} no longer exists", task))?;
            if !current.resources.iter().any(|r| r == resource) {
                return Err(format!("task {} does not hold resource {}", task, resource));
            }
            let resources: Vec<String> = current
                .resources
                .iter()
                .filter(|r| *r != resource)
                .cloned()
                .collect();
            let update = TaskUpdate {
                resources: Some(resources),
                ..TaskUpdate::default()
            };
            graph
                .update_task(task, update, now)
                .map_err(|e| e.to_string())?;
        }
        Resolution::AddResource { resource } => {
            let capacity =
                graph.resource_capacity(resource, config.resolver.default_resource_capacity);
            graph.set_resource_capacity(resource.clone(), capacity + 1);
        }
        Resolution::Reschedule { task } => {
            let upstream_end = graph
                .ordering_predecessors(task)
                .into_iter()
                .filter_map(|(_, pred)| graph.task(pred).and_then(|t| t.window))
                .map(|w| w.end)
                .max()
                .ok_or_else(|| "no scheduled upstream window to reschedule after".to_string())?;
            let shifted = window_of(graph, task)?.shifted_to(upstream_end);
            set_window(graph, task, shifted, now)?;
        }
        Resolution::InvertPriority {
            upstream,
            downstream,
        } => {
            let up = graph
                .task(upstream)
                .ok_or_else(|| format!("task {} no longer exists", upstream))?
                .priority;
            let down = graph
                .task(downstream)
                .ok_or_else(|| format!("task {} no longer exists", downstream))?
                .priority;
            set_priority(graph, upstream, down, now)?;
            set_priority(graph, downstream, up, now)?;
        }
        Resolution::MergeTasks { keep, absorb } => {
            graph.merge_tasks(keep, absorb, now).map_err(|e| e.to_string())?;
        }
    }
    Ok(())
}

fn window_of(graph: &ProjectGraph, task: &TaskId) -> std::result::Result<TaskWindow, String> {
    graph
        .task(task)
        .ok_or_else(|| format!("task {} no longer exists", task))?
        .window
        .ok_or_else(|| format!("task {} has no scheduled window", task))
}

fn set_window(
    graph: &mut ProjectGraph,
    task: &TaskId,
    window: TaskWindow,
    now: DateTime<Utc>,
) -> std::result::Result<(), String> {
    let update = TaskUpdate {
        window: Some(Some(window)),
        ..TaskUpdate::default()
    };
    graph.update_task(task, update, now).map_err(|e| e.to_string())?;
    Ok(())
}

fn set_priority(
    graph: &mut ProjectGraph,
    task: &TaskId,
    priority: u8,
    now: DateTime<Utc>,
) -> std::result::Result<(), String> {
    let update = TaskUpdate {
        priority: Some(priority),
        ..TaskUpdate::default()
    };
    graph.update_task(task, update, now).map_err(|e| e.to_string())?;
    Ok(())
}
