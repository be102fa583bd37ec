//! Conflict detection.
//!
//! Conflicts are derived, non-persistent records recomputed on demand from
//! a snapshot; they are never stored as ground truth. Each detected
//! conflict carries a deterministic id (hash of its kind, rule, and
//! involved ids), a severity score, and the candidate resolutions the
//! resolver would try.

use super::critical_path::compute_critical_path;
use super::resolve::{self, Resolution};
use crate::config::EngineConfig;
use crate::domain::{DependencyType, EdgeId, EdgeRecord, TaskId};
use crate::error::{Error, Result};
use crate::graph::ProjectGraph;
use crate::id_generation::encode_base36;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use tokio_util::sync::CancellationToken;

const DEPENDENCY_SEVERITY: f64 = 0.9;
const RESOURCE_SEVERITY: f64 = 0.7;
const SCHEDULING_SEVERITY: f64 = 0.6;
const PRIORITY_SEVERITY: f64 = 0.4;

/// Severity added when a conflict touches a zero-slack task
const CRITICAL_PATH_BUMP: f64 = 0.1;

const CONFLICT_ID_LENGTH: usize = 8;

/// Kind of detected inconsistency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// A cycle, or contradictory prerequisite edges between a pair
    Dependency,

    /// Overlapping windows on two tasks linked by an ordering edge
    Scheduling,

    /// Concurrent demand for a resource tag exceeds its capacity
    Resource,

    /// A lower-priority task blocks a higher-priority one
    Priority,
}

impl ConflictKind {
    /// Every kind, in default precedence order
    pub const ALL: [ConflictKind; 4] = [
        ConflictKind::Dependency,
        ConflictKind::Scheduling,
        ConflictKind::Resource,
        ConflictKind::Priority,
    ];
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictKind::Dependency => "dependency",
            ConflictKind::Scheduling => "scheduling",
            ConflictKind::Resource => "resource",
            ConflictKind::Priority => "priority",
        };
        write!(f, "{}", name)
    }
}

/// Identifier of a detected conflict.
///
/// Deterministic for a given graph state: re-running detection on an
/// unmodified snapshot yields the same ids, so a caller can detect, pick an
/// id, and pass it to `Resolve`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConflictId(pub String);

impl ConflictId {
    /// Get the ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A detected inconsistency with its candidate resolutions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Deterministic identifier
    pub id: ConflictId,

    /// Kind of inconsistency
    pub kind: ConflictKind,

    /// Involved tasks, ascending
    pub tasks: Vec<TaskId>,

    /// Involved edges, ascending
    pub edges: Vec<EdgeId>,

    /// Severity in `[0, 1]`; conflicts touching the critical path score
    /// higher
    pub severity: f64,

    /// Human-readable summary
    pub description: String,

    /// Candidate resolutions, in the order the resolver would try them
    pub candidates: Vec<Resolution>,
}

struct Detected {
    kind: ConflictKind,
    rule: &'static str,
    tasks: Vec<TaskId>,
    edges: Vec<EdgeId>,
    base_severity: f64,
    description: String,
    resource: Option<String>,
}

/// Detect conflicts over a snapshot.
///
/// `scope` restricts the result to conflicts touching at least one of the
/// given tasks; an empty scope means the whole project. Output is sorted by
/// severity descending, then configured kind precedence, then id.
///
/// # Errors
///
/// Returns `Error::Cancelled` if `cancel` fires mid-detection.
pub fn detect_conflicts(
    graph: &ProjectGraph,
    scope: &[TaskId],
    config: &EngineConfig,
    cancel: &CancellationToken,
) -> Result<Vec<Conflict>> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let mut detected = Vec::new();
    let at_rest_cycle = graph.find_cycle();

    if let Some(path) = &at_rest_cycle {
        let edges = cycle_edges(graph, path);
        detected.push(Detected {
            kind: ConflictKind::Dependency,
            rule: "cycle",
            tasks: path.clone(),
            edges,
            base_severity: DEPENDENCY_SEVERITY,
            description: format!("Dependency cycle: {}", join_ids(path)),
            resource: None,
        });
    }
    detect_contradictory_prerequisites(graph, &mut detected);

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    detect_scheduling(graph, &mut detected);
    detect_resources(graph, config, &mut detected);

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    detect_priorities(graph, &mut detected);

    // A cyclic snapshot has no meaningful critical path to weight against
    let critical: HashSet<TaskId> = if at_rest_cycle.is_none() {
        let cp = compute_critical_path(graph, &config.critical_path, cancel)?;
        let eps = config.critical_path.epsilon;
        cp.slacks
            .iter()
            .filter(|(_, slack)| slack.abs() <= eps)
            .map(|(id, _)| id.clone())
            .collect()
    } else {
        HashSet::new()
    };

    let scope_set: HashSet<&TaskId> = scope.iter().collect();
    let mut conflicts: Vec<Conflict> = Vec::with_capacity(detected.len());
    for entry in detected {
        if !scope_set.is_empty() && !entry.tasks.iter().any(|t| scope_set.contains(t)) {
            continue;
        }

        let mut severity = entry.base_severity;
        if entry.tasks.iter().any(|t| critical.contains(t)) {
            severity = (severity + CRITICAL_PATH_BUMP).min(1.0);
        }

        let candidates = resolve::candidates_for(
            graph,
            entry.kind,
            &entry.tasks,
            &entry.edges,
            entry.resource.as_deref(),
        );
        conflicts.push(Conflict {
            id: conflict_id(entry.kind, entry.rule, &entry.tasks, &entry.edges),
            kind: entry.kind,
            tasks: entry.tasks,
            edges: entry.edges,
            severity,
            description: entry.description,
            candidates,
        });
    }

    let precedence = |kind: ConflictKind| {
        config
            .resolver
            .kind_precedence
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(usize::MAX)
    };
    conflicts.sort_by(|a, b| {
        b.severity
            .partial_cmp(&a.severity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| precedence(a.kind).cmp(&precedence(b.kind)))
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(conflicts)
}

fn detect_contradictory_prerequisites(graph: &ProjectGraph, detected: &mut Vec<Detected>) {
    let mut prereq: HashMap<(&TaskId, &TaskId), Vec<&EdgeRecord>> = HashMap::new();
    for record in graph.edges() {
        if record.dep_type == DependencyType::Prerequisite {
            prereq
                .entry((&record.from, &record.to))
                .or_default()
                .push(record);
        }
    }

    let mut seen: HashSet<(&TaskId, &TaskId)> = HashSet::new();
    for ((from, to), records) in &prereq {
        let Some(reversed) = prereq.get(&(*to, *from)) else {
            continue;
        };
        let key = if from < to { (*from, *to) } else { (*to, *from) };
        if !seen.insert(key) {
            continue;
        }

        let mut tasks = vec![(*from).clone(), (*to).clone()];
        tasks.sort();
        let mut edges: Vec<EdgeId> = records
            .iter()
            .chain(reversed.iter())
            .map(|r| r.id.clone())
            .collect();
        edges.sort();

        let description = format!(
            "Contradictory prerequisite edges between {} and {}",
            tasks[0], tasks[1]
        );
        detected.push(Detected {
            kind: ConflictKind::Dependency,
            rule: "contradictory",
            tasks,
            edges,
            base_severity: DEPENDENCY_SEVERITY,
            description,
            resource: None,
        });
    }
}

fn detect_scheduling(graph: &ProjectGraph, detected: &mut Vec<Detected>) {
    for record in graph.edge_records_sorted() {
        if !record.dep_type.is_ordering() {
            continue;
        }
        let (Some(from_task), Some(to_task)) =
            (graph.task(&record.from), graph.task(&record.to))
        else {
            continue;
        };
        let (Some(from_window), Some(to_window)) = (from_task.window, to_task.window) else {
            continue;
        };
        if !from_window.overlaps(&to_window) {
            continue;
        }

        let mut tasks = vec![record.from.clone(), record.to.clone()];
        tasks.sort();
        detected.push(Detected {
            kind: ConflictKind::Scheduling,
            rule: "window",
            tasks,
            edges: vec![record.id.clone()],
            base_severity: SCHEDULING_SEVERITY,
            description: format!(
                "Window of {} overlaps the window of its dependency {}",
                record.to, record.from
            ),
            resource: None,
        });
    }
}

fn detect_resources(graph: &ProjectGraph, config: &EngineConfig, detected: &mut Vec<Detected>) {
    let tags: BTreeSet<&str> = graph
        .tasks()
        .flat_map(|t| t.resources.iter().map(String::as_str))
        .collect();

    for tag in tags {
        let capacity =
            graph.resource_capacity(tag, config.resolver.default_resource_capacity) as usize;

        // (time, is_start, id); ends sort before starts so an exclusive end
        // at T never overlaps a start at T
        let mut events = Vec::new();
        for task in graph.tasks() {
            if !task.resources.iter().any(|r| r == tag) {
                continue;
            }
            let Some(window) = task.window else {
                continue;
            };
            events.push((window.start, true, task.id.clone()));
            events.push((window.end, false, task.id.clone()));
        }
        events.sort();

        let mut active: BTreeSet<TaskId> = BTreeSet::new();
        let mut violators: BTreeSet<TaskId> = BTreeSet::new();
        let mut peak = 0usize;
        for (_, is_start, id) in events {
            if is_start {
                active.insert(id);
                peak = peak.max(active.len());
                if active.len() > capacity {
                    violators.extend(active.iter().cloned());
                }
            } else {
                active.remove(&id);
            }
        }

        if violators.is_empty() {
            continue;
        }
        let tasks: Vec<TaskId> = violators.into_iter().collect();
        detected.push(Detected {
            kind: ConflictKind::Resource,
            rule: "capacity",
            description: format!(
                "Resource '{}' oversubscribed: peak demand {} exceeds capacity {}",
                tag, peak, capacity
            ),
            tasks,
            edges: Vec::new(),
            base_severity: RESOURCE_SEVERITY,
            resource: Some(tag.to_string()),
        });
    }
}

fn detect_priorities(graph: &ProjectGraph, detected: &mut Vec<Detected>) {
    for record in graph.edge_records_sorted() {
        if !record.dep_type.is_ordering() {
            continue;
        }
        let (Some(from_task), Some(to_task)) =
            (graph.task(&record.from), graph.task(&record.to))
        else {
            continue;
        };
        // Priority 0 is the most urgent, so a numerically greater value
        // upstream means the blocker matters less than the blocked
        if from_task.priority <= to_task.priority {
            continue;
        }

        let mut tasks = vec![record.from.clone(), record.to.clone()];
        tasks.sort();
        detected.push(Detected {
            kind: ConflictKind::Priority,
            rule: "priority",
            tasks,
            edges: vec![record.id.clone()],
            base_severity: PRIORITY_SEVERITY,
            description: format!(
                "Lower-priority task {} blocks higher-priority task {}",
                record.from, record.to
            ),
            resource: None,
        });
    }
}

fn cycle_edges(graph: &ProjectGraph, path: &[TaskId]) -> Vec<EdgeId> {
    let mut ids = Vec::new();
    for i in 0..path.len() {
        let from = &path[i];
        let to = &path[(i + 1) % path.len()];
        for (record, succ) in graph.ordering_successors(from) {
            if succ == to {
                ids.push(record.id.clone());
            }
        }
    }
    ids.sort();
    ids.dedup();
    ids
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(TaskId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn conflict_id(kind: ConflictKind, rule: &str, tasks: &[TaskId], edges: &[EdgeId]) -> ConflictId {
    let mut hasher = Sha256::new();
    hasher.update(kind.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(rule.as_bytes());
    for task in tasks {
        hasher.update(b"|");
        hasher.update(task.as_str().as_bytes());
    }
    for edge in edges {
        hasher.update(b"|");
        hasher.update(edge.as_str().as_bytes());
    }
    let bytes = hasher.finalize();
    let hash = encode_base36(&bytes[..8], CONFLICT_ID_LENGTH).unwrap_or_default();
    ConflictId(format!("cfl-{}", hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProjectId, Task, TaskStatus, TaskWindow};
    use chrono::{DateTime, TimeZone, Utc};

    fn hour(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, 0, 0).unwrap()
    }

    struct TaskSpec {
        id: &'static str,
        duration: f64,
        priority: u8,
        resources: Vec<String>,
        window: Option<TaskWindow>,
    }

    fn spec(id: &'static str, duration: f64) -> TaskSpec {
        TaskSpec {
            id,
            duration,
            priority: 2,
            resources: Vec::new(),
            window: None,
        }
    }

    fn build(tasks: Vec<TaskSpec>, edges: &[(&str, &str, DependencyType)]) -> ProjectGraph {
        let now = hour(0);
        let mut graph = ProjectGraph::new(ProjectId::new("proj"), "dep");
        for t in tasks {
            graph
                .upsert_task(
                    Task {
                        id: TaskId::new(t.id),
                        project: ProjectId::new("proj"),
                        name: t.id.to_string(),
                        status: TaskStatus::Pending,
                        duration_hours: t.duration,
                        priority: t.priority,
                        resources: t.resources,
                        window: t.window,
                        created_at: now,
                        updated_at: now,
                    },
                    now,
                )
                .unwrap();
        }
        for (from, to, dep_type) in edges {
            graph
                .add_edge(
                    &TaskId::new(*from),
                    &TaskId::new(*to),
                    *dep_type,
                    1.0,
                    false,
                    now,
                )
                .unwrap();
        }
        graph
    }

    fn detect(graph: &ProjectGraph, scope: &[TaskId]) -> Vec<Conflict> {
        detect_conflicts(
            graph,
            scope,
            &EngineConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_overlapping_windows_make_scheduling_conflict() {
        let mut a = spec("a", 2.0);
        a.window = Some(TaskWindow::new(hour(9), hour(12)).unwrap());
        let mut b = spec("b", 2.0);
        b.window = Some(TaskWindow::new(hour(11), hour(14)).unwrap());
        let graph = build(vec![a, b], &[("a", "b", DependencyType::DependsOn)]);

        let conflicts = detect(&graph, &[]);
        assert_eq!(conflicts.len(), 1);
        let conflict = &conflicts[0];
        assert_eq!(conflict.kind, ConflictKind::Scheduling);
        assert_eq!(conflict.tasks, vec![TaskId::new("a"), TaskId::new("b")]);
        // Both tasks are on the critical path, so the base severity is bumped
        assert!((conflict.severity - 0.7).abs() < 1e-9);
        assert!(!conflict.candidates.is_empty());
    }

    #[test]
    fn test_disjoint_windows_do_not_conflict() {
        let mut a = spec("a", 2.0);
        a.window = Some(TaskWindow::new(hour(9), hour(11)).unwrap());
        let mut b = spec("b", 2.0);
        b.window = Some(TaskWindow::new(hour(11), hour(13)).unwrap());
        let graph = build(vec![a, b], &[("a", "b", DependencyType::DependsOn)]);
        assert!(detect(&graph, &[]).is_empty());
    }

    #[test]
    fn test_off_critical_conflict_keeps_base_severity() {
        let mut a = spec("a", 1.0);
        a.window = Some(TaskWindow::new(hour(9), hour(12)).unwrap());
        let mut b = spec("b", 1.0);
        b.window = Some(TaskWindow::new(hour(10), hour(13)).unwrap());
        let graph = build(
            vec![a, b, spec("z", 100.0)],
            &[("a", "b", DependencyType::DependsOn)],
        );

        let conflicts = detect(&graph, &[]);
        assert_eq!(conflicts.len(), 1);
        assert!((conflicts[0].severity - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_resource_oversubscription() {
        let mut a = spec("a", 2.0);
        a.resources = vec!["crane".to_string()];
        a.window = Some(TaskWindow::new(hour(9), hour(12)).unwrap());
        let mut b = spec("b", 2.0);
        b.resources = vec!["crane".to_string()];
        b.window = Some(TaskWindow::new(hour(10), hour(13)).unwrap());
        let mut graph = build(vec![a, b], &[]);

        let conflicts = detect(&graph, &[]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::Resource);
        assert_eq!(
            conflicts[0].tasks,
            vec![TaskId::new("a"), TaskId::new("b")]
        );

        // Capacity 2 absorbs the concurrent demand
        graph.set_resource_capacity("crane", 2);
        assert!(detect(&graph, &[]).is_empty());
    }

    #[test]
    fn test_priority_inversion_detected() {
        let mut blocker = spec("a", 1.0);
        blocker.priority = 3;
        let mut blocked = spec("b", 1.0);
        blocked.priority = 1;
        let graph = build(
            vec![blocker, blocked],
            &[("a", "b", DependencyType::Blocks)],
        );

        let conflicts = detect(&graph, &[]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::Priority);
    }

    #[test]
    fn test_equal_priorities_do_not_conflict() {
        let graph = build(
            vec![spec("a", 1.0), spec("b", 1.0)],
            &[("a", "b", DependencyType::Blocks)],
        );
        assert!(detect(&graph, &[]).is_empty());
    }

    #[test]
    fn test_forced_demotion_leaves_no_dependency_conflict() {
        let now = hour(0);
        let mut graph = build(
            vec![spec("a", 1.0), spec("b", 1.0)],
            &[("a", "b", DependencyType::Prerequisite)],
        );
        graph
            .add_edge(
                &TaskId::new("b"),
                &TaskId::new("a"),
                DependencyType::Prerequisite,
                1.0,
                true,
                now,
            )
            .unwrap();

        let dependency_conflicts: Vec<_> = detect(&graph, &[])
            .into_iter()
            .filter(|c| c.kind == ConflictKind::Dependency)
            .collect();
        assert!(dependency_conflicts.is_empty());
    }

    #[test]
    fn test_contradictory_prerequisites_on_corrupted_graph() {
        // merge_tasks does not re-check acyclicity, so folding x into b
        // leaves prerequisite edges in both directions between a and b
        let now = hour(0);
        let mut graph = build(
            vec![spec("a", 1.0), spec("b", 1.0), spec("x", 1.0)],
            &[
                ("a", "x", DependencyType::Prerequisite),
                ("b", "a", DependencyType::Prerequisite),
            ],
        );
        graph
            .merge_tasks(&TaskId::new("b"), &TaskId::new("x"), now)
            .unwrap();
        assert!(graph.validate().is_err());

        let conflicts = detect(&graph, &[]);
        let rules: Vec<ConflictKind> = conflicts.iter().map(|c| c.kind).collect();
        assert_eq!(rules, vec![ConflictKind::Dependency, ConflictKind::Dependency]);
        assert!(conflicts
            .iter()
            .any(|c| c.description.starts_with("Dependency cycle")));
        assert!(conflicts
            .iter()
            .any(|c| c.description.starts_with("Contradictory prerequisite")));
    }

    #[test]
    fn test_scope_filters_unrelated_conflicts() {
        let mut a = spec("a", 1.0);
        a.priority = 3;
        let mut b = spec("b", 1.0);
        b.priority = 1;
        let mut c = spec("c", 1.0);
        c.priority = 3;
        let mut d = spec("d", 1.0);
        d.priority = 1;
        let graph = build(
            vec![a, b, c, d],
            &[
                ("a", "b", DependencyType::Blocks),
                ("c", "d", DependencyType::Blocks),
            ],
        );

        let all = detect(&graph, &[]);
        assert_eq!(all.len(), 2);

        let scoped = detect(&graph, &[TaskId::new("c")]);
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].tasks, vec![TaskId::new("c"), TaskId::new("d")]);
    }

    #[test]
    fn test_detection_is_idempotent() {
        let mut a = spec("a", 2.0);
        a.window = Some(TaskWindow::new(hour(9), hour(12)).unwrap());
        let mut b = spec("b", 2.0);
        b.window = Some(TaskWindow::new(hour(11), hour(14)).unwrap());
        let graph = build(vec![a, b], &[("a", "b", DependencyType::DependsOn)]);

        assert_eq!(detect(&graph, &[]), detect(&graph, &[]));
    }

    #[test]
    fn test_cancelled_token_aborts_detection() {
        let graph = build(vec![spec("a", 1.0)], &[]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = detect_conflicts(&graph, &[], &EngineConfig::default(), &cancel);
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
