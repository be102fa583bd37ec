//! Critical path computation over the ordering-relevant subgraph.
//!
//! Implements the Critical Path Method: a deterministic topological sort
//! (Kahn's algorithm with a min-heap keyed on task id), a forward pass for
//! earliest starts, a backward pass for latest finishes, and slack derived
//! from the two. Runs against an immutable snapshot and never mutates.

use crate::config::{CriticalPathConfig, TieBreak};
use crate::domain::TaskId;
use crate::error::{Error, Result};
use crate::graph::ProjectGraph;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Result of a critical path computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalPath {
    /// One maximal chain of zero-slack tasks from a source to a sink,
    /// tie-broken per [`TieBreak`]
    pub path: Vec<TaskId>,

    /// Slack per task: `latest_finish - duration - earliest_start`
    pub slacks: HashMap<TaskId, f64>,

    /// Earliest start per task, from the forward pass
    pub earliest_starts: HashMap<TaskId, f64>,

    /// Duration of the longest chain through the graph
    pub total_duration: f64,
}

/// Compute the critical path of `graph`.
///
/// # Errors
///
/// - `Error::Cancelled` if `cancel` fires mid-computation
/// - `Error::Internal` if the ordering subgraph holds a cycle, which a
///   well-formed snapshot never does
pub fn compute_critical_path(
    graph: &ProjectGraph,
    config: &CriticalPathConfig,
    cancel: &CancellationToken,
) -> Result<CriticalPath> {
    compute_with_override(graph, config, cancel, None)
}

/// Same as [`compute_critical_path`], with one task's duration replaced by
/// a hypothetical value. Used to evaluate delay scenarios without touching
/// the snapshot.
pub(crate) fn compute_with_override(
    graph: &ProjectGraph,
    config: &CriticalPathConfig,
    cancel: &CancellationToken,
    duration_override: Option<(&TaskId, f64)>,
) -> Result<CriticalPath> {
    let order = topo_order(graph, cancel)?;

    let duration = |id: &TaskId| -> f64 {
        if let Some((overridden, hours)) = duration_override {
            if overridden == id {
                return hours;
            }
        }
        graph.task(id).map_or(0.0, |t| t.duration_hours)
    };

    // Forward pass: earliest_start(t) = max over predecessors p of
    // (earliest_start(p) + duration(p)), 0 for sources.
    let mut earliest: HashMap<TaskId, f64> =
        order.iter().map(|id| (id.clone(), 0.0)).collect();
    for id in &order {
        let finish = earliest.get(id).copied().unwrap_or(0.0) + duration(id);
        for (_, succ) in graph.ordering_successors(id) {
            if let Some(start) = earliest.get_mut(succ) {
                if finish > *start {
                    *start = finish;
                }
            }
        }
    }

    let total_duration = order
        .iter()
        .map(|id| earliest.get(id).copied().unwrap_or(0.0) + duration(id))
        .fold(0.0, f64::max);

    // Backward pass: latest_finish(t) = min over successors s of
    // (latest_finish(s) - duration(s)), total for sinks.
    let mut latest_finish: HashMap<TaskId, f64> = order
        .iter()
        .map(|id| (id.clone(), total_duration))
        .collect();
    for id in order.iter().rev() {
        let mut finish = total_duration;
        for (_, succ) in graph.ordering_successors(id) {
            let candidate = latest_finish.get(succ).copied().unwrap_or(total_duration)
                - duration(succ);
            if candidate < finish {
                finish = candidate;
            }
        }
        latest_finish.insert(id.clone(), finish);
    }

    let mut slacks = HashMap::with_capacity(order.len());
    for id in &order {
        let lf = latest_finish.get(id).copied().unwrap_or(total_duration);
        let es = earliest.get(id).copied().unwrap_or(0.0);
        slacks.insert(id.clone(), lf - duration(id) - es);
    }

    let path = trace_path(graph, config, &earliest, &slacks, &duration);

    Ok(CriticalPath {
        path,
        slacks,
        earliest_starts: earliest,
        total_duration,
    })
}

/// Deterministic Kahn's algorithm: ready tasks are drained in ascending id
/// order. Checks for cancellation at every dequeue.
fn topo_order(graph: &ProjectGraph, cancel: &CancellationToken) -> Result<Vec<TaskId>> {
    let mut in_degree: HashMap<TaskId, usize> =
        graph.tasks().map(|t| (t.id.clone(), 0)).collect();
    for task in graph.tasks() {
        for (_, succ) in graph.ordering_successors(&task.id) {
            if let Some(degree) = in_degree.get_mut(succ) {
                *degree += 1;
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<TaskId>> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| Reverse(id.clone()))
        .collect();
    let mut order = Vec::with_capacity(in_degree.len());

    while let Some(Reverse(id)) = ready.pop() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        for (_, succ) in graph.ordering_successors(&id) {
            if let Some(degree) = in_degree.get_mut(succ) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(succ.clone()));
                }
            }
        }
        order.push(id);
    }

    if order.len() != in_degree.len() {
        error!(
            processed = order.len(),
            total = in_degree.len(),
            "Topological sort stalled; ordering subgraph contains a cycle"
        );
        return Err(Error::Internal(
            "ordering subgraph is not acyclic".to_string(),
        ));
    }
    Ok(order)
}

/// Walk one zero-slack chain from a source to a sink. Each step continues
/// to a zero-slack successor whose earliest start matches the current
/// task's finish, so the chain never jumps between unrelated critical
/// paths.
fn trace_path<F>(
    graph: &ProjectGraph,
    config: &CriticalPathConfig,
    earliest: &HashMap<TaskId, f64>,
    slacks: &HashMap<TaskId, f64>,
    duration: &F,
) -> Vec<TaskId>
where
    F: Fn(&TaskId) -> f64,
{
    let eps = config.epsilon;
    let zero_slack = |id: &TaskId| slacks.get(id).is_some_and(|s| s.abs() <= eps);

    let start_candidates: Vec<TaskId> = graph
        .ordering_sources()
        .into_iter()
        .filter(|id| zero_slack(id))
        .collect();
    let mut current = match config.tie_break {
        TieBreak::LowestTaskId => start_candidates.first().cloned(),
        TieBreak::HighestTaskId => start_candidates.last().cloned(),
    };

    let mut path = Vec::new();
    while let Some(id) = current {
        let finish = earliest.get(&id).copied().unwrap_or(0.0) + duration(&id);
        let mut next: Vec<TaskId> = graph
            .ordering_successors(&id)
            .into_iter()
            .map(|(_, succ)| succ.clone())
            .filter(|succ| {
                zero_slack(succ)
                    && (earliest.get(succ).copied().unwrap_or(f64::MAX) - finish).abs() <= eps
            })
            .collect();
        next.sort();
        next.dedup();

        path.push(id);
        current = match config.tie_break {
            TieBreak::LowestTaskId => next.first().cloned(),
            TieBreak::HighestTaskId => next.last().cloned(),
        };
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DependencyType, ProjectId, Task, TaskStatus};
    use chrono::{TimeZone, Utc};

    fn build(tasks: &[(&str, f64)], edges: &[(&str, &str)]) -> ProjectGraph {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut graph = ProjectGraph::new(ProjectId::new("proj"), "dep");
        for (id, hours) in tasks {
            graph
                .upsert_task(
                    Task {
                        id: TaskId::new(*id),
                        project: ProjectId::new("proj"),
                        name: (*id).to_string(),
                        status: TaskStatus::Pending,
                        duration_hours: *hours,
                        priority: 2,
                        resources: Vec::new(),
                        window: None,
                        created_at: now,
                        updated_at: now,
                    },
                    now,
                )
                .unwrap();
        }
        for (from, to) in edges {
            graph
                .add_edge(
                    &TaskId::new(*from),
                    &TaskId::new(*to),
                    DependencyType::DependsOn,
                    1.0,
                    false,
                    now,
                )
                .unwrap();
        }
        graph
    }

    fn ids(path: &[TaskId]) -> Vec<&str> {
        path.iter().map(TaskId::as_str).collect()
    }

    #[test]
    fn test_diamond_critical_path_and_slacks() {
        let graph = build(
            &[("a", 3.0), ("b", 5.0), ("c", 1.0), ("d", 2.0)],
            &[("a", "b"), ("b", "d"), ("a", "c"), ("c", "d")],
        );
        let result = compute_critical_path(
            &graph,
            &CriticalPathConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(ids(&result.path), vec!["a", "b", "d"]);
        assert!((result.total_duration - 10.0).abs() < 1e-9);
        assert!((result.slacks[&TaskId::new("c")] - 4.0).abs() < 1e-9);
        for id in ["a", "b", "d"] {
            assert!(result.slacks[&TaskId::new(id)].abs() < 1e-9);
        }
    }

    #[test]
    fn test_tie_break_rules() {
        let graph = build(&[("a", 1.0), ("b", 2.0), ("c", 2.0)], &[("a", "b"), ("a", "c")]);

        let low = compute_critical_path(
            &graph,
            &CriticalPathConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(ids(&low.path), vec!["a", "b"]);

        let config = CriticalPathConfig {
            tie_break: TieBreak::HighestTaskId,
            ..CriticalPathConfig::default()
        };
        let high = compute_critical_path(&graph, &config, &CancellationToken::new()).unwrap();
        assert_eq!(ids(&high.path), vec!["a", "c"]);
    }

    #[test]
    fn test_empty_graph() {
        let graph = build(&[], &[]);
        let result = compute_critical_path(
            &graph,
            &CriticalPathConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        assert!(result.path.is_empty());
        assert!(result.total_duration.abs() < 1e-9);
    }

    #[test]
    fn test_single_task() {
        let graph = build(&[("a", 4.5)], &[]);
        let result = compute_critical_path(
            &graph,
            &CriticalPathConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(ids(&result.path), vec!["a"]);
        assert!((result.total_duration - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_informational_edges_do_not_extend_the_path() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut graph = build(&[("a", 2.0), ("b", 3.0)], &[]);
        graph
            .add_edge(
                &TaskId::new("a"),
                &TaskId::new("b"),
                DependencyType::RelatedTo,
                1.0,
                false,
                now,
            )
            .unwrap();

        let result = compute_critical_path(
            &graph,
            &CriticalPathConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        // The two tasks run independently
        assert!((result.total_duration - 3.0).abs() < 1e-9);
        assert_eq!(ids(&result.path), vec!["b"]);
    }

    #[test]
    fn test_cancellation_aborts_computation() {
        let graph = build(&[("a", 1.0), ("b", 1.0)], &[("a", "b")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = compute_critical_path(&graph, &CriticalPathConfig::default(), &cancel);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_duration_override_shifts_downstream_starts() {
        let graph = build(&[("a", 3.0), ("b", 5.0)], &[("a", "b")]);
        let base = compute_critical_path(
            &graph,
            &CriticalPathConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        let delayed = compute_with_override(
            &graph,
            &CriticalPathConfig::default(),
            &CancellationToken::new(),
            Some((&TaskId::new("a"), 5.0)),
        )
        .unwrap();

        assert!((base.earliest_starts[&TaskId::new("b")] - 3.0).abs() < 1e-9);
        assert!((delayed.earliest_starts[&TaskId::new("b")] - 5.0).abs() < 1e-9);
        assert!((delayed.total_duration - 10.0).abs() < 1e-9);
    }
}
