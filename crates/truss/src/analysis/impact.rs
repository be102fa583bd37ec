//! Impact propagation through the dependency graph.
//!
//! Given a task and a hypothetical change (completion, delay, cancellation),
//! the analyzer walks the ordering-relevant out-edges breadth-first and
//! scores every downstream task it reaches. Each hop multiplies the score by
//! the configured decay factor times the edge strength; propagation stops at
//! the score threshold or the depth cap. The first visit of a task wins, so
//! every affected task carries the shortest relation chain from the origin.

use super::critical_path::{compute_critical_path, compute_with_override};
use crate::config::EngineConfig;
use crate::domain::{DependencyType, TaskId};
use crate::error::{Error, Result};
use crate::graph::ProjectGraph;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use tokio_util::sync::CancellationToken;

/// The hypothetical or real change being propagated
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum ChangeType {
    /// The task finishes as planned
    Complete,

    /// The task takes additional hours beyond its estimate
    Delay {
        /// Additional duration in hours
        hours: f64,
    },

    /// The task is cancelled outright
    Cancel,
}

/// The chain of relations from the origin task to an affected one.
///
/// `tasks` starts at the origin and ends at the affected task;
/// `edge_types[i]` is the type of the edge between `tasks[i]` and
/// `tasks[i + 1]`, so `edge_types.len() == tasks.len() - 1` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationChain {
    /// Task ids from the origin to the affected task, inclusive
    pub tasks: Vec<TaskId>,

    /// Edge types traversed, one per hop
    pub edge_types: Vec<DependencyType>,
}

impl RelationChain {
    /// Build a chain, checking the length invariant.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` when the lengths do not line up.
    pub fn new(tasks: Vec<TaskId>, edge_types: Vec<DependencyType>) -> Result<Self> {
        if tasks.is_empty() || edge_types.len() != tasks.len() - 1 {
            return Err(Error::Internal(format!(
                "relation chain of {} tasks cannot have {} edges",
                tasks.len(),
                edge_types.len()
            )));
        }
        Ok(Self { tasks, edge_types })
    }

    /// Number of hops from the origin
    #[must_use]
    pub fn hops(&self) -> usize {
        self.edge_types.len()
    }
}

/// One downstream task touched by the change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectedTask {
    /// The affected task
    pub task: TaskId,

    /// Decayed impact score along the shortest chain
    pub score: f64,

    /// Hops from the origin
    pub depth: usize,

    /// The shortest relation chain that produced the score
    pub chain: RelationChain,

    /// Set for `cancel` when every upstream path of this task runs through
    /// the cancelled origin, leaving it with no remaining support
    pub orphaned: bool,

    /// New earliest start in hours after a `delay`, from re-running the
    /// forward pass with the delayed duration
    pub new_earliest_start: Option<f64>,

    /// Change in slack caused by a `delay` (negative means slack was eaten)
    pub slack_delta: Option<f64>,
}

/// Result of an impact analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactReport {
    /// The task the change originates from
    pub origin: TaskId,

    /// The change that was propagated
    pub change: ChangeType,

    /// Affected downstream tasks, strongest impact first
    pub affected: Vec<AffectedTask>,
}

/// Propagate `change` from `origin` through the ordering-relevant subgraph.
///
/// # Errors
///
/// - `Error::TaskNotFound` if the origin is not in the graph
/// - `Error::InvalidDuration` if a delay is negative or not finite
/// - `Error::Cancelled` if `cancel` fires mid-propagation
/// - `Error::Internal` if a delay recomputation finds the snapshot cyclic
pub fn analyze_impact(
    graph: &ProjectGraph,
    origin: &TaskId,
    change: ChangeType,
    config: &EngineConfig,
    cancel: &CancellationToken,
) -> Result<ImpactReport> {
    let origin_task = graph
        .task(origin)
        .ok_or_else(|| Error::TaskNotFound(origin.clone()))?;
    if let ChangeType::Delay { hours } = change {
        if !hours.is_finite() || hours < 0.0 {
            return Err(Error::InvalidDuration(hours));
        }
    }

    let mut affected = propagate(graph, origin, config, cancel)?;

    match change {
        ChangeType::Complete => {}
        ChangeType::Delay { hours } => {
            let base = compute_critical_path(graph, &config.critical_path, cancel)?;
            let delayed = compute_with_override(
                graph,
                &config.critical_path,
                cancel,
                Some((origin, origin_task.duration_hours + hours)),
            )?;
            for entry in &mut affected {
                entry.new_earliest_start = delayed.earliest_starts.get(&entry.task).copied();
                let before = base.slacks.get(&entry.task).copied().unwrap_or(0.0);
                let after = delayed.slacks.get(&entry.task).copied().unwrap_or(0.0);
                entry.slack_delta = Some(after - before);
            }
        }
        ChangeType::Cancel => {
            let roots: Vec<TaskId> = graph
                .ordering_sources()
                .into_iter()
                .filter(|id| id != origin)
                .collect();
            let supported = graph.reachable_downstream_excluding(&roots, origin);
            for entry in &mut affected {
                entry.orphaned = !supported.contains(&entry.task);
            }
        }
    }

    affected.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.task.cmp(&b.task))
    });
    Ok(ImpactReport {
        origin: origin.clone(),
        change,
        affected,
    })
}

struct Visit {
    task: TaskId,
    score: f64,
    depth: usize,
    chain_tasks: Vec<TaskId>,
    chain_types: Vec<DependencyType>,
}

/// Breadth-first scoring walk. Per successor, the strongest ordering edge
/// carries the score; weaker parallel edges between the same pair do not
/// count twice.
fn propagate(
    graph: &ProjectGraph,
    origin: &TaskId,
    config: &EngineConfig,
    cancel: &CancellationToken,
) -> Result<Vec<AffectedTask>> {
    let decay = config.impact.decay_factor;
    let threshold = config.impact.score_threshold;
    let max_depth = config.impact.max_depth;

    let mut visited: HashMap<TaskId, f64> = HashMap::from([(origin.clone(), 1.0)]);
    let mut affected = Vec::new();
    let mut queue = VecDeque::from([Visit {
        task: origin.clone(),
        score: 1.0,
        depth: 0,
        chain_tasks: vec![origin.clone()],
        chain_types: Vec::new(),
    }]);

    while let Some(visit) = queue.pop_front() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if visit.depth >= max_depth {
            continue;
        }

        // ordering_successors is sorted by successor then edge id; keep the
        // strongest edge per successor
        let mut strongest: Vec<(&TaskId, DependencyType, f64)> = Vec::new();
        for (record, succ) in graph.ordering_successors(&visit.task) {
            match strongest.last_mut() {
                Some((prev, dep_type, strength)) if *prev == succ => {
                    if record.strength > *strength {
                        *dep_type = record.dep_type;
                        *strength = record.strength;
                    }
                }
                _ => strongest.push((succ, record.dep_type, record.strength)),
            }
        }

        for (succ, dep_type, strength) in strongest {
            if visited.contains_key(succ) {
                continue;
            }
            let score = visit.score * decay * strength;
            if score < threshold {
                continue;
            }
            visited.insert(succ.clone(), score);

            let mut chain_tasks = visit.chain_tasks.clone();
            chain_tasks.push(succ.clone());
            let mut chain_types = visit.chain_types.clone();
            chain_types.push(dep_type);

            affected.push(AffectedTask {
                task: succ.clone(),
                score,
                depth: visit.depth + 1,
                chain: RelationChain::new(chain_tasks.clone(), chain_types.clone())?,
                orphaned: false,
                new_earliest_start: None,
                slack_delta: None,
            });
            queue.push_back(Visit {
                task: succ.clone(),
                score,
                depth: visit.depth + 1,
                chain_tasks,
                chain_types,
            });
        }
    }
    Ok(affected)
}
