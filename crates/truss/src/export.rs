//! Serializable graph exports for external visualization layers.
//!
//! The engine defines the schema (including a machine-readable JSON Schema
//! via `schemars`) but not the rendering. Nodes carry derived slack and
//! critical-path flags when the graph was acyclic at export time.

use crate::analysis::critical_path::CriticalPath;
use crate::domain::{Task, TaskStatus};
use crate::graph::ProjectGraph;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A node-and-edge list describing one project graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GraphExport {
    /// The exported project
    pub project: String,

    /// Export timestamp (ISO 8601)
    pub generated_at: String,

    /// Duration of the longest chain, absent when the graph held a cycle
    pub total_duration: Option<f64>,

    /// Tasks, in ascending id order
    pub nodes: Vec<ExportNode>,

    /// Dependency edges, in ascending id order
    pub edges: Vec<ExportEdge>,
}

/// A task node in an export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExportNode {
    /// Task identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Current status
    pub status: String,

    /// Estimated duration in hours
    pub duration_hours: f64,

    /// Priority level (0 = highest, 4 = lowest)
    pub priority: u8,

    /// Required resource tags
    pub resources: Vec<String>,

    /// Slack in hours, absent when no critical path could be computed
    pub slack: Option<f64>,

    /// `true` when the task lies on a critical path
    pub critical: bool,
}

/// A dependency edge in an export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExportEdge {
    /// Edge identifier
    pub id: String,

    /// Upstream task id
    pub from: String,

    /// Downstream task id
    pub to: String,

    /// Relationship type
    pub dep_type: String,

    /// Soft weight in `[0, 1]`
    pub strength: f64,
}

impl GraphExport {
    /// Assemble an export from a graph and an optional critical-path result
    /// computed over the same graph.
    #[must_use]
    pub(crate) fn build(
        graph: &ProjectGraph,
        critical_path: Option<&CriticalPath>,
        epsilon: f64,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let mut nodes: Vec<ExportNode> = graph
            .tasks()
            .map(|task| export_node(task, critical_path, epsilon))
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let edges: Vec<ExportEdge> = graph
            .edge_records_sorted()
            .into_iter()
            .map(|record| ExportEdge {
                id: record.id.as_str().to_string(),
                from: record.from.as_str().to_string(),
                to: record.to.as_str().to_string(),
                dep_type: record.dep_type.to_string(),
                strength: record.strength,
            })
            .collect();

        Self {
            project: graph.project_id().as_str().to_string(),
            generated_at: generated_at.to_rfc3339(),
            total_duration: critical_path.map(|cp| cp.total_duration),
            nodes,
            edges,
        }
    }
}

fn export_node(task: &Task, critical_path: Option<&CriticalPath>, epsilon: f64) -> ExportNode {
    let slack = critical_path.and_then(|cp| cp.slacks.get(&task.id).copied());
    ExportNode {
        id: task.id.as_str().to_string(),
        name: task.name.clone(),
        status: status_label(task.status).to_string(),
        duration_hours: task.duration_hours,
        priority: task.priority,
        resources: task.resources.clone(),
        critical: slack.is_some_and(|s| s.abs() <= epsilon),
        slack,
    }
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Completed => "completed",
        TaskStatus::Cancelled => "cancelled",
        TaskStatus::OnHold => "on_hold",
    }
}
