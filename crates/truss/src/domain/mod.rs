//! Domain types for the task-dependency graph engine.
//!
//! Tasks are created and owned externally; the engine only requires a stable
//! identifier and the scheduling attributes below. Edges are owned by the
//! engine and addressed by generated [`EdgeId`]s.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest priority value (most urgent).
pub const PRIORITY_HIGHEST: u8 = 0;

/// Lowest priority value (least urgent).
pub const PRIORITY_LOWEST: u8 = 4;

/// Unique identifier for a task within a project
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a new task ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a project
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub String);

impl ProjectId {
    /// Create a new project ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a dependency edge
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub String);

impl EdgeId {
    /// Create a new edge ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EdgeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EdgeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task has not been started
    Pending,

    /// Task is currently being worked on
    InProgress,

    /// Task has been completed
    Completed,

    /// Task has been cancelled
    Cancelled,

    /// Task is paused pending an external decision
    OnHold,
}

/// Type of dependency relationship between two tasks.
///
/// The ordering-relevant types (`DependsOn`, `Blocks`, `Prerequisite`)
/// participate in cycle detection and critical-path computation.
/// `RelatedTo` is an informational link and is excluded from both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// The downstream task needs the upstream task's output
    DependsOn,

    /// The upstream task must finish before the downstream task may start
    Blocks,

    /// Soft link - informational only
    RelatedTo,

    /// Hard precondition - strongest ordering relation
    Prerequisite,
}

impl DependencyType {
    /// Returns `true` if this type participates in cycle and
    /// critical-path computation.
    #[must_use]
    pub fn is_ordering(&self) -> bool {
        !matches!(self, DependencyType::RelatedTo)
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DependencyType::DependsOn => "depends_on",
            DependencyType::Blocks => "blocks",
            DependencyType::RelatedTo => "related_to",
            DependencyType::Prerequisite => "prerequisite",
        };
        write!(f, "{}", name)
    }
}

/// Scheduled execution window for a task
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskWindow {
    /// Scheduled start
    pub start: DateTime<Utc>,

    /// Scheduled end (exclusive)
    pub end: DateTime<Utc>,
}

impl TaskWindow {
    /// Create a window, validating that the start precedes the end.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidWindow` if `start >= end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(Error::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Returns `true` if the two windows share any instant.
    #[must_use]
    pub fn overlaps(&self, other: &TaskWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Window length in hours
    #[must_use]
    pub fn length_hours(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 3600.0
    }

    /// The same window moved so it starts at `new_start`
    #[must_use]
    pub fn shifted_to(&self, new_start: DateTime<Utc>) -> TaskWindow {
        TaskWindow {
            start: new_start,
            end: new_start + (self.end - self.start),
        }
    }
}

/// A task node in the dependency graph.
///
/// Tasks are created by an external task-management system and admitted
/// into the engine via `upsert_task` or a `TaskSource` lookup. The engine
/// mutates only `status`, `duration_hours`, `priority`, `resources`, and
/// `window`; it never deletes a task that is still referenced by an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier within the project
    pub id: TaskId,

    /// Project this task belongs to
    pub project: ProjectId,

    /// Human-readable name
    pub name: String,

    /// Current status
    pub status: TaskStatus,

    /// Estimated duration in hours
    pub duration_hours: f64,

    /// Priority level (0 = highest, 4 = lowest)
    pub priority: u8,

    /// Required resource tags
    pub resources: Vec<String>,

    /// Scheduled execution window (optional)
    pub window: Option<TaskWindow>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Validate the task's scheduling attributes.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidPriority` if priority is not in range 0-4
    /// - `Error::InvalidDuration` if the duration is negative or not finite
    /// - `Error::InvalidWindow` if a window's start does not precede its end
    pub fn validate(&self) -> Result<()> {
        if self.priority > PRIORITY_LOWEST {
            return Err(Error::InvalidPriority(self.priority));
        }
        if !self.duration_hours.is_finite() || self.duration_hours < 0.0 {
            return Err(Error::InvalidDuration(self.duration_hours));
        }
        if let Some(window) = &self.window {
            TaskWindow::new(window.start, window.end)?;
        }
        Ok(())
    }
}

/// Data for updating an existing task
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    /// New name (if updating)
    pub name: Option<String>,

    /// New status (if updating)
    pub status: Option<TaskStatus>,

    /// New duration in hours (if updating)
    pub duration_hours: Option<f64>,

    /// New priority (if updating)
    pub priority: Option<u8>,

    /// New resource tags (if updating)
    pub resources: Option<Vec<String>>,

    /// New window (if updating, `Some(None)` to clear)
    pub window: Option<Option<TaskWindow>>,
}

/// A dependency edge between two tasks.
///
/// Direction: `from` is the upstream task, `to` the downstream one. For
/// ordering-relevant types, `to` cannot start until `from` finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Unique identifier for this edge
    pub id: EdgeId,

    /// Upstream task
    pub from: TaskId,

    /// Downstream task
    pub to: TaskId,

    /// Type of the relationship
    pub dep_type: DependencyType,

    /// Soft weight in `[0, 1]`, used only by conflict scoring
    pub strength: f64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Result of a successful `AddDependency` call
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyAdded {
    /// The edge as committed (its type may differ from the requested one
    /// when the forced edge itself was demoted)
    pub edge: EdgeRecord,

    /// Demotions performed when `force=true` broke one or more cycles.
    /// Empty for a normal, non-forcing add.
    pub auto_broken: Vec<CycleAutoBroken>,
}

/// Side effect of a forced `AddDependency` that closed a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleAutoBroken {
    /// The edge demoted to `related_to`
    pub demoted: EdgeId,

    /// The cycle the candidate edge would have closed
    pub cycle_path: Vec<TaskId>,
}

/// One dependency of a task, as returned by `GetDependencies`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyLink {
    /// The dependency edge
    pub edge: EdgeRecord,

    /// Hops between the task and this edge's upstream end (1 = direct)
    pub depth: usize,
}

impl DependencyLink {
    /// Returns `true` if the edge arrives directly at the queried task
    #[must_use]
    pub fn is_direct(&self) -> bool {
        self.depth == 1
    }
}

/// Validate an edge strength value.
///
/// # Errors
///
/// Returns `Error::InvalidStrength` unless `strength` is finite and in `[0, 1]`.
pub fn validate_strength(strength: f64) -> Result<()> {
    if !strength.is_finite() || !(0.0..=1.0).contains(&strength) {
        return Err(Error::InvalidStrength(strength));
    }
    Ok(())
}
