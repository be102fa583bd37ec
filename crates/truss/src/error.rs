//! Error types for engine operations.
//!
//! The taxonomy separates caller-fixable rejections (validation and
//! structural errors) from engine-internal failures. `NoSafeResolution` is
//! deliberately absent: an unresolved conflict is a normal outcome of
//! `AutoResolve`, not an error (see `analysis::resolve`).

use crate::domain::{DependencyType, EdgeId, ProjectId, TaskId};
use chrono::{DateTime, Utc};
use std::io;
use thiserror::Error;

/// A specialized Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A dependency from a task to itself was requested.
    #[error("Self-loop rejected: {task_id} cannot depend on itself")]
    SelfLoop {
        /// The task on both ends of the requested edge
        task_id: TaskId,
    },

    /// An ordering-relevant edge of this type already exists between the pair.
    #[error("Duplicate edge: {from} -> {to} ({dep_type}) already exists")]
    DuplicateEdge {
        /// Upstream task
        from: TaskId,
        /// Downstream task
        to: TaskId,
        /// The duplicated relationship type
        dep_type: DependencyType,
    },

    /// The mutation would close a cycle among ordering-relevant edges.
    #[error("Cycle detected: {}", format_cycle(.path))]
    CycleDetected {
        /// The tasks on the cycle, in traversal order
        path: Vec<TaskId>,
    },

    /// Task not found in the project graph or the task source.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// Project has no graph in this engine instance.
    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    /// Edge not found.
    #[error("Dependency edge not found: {0}")]
    EdgeNotFound(EdgeId),

    /// Conflict id does not match any currently detected conflict.
    #[error("Conflict not found: {0}")]
    ConflictNotFound(String),

    /// Task is still referenced by dependency edges and cannot be removed.
    #[error("Task {task_id} has {edge_count} attached edge(s); remove them first")]
    TaskHasEdges {
        /// The task that was to be removed
        task_id: TaskId,
        /// Number of edges still referencing it
        edge_count: usize,
    },

    /// Edge strength outside `[0, 1]`.
    #[error("Invalid strength: {0} (expected a value in [0, 1])")]
    InvalidStrength(f64),

    /// Priority outside the 0-4 range.
    #[error("Invalid priority: {0} (expected 0-4)")]
    InvalidPriority(u8),

    /// Duration is negative or not finite.
    #[error("Invalid duration: {0} (expected a finite, non-negative number of hours)")]
    InvalidDuration(f64),

    /// Window start does not precede its end.
    #[error("Invalid window: start {start} must precede end {end}")]
    InvalidWindow {
        /// Requested window start
        start: DateTime<Utc>,
        /// Requested window end
        end: DateTime<Utc>,
    },

    /// Task belongs to a different project than the one addressed.
    #[error("Task {task_id} belongs to project {found}, not {expected}")]
    ProjectMismatch {
        /// The task being admitted
        task_id: TaskId,
        /// The project the operation addressed
        expected: ProjectId,
        /// The project recorded on the task
        found: ProjectId,
    },

    /// Operation cancelled via the caller-supplied cancellation signal.
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal invariant violation; indicates a bug, not a caller error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Task source error.
    #[error("Task source error: {0}")]
    Source(String),

    /// IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Categorization of engine errors.
///
/// Follows a 4xx/5xx-style split: caller errors are requests the caller
/// can fix; internal errors indicate a bug in the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Request rejected by field or invariant validation
    Validation,

    /// Request rejected because it would corrupt the graph structure
    Structural,

    /// Referenced entity does not exist
    NotFound,

    /// Caller-initiated cancellation
    Cancelled,

    /// Engine-side failure
    Internal,
}

impl ErrorCategory {
    /// Returns `true` if the caller can fix the request and retry.
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::Validation | Self::Structural | Self::NotFound
        )
    }

    /// Returns `true` if this indicates a bug in the engine.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal)
    }
}

impl Error {
    /// Categorize this error for logging and surface mapping.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::SelfLoop { .. }
            | Error::DuplicateEdge { .. }
            | Error::InvalidStrength(_)
            | Error::InvalidPriority(_)
            | Error::InvalidDuration(_)
            | Error::InvalidWindow { .. }
            | Error::ProjectMismatch { .. }
            | Error::Config(_) => ErrorCategory::Validation,
            Error::CycleDetected { .. } | Error::TaskHasEdges { .. } => ErrorCategory::Structural,
            Error::TaskNotFound(_)
            | Error::ProjectNotFound(_)
            | Error::EdgeNotFound(_)
            | Error::ConflictNotFound(_) => ErrorCategory::NotFound,
            Error::Cancelled => ErrorCategory::Cancelled,
            Error::Internal(_) | Error::Source(_) | Error::Io(_) => ErrorCategory::Internal,
        }
    }
}

/// Render a cycle path as `a -> b -> c -> a`.
fn format_cycle(path: &[TaskId]) -> String {
    let mut rendered = path
        .iter()
        .map(TaskId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ");
    if let Some(first) = path.first() {
        rendered.push_str(" -> ");
        rendered.push_str(first.as_str());
    }
    rendered
}
