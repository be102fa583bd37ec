//! Immutable graph snapshots.

use super::project::ProjectGraph;
use chrono::{DateTime, Utc};

/// An immutable copy of a project graph, taken under a brief read lock.
///
/// Analyses run against the copy after the lock is released, so concurrent
/// mutations cannot corrupt an in-flight computation and analyses never
/// block writers. `version` records the mutation generation of the source
/// graph at copy time, letting callers detect staleness.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    graph: ProjectGraph,
    version: u64,
    taken_at: DateTime<Utc>,
}

impl GraphSnapshot {
    pub(crate) fn new(graph: ProjectGraph, taken_at: DateTime<Utc>) -> Self {
        let version = graph.version();
        Self {
            graph,
            version,
            taken_at,
        }
    }

    /// The copied graph
    #[must_use]
    pub fn graph(&self) -> &ProjectGraph {
        &self.graph
    }

    /// Mutation generation of the source graph when the copy was taken
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// When the copy was taken
    #[must_use]
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Consume the snapshot, returning the owned graph copy
    #[must_use]
    pub fn into_graph(self) -> ProjectGraph {
        self.graph
    }
}
