//! Per-project dependency graphs.
//!
//! Edge direction convention: an edge runs `from -> to` where `from` is the
//! upstream task and `to` the downstream one. For ordering-relevant types
//! (`depends_on`, `blocks`, `prerequisite`) this means `to` cannot start
//! until `from` finishes; `related_to` edges carry no ordering meaning and
//! are ignored by the cycle detector and every analysis walking the graph.

mod cycle;
mod project;
mod snapshot;
mod traversal;

pub use project::ProjectGraph;
pub use snapshot::GraphSnapshot;
