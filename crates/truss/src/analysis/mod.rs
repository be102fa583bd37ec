//! Read-only analyses over graph snapshots.
//!
//! Every analysis here takes an immutable [`crate::graph::ProjectGraph`]
//! (usually the copy inside a [`crate::graph::GraphSnapshot`]) plus a
//! caller-supplied cancellation token, and returns derived, caller-owned
//! results. None of them mutate the graph; the one mutating entry point,
//! [`resolve::resolve_conflicts`], is invoked by the engine under the
//! project's write lock.

pub mod conflict;
pub mod critical_path;
pub mod impact;
pub mod resolve;
