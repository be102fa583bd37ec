//! Truss - a task-dependency graph engine.
//!
//! This crate maintains per-project dependency graphs over externally-owned
//! tasks and answers structural questions about them: cycle detection,
//! critical-path scheduling, conflict detection and resolution, and
//! change-impact propagation.

#![forbid(unsafe_code)]

// Public modules for library usage
pub mod analysis;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod export;
pub mod graph;
pub mod id_generation;
