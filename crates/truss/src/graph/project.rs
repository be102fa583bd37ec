//! Canonical graph state for a single project.
//!
//! [`ProjectGraph`] owns the tasks and dependency edges of one project. All
//! structural invariants are enforced here: no self-loops, at most one
//! ordering-relevant edge of a given type per ordered pair, and acyclicity
//! of the ordering-relevant subgraph at rest. Every mutation validates
//! first and commits second, so a failed call leaves the graph untouched.

use super::{cycle, traversal};
use crate::domain::{
    validate_strength, CycleAutoBroken, DependencyAdded, DependencyType, EdgeId, EdgeRecord,
    ProjectId, Task, TaskId, TaskUpdate,
};
use crate::error::{Error, Result};
use crate::id_generation::{EdgeIdGenerator, EdgeIdGeneratorConfig};
use chrono::{DateTime, Utc};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// The task-dependency graph of one project.
///
/// Tasks are arena-allocated in a map and mirrored as nodes of a
/// [`StableDiGraph`] whose edge weights are [`EdgeId`]s; the edge attributes
/// themselves (type, strength) live in a separate record map, so demoting an
/// edge never requires graph surgery. Node indices stay valid across
/// removals.
#[derive(Debug, Clone)]
pub struct ProjectGraph {
    project_id: ProjectId,
    tasks: HashMap<TaskId, Task>,
    graph: StableDiGraph<TaskId, EdgeId>,
    node_map: HashMap<TaskId, NodeIndex>,
    edges: HashMap<EdgeId, EdgeRecord>,
    id_generator: EdgeIdGenerator,
    edge_prefix: String,
    resource_capacity: HashMap<String, u32>,
    version: u64,
}

impl ProjectGraph {
    pub(crate) fn new(project_id: ProjectId, edge_prefix: impl Into<String>) -> Self {
        let edge_prefix = edge_prefix.into();
        let id_generator = EdgeIdGenerator::new(EdgeIdGeneratorConfig {
            prefix: edge_prefix.clone(),
            graph_size: 0,
        });
        Self {
            project_id,
            tasks: HashMap::new(),
            graph: StableDiGraph::new(),
            node_map: HashMap::new(),
            edges: HashMap::new(),
            id_generator,
            edge_prefix,
            resource_capacity: HashMap::new(),
            version: 0,
        }
    }

    /// The project this graph belongs to
    #[must_use]
    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Mutation generation counter, incremented by every successful mutation
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of tasks in the graph
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Number of edges in the graph
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Returns `true` if the graph holds no tasks
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look up a task by id
    #[must_use]
    pub fn task(&self, task_id: &TaskId) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    /// Returns `true` if the task exists in this graph
    #[must_use]
    pub fn contains_task(&self, task_id: &TaskId) -> bool {
        self.tasks.contains_key(task_id)
    }

    /// Iterate over all tasks (unordered)
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// All task ids in ascending order
    #[must_use]
    pub fn task_ids_sorted(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.tasks.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Look up an edge record by id
    #[must_use]
    pub fn edge(&self, edge_id: &EdgeId) -> Option<&EdgeRecord> {
        self.edges.get(edge_id)
    }

    /// Iterate over all edge records (unordered)
    pub fn edges(&self) -> impl Iterator<Item = &EdgeRecord> {
        self.edges.values()
    }

    /// All edge records in ascending id order
    #[must_use]
    pub fn edge_records_sorted(&self) -> Vec<&EdgeRecord> {
        let mut records: Vec<&EdgeRecord> = self.edges.values().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Ordering-relevant out-edges of `task_id` as `(edge, successor)` pairs,
    /// sorted by successor id then edge id. Empty for unknown tasks.
    #[must_use]
    pub fn ordering_successors(&self, task_id: &TaskId) -> Vec<(&EdgeRecord, &TaskId)> {
        let Some(&node) = self.node_map.get(task_id) else {
            return Vec::new();
        };
        let mut result: Vec<(&EdgeRecord, &TaskId)> = self
            .graph
            .edges(node)
            .filter_map(|edge| {
                let record = self.edges.get(edge.weight())?;
                if !record.dep_type.is_ordering() {
                    return None;
                }
                Some((record, &self.graph[edge.target()]))
            })
            .collect();
        result.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.id.cmp(&b.0.id)));
        result
    }

    /// Ordering-relevant in-edges of `task_id` as `(edge, predecessor)`
    /// pairs, sorted by predecessor id then edge id.
    #[must_use]
    pub fn ordering_predecessors(&self, task_id: &TaskId) -> Vec<(&EdgeRecord, &TaskId)> {
        let Some(&node) = self.node_map.get(task_id) else {
            return Vec::new();
        };
        let mut result: Vec<(&EdgeRecord, &TaskId)> = self
            .graph
            .edges_directed(node, Direction::Incoming)
            .filter_map(|edge| {
                let record = self.edges.get(edge.weight())?;
                if !record.dep_type.is_ordering() {
                    return None;
                }
                Some((record, &self.graph[edge.source()]))
            })
            .collect();
        result.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.id.cmp(&b.0.id)));
        result
    }

    /// Tasks with no incoming ordering-relevant edges, in ascending id order
    #[must_use]
    pub fn ordering_sources(&self) -> Vec<TaskId> {
        traversal::ordering_sources(&self.graph, &self.node_map, &self.edges)
    }

    /// Task ids reachable from `roots` along ordering-relevant edges without
    /// passing through `blocked`
    #[must_use]
    pub fn reachable_downstream_excluding(
        &self,
        roots: &[TaskId],
        blocked: &TaskId,
    ) -> HashSet<TaskId> {
        traversal::reachable_excluding(&self.graph, &self.node_map, &self.edges, roots, blocked)
    }

    /// Search the ordering-relevant subgraph for a cycle at rest
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<TaskId>> {
        cycle::find_cycle(&self.graph, &self.node_map, &self.edges, None)
    }

    /// The dependencies of `task_id` as `(edge, depth)` pairs.
    ///
    /// Depth 1 lists every edge arriving at the task regardless of type.
    /// With `include_transitive`, the upstream closure is walked
    /// breadth-first over ordering-relevant edges; each task reached beyond
    /// depth 1 contributes the edge on its shortest chain.
    ///
    /// # Errors
    ///
    /// Returns `Error::TaskNotFound` if the task is not in this graph.
    pub fn dependencies_of(
        &self,
        task_id: &TaskId,
        include_transitive: bool,
    ) -> Result<Vec<(EdgeRecord, usize)>> {
        if !self.tasks.contains_key(task_id) {
            return Err(Error::TaskNotFound(task_id.clone()));
        }
        Ok(traversal::upstream_dependencies(
            &self.graph,
            &self.node_map,
            &self.edges,
            task_id,
            include_transitive,
        ))
    }

    /// Concurrent capacity for a resource tag, falling back to `default`
    /// when no explicit capacity was recorded
    #[must_use]
    pub fn resource_capacity(&self, tag: &str, default: u32) -> u32 {
        self.resource_capacity.get(tag).copied().unwrap_or(default)
    }

    pub(crate) fn set_resource_capacity(&mut self, tag: impl Into<String>, capacity: u32) {
        self.resource_capacity.insert(tag.into(), capacity);
        self.version += 1;
    }

    /// Insert a task, or replace an existing one wholesale.
    ///
    /// Replacement keeps the original creation timestamp and stamps
    /// `updated_at` with `now`.
    pub(crate) fn upsert_task(&mut self, task: Task, now: DateTime<Utc>) -> Result<Task> {
        task.validate()?;
        if task.project != self.project_id {
            return Err(Error::ProjectMismatch {
                task_id: task.id.clone(),
                expected: self.project_id.clone(),
                found: task.project.clone(),
            });
        }

        let stored = match self.tasks.get(&task.id) {
            Some(existing) => {
                let mut updated = task;
                updated.created_at = existing.created_at;
                updated.updated_at = now;
                updated
            }
            None => {
                if !self.node_map.contains_key(&task.id) {
                    let node = self.graph.add_node(task.id.clone());
                    self.node_map.insert(task.id.clone(), node);
                }
                task
            }
        };

        self.tasks.insert(stored.id.clone(), stored.clone());
        self.version += 1;
        Ok(stored)
    }

    /// Apply a partial update to a task.
    ///
    /// # Errors
    ///
    /// Returns `Error::TaskNotFound` for unknown tasks, or a validation
    /// error if the updated task would be invalid (the task is left as it
    /// was).
    pub(crate) fn update_task(
        &mut self,
        task_id: &TaskId,
        update: TaskUpdate,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.clone()))?;

        let mut updated = task.clone();
        if let Some(name) = update.name {
            updated.name = name;
        }
        if let Some(status) = update.status {
            updated.status = status;
        }
        if let Some(duration) = update.duration_hours {
            updated.duration_hours = duration;
        }
        if let Some(priority) = update.priority {
            updated.priority = priority;
        }
        if let Some(resources) = update.resources {
            updated.resources = resources;
        }
        if let Some(window) = update.window {
            updated.window = window;
        }
        updated.updated_at = now;
        updated.validate()?;

        self.tasks.insert(task_id.clone(), updated.clone());
        self.version += 1;
        Ok(updated)
    }

    /// Remove a task that no edge references.
    ///
    /// # Errors
    ///
    /// Returns `Error::TaskNotFound` for unknown tasks and
    /// `Error::TaskHasEdges` while any edge still touches the task.
    pub(crate) fn remove_task(&mut self, task_id: &TaskId) -> Result<Task> {
        let task = self
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| Error::TaskNotFound(task_id.clone()))?;
        let node = self.node_index(task_id)?;

        let edge_count = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .count()
            + self
                .graph
                .edges_directed(node, Direction::Incoming)
                .count();
        if edge_count > 0 {
            return Err(Error::TaskHasEdges {
                task_id: task_id.clone(),
                edge_count,
            });
        }

        self.graph.remove_node(node);
        self.node_map.remove(task_id);
        self.tasks.remove(task_id);
        self.version += 1;
        Ok(task)
    }

    /// Add a dependency edge between two existing tasks.
    ///
    /// For ordering-relevant types the candidate edge is checked against the
    /// graph first; a cycle rejects the call unless `force` is set, in which
    /// case the edge is committed and cycles are broken by demoting the
    /// weakest edge on each cycle to `related_to` (ties demote the newest
    /// edge, so a forced candidate usually demotes itself).
    ///
    /// # Errors
    ///
    /// - `Error::SelfLoop` if `from == to`
    /// - `Error::TaskNotFound` if either endpoint is unknown
    /// - `Error::InvalidStrength` if `strength` is outside `[0, 1]`
    /// - `Error::DuplicateEdge` if an ordering-relevant edge of the same
    ///   type already exists between the pair
    /// - `Error::CycleDetected` if the edge would close a cycle and `force`
    ///   is not set
    pub(crate) fn add_edge(
        &mut self,
        from: &TaskId,
        to: &TaskId,
        dep_type: DependencyType,
        strength: f64,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<DependencyAdded> {
        // === Phase 1: All validations (no mutations) ===
        if from == to {
            return Err(Error::SelfLoop {
                task_id: from.clone(),
            });
        }
        let from_node = self.node_index(from)?;
        let to_node = self.node_index(to)?;
        validate_strength(strength)?;

        if dep_type.is_ordering() && self.has_edge_of_type(from_node, to_node, dep_type) {
            return Err(Error::DuplicateEdge {
                from: from.clone(),
                to: to.clone(),
                dep_type,
            });
        }

        let cycle_path = if dep_type.is_ordering() {
            cycle::find_cycle(&self.graph, &self.node_map, &self.edges, Some((from, to)))
        } else {
            None
        };
        if let Some(path) = &cycle_path {
            if !force {
                return Err(Error::CycleDetected { path: path.clone() });
            }
        }

        // === Phase 2: Commit ===
        self.update_id_generator_if_needed();
        let id = self
            .id_generator
            .generate(from, to, dep_type)
            .map_err(|e| Error::Internal(format!("edge ID generation failed: {}", e)))?;
        let edge_id = EdgeId::new(id);

        let record = EdgeRecord {
            id: edge_id.clone(),
            from: from.clone(),
            to: to.clone(),
            dep_type,
            strength,
            created_at: now,
        };
        self.graph.add_edge(from_node, to_node, edge_id.clone());
        self.edges.insert(edge_id.clone(), record);

        // === Phase 3: A forced add demotes edges until acyclic again ===
        let mut auto_broken = Vec::new();
        if cycle_path.is_some() {
            while let Some(path) = self.find_cycle() {
                let demoted = self.demote_cycle_victim(&path)?;
                debug!(edge = %demoted, "Broke cycle by demoting edge to related_to");
                auto_broken.push(CycleAutoBroken {
                    demoted,
                    cycle_path: path,
                });
            }
        }

        self.version += 1;
        let edge = self
            .edges
            .get(&edge_id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("edge {} vanished during commit", edge_id)))?;
        Ok(DependencyAdded { edge, auto_broken })
    }

    /// Remove an edge by id.
    ///
    /// # Errors
    ///
    /// Returns `Error::EdgeNotFound` for unknown edge ids.
    pub(crate) fn remove_edge(&mut self, edge_id: &EdgeId) -> Result<EdgeRecord> {
        let record = self
            .edges
            .get(edge_id)
            .cloned()
            .ok_or_else(|| Error::EdgeNotFound(edge_id.clone()))?;

        let from_node = self.node_index(&record.from)?;
        let to_node = self.node_index(&record.to)?;
        let graph_edge = self
            .graph
            .edges_connecting(from_node, to_node)
            .find(|edge| edge.weight() == edge_id)
            .map(|edge| edge.id());
        let index = graph_edge.ok_or_else(|| {
            Error::Internal(format!("edge {} missing from graph topology", edge_id))
        })?;

        self.graph.remove_edge(index);
        self.edges.remove(edge_id);
        self.version += 1;
        Ok(record)
    }

    /// Change an edge's type and/or strength.
    ///
    /// Promoting an informational edge to an ordering-relevant type re-runs
    /// the duplicate and cycle checks; there is no `force` escape here.
    ///
    /// # Errors
    ///
    /// - `Error::EdgeNotFound` for unknown edge ids
    /// - `Error::InvalidStrength` if the new strength is outside `[0, 1]`
    /// - `Error::DuplicateEdge` if the new type collides with another
    ///   ordering-relevant edge between the same pair
    /// - `Error::CycleDetected` if promoting the edge would close a cycle
    pub(crate) fn update_edge(
        &mut self,
        edge_id: &EdgeId,
        new_type: Option<DependencyType>,
        new_strength: Option<f64>,
    ) -> Result<EdgeRecord> {
        // === Phase 1: All validations (no mutations) ===
        let (cur_type, cur_strength, from, to) = {
            let record = self
                .edges
                .get(edge_id)
                .ok_or_else(|| Error::EdgeNotFound(edge_id.clone()))?;
            (
                record.dep_type,
                record.strength,
                record.from.clone(),
                record.to.clone(),
            )
        };
        let target_type = new_type.unwrap_or(cur_type);
        let target_strength = new_strength.unwrap_or(cur_strength);
        validate_strength(target_strength)?;

        if target_type != cur_type && target_type.is_ordering() {
            let from_node = self.node_index(&from)?;
            let to_node = self.node_index(&to)?;
            let duplicate = self
                .graph
                .edges_connecting(from_node, to_node)
                .filter(|edge| edge.weight() != edge_id)
                .filter_map(|edge| self.edges.get(edge.weight()))
                .any(|record| record.dep_type == target_type);
            if duplicate {
                return Err(Error::DuplicateEdge {
                    from,
                    to,
                    dep_type: target_type,
                });
            }

            if !cur_type.is_ordering() {
                // Promotion adds ordering topology the graph did not have
                if let Some(path) =
                    cycle::find_cycle(&self.graph, &self.node_map, &self.edges, Some((&from, &to)))
                {
                    return Err(Error::CycleDetected { path });
                }
            }
        }

        // === Phase 2: Commit ===
        let record = self
            .edges
            .get_mut(edge_id)
            .ok_or_else(|| Error::EdgeNotFound(edge_id.clone()))?;
        record.dep_type = target_type;
        record.strength = target_strength;
        let updated = record.clone();
        self.version += 1;
        Ok(updated)
    }

    /// Fold `absorb` into `keep`: re-point edges, sum durations, union
    /// resource tags, then drop `absorb`.
    ///
    /// Re-pointed edges that would become self-loops or duplicate an
    /// existing ordering-relevant edge are dropped instead. The caller is
    /// responsible for checking the merged graph (`validate`) before
    /// treating the result as committed; merging can close cycles.
    pub(crate) fn merge_tasks(
        &mut self,
        keep: &TaskId,
        absorb: &TaskId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if keep == absorb {
            return Err(Error::Internal(
                "cannot merge a task with itself".to_string(),
            ));
        }
        if !self.tasks.contains_key(keep) {
            return Err(Error::TaskNotFound(keep.clone()));
        }
        let absorbed = self
            .tasks
            .get(absorb)
            .cloned()
            .ok_or_else(|| Error::TaskNotFound(absorb.clone()))?;

        let touching: Vec<EdgeRecord> = self
            .edges
            .values()
            .filter(|record| record.from == *absorb || record.to == *absorb)
            .cloned()
            .collect();

        for record in touching {
            self.remove_edge(&record.id)?;

            let from = if record.from == *absorb { keep } else { &record.from };
            let to = if record.to == *absorb { keep } else { &record.to };
            if from == to {
                continue;
            }
            let from_node = self.node_index(from)?;
            let to_node = self.node_index(to)?;
            if record.dep_type.is_ordering()
                && self.has_edge_of_type(from_node, to_node, record.dep_type)
            {
                continue;
            }

            let moved = EdgeRecord {
                id: record.id.clone(),
                from: from.clone(),
                to: to.clone(),
                dep_type: record.dep_type,
                strength: record.strength,
                created_at: record.created_at,
            };
            self.graph.add_edge(from_node, to_node, moved.id.clone());
            self.edges.insert(moved.id.clone(), moved);
        }

        if let Some(kept) = self.tasks.get_mut(keep) {
            kept.duration_hours += absorbed.duration_hours;
            for resource in &absorbed.resources {
                if !kept.resources.contains(resource) {
                    kept.resources.push(resource.clone());
                }
            }
            kept.updated_at = now;
        }

        self.remove_task(absorb)?;
        self.version += 1;
        Ok(())
    }

    /// Full consistency sweep over tasks, edges, and acyclicity.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant as the corresponding error.
    pub fn validate(&self) -> Result<()> {
        for task in self.tasks.values() {
            task.validate()?;
            if task.project != self.project_id {
                return Err(Error::ProjectMismatch {
                    task_id: task.id.clone(),
                    expected: self.project_id.clone(),
                    found: task.project.clone(),
                });
            }
            if !self.node_map.contains_key(&task.id) {
                return Err(Error::Internal(format!(
                    "task {} has no graph node",
                    task.id
                )));
            }
        }
        if self.node_map.len() != self.tasks.len() {
            return Err(Error::Internal(format!(
                "node map holds {} entries for {} tasks",
                self.node_map.len(),
                self.tasks.len()
            )));
        }
        if self.edges.len() != self.graph.edge_count() {
            return Err(Error::Internal(format!(
                "{} edge records for {} topology edges",
                self.edges.len(),
                self.graph.edge_count()
            )));
        }

        let mut seen: HashSet<(&TaskId, &TaskId, DependencyType)> = HashSet::new();
        for record in self.edges.values() {
            if record.from == record.to {
                return Err(Error::SelfLoop {
                    task_id: record.from.clone(),
                });
            }
            if !self.tasks.contains_key(&record.from) {
                return Err(Error::Internal(format!(
                    "edge {} references unknown task {}",
                    record.id, record.from
                )));
            }
            if !self.tasks.contains_key(&record.to) {
                return Err(Error::Internal(format!(
                    "edge {} references unknown task {}",
                    record.id, record.to
                )));
            }
            validate_strength(record.strength)?;

            if record.dep_type.is_ordering()
                && !seen.insert((&record.from, &record.to, record.dep_type))
            {
                return Err(Error::DuplicateEdge {
                    from: record.from.clone(),
                    to: record.to.clone(),
                    dep_type: record.dep_type,
                });
            }
        }

        if let Some(path) = self.find_cycle() {
            return Err(Error::CycleDetected { path });
        }
        Ok(())
    }

    fn node_index(&self, task_id: &TaskId) -> Result<NodeIndex> {
        self.node_map
            .get(task_id)
            .copied()
            .ok_or_else(|| Error::TaskNotFound(task_id.clone()))
    }

    fn has_edge_of_type(&self, from: NodeIndex, to: NodeIndex, dep_type: DependencyType) -> bool {
        self.graph
            .edges_connecting(from, to)
            .filter_map(|edge| self.edges.get(edge.weight()))
            .any(|record| record.dep_type == dep_type)
    }

    /// Demote the weakest ordering edge along `path` to `related_to`;
    /// equal strengths demote the newest edge.
    fn demote_cycle_victim(&mut self, path: &[TaskId]) -> Result<EdgeId> {
        let mut candidates: Vec<&EdgeRecord> = Vec::new();
        for i in 0..path.len() {
            let from = &path[i];
            let to = &path[(i + 1) % path.len()];
            candidates.extend(self.edges.values().filter(|record| {
                record.dep_type.is_ordering() && record.from == *from && record.to == *to
            }));
        }

        let victim = candidates
            .into_iter()
            .min_by(|a, b| {
                a.strength
                    .partial_cmp(&b.strength)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| b.created_at.cmp(&a.created_at))
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|record| record.id.clone())
            .ok_or_else(|| Error::Internal("cycle path has no ordering edges".to_string()))?;

        if let Some(record) = self.edges.get_mut(&victim) {
            record.dep_type = DependencyType::RelatedTo;
        }
        Ok(victim)
    }

    /// Recreate the ID generator when the edge count crosses a length
    /// threshold, re-registering existing ids (O(n), thresholds only).
    fn update_id_generator_if_needed(&mut self) {
        let current_size = self.edges.len();
        let old_size = self.id_generator.graph_size();

        let needs_update = match (old_size, current_size) {
            // 4 -> 5 chars
            (0..=500, 501..) => true,
            // 5 -> 6 chars
            (0..=1500, 1501..) => true,
            // Backwards after heavy deletes
            (501.., 0..=500) => true,
            (1501.., 0..=1500) => true,
            _ => false,
        };

        if needs_update {
            self.id_generator = EdgeIdGenerator::new(EdgeIdGeneratorConfig {
                prefix: self.edge_prefix.clone(),
                graph_size: current_size,
            });
            for id in self.edges.keys() {
                self.id_generator.register_id(id.as_str().to_string());
            }
        }
    }
}
