//! Breadth-first traversals over the ordering-relevant subgraph.

use crate::domain::{EdgeId, EdgeRecord, TaskId};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};

/// Collect the dependencies of `start` as `(edge, depth)` pairs.
///
/// Depth 1 lists every edge arriving at `start`, regardless of type. With
/// `transitive`, the upstream closure is walked breadth-first over
/// ordering-relevant edges only; each task reached beyond depth 1
/// contributes the edge on its shortest chain (predecessors visited in
/// ascending task-id order, so equal-depth ties are deterministic).
pub(super) fn upstream_dependencies(
    graph: &StableDiGraph<TaskId, EdgeId>,
    node_map: &HashMap<TaskId, NodeIndex>,
    edges: &HashMap<EdgeId, EdgeRecord>,
    start: &TaskId,
    transitive: bool,
) -> Vec<(EdgeRecord, usize)> {
    let Some(&start_node) = node_map.get(start) else {
        return Vec::new();
    };

    let mut result: Vec<(EdgeRecord, usize)> = graph
        .edges_directed(start_node, Direction::Incoming)
        .filter_map(|edge| edges.get(edge.weight()))
        .map(|record| (record.clone(), 1))
        .collect();

    if transitive {
        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        depth.insert(start_node, 0);
        let mut queue = VecDeque::from([start_node]);

        while let Some(node) = queue.pop_front() {
            let next_depth = depth[&node] + 1;

            let mut incoming: Vec<(&EdgeRecord, NodeIndex)> = graph
                .edges_directed(node, Direction::Incoming)
                .filter_map(|edge| {
                    let record = edges.get(edge.weight())?;
                    record.dep_type.is_ordering().then_some((record, edge.source()))
                })
                .collect();
            incoming.sort_by(|a, b| graph[a.1].cmp(&graph[b.1]));

            for (record, source) in incoming {
                if depth.contains_key(&source) {
                    continue;
                }
                depth.insert(source, next_depth);
                queue.push_back(source);
                if next_depth > 1 {
                    result.push((record.clone(), next_depth));
                }
            }
        }
    }

    result.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)));
    result
}

/// Task ids reachable from `roots` along ordering-relevant edges without
/// ever passing through `blocked`. The roots themselves are included
/// (except `blocked`).
pub(super) fn reachable_excluding(
    graph: &StableDiGraph<TaskId, EdgeId>,
    node_map: &HashMap<TaskId, NodeIndex>,
    edges: &HashMap<EdgeId, EdgeRecord>,
    roots: &[TaskId],
    blocked: &TaskId,
) -> HashSet<TaskId> {
    let mut reached: HashSet<NodeIndex> = HashSet::new();
    let mut queue: VecDeque<NodeIndex> = VecDeque::new();

    for root in roots {
        if root == blocked {
            continue;
        }
        if let Some(&node) = node_map.get(root) {
            if reached.insert(node) {
                queue.push_back(node);
            }
        }
    }

    while let Some(node) = queue.pop_front() {
        for edge in graph.edges(node) {
            let Some(record) = edges.get(edge.weight()) else {
                continue;
            };
            if !record.dep_type.is_ordering() {
                continue;
            }
            let target = edge.target();
            if graph[target] == *blocked {
                continue;
            }
            if reached.insert(target) {
                queue.push_back(target);
            }
        }
    }

    reached.into_iter().map(|n| graph[n].clone()).collect()
}

/// Tasks with no incoming ordering-relevant edges, in ascending id order.
pub(super) fn ordering_sources(
    graph: &StableDiGraph<TaskId, EdgeId>,
    node_map: &HashMap<TaskId, NodeIndex>,
    edges: &HashMap<EdgeId, EdgeRecord>,
) -> Vec<TaskId> {
    let mut sources: Vec<TaskId> = node_map
        .iter()
        .filter(|(_, node)| {
            !graph
                .edges_directed(**node, Direction::Incoming)
                .any(|edge| {
                    edges
                        .get(edge.weight())
                        .is_some_and(|record| record.dep_type.is_ordering())
                })
        })
        .map(|(id, _)| id.clone())
        .collect();
    sources.sort();
    sources
}
