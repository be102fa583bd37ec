//! Cycle detection over the ordering-relevant subgraph.

use crate::domain::{EdgeId, EdgeRecord, TaskId};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Search the ordering-relevant subgraph for a cycle.
///
/// `candidate` is an extra `(from, to)` edge treated as part of the graph for
/// the duration of the search without being inserted. When the graph was
/// acyclic beforehand, every cycle found goes through the candidate, and the
/// returned path starts at the candidate's target: for candidate `C -> A`
/// over existing `A -> B -> C` the result is `[A, B, C]`.
///
/// Traversal is deterministic: roots are visited in ascending task-id order
/// (the candidate's target first, when present), and successors of each node
/// in ascending task-id order. Uses iterative depth-first search with
/// white/gray/black coloring; a back-edge to a gray node yields the cycle by
/// unwinding the explicit stack. No state outlives the call.
pub(super) fn find_cycle(
    graph: &StableDiGraph<TaskId, EdgeId>,
    node_map: &HashMap<TaskId, NodeIndex>,
    edges: &HashMap<EdgeId, EdgeRecord>,
    candidate: Option<(&TaskId, &TaskId)>,
) -> Option<Vec<TaskId>> {
    let candidate_nodes = candidate
        .and_then(|(from, to)| Some((*node_map.get(from)?, *node_map.get(to)?)));

    let mut roots: Vec<NodeIndex> = node_map.values().copied().collect();
    roots.sort_by(|a, b| graph[*a].cmp(&graph[*b]));
    if let Some((_, to_node)) = candidate_nodes {
        roots.retain(|n| *n != to_node);
        roots.insert(0, to_node);
    }

    let mut color: HashMap<NodeIndex, Color> = HashMap::with_capacity(node_map.len());

    for root in roots {
        if color.get(&root).copied().unwrap_or(Color::White) != Color::White {
            continue;
        }
        if let Some(path) = visit(graph, edges, candidate_nodes, &mut color, root) {
            return Some(path);
        }
    }

    None
}

struct Frame {
    node: NodeIndex,
    successors: Vec<NodeIndex>,
    next: usize,
}

fn visit(
    graph: &StableDiGraph<TaskId, EdgeId>,
    edges: &HashMap<EdgeId, EdgeRecord>,
    candidate: Option<(NodeIndex, NodeIndex)>,
    color: &mut HashMap<NodeIndex, Color>,
    root: NodeIndex,
) -> Option<Vec<TaskId>> {
    color.insert(root, Color::Gray);
    let mut stack = vec![Frame {
        node: root,
        successors: ordering_successors(graph, edges, candidate, root),
        next: 0,
    }];

    loop {
        let Some(frame) = stack.last_mut() else {
            return None;
        };

        if frame.next >= frame.successors.len() {
            color.insert(frame.node, Color::Black);
            stack.pop();
            continue;
        }

        let succ = frame.successors[frame.next];
        frame.next += 1;

        match color.get(&succ).copied().unwrap_or(Color::White) {
            Color::Gray => {
                // The gray node is on the current stack; the cycle is the
                // suffix starting at it.
                if let Some(start) = stack.iter().position(|f| f.node == succ) {
                    return Some(
                        stack[start..]
                            .iter()
                            .map(|f| graph[f.node].clone())
                            .collect(),
                    );
                }
            }
            Color::White => {
                color.insert(succ, Color::Gray);
                let successors = ordering_successors(graph, edges, candidate, succ);
                stack.push(Frame {
                    node: succ,
                    successors,
                    next: 0,
                });
            }
            Color::Black => {}
        }
    }
}

/// Ordering-relevant successors of `node`, candidate edge included,
/// deduplicated and sorted by task id.
fn ordering_successors(
    graph: &StableDiGraph<TaskId, EdgeId>,
    edges: &HashMap<EdgeId, EdgeRecord>,
    candidate: Option<(NodeIndex, NodeIndex)>,
    node: NodeIndex,
) -> Vec<NodeIndex> {
    let mut successors: Vec<NodeIndex> = graph
        .edges(node)
        .filter(|edge| {
            edges
                .get(edge.weight())
                .is_some_and(|record| record.dep_type.is_ordering())
        })
        .map(|edge| edge.target())
        .collect();

    if let Some((from_node, to_node)) = candidate {
        if node == from_node {
            successors.push(to_node);
        }
    }

    successors.sort_by(|a, b| graph[*a].cmp(&graph[*b]));
    successors.dedup();
    successors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DependencyType;
    use chrono::{TimeZone, Utc};

    type TestGraph = (
        StableDiGraph<TaskId, EdgeId>,
        HashMap<TaskId, NodeIndex>,
        HashMap<EdgeId, EdgeRecord>,
    );

    fn build(spec: &[(&str, &str, DependencyType)]) -> TestGraph {
        let mut graph = StableDiGraph::new();
        let mut node_map = HashMap::new();
        let mut edges = HashMap::new();

        for (i, (from, to, dep_type)) in spec.iter().enumerate() {
            for id in [from, to] {
                let task_id = TaskId::new(*id);
                node_map
                    .entry(task_id.clone())
                    .or_insert_with(|| graph.add_node(task_id));
            }
            let edge_id = EdgeId::new(format!("dep-e{:03}", i));
            graph.add_edge(
                node_map[&TaskId::new(*from)],
                node_map[&TaskId::new(*to)],
                edge_id.clone(),
            );
            edges.insert(
                edge_id.clone(),
                EdgeRecord {
                    id: edge_id,
                    from: TaskId::new(*from),
                    to: TaskId::new(*to),
                    dep_type: *dep_type,
                    strength: 1.0,
                    created_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
                },
            );
        }

        (graph, node_map, edges)
    }

    fn path_of(result: Option<Vec<TaskId>>) -> Vec<String> {
        result
            .unwrap()
            .into_iter()
            .map(|id| id.as_str().to_string())
            .collect()
    }

    #[test]
    fn test_acyclic_graph_has_no_cycle() {
        let (graph, node_map, edges) = build(&[
            ("a", "b", DependencyType::DependsOn),
            ("b", "c", DependencyType::Blocks),
        ]);
        assert!(find_cycle(&graph, &node_map, &edges, None).is_none());
    }

    #[test]
    fn test_candidate_not_closing_cycle() {
        let (graph, node_map, edges) = build(&[("a", "b", DependencyType::DependsOn)]);
        let a = TaskId::new("a");
        let c = TaskId::new("c");
        // Candidate target is unknown to the graph, so it cannot close anything
        assert!(find_cycle(&graph, &node_map, &edges, Some((&a, &c))).is_none());
    }

    #[test]
    fn test_candidate_closes_three_node_cycle() {
        let (graph, node_map, edges) = build(&[
            ("a", "b", DependencyType::DependsOn),
            ("b", "c", DependencyType::DependsOn),
        ]);
        let from = TaskId::new("c");
        let to = TaskId::new("a");
        let path = path_of(find_cycle(&graph, &node_map, &edges, Some((&from, &to))));
        assert_eq!(path, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_candidate_closes_two_node_cycle() {
        let (graph, node_map, edges) = build(&[("a", "b", DependencyType::Prerequisite)]);
        let from = TaskId::new("b");
        let to = TaskId::new("a");
        let path = path_of(find_cycle(&graph, &node_map, &edges, Some((&from, &to))));
        assert_eq!(path, vec!["a", "b"]);
    }

    #[test]
    fn test_informational_edges_do_not_close_cycles() {
        let (graph, node_map, edges) = build(&[
            ("a", "b", DependencyType::DependsOn),
            ("b", "c", DependencyType::RelatedTo),
        ]);
        let from = TaskId::new("c");
        let to = TaskId::new("a");
        assert!(find_cycle(&graph, &node_map, &edges, Some((&from, &to))).is_none());
    }

    #[test]
    fn test_existing_cycle_found_without_candidate() {
        let (graph, node_map, edges) = build(&[
            ("a", "b", DependencyType::DependsOn),
            ("b", "c", DependencyType::DependsOn),
            ("c", "a", DependencyType::DependsOn),
        ]);
        let path = path_of(find_cycle(&graph, &node_map, &edges, None));
        assert_eq!(path, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_diamond_takes_lowest_id_branch() {
        let (graph, node_map, edges) = build(&[
            ("a", "b", DependencyType::DependsOn),
            ("a", "c", DependencyType::DependsOn),
            ("b", "d", DependencyType::DependsOn),
            ("c", "d", DependencyType::DependsOn),
        ]);
        let from = TaskId::new("d");
        let to = TaskId::new("a");
        let path = path_of(find_cycle(&graph, &node_map, &edges, Some((&from, &to))));
        assert_eq!(path, vec!["a", "b", "d"]);
    }
}
