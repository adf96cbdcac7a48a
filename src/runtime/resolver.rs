//! Graph resolver
//!
//! Validates a workflow graph and derives its execution plan: a
//! dependency-first node order, the start set, and per-node edge lists used
//! for join counting and fan-out. Resolution fails closed on cycles.

use crate::runtime::error::GraphError;
use crate::workflow::types::{Node, Workflow};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// Derived, never persisted, execution plan for one workflow graph
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Node ids such that every node comes after all of its dependencies
    pub order: Vec<String>,
    /// Nodes without incoming edges, ascending by id
    pub start_nodes: Vec<String>,
    /// node id -> indices into `Workflow::edges` targeting the node
    upstream: HashMap<String, Vec<usize>>,
    /// node id -> indices into `Workflow::edges` leaving the node
    downstream: HashMap<String, Vec<usize>>,
}

impl ExecutionPlan {
    /// Edges feeding `node_id`, in declaration order
    pub fn upstream_edges(&self, node_id: &str) -> &[usize] {
        self.upstream.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Edges leaving `node_id`, in declaration order
    pub fn downstream_edges(&self, node_id: &str) -> &[usize] {
        self.downstream.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_start_node(&self, node_id: &str) -> bool {
        self.upstream_edges(node_id).is_empty()
    }

    /// Nodes with no outgoing edges, in plan order
    pub fn terminal_nodes(&self) -> impl Iterator<Item = &str> {
        self.order
            .iter()
            .filter(|id| self.downstream_edges(id).is_empty())
            .map(String::as_str)
    }

    /// Position of a node in the plan order
    pub fn position(&self, node_id: &str) -> Option<usize> {
        self.order.iter().position(|id| id == node_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

struct Frame {
    node: NodeIndex,
    deps: Vec<NodeIndex>,
    next: usize,
}

/// Resolve a workflow graph into an execution plan
///
/// # Errors
/// - [`GraphError::DuplicateNode`] if two nodes share an id
/// - [`GraphError::DanglingEdge`] if an edge references a missing node
/// - [`GraphError::UnknownPort`] if an edge uses an undeclared port
/// - [`GraphError::Cycle`] if the graph is not acyclic
/// - [`GraphError::NoStartNode`] if the graph is empty
pub fn resolve(workflow: &Workflow) -> Result<ExecutionPlan, GraphError> {
    let mut seen = HashSet::new();
    for node in &workflow.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(GraphError::DuplicateNode(node.id.clone()));
        }
    }

    // Nodes are inserted in ascending id order so that petgraph's index order
    // doubles as the deterministic tie-break order.
    let mut nodes: Vec<&Node> = workflow.nodes.iter().collect();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));

    let mut graph: DiGraph<&str, usize> = DiGraph::with_capacity(nodes.len(), workflow.edges.len());
    let mut index_of: HashMap<&str, NodeIndex> = HashMap::with_capacity(nodes.len());
    let mut by_id: HashMap<&str, &Node> = HashMap::with_capacity(nodes.len());
    for node in &nodes {
        index_of.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
        by_id.insert(node.id.as_str(), node);
    }

    let mut upstream: HashMap<String, Vec<usize>> = HashMap::new();
    let mut downstream: HashMap<String, Vec<usize>> = HashMap::new();

    for (edge_idx, edge) in workflow.edges.iter().enumerate() {
        let dangling = |node_id: &str| GraphError::DanglingEdge {
            edge_id: edge.id.clone(),
            node_id: node_id.to_string(),
        };
        let source = *by_id
            .get(edge.source.as_str())
            .ok_or_else(|| dangling(&edge.source))?;
        let target = *by_id
            .get(edge.target.as_str())
            .ok_or_else(|| dangling(&edge.target))?;

        if !source.has_output(&edge.source_port) {
            return Err(GraphError::UnknownPort {
                edge_id: edge.id.clone(),
                node_id: source.id.clone(),
                port: edge.source_port.clone(),
            });
        }
        if !target.has_input(&edge.target_port) {
            return Err(GraphError::UnknownPort {
                edge_id: edge.id.clone(),
                node_id: target.id.clone(),
                port: edge.target_port.clone(),
            });
        }

        graph.add_edge(index_of[source.id.as_str()], index_of[target.id.as_str()], edge_idx);
        upstream.entry(target.id.clone()).or_default().push(edge_idx);
        downstream.entry(source.id.clone()).or_default().push(edge_idx);
    }

    let order = dependency_order(&graph)?;

    let start_nodes: Vec<String> = nodes
        .iter()
        .filter(|n| !upstream.contains_key(&n.id))
        .map(|n| n.id.clone())
        .collect();
    if start_nodes.is_empty() {
        return Err(GraphError::NoStartNode);
    }

    tracing::debug!(
        "📋 Resolved workflow '{}': order={:?} start={:?}",
        workflow.id,
        order,
        start_nodes
    );

    Ok(ExecutionPlan {
        order,
        start_nodes,
        upstream,
        downstream,
    })
}

/// Upstream nodes of `node`, ascending by id, without duplicates
fn dependencies(graph: &DiGraph<&str, usize>, node: NodeIndex) -> Vec<NodeIndex> {
    let mut deps: Vec<NodeIndex> = graph.neighbors_directed(node, Direction::Incoming).collect();
    deps.sort();
    deps.dedup();
    deps
}

/// Depth-first post-order over dependencies with an explicit stack
///
/// A dependency found `InProgress` closes a cycle; the walk stops there and
/// no partial order is returned.
fn dependency_order(graph: &DiGraph<&str, usize>) -> Result<Vec<String>, GraphError> {
    let mut marks = vec![Mark::Unvisited; graph.node_count()];
    let mut order = Vec::with_capacity(graph.node_count());

    for root in graph.node_indices() {
        if marks[root.index()] != Mark::Unvisited {
            continue;
        }
        marks[root.index()] = Mark::InProgress;
        let mut stack = vec![Frame {
            node: root,
            deps: dependencies(graph, root),
            next: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            if frame.next < frame.deps.len() {
                let dep = frame.deps[frame.next];
                frame.next += 1;
                match marks[dep.index()] {
                    Mark::Done => {}
                    Mark::InProgress => return Err(GraphError::Cycle(graph[dep].to_string())),
                    Mark::Unvisited => {
                        marks[dep.index()] = Mark::InProgress;
                        let deps = dependencies(graph, dep);
                        stack.push(Frame {
                            node: dep,
                            deps,
                            next: 0,
                        });
                    }
                }
            } else {
                let node = frame.node;
                marks[node.index()] = Mark::Done;
                order.push(graph[node].to_string());
                stack.pop();
            }
        }
    }

    Ok(order)
}
