//! Core workflow type definitions
//!
//! Defines the graph model: workflows, nodes, edges and ports. These types are
//! serialized to JSON for persistence and carry no behaviour beyond lookups.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Port used when a node declares no ports of its own
pub const MAIN_PORT: &str = "main";

/// A complete workflow definition containing nodes and their connections
///
/// Workflows are stored as JSON and resolved into an execution plan every
/// time they run. Trigger registrations are derived from trigger-type nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier (e.g., "wf-grading")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// List of nodes in this workflow
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// List of edges connecting nodes
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Workflow {
    /// Create an empty workflow
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Builder-style node insertion, mostly used by tests and seeding code
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Builder-style edge insertion
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Find a node by id
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// All nodes of the given type, ordered by node id
    pub fn nodes_of_type(&self, node_type: &str) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self
            .nodes
            .iter()
            .filter(|n| n.node_type == node_type)
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }
}

/// A single node in the workflow graph
///
/// The `node_type` string is the registry key that selects the handler.
/// `parameters` is opaque to the engine and interpreted only by the handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the workflow (e.g., "n1", "webhook-start")
    pub id: String,
    /// Registry key of the handler (e.g., "core.http_request")
    #[serde(rename = "type")]
    pub node_type: String,
    /// Handler-specific configuration
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Declared input ports; empty means the single `main` port
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Declared output ports; empty means the single `main` port
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Re-invoke the handler on failure
    #[serde(default)]
    pub retry_on_fail: bool,
    /// Retries after the first attempt when `retry_on_fail` is set
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed delay between attempts, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Record the failure and pass `null` downstream instead of aborting the run
    #[serde(default)]
    pub continue_on_fail: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Node {
    /// Create a node with default ports and policy
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            parameters: Map::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            retry_on_fail: false,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            continue_on_fail: false,
        }
    }

    /// Set a single parameter
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Declare input ports
    pub fn with_inputs<I, S>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = ports.into_iter().map(Into::into).collect();
        self
    }

    /// Declare output ports
    pub fn with_outputs<I, S>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = ports.into_iter().map(Into::into).collect();
        self
    }

    /// Enable fixed-delay retries
    pub fn with_retry(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.retry_on_fail = true;
        self.max_retries = max_retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Enable continue-on-fail
    pub fn continue_on_fail(mut self) -> Self {
        self.continue_on_fail = true;
        self
    }

    /// Whether the node accepts data on `port`
    pub fn has_input(&self, port: &str) -> bool {
        if self.inputs.is_empty() {
            port == MAIN_PORT
        } else {
            self.inputs.iter().any(|p| p == port)
        }
    }

    /// Whether the node emits data on `port`
    pub fn has_output(&self, port: &str) -> bool {
        if self.outputs.is_empty() {
            port == MAIN_PORT
        } else {
            self.outputs.iter().any(|p| p == port)
        }
    }

    /// String parameter lookup
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

/// Directed data link from one node's output port to another's input port
///
/// A node fed by several edges receives an object keyed by
/// `<source node>.<source port>`, one entry per upstream source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Edge identifier
    pub id: String,
    /// Source node ID
    pub source: String,
    /// Output port on the source node
    #[serde(default = "main_port")]
    pub source_port: String,
    /// Target node ID
    pub target: String,
    /// Input port on the target node
    #[serde(default = "main_port")]
    pub target_port: String,
}

fn main_port() -> String {
    MAIN_PORT.to_string()
}

impl Edge {
    /// Edge between the `main` ports of two nodes
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{}->{}", source, target),
            source,
            source_port: main_port(),
            target,
            target_port: main_port(),
        }
    }

    /// Edge between explicit ports
    pub fn between(
        source: impl Into<String>,
        source_port: impl Into<String>,
        target: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        let source = source.into();
        let source_port = source_port.into();
        let target = target.into();
        let target_port = target_port.into();
        Self {
            id: format!("{}:{}->{}:{}", source, source_port, target, target_port),
            source,
            source_port,
            target,
            target_port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_defaults_apply_when_deserializing() {
        let node: Node = serde_json::from_value(json!({
            "id": "n1",
            "type": "core.noop"
        }))
        .unwrap();

        assert!(node.parameters.is_empty());
        assert!(!node.retry_on_fail);
        assert_eq!(node.max_retries, 3);
        assert_eq!(node.retry_delay_ms, 1000);
        assert!(node.has_input(MAIN_PORT));
        assert!(!node.has_output("other"));
    }

    #[test]
    fn edge_ports_default_to_main() {
        let edge: Edge = serde_json::from_value(json!({
            "id": "e1",
            "source": "a",
            "target": "b"
        }))
        .unwrap();
        assert_eq!(edge.source_port, MAIN_PORT);
        assert_eq!(edge.target_port, MAIN_PORT);
    }

    #[test]
    fn declared_ports_replace_main() {
        let node = Node::new("join", "core.noop").with_inputs(["left", "right"]);
        assert!(node.has_input("left"));
        assert!(!node.has_input(MAIN_PORT));
    }

    #[test]
    fn nodes_of_type_are_sorted_by_id() {
        let wf = Workflow::new("wf", "wf")
            .with_node(Node::new("z", "trigger.schedule"))
            .with_node(Node::new("a", "trigger.schedule"))
            .with_node(Node::new("m", "core.noop"));
        let ids: Vec<&str> = wf
            .nodes_of_type("trigger.schedule")
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "z"]);
    }
}
