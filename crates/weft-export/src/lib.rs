//! Graph description snapshots for validated flows.
//!
//! The flow model itself carries closures and is not serializable; this
//! crate projects a validated flow onto a plain directed-graph description
//! that out-of-process tools can render (Graphviz DOT) or re-parse (JSON).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use weft_core::{EdgeLabel, NodeId, NodeKind};
use weft_plan::ValidatedFlow;

/// Node categories surfaced by the description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Activity,
    Condition,
    Switch,
    ForkJoin,
    Block,
    FaultHandler,
}

impl From<&NodeKind> for NodeCategory {
    fn from(kind: &NodeKind) -> Self {
        match kind {
            NodeKind::Activity(_) => NodeCategory::Activity,
            NodeKind::Condition(_) => NodeCategory::Condition,
            NodeKind::Switch(_) => NodeCategory::Switch,
            NodeKind::ForkJoin(_) => NodeCategory::ForkJoin,
            NodeKind::Block(_) => NodeCategory::Block,
            NodeKind::FaultHandler(_) => NodeCategory::FaultHandler,
        }
    }
}

impl NodeCategory {
    fn label(self) -> &'static str {
        match self {
            NodeCategory::Activity => "activity",
            NodeCategory::Condition => "condition",
            NodeCategory::Switch => "switch",
            NodeCategory::ForkJoin => "fork_join",
            NodeCategory::Block => "block",
            NodeCategory::FaultHandler => "fault_handler",
        }
    }
}

/// One node of the described graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NodeDescription {
    /// Node identifier.
    pub id: NodeId,
    /// Node category.
    pub kind: NodeCategory,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One labeled edge of the described graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EdgeDescription {
    /// Source node.
    pub from: NodeId,
    /// Target node.
    pub to: NodeId,
    /// Edge label as walked by the executor.
    pub label: EdgeLabel,
}

/// Directed-graph description of a validated flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GraphDescription {
    /// Flow display name.
    pub name: String,
    /// Every node, in id order.
    pub nodes: Vec<NodeDescription>,
    /// Every labeled edge.
    pub edges: Vec<EdgeDescription>,
}

/// Project a validated flow onto its graph description.
pub fn describe(flow: &ValidatedFlow) -> GraphDescription {
    let flow = flow.flow();
    let mut nodes = Vec::with_capacity(flow.node_count());
    let mut edges = Vec::new();
    for node in flow.nodes() {
        nodes.push(NodeDescription {
            id: node.id(),
            kind: NodeCategory::from(node.kind()),
            name: node.name().map(str::to_string),
        });
        for (label, to) in node.successors() {
            edges.push(EdgeDescription {
                from: node.id(),
                to,
                label,
            });
        }
    }
    GraphDescription {
        name: flow.name().to_string(),
        nodes,
        edges,
    }
}

/// Emit a Graphviz DOT rendering of the description.
pub fn to_dot(description: &GraphDescription) -> String {
    let mut buffer = String::new();
    buffer.push_str("digraph flow {\n");

    for node in &description.nodes {
        let display = node.name.as_deref().unwrap_or("");
        buffer.push_str(&format!(
            "    \"{}\" [label=\"{} ({})\"];\n",
            node.id,
            display,
            node.kind.label()
        ));
    }

    for edge in &description.edges {
        buffer.push_str(&format!(
            "    \"{}\" -> \"{}\" [label=\"{}\"];\n",
            edge.from, edge.to, edge.label
        ));
    }

    buffer.push('}');
    buffer.push('\n');
    buffer
}

/// Serialise a description into a `serde_json::Value`.
pub fn to_json_value(description: &GraphDescription) -> Value {
    serde_json::to_value(description).expect("graph description serialisation should not fail")
}

/// Re-parse a description from its JSON form.
pub fn from_json_value(value: Value) -> Result<GraphDescription, serde_json::Error> {
    serde_json::from_value(value)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use weft_core::{Activity, ActivityContext, EvalScope, FaultError, FlowBuilder};

    use super::*;

    #[derive(Default)]
    struct Step;

    #[async_trait]
    impl Activity for Step {
        type Output = i64;

        async fn execute(&mut self, _ctx: &ActivityContext) -> Result<i64, FaultError> {
            Ok(1)
        }
    }

    #[derive(Default)]
    struct Rescue;

    #[async_trait]
    impl Activity for Rescue {
        type Output = ();

        const HANDLES_FAULTS: bool = true;

        async fn execute(&mut self, _ctx: &ActivityContext) -> Result<(), FaultError> {
            Ok(())
        }
    }

    fn sample() -> ValidatedFlow {
        let mut builder = FlowBuilder::new("export_sample");
        let on_fault = builder.fault_handler::<Rescue>("on_fault");
        let on_cancel = builder.fault_handler::<Rescue>("on_cancel");
        builder.with_default_fault_handler(&on_fault).unwrap();
        builder.with_default_cancellation_handler(&on_cancel).unwrap();

        let start = builder.activity::<Step>("start");
        let left = builder.activity::<Step>("left");
        let right = builder.activity::<Step>("right");
        let merge = builder.activity::<Step>("merge");
        let start_result = builder.result_of(&start);
        let pick = builder.condition("pick", move |scope: &EvalScope<'_>| {
            Ok(start_result.get(scope)? > 0)
        });
        let route = builder.switch::<&'static str, _>("route", |_scope: &EvalScope<'_>| Ok("a"));
        builder.with_initial_node(&start).unwrap();
        builder.connect_to(&start, &pick).unwrap();
        builder.connect_true_to(&pick, &left).unwrap();
        builder.connect_false_to(&pick, &right).unwrap();
        builder.connect_to(&left, &route).unwrap();
        builder.connect_to(&right, &route).unwrap();
        builder.connect_case(&route, "a").to(&merge).unwrap();
        builder.connect_default(&route, &merge).unwrap();

        weft_plan::validate(&Arc::new(builder.build())).expect("sample flow validates")
    }

    #[test]
    fn dot_contains_nodes_and_labeled_edges() {
        let description = describe(&sample());
        let dot = to_dot(&description);
        assert!(dot.contains("\"n2\" [label=\"start (activity)\"]"));
        assert!(dot.contains("[label=\"true\"]"));
        assert!(dot.contains("[label=\"false\"]"));
        assert!(dot.contains("[label=\"case(a)\"]"));
        assert!(dot.contains("[label=\"default\"]"));
    }

    #[test]
    fn json_round_trip_preserves_the_graph() {
        let description = describe(&sample());
        let json = to_json_value(&description);
        let reparsed = from_json_value(json).expect("re-parse succeeds");
        assert_eq!(description, reparsed);
    }

    #[test]
    fn description_covers_every_node() {
        let validated = sample();
        let description = describe(&validated);
        assert_eq!(description.nodes.len(), validated.flow().node_count());
        assert!(description.nodes.iter().any(|n| n.kind == NodeCategory::FaultHandler));
        assert!(description.edges.iter().any(|e| e.label == EdgeLabel::True));
    }
}
