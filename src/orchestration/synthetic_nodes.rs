use crate::orchestration::flow_spec::FlowSpec;
use crate::orchestration::plan::{
    HistoryEntry, NodeStatus, PlanNode, Timeline, PRIMARY_NODE_ID,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

pub const SYNTHETIC_PREFIX: &str = "flow::";

pub fn synthetic_node_id(flow_node_id: &str) -> String {
    format!("{SYNTHETIC_PREFIX}{flow_node_id}")
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Derives one succeeded plan node per flow node, wired by the flow edges.
///
/// Every node depends on the primary execution node first, then on the
/// sources of its incoming edges in edge order. Later nodes that repeat an
/// earlier id are skipped.
pub fn build_synthetic_nodes(
    flow_spec: &FlowSpec,
    run_started: DateTime<Utc>,
    run_finished: DateTime<Utc>,
) -> Vec<PlanNode> {
    let mut incoming: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for edge in flow_spec.edges() {
        incoming.entry(edge.target).or_default().push(edge.source);
    }

    let duration = (run_finished - run_started).num_milliseconds().max(0) as f64 / 1000.0;
    let finished_iso = run_finished.to_rfc3339();
    let mut seen = HashSet::new();
    let mut nodes = Vec::new();

    for spec in flow_spec.nodes() {
        if !seen.insert(spec.id.clone()) {
            continue;
        }
        let node_id = synthetic_node_id(&spec.id);

        let mut depends_on = vec![PRIMARY_NODE_ID.to_string()];
        for source in incoming.get(&spec.id).into_iter().flatten() {
            push_unique(&mut depends_on, synthetic_node_id(source));
        }
        depends_on.retain(|dep| *dep != node_id);

        let summary = spec.label.clone().unwrap_or_else(|| spec.id.clone());
        nodes.push(PlanNode {
            id: node_id,
            node_type: spec.node_type.clone(),
            summary,
            depends_on,
            status: NodeStatus::Succeeded,
            attempt: 1,
            inputs: Map::from_iter([("flow_spec_node".to_string(), spec.entry.clone())]),
            outputs: Map::from_iter([
                (
                    "notes".to_string(),
                    Value::from("Synthetic node derived from flow_spec JSON."),
                ),
                ("source".to_string(), Value::from("flow_spec")),
                ("node_id".to_string(), Value::String(spec.id.clone())),
            ]),
            artifacts: Vec::new(),
            metrics: Map::from_iter([(
                "flow_spec_type".to_string(),
                Value::String(spec.node_type.clone()),
            )]),
            timeline: Timeline::new(run_started, run_finished, duration),
            history: vec![HistoryEntry {
                attempt_id: 1,
                timestamp: finished_iso.clone(),
                status: NodeStatus::Succeeded,
                notes: "Generated from flow_spec JSON.".to_string(),
            }],
            error: None,
        });
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(value: Value) -> FlowSpec {
        FlowSpec::from_value(value).expect("valid flow spec")
    }

    fn depends(nodes: &[PlanNode], id: &str) -> Vec<String> {
        nodes
            .iter()
            .find(|node| node.id == id)
            .map(|node| node.depends_on.clone())
            .unwrap_or_default()
    }

    #[test]
    fn nodes_depend_on_primary_then_incoming_sources() {
        let flow = spec(json!({
            "nodes": [
                {"id": "start", "label": "Start", "type": "action"},
                {"id": "check", "name": "Check input"},
                {"id": "done"}
            ],
            "edges": [
                {"source": "start", "target": "check"},
                {"from": "check", "to": "done", "label": "true"},
                {"source": "start", "target": "done"},
                {"source": "start", "target": "done"},
                {"source": "start"}
            ]
        }));
        let now = Utc::now();
        let nodes = build_synthetic_nodes(&flow, now, now);

        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["flow::start", "flow::check", "flow::done"]);
        assert_eq!(depends(&nodes, "flow::start"), vec![PRIMARY_NODE_ID]);
        assert_eq!(
            depends(&nodes, "flow::check"),
            vec![PRIMARY_NODE_ID, "flow::start"]
        );
        assert_eq!(
            depends(&nodes, "flow::done"),
            vec![PRIMARY_NODE_ID, "flow::check", "flow::start"]
        );

        assert_eq!(nodes[0].node_type, "action");
        assert_eq!(nodes[0].summary, "Start");
        assert_eq!(nodes[1].summary, "Check input");
        assert_eq!(nodes[1].node_type, "flow");
        assert_eq!(nodes[2].summary, "done");
        assert!(nodes.iter().all(|n| n.status == NodeStatus::Succeeded));
        assert_eq!(nodes[1].metrics["flow_spec_type"], json!("flow"));
        assert_eq!(nodes[1].outputs["node_id"], json!("check"));
        assert_eq!(nodes[1].inputs["flow_spec_node"]["name"], json!("Check input"));
    }

    #[test]
    fn self_loops_and_duplicate_ids_are_dropped() {
        let flow = spec(json!({
            "nodes": [
                {"id": "loop", "type": "loop"},
                {"id": "loop", "type": "action"},
                {"label": "no id"}
            ],
            "edges": [{"source": "loop", "target": "loop"}]
        }));
        let now = Utc::now();
        let nodes = build_synthetic_nodes(&flow, now, now);

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_type, "loop");
        assert_eq!(nodes[0].depends_on, vec![PRIMARY_NODE_ID.to_string()]);
    }

    #[test]
    fn synthetic_nodes_share_run_timestamps() {
        let flow = spec(json!({"nodes": [{"id": "a"}]}));
        let started = Utc::now();
        let finished = started + chrono::Duration::milliseconds(2250);
        let nodes = build_synthetic_nodes(&flow, started, finished);

        assert_eq!(nodes[0].timeline.started_at, started.to_rfc3339());
        assert_eq!(nodes[0].timeline.ended_at, finished.to_rfc3339());
        assert_eq!(nodes[0].timeline.duration_seconds, 2.25);
        assert_eq!(nodes[0].history[0].timestamp, finished.to_rfc3339());
    }
}
