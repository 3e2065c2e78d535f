use crate::orchestration::evaluation::EvaluationPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PRIMARY_NODE_ID: &str = "codex_execution";
pub const SCHEMA_VERSION: &str = "1.0";
pub const PLAN_WRITER: &str = "agentflow-cli@local";
pub const DEFAULT_SUMMARY: &str = "Agent execution";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanStatus::Pending => write!(f, "pending"),
            PlanStatus::Completed => write!(f, "completed"),
            PlanStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub queued_at: String,
    pub started_at: String,
    pub ended_at: String,
    pub duration_seconds: f64,
}

impl Timeline {
    pub fn new(started: DateTime<Utc>, finished: DateTime<Utc>, duration_seconds: f64) -> Self {
        Self {
            queued_at: started.to_rfc3339(),
            started_at: started.to_rfc3339(),
            ended_at: finished.to_rfc3339(),
            duration_seconds: round_millis(duration_seconds),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub attempt_id: u32,
    pub timestamp: String,
    pub status: NodeStatus,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub summary: String,
    pub depends_on: Vec<String>,
    pub status: NodeStatus,
    pub attempt: u32,
    pub inputs: Map<String, Value>,
    pub outputs: Map<String, Value>,
    pub artifacts: Vec<Value>,
    pub metrics: Map<String, Value>,
    pub timeline: Timeline,
    pub history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupCounts {
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rollup {
    pub completion_percentage: u8,
    pub counts: RollupCounts,
    pub last_writer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub codex_events_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_evaluation_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_evaluation_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDocument {
    pub schema_version: String,
    pub plan_id: String,
    pub name: String,
    pub description: String,
    pub created_at: String,
    pub last_updated: String,
    pub created_by: String,
    pub version: u32,
    pub status: PlanStatus,
    pub tags: Vec<String>,
    pub context: Map<String, Value>,
    pub nodes: Vec<PlanNode>,
    pub rollup: Rollup,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PlanMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_metrics: Option<EvalMetrics>,
}

impl PlanDocument {
    pub fn primary_node(&self) -> Option<&PlanNode> {
        self.nodes.iter().find(|node| node.id == PRIMARY_NODE_ID)
    }
}

/// Everything the builder needs from one run; missing pieces default to failure.
#[derive(Debug, Clone)]
pub struct PlanInputs<'a> {
    pub plan_id: &'a str,
    pub prompt: &'a str,
    pub summary: &'a str,
    pub plan_status: PlanStatus,
    pub node_status: NodeStatus,
    pub outputs: Map<String, Value>,
    pub usage: Map<String, Value>,
    pub events_count: usize,
    pub error_payload: Option<ErrorPayload>,
    pub run_started: DateTime<Utc>,
    pub run_finished: DateTime<Utc>,
    pub duration_seconds: f64,
    pub notes: &'a str,
    pub evaluation: Option<&'a EvaluationPayload>,
    pub synthetic_nodes: Vec<PlanNode>,
}

pub(crate) fn round_millis(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

/// Summary shown as the plan name: first 80 characters of the prompt on one line.
pub fn summarize_prompt(prompt: &str) -> String {
    let head: String = prompt.chars().take(80).collect();
    let summary = head.replace('\n', " ");
    let summary = summary.trim();
    if summary.is_empty() {
        "Ad-hoc agent execution".to_string()
    } else {
        summary.to_string()
    }
}

pub fn build_metrics(
    usage: &Map<String, Value>,
    evaluation: Option<&EvaluationPayload>,
) -> Map<String, Value> {
    let mut metrics = Map::new();
    metrics.insert("usage".to_string(), Value::Object(usage.clone()));
    if let Some(evaluation) = evaluation {
        if let Some(score) = evaluation.score {
            metrics.insert("evaluation_score".to_string(), Value::from(score));
        }
        if !evaluation.usage.is_empty() {
            metrics.insert(
                "evaluation_usage".to_string(),
                Value::Object(evaluation.usage.clone()),
            );
        }
        if let Some(error) = evaluation.error.as_ref().filter(|e| !e.is_empty()) {
            metrics.insert("evaluation_error".to_string(), Value::String(error.clone()));
        }
    }
    metrics
}

fn eval_metrics(evaluation: Option<&EvaluationPayload>) -> Option<EvalMetrics> {
    let evaluation = evaluation?;
    let metrics = EvalMetrics {
        self_evaluation_score: evaluation.score,
        self_evaluation_error: evaluation.error.clone().filter(|e| !e.is_empty()),
    };
    (metrics.self_evaluation_score.is_some() || metrics.self_evaluation_error.is_some())
        .then_some(metrics)
}

pub fn build_plan_document(inputs: PlanInputs<'_>) -> PlanDocument {
    let created_iso = inputs.run_started.to_rfc3339();
    let finished_iso = inputs.run_finished.to_rfc3339();
    let node_status = match inputs.node_status {
        NodeStatus::Succeeded => NodeStatus::Succeeded,
        NodeStatus::Pending | NodeStatus::Failed => NodeStatus::Failed,
    };
    let summary = if inputs.summary.is_empty() {
        DEFAULT_SUMMARY.to_string()
    } else {
        inputs.summary.to_string()
    };

    let primary = PlanNode {
        id: PRIMARY_NODE_ID.to_string(),
        node_type: "agent".to_string(),
        summary: summary.clone(),
        depends_on: Vec::new(),
        status: node_status,
        attempt: 1,
        inputs: Map::from_iter([(
            "prompt".to_string(),
            Value::String(inputs.prompt.to_string()),
        )]),
        outputs: inputs.outputs,
        artifacts: Vec::new(),
        metrics: build_metrics(&inputs.usage, inputs.evaluation),
        timeline: Timeline::new(
            inputs.run_started,
            inputs.run_finished,
            inputs.duration_seconds,
        ),
        history: vec![HistoryEntry {
            attempt_id: 1,
            timestamp: finished_iso.clone(),
            status: node_status,
            notes: inputs.notes.to_string(),
        }],
        error: inputs.error_payload,
    };

    let mut nodes = vec![primary];
    for node in inputs.synthetic_nodes {
        if nodes.iter().any(|existing| existing.id == node.id) {
            continue;
        }
        nodes.push(node);
    }

    let counts = RollupCounts {
        succeeded: nodes
            .iter()
            .filter(|node| node.status == NodeStatus::Succeeded)
            .count(),
        failed: nodes
            .iter()
            .filter(|node| node.status == NodeStatus::Failed)
            .count(),
    };

    PlanDocument {
        schema_version: SCHEMA_VERSION.to_string(),
        plan_id: inputs.plan_id.to_string(),
        name: summary,
        description: inputs.prompt.to_string(),
        created_at: created_iso,
        last_updated: finished_iso,
        created_by: PLAN_WRITER.to_string(),
        version: 1,
        status: inputs.plan_status,
        tags: Vec::new(),
        context: Map::new(),
        nodes,
        rollup: Rollup {
            completion_percentage: if inputs.plan_status == PlanStatus::Completed {
                100
            } else {
                0
            },
            counts,
            last_writer: PLAN_WRITER.to_string(),
        },
        metadata: (inputs.events_count > 0).then_some(PlanMetadata {
            codex_events_count: inputs.events_count,
        }),
        eval_metrics: eval_metrics(inputs.evaluation),
    }
}
