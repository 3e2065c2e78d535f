use crate::adapter::AdapterResult;
use crate::orchestration::evaluation::EvaluationPayload;
use crate::orchestration::flow_spec::FlowSpecPayload;
use crate::orchestration::plan::{ErrorPayload, NodeStatus, PlanDocument, PlanNode, PlanStatus};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Initialize,
    InvokeModel,
    ParseFlowSpec,
    MaybeCompile,
    SelfEvaluate,
    SynthesizeNodes,
    BuildPlan,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Initialize => "initialize",
            Stage::InvokeModel => "invoke_model",
            Stage::ParseFlowSpec => "parse_flow_spec",
            Stage::MaybeCompile => "maybe_compile",
            Stage::SelfEvaluate => "self_evaluate",
            Stage::SynthesizeNodes => "synthesize_nodes",
            Stage::BuildPlan => "build_plan",
        }
    }

    /// Transition out of this stage; a failed invocation jumps to `BuildPlan`.
    pub fn next(self, state: &RunState) -> Option<Stage> {
        match self {
            Stage::Initialize => Some(Stage::InvokeModel),
            Stage::InvokeModel if state.plan_status == PlanStatus::Failed => Some(Stage::BuildPlan),
            Stage::InvokeModel => Some(Stage::ParseFlowSpec),
            Stage::ParseFlowSpec => Some(Stage::MaybeCompile),
            Stage::MaybeCompile => Some(Stage::SelfEvaluate),
            Stage::SelfEvaluate => Some(Stage::SynthesizeNodes),
            Stage::SynthesizeNodes => Some(Stage::BuildPlan),
            Stage::BuildPlan => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller asks one pipeline execution to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub prompt: String,
    pub summary: String,
    pub plan_id: String,
    pub request_afl: bool,
}

/// Accumulator threaded through every stage of one prompt execution.
#[derive(Debug, Clone)]
pub struct RunState {
    pub prompt: String,
    pub summary: String,
    pub plan_id: String,
    pub request_afl: bool,
    pub run_started: DateTime<Utc>,
    pub run_finished: DateTime<Utc>,
    pub duration_seconds: f64,
    pub plan_status: PlanStatus,
    pub node_status: NodeStatus,
    pub outputs: Map<String, Value>,
    pub usage: Map<String, Value>,
    pub events: Vec<Value>,
    pub notes: String,
    pub error_payload: Option<ErrorPayload>,
    pub evaluation_payload: Option<EvaluationPayload>,
    pub flow_spec_payload: Option<FlowSpecPayload>,
    pub flow_spec_source: Option<&'static str>,
    pub afl_text: Option<String>,
    pub synthetic_nodes: Vec<PlanNode>,
    pub agent_result: Option<AdapterResult>,
    pub plan_document: Option<PlanDocument>,
}

impl RunState {
    pub fn new(request: PromptRequest, now: DateTime<Utc>) -> Self {
        Self {
            prompt: request.prompt,
            summary: request.summary,
            plan_id: request.plan_id,
            request_afl: request.request_afl,
            run_started: now,
            run_finished: now,
            duration_seconds: 0.0,
            plan_status: PlanStatus::Pending,
            node_status: NodeStatus::Pending,
            outputs: Map::new(),
            usage: Map::new(),
            events: Vec::new(),
            notes: String::new(),
            error_payload: None,
            evaluation_payload: None,
            flow_spec_payload: None,
            flow_spec_source: None,
            afl_text: None,
            synthetic_nodes: Vec::new(),
            agent_result: None,
            plan_document: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.plan_status == PlanStatus::Completed
    }

    /// Folds a stage's partial update into the state. `outputs` is merged key by key.
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(v) = update.run_started {
            self.run_started = v;
        }
        if let Some(v) = update.run_finished {
            self.run_finished = v;
        }
        if let Some(v) = update.duration_seconds {
            self.duration_seconds = v;
        }
        if let Some(v) = update.plan_status {
            self.plan_status = v;
        }
        if let Some(v) = update.node_status {
            self.node_status = v;
        }
        self.outputs.extend(update.outputs);
        if let Some(v) = update.usage {
            self.usage = v;
        }
        if let Some(v) = update.events {
            self.events = v;
        }
        if let Some(v) = update.notes {
            self.notes = v;
        }
        if let Some(v) = update.error_payload {
            self.error_payload = Some(v);
        }
        if let Some(v) = update.evaluation_payload {
            self.evaluation_payload = Some(v);
        }
        if let Some(v) = update.flow_spec_payload {
            self.flow_spec_payload = Some(v);
        }
        if let Some(v) = update.flow_spec_source {
            self.flow_spec_source = Some(v);
        }
        if let Some(v) = update.afl_text {
            self.afl_text = Some(v);
        }
        if let Some(v) = update.synthetic_nodes {
            self.synthetic_nodes = v;
        }
        if let Some(v) = update.agent_result {
            self.agent_result = Some(v);
        }
        if let Some(v) = update.plan_document {
            self.plan_document = Some(v);
        }
    }
}

/// Partial update returned by a stage. Absent fields leave the state untouched.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub run_started: Option<DateTime<Utc>>,
    pub run_finished: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub plan_status: Option<PlanStatus>,
    pub node_status: Option<NodeStatus>,
    pub outputs: Map<String, Value>,
    pub usage: Option<Map<String, Value>>,
    pub events: Option<Vec<Value>>,
    pub notes: Option<String>,
    pub error_payload: Option<ErrorPayload>,
    pub evaluation_payload: Option<EvaluationPayload>,
    pub flow_spec_payload: Option<FlowSpecPayload>,
    pub flow_spec_source: Option<&'static str>,
    pub afl_text: Option<String>,
    pub synthetic_nodes: Option<Vec<PlanNode>>,
    pub agent_result: Option<AdapterResult>,
    pub plan_document: Option<PlanDocument>,
}

impl StateUpdate {
    pub fn is_empty(&self) -> bool {
        self.run_started.is_none()
            && self.run_finished.is_none()
            && self.duration_seconds.is_none()
            && self.plan_status.is_none()
            && self.node_status.is_none()
            && self.outputs.is_empty()
            && self.usage.is_none()
            && self.events.is_none()
            && self.notes.is_none()
            && self.error_payload.is_none()
            && self.evaluation_payload.is_none()
            && self.flow_spec_payload.is_none()
            && self.flow_spec_source.is_none()
            && self.afl_text.is_none()
            && self.synthetic_nodes.is_none()
            && self.agent_result.is_none()
            && self.plan_document.is_none()
    }

    pub fn output(mut self, key: &str, value: Value) -> Self {
        self.outputs.insert(key.to_string(), value);
        self
    }

    /// Stamps the finish time and elapsed seconds relative to `run_started`.
    pub fn timed(mut self, run_started: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        self.run_finished = Some(now);
        self.duration_seconds = Some(elapsed_seconds(run_started, now));
        self
    }
}

pub(crate) fn elapsed_seconds(started: DateTime<Utc>, finished: DateTime<Utc>) -> f64 {
    (finished - started)
        .num_microseconds()
        .map(|micros| micros as f64 / 1_000_000.0)
        .unwrap_or_default()
        .max(0.0)
}
