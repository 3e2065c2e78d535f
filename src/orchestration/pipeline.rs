use crate::adapter::{Adapter, RunOptions};
use crate::orchestration::evaluation::perform_self_evaluation;
use crate::orchestration::flow_spec::{compile_flow_spec, extract_flow_spec, ASSISTANT_SOURCE};
use crate::orchestration::plan::{
    build_plan_document, ErrorPayload, NodeStatus, PlanInputs, PlanStatus,
};
use crate::orchestration::run_state::{elapsed_seconds, PromptRequest, RunState, Stage, StateUpdate};
use crate::orchestration::synthetic_nodes::build_synthetic_nodes;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Drives one prompt through every stage against a single adapter.
///
/// The adapter is reused for the compiler and self-evaluation calls, so a
/// successful run issues at most three sequential invocations.
pub struct PromptPipeline<'a, A: Adapter + ?Sized> {
    adapter: &'a A,
    options: RunOptions,
}

impl<'a, A: Adapter + ?Sized> PromptPipeline<'a, A> {
    pub fn new(adapter: &'a A, options: RunOptions) -> Self {
        Self { adapter, options }
    }

    pub fn run(&self, request: PromptRequest) -> RunState {
        let mut state = RunState::new(request, Utc::now());
        let mut stage = Some(Stage::Initialize);
        while let Some(current) = stage {
            let update = self.execute(current, &state);
            if update.is_empty() {
                debug!(stage = %current, "stage skipped");
            } else {
                debug!(stage = %current, "stage applied");
            }
            state.apply(update);
            stage = current.next(&state);
        }
        state
    }

    fn execute(&self, stage: Stage, state: &RunState) -> StateUpdate {
        match stage {
            Stage::Initialize => initialize(),
            Stage::InvokeModel => self.invoke_model(state),
            Stage::ParseFlowSpec => parse_flow_spec(state),
            Stage::MaybeCompile => self.maybe_compile(state),
            Stage::SelfEvaluate => self.self_evaluate(state),
            Stage::SynthesizeNodes => synthesize_nodes(state),
            Stage::BuildPlan => build_plan(state),
        }
    }

    fn invoke_model(&self, state: &RunState) -> StateUpdate {
        info!(adapter = %self.adapter.kind(), plan_id = %state.plan_id, "invoking agent");
        match self.adapter.run(&state.prompt, &self.options) {
            Ok(result) => StateUpdate {
                plan_status: Some(PlanStatus::Completed),
                node_status: Some(NodeStatus::Succeeded),
                usage: Some(result.usage.clone()),
                events: Some(result.events.clone()),
                notes: Some("Agent invocation succeeded.".to_string()),
                agent_result: Some(result.clone()),
                ..StateUpdate::default()
            }
            .output("message", Value::String(result.message))
            .output("events", Value::Array(result.events))
            .timed(state.run_started, Utc::now()),
            Err(err) => {
                warn!(adapter = %self.adapter.kind(), error = %err, "agent invocation failed");
                StateUpdate {
                    plan_status: Some(PlanStatus::Failed),
                    node_status: Some(NodeStatus::Failed),
                    error_payload: Some(ErrorPayload {
                        message: err.to_string(),
                    }),
                    notes: Some(format!("Agent invocation failed: {err}")),
                    usage: Some(Default::default()),
                    events: Some(Vec::new()),
                    ..StateUpdate::default()
                }
                .output("events", Value::Array(Vec::new()))
                .timed(state.run_started, Utc::now())
            }
        }
    }

    fn maybe_compile(&self, state: &RunState) -> StateUpdate {
        if !state.is_completed() {
            return StateUpdate::default();
        }
        let needs_compile = state.flow_spec_payload.is_none()
            || (state.request_afl && state.afl_text.is_none());
        if !needs_compile {
            return StateUpdate::default();
        }

        let outcome = compile_flow_spec(self.adapter, &state.prompt, &self.options);
        let mut update =
            StateUpdate::default().output("flow_spec_compiler", outcome.diagnostics());
        if let Some(error) = &outcome.error {
            debug!(error = %error, "flow spec compiler reported an error");
            update = update.output("flow_spec_compiler_error", Value::String(error.clone()));
        }
        if let Some(afl) = outcome.agentflowlanguage().filter(|afl| !afl.is_empty()) {
            update.afl_text = Some(afl.to_string());
            update = update.output("agentflowlanguage", Value::String(afl.to_string()));
        }
        if let Some(payload) = outcome.flow_spec_payload {
            update = update
                .output("flow_spec", payload.flow_spec.to_value())
                .output("flow_spec_raw", Value::String(payload.raw_json.clone()))
                .output("flow_spec_source", Value::String(outcome.source.to_string()));
            update.flow_spec_source = Some(outcome.source);
            update.flow_spec_payload = Some(payload);
        }
        update.timed(state.run_started, Utc::now())
    }

    fn self_evaluate(&self, state: &RunState) -> StateUpdate {
        if !state.is_completed() {
            return StateUpdate::default();
        }
        let Some(result) = &state.agent_result else {
            return StateUpdate::default();
        };

        let evaluation =
            perform_self_evaluation(self.adapter, &state.prompt, &result.message, &self.options);
        if let Some(score) = evaluation.score {
            info!(score, "self-evaluation scored");
        }
        let outputs = Value::Object(evaluation.to_outputs());
        StateUpdate {
            evaluation_payload: Some(evaluation),
            ..StateUpdate::default()
        }
        .output("evaluation", outputs)
        .timed(state.run_started, Utc::now())
    }
}

fn initialize() -> StateUpdate {
    let now = Utc::now();
    StateUpdate {
        run_started: Some(now),
        run_finished: Some(now),
        duration_seconds: Some(0.0),
        plan_status: Some(PlanStatus::Pending),
        node_status: Some(NodeStatus::Pending),
        usage: Some(Default::default()),
        events: Some(Vec::new()),
        notes: Some("Agent invocation pending.".to_string()),
        ..StateUpdate::default()
    }
}

fn parse_flow_spec(state: &RunState) -> StateUpdate {
    if !state.is_completed() {
        return StateUpdate::default();
    }
    let Some(result) = &state.agent_result else {
        return StateUpdate::default();
    };
    let Some(payload) = extract_flow_spec(&result.message) else {
        debug!("assistant reply carried no flow spec");
        return StateUpdate::default();
    };

    let mut update = StateUpdate::default()
        .output("flow_spec", payload.flow_spec.to_value())
        .output("flow_spec_raw", Value::String(payload.raw_json.clone()))
        .output("flow_spec_source", Value::String(ASSISTANT_SOURCE.to_string()));
    if let Some(afl) = payload.agentflowlanguage.as_ref().filter(|afl| !afl.is_empty()) {
        update.afl_text = Some(afl.clone());
        update = update.output("agentflowlanguage", Value::String(afl.clone()));
    }
    update.flow_spec_source = Some(ASSISTANT_SOURCE);
    update.flow_spec_payload = Some(payload);
    update
}

fn synthesize_nodes(state: &RunState) -> StateUpdate {
    if !state.is_completed() {
        return StateUpdate::default();
    }
    let Some(payload) = &state.flow_spec_payload else {
        return StateUpdate::default();
    };

    let nodes = build_synthetic_nodes(&payload.flow_spec, state.run_started, state.run_finished);
    debug!(count = nodes.len(), "synthetic nodes built");
    let mut update = StateUpdate::default();
    if !nodes.is_empty() && !state.outputs.contains_key("flow_spec") {
        update = update.output("flow_spec", payload.flow_spec.to_value());
    }
    update.synthetic_nodes = Some(nodes);
    update
}

fn build_plan(state: &RunState) -> StateUpdate {
    let now = Utc::now();
    let (run_finished, duration_seconds) = if now > state.run_finished {
        (now, elapsed_seconds(state.run_started, now))
    } else {
        (state.run_finished, state.duration_seconds)
    };

    let mut outputs = state.outputs.clone();
    outputs
        .entry("events")
        .or_insert_with(|| Value::Array(state.events.clone()));

    let document = build_plan_document(PlanInputs {
        plan_id: &state.plan_id,
        prompt: &state.prompt,
        summary: &state.summary,
        plan_status: state.plan_status,
        node_status: state.node_status,
        outputs,
        usage: state.usage.clone(),
        events_count: state.events.len(),
        error_payload: state.error_payload.clone(),
        run_started: state.run_started,
        run_finished,
        duration_seconds,
        notes: &state.notes,
        evaluation: state.evaluation_payload.as_ref(),
        synthetic_nodes: state.synthetic_nodes.clone(),
    });
    info!(plan_id = %document.plan_id, status = %document.status, "plan document built");

    StateUpdate {
        run_finished: Some(run_finished),
        duration_seconds: Some(duration_seconds),
        plan_document: Some(document),
        ..StateUpdate::default()
    }
}
