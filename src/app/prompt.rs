use crate::adapter::{credential_available, Adapter, AgentAdapter, RunOptions};
use crate::config::{ConfigError, Settings};
use crate::orchestration::plan::{
    build_plan_document, summarize_prompt, ErrorPayload, NodeStatus, PlanDocument, PlanInputs,
    PlanStatus,
};
use crate::orchestration::plan_store::{
    afl_path_for, plan_base_name, resolve_plan_path, write_afl, write_plan,
};
use crate::orchestration::run_state::{elapsed_seconds, PromptRequest, RunState};
use crate::orchestration::{OrchestratorError, PromptPipeline};
use crate::shared::logging::record_run_event;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Result of one prompt execution after its artifacts hit the disk.
#[derive(Debug, Clone)]
pub struct PromptExecution {
    pub plan_path: PathBuf,
    pub plan_document: PlanDocument,
    pub afl_path: Option<PathBuf>,
    pub plan_status: PlanStatus,
    pub error_payload: Option<ErrorPayload>,
}

impl PromptExecution {
    pub fn failed(&self) -> bool {
        self.plan_status == PlanStatus::Failed
    }
}

/// Builds the configured adapter, rejecting providers whose credential is missing.
pub fn prepare_adapter(settings: &Settings) -> Result<AgentAdapter, ConfigError> {
    let kind = settings.adapter_kind()?;
    if let Some(variable) = kind.required_credential() {
        if !credential_available(kind, settings) {
            return Err(ConfigError::MissingCredential {
                adapter: kind.to_string(),
                variable,
            });
        }
    }
    Ok(AgentAdapter::from_settings(kind, settings))
}

pub fn run_options(settings: &Settings) -> RunOptions {
    RunOptions {
        timeout: settings.timeout(),
        working_directory: None,
    }
}

struct RunFailure<'a> {
    plan_id: &'a str,
    prompt: &'a str,
    summary: &'a str,
    started: DateTime<Utc>,
    message: String,
    notes: String,
}

fn failure_document(failure: RunFailure<'_>) -> PlanDocument {
    let finished = Utc::now();
    build_plan_document(PlanInputs {
        plan_id: failure.plan_id,
        prompt: failure.prompt,
        summary: failure.summary,
        plan_status: PlanStatus::Failed,
        node_status: NodeStatus::Failed,
        outputs: Map::from_iter([("events".to_string(), Value::Array(Vec::new()))]),
        usage: Map::new(),
        events_count: 0,
        error_payload: Some(ErrorPayload {
            message: failure.message,
        }),
        run_started: failure.started,
        run_finished: finished,
        duration_seconds: elapsed_seconds(failure.started, finished),
        notes: &failure.notes,
        evaluation: None,
        synthetic_nodes: Vec::new(),
    })
}

fn afl_text(state: &RunState) -> Option<String> {
    state
        .afl_text
        .clone()
        .or_else(|| {
            state
                .outputs
                .get("agentflowlanguage")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .filter(|text| !text.trim().is_empty())
}

/// Runs the pipeline once and persists exactly one plan document, plus the
/// AgentFlowLanguage file when requested and available.
pub fn execute_prompt_run<A: Adapter + ?Sized>(
    adapter: &A,
    prompt: &str,
    request_afl: bool,
    output_dir: &Path,
    options: RunOptions,
) -> Result<PromptExecution, OrchestratorError> {
    let started = Utc::now();
    let summary = summarize_prompt(prompt);
    let (plan_path, plan_id) = resolve_plan_path(output_dir, &plan_base_name(started))?;
    record_run_event(
        output_dir,
        "run.started",
        &[
            ("plan_id", Value::String(plan_id.clone())),
            ("adapter", Value::String(adapter.kind().to_string())),
        ],
    );

    let state = PromptPipeline::new(adapter, options).run(PromptRequest {
        prompt: prompt.to_string(),
        summary: summary.clone(),
        plan_id: plan_id.clone(),
        request_afl,
    });

    let mut plan_document = match state.plan_document.clone() {
        Some(document) => document,
        None => failure_document(RunFailure {
            plan_id: &plan_id,
            prompt,
            summary: &summary,
            started,
            message: "Pipeline produced no plan document.".to_string(),
            notes: "Pipeline produced no plan document.".to_string(),
        }),
    };

    match write_plan(&plan_path, &plan_document) {
        Ok(()) => {}
        Err(OrchestratorError::Encode(reason)) => {
            warn!(plan_id = %plan_id, reason = %reason, "plan document could not be encoded");
            plan_document = failure_document(RunFailure {
                plan_id: &plan_id,
                prompt,
                summary: &summary,
                started,
                message: format!("Unexpected pipeline error: {reason}"),
                notes: "Pipeline error: plan encoding".to_string(),
            });
            write_plan(&plan_path, &plan_document)?;
        }
        Err(err) => return Err(err),
    }
    info!(path = %plan_path.display(), status = %plan_document.status, "plan artifact written");
    record_run_event(
        output_dir,
        "plan.written",
        &[
            ("plan_id", Value::String(plan_id.clone())),
            ("path", Value::String(plan_path.display().to_string())),
        ],
    );

    let mut afl_path = None;
    if request_afl {
        if let Some(text) = afl_text(&state) {
            let path = afl_path_for(&plan_path);
            write_afl(&path, &text)?;
            record_run_event(
                output_dir,
                "afl.written",
                &[
                    ("plan_id", Value::String(plan_id.clone())),
                    ("path", Value::String(path.display().to_string())),
                ],
            );
            afl_path = Some(path);
        }
    }

    let plan_status = plan_document.status;
    let error_payload = plan_document
        .primary_node()
        .and_then(|node| node.error.clone())
        .or(state.error_payload);
    record_run_event(
        output_dir,
        "run.finished",
        &[
            ("plan_id", Value::String(plan_id)),
            ("status", Value::String(plan_status.to_string())),
        ],
    );

    Ok(PromptExecution {
        plan_path,
        plan_document,
        afl_path,
        plan_status,
        error_payload,
    })
}

/// Lines and exit code produced by one cli invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliReport {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: i32,
}

pub fn handle_prompt(prompt: &str, request_afl: bool, settings: &Settings) -> CliReport {
    let mut report = CliReport::default();
    let adapter = match prepare_adapter(settings) {
        Ok(adapter) => adapter,
        Err(err) => {
            report.stderr.push(format!("Configuration error: {err}"));
            report.exit_code = 1;
            return report;
        }
    };

    let execution = match execute_prompt_run(
        &adapter,
        prompt,
        request_afl,
        &settings.output_dir,
        run_options(settings),
    ) {
        Ok(execution) => execution,
        Err(err) => {
            report
                .stderr
                .push(format!("Failed to write plan artifact: {err}"));
            report.exit_code = 1;
            return report;
        }
    };

    report.stdout.push(format!(
        "Wrote plan artifact: {}",
        execution.plan_path.display()
    ));
    if request_afl {
        match &execution.afl_path {
            Some(path) => report.stdout.push(format!(
                "Wrote AgentFlowLanguage artifact: {}",
                path.display()
            )),
            None => report.stderr.push(
                "AgentFlowLanguage output requested but no representation was generated."
                    .to_string(),
            ),
        }
    }
    if execution.failed() {
        report
            .stderr
            .push("Execution failed; inspect the YAML artifact for details.".to_string());
        report.exit_code = 1;
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterError, AdapterKind, AdapterResult, MockAdapter};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn missing_credential_is_a_configuration_error() {
        let settings = Settings {
            adapter: "claude".to_string(),
            anthropic_api_key: None,
            ..Settings::default()
        };
        let err = prepare_adapter(&settings).expect_err("credential required");
        assert!(matches!(
            err,
            ConfigError::MissingCredential { variable: "ANTHROPIC_API_KEY", .. }
        ));
    }

    #[test]
    fn mock_run_writes_plan_afl_and_run_log() {
        let dir = tempdir().expect("tempdir");
        let execution = execute_prompt_run(
            &MockAdapter,
            "Sketch a flow for onboarding",
            true,
            dir.path(),
            RunOptions::default(),
        )
        .expect("execution");

        assert!(!execution.failed());
        assert!(execution.plan_path.exists());
        let afl_path = execution.afl_path.expect("afl path");
        assert_eq!(
            fs::read_to_string(afl_path).expect("afl"),
            "start();\ngreet();\nend();\n"
        );

        let log = fs::read_to_string(dir.path().join("logs/agentflow.log")).expect("run log");
        let events: Vec<String> = log
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|value| value["event"].as_str().map(str::to_string))
            .collect();
        assert_eq!(
            events,
            vec!["run.started", "plan.written", "afl.written", "run.finished"]
        );
    }

    struct FailingAdapter;

    impl Adapter for FailingAdapter {
        fn kind(&self) -> AdapterKind {
            AdapterKind::Codex
        }

        fn run(&self, _prompt: &str, _options: &RunOptions) -> Result<AdapterResult, AdapterError> {
            Err(AdapterError::MissingMessage {
                provider: AdapterKind::Codex,
            })
        }
    }

    #[test]
    fn failed_runs_still_write_one_plan() {
        let dir = tempdir().expect("tempdir");
        let execution = execute_prompt_run(
            &FailingAdapter,
            "Generate summary",
            true,
            dir.path(),
            RunOptions::default(),
        )
        .expect("execution");

        assert!(execution.failed());
        assert!(execution.afl_path.is_none());
        let message = execution.error_payload.expect("error").message;
        assert!(message.contains("without a final assistant message"), "{message}");
        let yaml_files = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "yaml"))
            .count();
        assert_eq!(yaml_files, 1);
    }
}
