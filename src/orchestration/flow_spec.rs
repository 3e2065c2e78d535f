use crate::adapter::{Adapter, RunOptions};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::debug;

pub const COMPILER_SOURCE: &str = "agentflowlanguage_compiler";
pub const ASSISTANT_SOURCE: &str = "assistant";

const FLOW_SPEC_COMPILER_PROMPT: &str = r#"You are the AgentFlowLanguage compiler. Convert the provided pseudo code or natural language routine into a structured flow description.

Return your answer as a markdown ```json``` block containing an object with exactly these keys:
  - "flow_spec": a JSON object with "nodes" (list) and "edges" (list) describing the control flow. Each node must include "id", "label", and "type".
  - "agentflowlanguage": a multiline string that mirrors the flow using AgentFlowLanguage syntax with constructs such as while(), if(), else, and semicolon-terminated actions.

Flow spec requirements:
  * Use the node types "action", "branch", "loop", or other canonical AgentFlow types.
  * Provide "on_true" / "on_false" targets for branch and loop nodes when available.
  * Edges must include "source" and "target"; include a short "label" when it clarifies the path (e.g., "true", "false", "loop").

Pseudo-code input:
<<<
{pseudo_code}
>>>
"#;

fn fence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)```json(?:\s+flow_spec)?\s*(\{[\s\S]*?\})\s*```")
            .unwrap_or_else(|err| panic!("flow spec fence pattern is invalid: {err}"))
    })
}

/// A `{nodes, edges}` graph description, kept verbatim as provider JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FlowSpec(Map<String, Value>);

#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub id: String,
    pub label: Option<String>,
    pub node_type: String,
    /// The provider entry including any extra fields.
    pub entry: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeSpec {
    pub source: String,
    pub target: String,
    pub label: Option<String>,
}

fn scalar_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

impl FlowSpec {
    /// Valid only when `nodes` is a non-empty list.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(map) = value else {
            return None;
        };
        match map.get("nodes") {
            Some(Value::Array(nodes)) if !nodes.is_empty() => Some(Self(map)),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Node entries that carry an `id` (or `name`), in declaration order.
    pub fn nodes(&self) -> Vec<NodeSpec> {
        let Some(Value::Array(entries)) = self.0.get("nodes") else {
            return Vec::new();
        };
        entries
            .iter()
            .filter(|entry| entry.is_object())
            .filter_map(|entry| {
                let id = scalar_text(entry.get("id")).or_else(|| scalar_text(entry.get("name")))?;
                Some(NodeSpec {
                    label: scalar_text(entry.get("label")).or_else(|| scalar_text(entry.get("name"))),
                    node_type: scalar_text(entry.get("type")).unwrap_or_else(|| "flow".to_string()),
                    entry: entry.clone(),
                    id,
                })
            })
            .collect()
    }

    /// Edges with both endpoints present; `from`/`to` are accepted as synonyms.
    pub fn edges(&self) -> Vec<EdgeSpec> {
        let Some(Value::Array(entries)) = self.0.get("edges") else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|edge| {
                let source =
                    scalar_text(edge.get("source")).or_else(|| scalar_text(edge.get("from")))?;
                let target = scalar_text(edge.get("target")).or_else(|| scalar_text(edge.get("to")))?;
                Some(EdgeSpec {
                    source,
                    target,
                    label: scalar_text(edge.get("label")),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowSpecPayload {
    pub flow_spec: FlowSpec,
    pub raw_json: String,
    pub agentflowlanguage: Option<String>,
}

/// Pulls the first fenced json block out of assistant text. Absence is not an error.
pub fn extract_flow_spec(message: &str) -> Option<FlowSpecPayload> {
    if message.is_empty() {
        return None;
    }
    let captures = fence_pattern().captures(message)?;
    let candidate = captures.get(1)?.as_str().trim();
    let loaded: Value = serde_json::from_str(candidate).ok()?;

    let mut agentflowlanguage = None;
    let flow_data = match loaded {
        Value::Object(mut map) => {
            agentflowlanguage = map
                .get("agentflowlanguage")
                .and_then(Value::as_str)
                .filter(|text| !text.trim().is_empty())
                .map(str::to_string);
            match map.remove("flow_spec") {
                Some(Value::Null) | None => Value::Object(map),
                Some(inner) => inner,
            }
        }
        other => other,
    };

    Some(FlowSpecPayload {
        flow_spec: FlowSpec::from_value(flow_data)?,
        raw_json: candidate.to_string(),
        agentflowlanguage,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompilationOutcome {
    pub flow_spec_payload: Option<FlowSpecPayload>,
    pub message: String,
    pub events: Vec<Value>,
    pub usage: Map<String, Value>,
    pub source: &'static str,
    pub error: Option<String>,
}

impl CompilationOutcome {
    pub fn agentflowlanguage(&self) -> Option<&str> {
        self.flow_spec_payload
            .as_ref()
            .and_then(|payload| payload.agentflowlanguage.as_deref())
    }

    /// Diagnostics block recorded under `outputs.flow_spec_compiler`.
    pub fn diagnostics(&self) -> Value {
        let mut map = Map::new();
        map.insert("message".to_string(), Value::String(self.message.clone()));
        map.insert("usage".to_string(), Value::Object(self.usage.clone()));
        map.insert("events".to_string(), Value::Array(self.events.clone()));
        map.insert("source".to_string(), Value::String(self.source.to_string()));
        Value::Object(map)
    }
}

pub fn compiler_prompt(pseudo_code: &str) -> String {
    FLOW_SPEC_COMPILER_PROMPT.replace("{pseudo_code}", pseudo_code.trim())
}

/// Asks the adapter to translate pseudo code into a flow spec. Issues exactly one call.
pub fn compile_flow_spec<A: Adapter + ?Sized>(
    adapter: &A,
    pseudo_code: &str,
    options: &RunOptions,
) -> CompilationOutcome {
    let compilation = match adapter.run(&compiler_prompt(pseudo_code), options) {
        Ok(result) => result,
        Err(err) => {
            debug!(error = %err, "flow spec compiler call failed");
            return CompilationOutcome {
                flow_spec_payload: None,
                message: String::new(),
                events: Vec::new(),
                usage: Map::new(),
                source: COMPILER_SOURCE,
                error: Some(format!("AgentFlowLanguage compilation failed: {err}")),
            };
        }
    };

    let payload = extract_flow_spec(&compilation.message);
    let error = payload
        .is_none()
        .then(|| "Compiler response did not contain a valid flow_spec.".to_string());
    CompilationOutcome {
        flow_spec_payload: payload,
        message: compilation.message,
        events: compilation.events,
        usage: compilation.usage,
        source: COMPILER_SOURCE,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterError, AdapterKind, AdapterResult};
    use serde_json::json;
    use std::cell::RefCell;

    struct Scripted {
        reply: Result<String, String>,
        prompts: RefCell<Vec<String>>,
    }

    impl Adapter for Scripted {
        fn kind(&self) -> AdapterKind {
            AdapterKind::Mock
        }

        fn run(&self, prompt: &str, _options: &RunOptions) -> Result<AdapterResult, AdapterError> {
            self.prompts.borrow_mut().push(prompt.to_string());
            match &self.reply {
                Ok(message) => Ok(AdapterResult {
                    message: message.clone(),
                    events: vec![json!({"type": "turn.completed"})],
                    usage: Map::from_iter([("output_tokens".to_string(), json!(9))]),
                }),
                Err(stderr) => Err(AdapterError::NonZeroExit {
                    provider: AdapterKind::Mock,
                    exit_code: 2,
                    stderr: stderr.clone(),
                    log: None,
                }),
            }
        }
    }

    fn fenced(body: &Value) -> String {
        format!("Plan below.\n```json\n{}\n```\nDone.", serde_json::to_string_pretty(body).unwrap())
    }

    #[test]
    fn extracts_wrapped_flow_spec_and_afl() {
        let flow = json!({
            "nodes": [{"id": "a", "label": "A", "type": "action", "retries": 2}],
            "edges": []
        });
        let message = fenced(&json!({"flow_spec": flow, "agentflowlanguage": "a();\n"}));

        let payload = extract_flow_spec(&message).expect("payload");
        assert_eq!(payload.flow_spec.to_value(), flow);
        assert_eq!(payload.agentflowlanguage.as_deref(), Some("a();\n"));
        assert!(payload.raw_json.starts_with('{'));
        assert!(payload.raw_json.ends_with('}'));
    }

    #[test]
    fn bare_flow_spec_and_annotated_fence_are_accepted() {
        let message = "```JSON flow_spec\n{\"nodes\": [{\"id\": \"x\"}]}\n```";
        let payload = extract_flow_spec(message).expect("payload");
        assert_eq!(payload.flow_spec.nodes()[0].id, "x");
        assert_eq!(payload.flow_spec.nodes()[0].node_type, "flow");
        assert!(payload.agentflowlanguage.is_none());
    }

    #[test]
    fn only_the_first_fenced_block_is_considered() {
        let message = "```json\n{\"nodes\": []}\n```\n```json\n{\"nodes\": [{\"id\": \"late\"}]}\n```";
        assert!(extract_flow_spec(message).is_none());
    }

    #[test]
    fn absent_or_invalid_specs_yield_none() {
        assert!(extract_flow_spec("").is_none());
        assert!(extract_flow_spec("no fences here").is_none());
        assert!(extract_flow_spec("```json\n{not json}\n```").is_none());
        assert!(extract_flow_spec("```json\n{\"edges\": []}\n```").is_none());
        assert!(extract_flow_spec("```json\n{\"flow_spec\": [1, 2]}\n```").is_none());
        assert!(extract_flow_spec("```json\n{\"nodes\": \"a,b\"}\n```").is_none());
        assert!(extract_flow_spec("```python\n{\"nodes\": [{\"id\": \"a\"}]}\n```").is_none());
    }

    #[test]
    fn edges_accept_from_to_synonyms_and_skip_incomplete() {
        let spec = FlowSpec::from_value(json!({
            "nodes": [{"id": 1}, {"name": "named"}, {"label": "no id"}],
            "edges": [
                {"from": "1", "to": "named", "label": "next"},
                {"source": "named"},
                "not an edge"
            ]
        }))
        .expect("valid");

        let nodes = spec.nodes();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, "1");
        assert_eq!(nodes[1].id, "named");
        assert_eq!(nodes[1].label.as_deref(), Some("named"));

        assert_eq!(
            spec.edges(),
            vec![EdgeSpec {
                source: "1".to_string(),
                target: "named".to_string(),
                label: Some("next".to_string()),
            }]
        );
    }

    #[test]
    fn compiler_prompt_embeds_trimmed_pseudo_code() {
        let prompt = compiler_prompt("  while(x) { step(); }  \n");
        assert!(prompt.contains("<<<\nwhile(x) { step(); }\n>>>"));
        assert!(prompt.contains("\"flow_spec\""));
        assert!(prompt.contains("\"agentflowlanguage\""));
    }

    #[test]
    fn compile_returns_payload_from_adapter_reply() {
        let adapter = Scripted {
            reply: Ok(fenced(&json!({
                "flow_spec": {"nodes": [{"id": "loop", "type": "loop"}], "edges": []},
                "agentflowlanguage": "while(true) { loop(); }"
            }))),
            prompts: RefCell::new(Vec::new()),
        };
        let outcome = compile_flow_spec(&adapter, "repeat forever", &RunOptions::default());
        assert_eq!(adapter.prompts.borrow().len(), 1);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.agentflowlanguage(), Some("while(true) { loop(); }"));
        assert_eq!(outcome.source, COMPILER_SOURCE);
        assert_eq!(outcome.diagnostics()["usage"]["output_tokens"], json!(9));
    }

    #[test]
    fn compile_reports_errors_as_strings() {
        let adapter = Scripted {
            reply: Ok("I cannot do that.".to_string()),
            prompts: RefCell::new(Vec::new()),
        };
        let outcome = compile_flow_spec(&adapter, "x", &RunOptions::default());
        assert!(outcome.flow_spec_payload.is_none());
        assert_eq!(
            outcome.error.as_deref(),
            Some("Compiler response did not contain a valid flow_spec.")
        );
        assert_eq!(outcome.message, "I cannot do that.");

        let failing = Scripted {
            reply: Err("quota exceeded".to_string()),
            prompts: RefCell::new(Vec::new()),
        };
        let outcome = compile_flow_spec(&failing, "x", &RunOptions::default());
        let error = outcome.error.expect("error");
        assert!(error.starts_with("AgentFlowLanguage compilation failed:"));
        assert!(error.contains("quota exceeded"));
        assert!(outcome.message.is_empty());
    }
}
