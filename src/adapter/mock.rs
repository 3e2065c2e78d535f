use crate::adapter::{Adapter, AdapterError, AdapterKind, AdapterResult, RunOptions};
use serde_json::{json, Map, Value};

const MOCK_AFL: &str = "start();\ngreet();\nend();\n";

/// Deterministic adapter that never spawns a process.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockAdapter;

impl MockAdapter {
    pub fn flow_spec() -> Value {
        json!({
            "nodes": [
                {"id": "start", "type": "action", "label": "Start", "name": "start"},
                {"id": "greet", "type": "action", "label": "Say Hello", "name": "greet"},
                {"id": "end", "type": "action", "label": "End", "name": "end"}
            ],
            "edges": [
                {"source": "start", "target": "greet", "label": "begin"},
                {"source": "greet", "target": "end", "label": "finish"}
            ]
        })
    }

    pub fn message_for(prompt: &str) -> String {
        let lower = prompt.to_lowercase();
        if lower.contains("flow") || lower.contains("workflow") {
            let body = json!({
                "flow_spec": Self::flow_spec(),
                "agentflowlanguage": MOCK_AFL,
            });
            let pretty = serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string());
            return format!(
                "Here is a simple flow for your request:\n\n```json\n{pretty}\n```\n\nThis flow has three steps: start, greet (say hello), and end."
            );
        }
        let head: String = prompt.chars().take(50).collect();
        format!(
            "Mock response: I received your prompt '{head}...' and here is a canned reply. This is a test response from the mock adapter."
        )
    }
}

impl Adapter for MockAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Mock
    }

    fn run(&self, prompt: &str, _options: &RunOptions) -> Result<AdapterResult, AdapterError> {
        let message = Self::message_for(prompt);
        let events = vec![
            json!({"type": "thread.started", "thread_id": "mock-thread-123"}),
            json!({"type": "item.completed", "item": {"type": "agent_message", "text": message}}),
            json!({"type": "turn.completed", "usage": {"input_tokens": 10, "output_tokens": 25}}),
        ];
        let mut usage = Map::new();
        usage.insert("input_tokens".to_string(), json!(10));
        usage.insert("output_tokens".to_string(), json!(25));
        usage.insert("total_tokens".to_string(), json!(35));

        Ok(AdapterResult {
            message,
            events,
            usage,
        })
    }
}
