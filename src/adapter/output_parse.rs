use crate::adapter::{AdapterError, AdapterKind, AdapterResult};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputShape {
    /// One JSON document with a `content` array of typed blocks.
    SingleJson,
    /// JSON-lines events; the first unparseable line is an error.
    JsonLinesStrict,
    /// JSON-lines events; the first unparseable line switches to raw stdout.
    JsonLinesLenient,
}

fn parse_failure(provider: AdapterKind, reason: String) -> AdapterError {
    AdapterError::ParseFailure {
        provider,
        reason,
        log: None,
    }
}

fn usage_map(value: Option<&Value>) -> Map<String, Value> {
    value
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

pub fn parse_single_json(provider: AdapterKind, stdout: &str) -> Result<AdapterResult, AdapterError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(AdapterError::EmptyOutput { provider });
    }

    let payload: Value = serde_json::from_str(trimmed)
        .map_err(|err| parse_failure(provider, format!("invalid json response: {err}")))?;

    let mut parts = Vec::new();
    if let Some(blocks) = payload.get("content").and_then(Value::as_array) {
        for block in blocks {
            let is_text = block
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|kind| kind.eq_ignore_ascii_case("text"));
            if !is_text {
                continue;
            }
            if let Some(text) = block.get("text").and_then(Value::as_str) {
                let text = text.trim();
                if !text.is_empty() {
                    parts.push(text.to_string());
                }
            }
        }
    }

    let mut message = parts.join("\n\n");
    if message.is_empty() {
        if let Some(candidate) = payload.get("message").and_then(Value::as_str) {
            message = candidate.trim().to_string();
        }
    }
    if message.is_empty() {
        return Err(AdapterError::MissingMessage { provider });
    }

    Ok(AdapterResult {
        message,
        events: Vec::new(),
        usage: usage_map(payload.get("usage")),
    })
}

fn is_assistant_item(event: &Value) -> Option<&Value> {
    let item = event.get("item")?;
    match item.get("type").and_then(Value::as_str) {
        Some("agent_message") | Some("assistant_message") => Some(item),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct EventStream {
    events: Vec<Value>,
    message: Option<String>,
    usage: Map<String, Value>,
}

impl EventStream {
    fn absorb(&mut self, event: Value) {
        if let Some(item) = is_assistant_item(&event) {
            let text = item.get("text").and_then(Value::as_str).unwrap_or_default();
            self.message = Some(text.to_string());
        }
        if event.get("type").and_then(Value::as_str) == Some("turn.completed") {
            self.usage = usage_map(event.get("usage"));
        }
        self.events.push(event);
    }
}

pub fn parse_jsonl_strict(provider: AdapterKind, stdout: &str) -> Result<AdapterResult, AdapterError> {
    if stdout.trim().is_empty() {
        return Err(AdapterError::EmptyOutput { provider });
    }

    let mut stream = EventStream::default();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: Value = serde_json::from_str(line)
            .map_err(|err| parse_failure(provider, format!("invalid jsonl event: {err}")))?;
        stream.absorb(event);
    }

    match stream.message {
        Some(message) if !message.trim().is_empty() => Ok(AdapterResult {
            message,
            events: stream.events,
            usage: stream.usage,
        }),
        _ => Err(AdapterError::MissingMessage { provider }),
    }
}

pub fn parse_jsonl_lenient(provider: AdapterKind, stdout: &str) -> Result<AdapterResult, AdapterError> {
    let raw = stdout.trim();
    if raw.is_empty() {
        return Err(AdapterError::EmptyOutput { provider });
    }

    let mut stream = EventStream::default();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(event) => stream.absorb(event),
            Err(_) => {
                // Plain-text output: discard parsed events and keep stdout verbatim.
                return Ok(AdapterResult {
                    message: raw.to_string(),
                    events: Vec::new(),
                    usage: Map::new(),
                });
            }
        }
    }

    let message = match stream.message {
        Some(message) if !message.trim().is_empty() => message,
        _ => raw.to_string(),
    };
    Ok(AdapterResult {
        message,
        events: stream.events,
        usage: stream.usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_json_joins_text_blocks_in_order() {
        let stdout = json!({
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "  First block. "},
                {"type": "tool_use", "text": "ignored"},
                {"type": "TEXT", "text": "Second block."},
                {"type": "text", "text": "   "}
            ],
            "usage": {"input_tokens": 5, "output_tokens": 7}
        })
        .to_string();

        let result = parse_single_json(AdapterKind::Claude, &stdout).expect("parsed");
        assert_eq!(result.message, "First block.\n\nSecond block.");
        assert_eq!(result.usage.get("output_tokens"), Some(&json!(7)));
        assert!(result.events.is_empty());
    }

    #[test]
    fn single_json_falls_back_to_top_level_message() {
        let stdout = r#"{"message": " plain answer ", "content": []}"#;
        let result = parse_single_json(AdapterKind::Claude, stdout).expect("parsed");
        assert_eq!(result.message, "plain answer");
        assert!(result.usage.is_empty());
    }

    #[test]
    fn single_json_errors_are_distinct() {
        assert!(matches!(
            parse_single_json(AdapterKind::Claude, "  \n"),
            Err(AdapterError::EmptyOutput { .. })
        ));
        assert!(matches!(
            parse_single_json(AdapterKind::Claude, "not json"),
            Err(AdapterError::ParseFailure { .. })
        ));
        assert!(matches!(
            parse_single_json(AdapterKind::Claude, r#"{"content": [{"type": "image"}]}"#),
            Err(AdapterError::MissingMessage { .. })
        ));
    }

    #[test]
    fn jsonl_last_assistant_message_and_last_usage_win() {
        let stdout = [
            r#"{"type":"thread.started","thread_id":"abc"}"#,
            r#"{"type":"item.completed","item":{"type":"agent_message","text":"first"}}"#,
            r#"{"type":"turn.completed","usage":{"output_tokens":1}}"#,
            "",
            r#"{"type":"item.completed","item":{"type":"assistant_message","text":"second"}}"#,
            r#"{"type":"item.completed","item":{"type":"reasoning","text":"thinking"}}"#,
            r#"{"type":"turn.completed","usage":{"output_tokens":42}}"#,
        ]
        .join("\n");

        for parse in [parse_jsonl_strict, parse_jsonl_lenient] {
            let result = parse(AdapterKind::Codex, &stdout).expect("parsed");
            assert_eq!(result.message, "second");
            assert_eq!(result.usage, json!({"output_tokens": 42}).as_object().cloned().unwrap());
            assert_eq!(result.events.len(), 6);
        }
    }

    #[test]
    fn strict_jsonl_fails_on_first_bad_line() {
        let stdout = "{\"type\":\"item.completed\",\"item\":{\"type\":\"agent_message\",\"text\":\"ok\"}}\n{not-json}\n";
        match parse_jsonl_strict(AdapterKind::Codex, stdout) {
            Err(AdapterError::ParseFailure { reason, .. }) => {
                assert!(reason.starts_with("invalid jsonl event"))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn strict_jsonl_requires_agent_message() {
        let stdout = r#"{"type":"turn.completed","usage":{}}"#;
        assert!(matches!(
            parse_jsonl_strict(AdapterKind::Codex, stdout),
            Err(AdapterError::MissingMessage { .. })
        ));
        assert!(matches!(
            parse_jsonl_strict(AdapterKind::Codex, ""),
            Err(AdapterError::EmptyOutput { .. })
        ));
    }

    #[test]
    fn lenient_jsonl_falls_back_to_raw_stdout_and_drops_events() {
        let stdout = "{\"type\":\"item.completed\",\"item\":{\"type\":\"agent_message\",\"text\":\"ok\"}}\nHello from plain text\n";
        let result = parse_jsonl_lenient(AdapterKind::Copilot, stdout).expect("parsed");
        assert_eq!(result.message, stdout.trim());
        assert!(result.events.is_empty());
        assert!(result.usage.is_empty());
    }

    #[test]
    fn lenient_jsonl_without_message_uses_stdout_but_keeps_events() {
        let stdout = r#"{"type":"turn.completed","usage":{"input_tokens":3}}"#;
        let result = parse_jsonl_lenient(AdapterKind::Gemini, stdout).expect("parsed");
        assert_eq!(result.message, stdout);
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.usage.get("input_tokens"), Some(&json!(3)));
    }
}
