use crate::adapter::{Adapter, RunOptions};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::debug;

const JUSTIFICATION_KEYWORDS: [&str; 3] = ["reason", "justification", "rationale"];

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[0-9]+(?:\.[0-9]+)?")
            .unwrap_or_else(|err| panic!("score pattern is invalid: {err}"))
    })
}

fn numeric_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[0-9]+(?:\.[0-9]+)?$")
            .unwrap_or_else(|err| panic!("numeric line pattern is invalid: {err}"))
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvaluation {
    pub score: Option<f64>,
    pub justification: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EvaluationPayload {
    pub score: Option<f64>,
    pub justification: Option<String>,
    pub raw_message: String,
    pub events: Vec<Value>,
    pub usage: Map<String, Value>,
    pub error: Option<String>,
}

impl EvaluationPayload {
    fn failed(error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Fragment merged into `outputs.evaluation`.
    pub fn to_outputs(&self) -> Map<String, Value> {
        let mut outputs = Map::new();
        if let Some(score) = self.score {
            outputs.insert("score".to_string(), Value::from(score));
        }
        if let Some(justification) = self.justification.as_ref().filter(|j| !j.is_empty()) {
            outputs.insert(
                "justification".to_string(),
                Value::String(justification.clone()),
            );
        }
        if let Some(error) = self.error.as_ref().filter(|e| !e.is_empty()) {
            outputs.insert("error".to_string(), Value::String(error.clone()));
        }
        outputs.insert(
            "raw_message".to_string(),
            Value::String(self.raw_message.clone()),
        );
        outputs.insert("events".to_string(), Value::Array(self.events.clone()));
        outputs.insert("usage".to_string(), Value::Object(self.usage.clone()));
        outputs
    }
}

pub fn evaluation_prompt(prompt: &str, response: &str) -> String {
    format!(
        "You are an impartial self-evaluation judge. Score how well the assistant's reply satisfies the \
original prompt. The score must be a float between 0.0 and 1.0 inclusive, where 1.0 represents a perfect answer.\n\
Respond STRICTLY with a single-line JSON object of the form \
{{\"score\": <float>, \"justification\": \"<concise reasoning>\"}}.\n\
Do not emit any extra text, markdown, or code fences. If you cannot evaluate, still return JSON with score 0.0.\n\
Conversation to evaluate:\n\
User:\n<<<\n{prompt}\n>>>\n\
Assistant:\n<<<\n{response}\n>>>\n"
    )
}

/// Asks the same adapter to score its own reply. Adapter failure is a soft error.
pub fn perform_self_evaluation<A: Adapter + ?Sized>(
    adapter: &A,
    prompt: &str,
    response: &str,
    options: &RunOptions,
) -> EvaluationPayload {
    let result = match adapter.run(&evaluation_prompt(prompt, response), options) {
        Ok(result) => result,
        Err(err) => {
            debug!(error = %err, "self-evaluation call failed");
            return EvaluationPayload::failed(format!("Self-evaluation failed: {err}"));
        }
    };

    let mut payload = EvaluationPayload {
        raw_message: result.message,
        events: result.events,
        usage: result.usage,
        ..EvaluationPayload::default()
    };
    match parse_evaluation(&payload.raw_message) {
        Some(parsed) => {
            payload.score = parsed.score;
            payload.justification = parsed.justification;
        }
        None => {
            payload.error = Some("Self-evaluation response was not valid JSON.".to_string());
        }
    }
    payload
}

fn in_unit_range(score: f64) -> Option<f64> {
    (0.0..=1.0).contains(&score).then_some(score)
}

/// Strips a fenced wrapper; a language tag line is dropped with it.
fn strip_fence(message: &str) -> &str {
    let candidate = message.trim();
    if !candidate.starts_with("```") {
        return candidate;
    }
    let inner = candidate.trim_matches('`');
    match inner.split_once('\n') {
        Some((_, rest)) => rest,
        None => inner,
    }
}

/// Strict JSON first, then line heuristics. `None` means no score was found.
pub fn parse_evaluation(message: &str) -> Option<ParsedEvaluation> {
    match parse_json_evaluation(strip_fence(message)) {
        Some(parsed) => Some(parsed),
        None => parse_plaintext_evaluation(message),
    }
}

pub fn parse_json_evaluation(candidate: &str) -> Option<ParsedEvaluation> {
    let Ok(Value::Object(payload)) = serde_json::from_str::<Value>(candidate) else {
        return None;
    };

    let score = match payload.get("score") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .and_then(in_unit_range);

    let justification = ["justification", "reasoning"]
        .iter()
        .filter_map(|key| payload.get(*key))
        .find(|value| !value.is_null() && value.as_str() != Some(""))
        .map(|value| match value {
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        });

    Some(ParsedEvaluation {
        score,
        justification,
    })
}

fn normalize_line(line: &str) -> &str {
    line.trim().trim_start_matches(['-', '*']).trim()
}

fn starts_with_keyword(lower: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| lower.starts_with(keyword))
}

pub fn parse_plaintext_evaluation(message: &str) -> Option<ParsedEvaluation> {
    let lines: Vec<&str> = message.lines().collect();
    let mut score = None;
    let mut justification_parts: Vec<String> = Vec::new();

    for (index, raw_line) in lines.iter().enumerate() {
        let normalized = normalize_line(raw_line);
        if normalized.is_empty() {
            continue;
        }
        let lower = normalized.to_lowercase();

        if lower.starts_with("score") {
            if let Some(found) = number_pattern().find(normalized) {
                score = found.as_str().parse::<f64>().ok();
            }
            continue;
        }

        if numeric_line_pattern().is_match(normalized) {
            score = normalized.parse::<f64>().ok();
            continue;
        }

        if starts_with_keyword(&lower, &JUSTIFICATION_KEYWORDS) {
            let text = match normalized.split_once(':') {
                Some((_, rest)) => rest.trim(),
                None => normalized,
            };
            if !text.is_empty() {
                justification_parts.push(text.to_string());
            }

            for follow in &lines[index + 1..] {
                let follow = normalize_line(follow);
                if follow.is_empty() {
                    continue;
                }
                let follow_lower = follow.to_lowercase();
                if follow_lower.starts_with("score")
                    || starts_with_keyword(&follow_lower, &JUSTIFICATION_KEYWORDS)
                {
                    break;
                }
                justification_parts.push(follow.to_string());
            }
            break;
        }
    }

    let score = score.and_then(in_unit_range)?;
    let justification = justification_parts.join(" ");
    Some(ParsedEvaluation {
        score: Some(score),
        justification: (!justification.trim().is_empty()).then(|| justification.trim().to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterError, AdapterKind, AdapterResult};
    use serde_json::json;

    #[test]
    fn strict_json_and_heuristic_text_agree() {
        let strict = parse_evaluation(r#"{"score": 0.85, "justification": "Meets requirements."}"#)
            .expect("strict");
        let heuristic =
            parse_evaluation("Score: 0.85\n- Reason: Meets requirements.").expect("heuristic");
        assert_eq!(strict, heuristic);
        assert_eq!(strict.score, Some(0.85));
        assert_eq!(strict.justification.as_deref(), Some("Meets requirements."));
    }

    #[test]
    fn fenced_json_with_language_tag_is_unwrapped() {
        let parsed = parse_evaluation("```json\n{\"score\": \"0.4\", \"reasoning\": \"Partial.\"}\n```")
            .expect("parsed");
        assert_eq!(parsed.score, Some(0.4));
        assert_eq!(parsed.justification.as_deref(), Some("Partial."));
    }

    #[test]
    fn json_with_invalid_score_keeps_justification() {
        let parsed =
            parse_evaluation(r#"{"score": "high", "justification": "Great."}"#).expect("parsed");
        assert_eq!(parsed.score, None);
        assert_eq!(parsed.justification.as_deref(), Some("Great."));
    }

    #[test]
    fn heuristic_collects_multiline_justification_until_next_keyword() {
        let message = "Score - 0.6\n* Rationale: Covers the main points\n  but misses edge cases.\n\nand formatting.\nReason: ignored second block\n";
        let parsed = parse_plaintext_evaluation(message).expect("parsed");
        assert_eq!(parsed.score, Some(0.6));
        assert_eq!(
            parsed.justification.as_deref(),
            Some("Covers the main points but misses edge cases. and formatting.")
        );
    }

    #[test]
    fn purely_numeric_line_counts_as_score() {
        let parsed = parse_evaluation("0.7\njustification: fine").expect("parsed");
        assert_eq!(parsed.score, Some(0.7));
        assert_eq!(parsed.justification.as_deref(), Some("fine"));
    }

    #[test]
    fn missing_or_out_of_range_score_yields_none() {
        assert!(parse_evaluation("Looks good to me.").is_none());
        assert!(parse_evaluation("Score: 8\nReason: out of ten").is_none());
        assert!(parse_evaluation("").is_none());
    }

    struct Reply(Result<&'static str, &'static str>);

    impl Adapter for Reply {
        fn kind(&self) -> AdapterKind {
            AdapterKind::Mock
        }

        fn run(&self, _prompt: &str, _options: &RunOptions) -> Result<AdapterResult, AdapterError> {
            match self.0 {
                Ok(message) => Ok(AdapterResult {
                    message: message.to_string(),
                    events: Vec::new(),
                    usage: Map::from_iter([("output_tokens".to_string(), json!(3))]),
                }),
                Err(stderr) => Err(AdapterError::NonZeroExit {
                    provider: AdapterKind::Mock,
                    exit_code: 1,
                    stderr: stderr.to_string(),
                    log: None,
                }),
            }
        }
    }

    #[test]
    fn self_evaluation_payload_carries_usage_and_raw_message() {
        let payload = perform_self_evaluation(
            &Reply(Ok("Score: 0.9\nReason: Solid.")),
            "prompt",
            "response",
            &RunOptions::default(),
        );
        assert_eq!(payload.score, Some(0.9));
        assert_eq!(payload.raw_message, "Score: 0.9\nReason: Solid.");
        let outputs = payload.to_outputs();
        assert_eq!(outputs["score"], json!(0.9));
        assert_eq!(outputs["justification"], json!("Solid."));
        assert_eq!(outputs["usage"]["output_tokens"], json!(3));
        assert!(!outputs.contains_key("error"));
    }

    #[test]
    fn unparseable_and_failed_evaluations_record_errors() {
        let payload = perform_self_evaluation(
            &Reply(Ok("no idea")),
            "prompt",
            "response",
            &RunOptions::default(),
        );
        assert_eq!(payload.score, None);
        assert_eq!(
            payload.error.as_deref(),
            Some("Self-evaluation response was not valid JSON.")
        );

        let payload = perform_self_evaluation(
            &Reply(Err("judge offline")),
            "prompt",
            "response",
            &RunOptions::default(),
        );
        let error = payload.error.expect("error");
        assert!(error.starts_with("Self-evaluation failed:"));
        assert!(error.contains("judge offline"));
        assert!(payload.raw_message.is_empty());
    }

    #[test]
    fn judge_prompt_embeds_conversation() {
        let prompt = evaluation_prompt("What is 2+2?", "4");
        assert!(prompt.contains("User:\n<<<\nWhat is 2+2?\n>>>"));
        assert!(prompt.contains("Assistant:\n<<<\n4\n>>>"));
        assert!(prompt.contains(r#"{"score": <float>, "justification": "<concise reasoning>"}"#));
    }
}
