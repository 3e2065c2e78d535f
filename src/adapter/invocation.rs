use crate::adapter::{AdapterKind, InvocationSpec, OutputShape};
use crate::config::Settings;
use std::collections::BTreeMap;

/// Environment variable the provider cli reads its credential from.
pub fn credential_env_var(kind: AdapterKind) -> Option<&'static str> {
    match kind {
        AdapterKind::Codex => Some("OPENAI_API_KEY"),
        AdapterKind::Claude => Some("ANTHROPIC_API_KEY"),
        AdapterKind::Copilot => Some("COPILOT_TOKEN"),
        AdapterKind::Gemini => Some("GEMINI_API_KEY"),
        AdapterKind::Mock => None,
    }
}

/// Command line shape: `<executable> <subcommand> <fixed flags> <provider args> <extra args> <prompt>`.
pub fn build_invocation(kind: AdapterKind, settings: &Settings, prompt: &str) -> InvocationSpec {
    let (binary, mut args, output_shape) = match kind {
        AdapterKind::Codex => (
            settings.codex_cli_path.clone(),
            vec![
                "exec".to_string(),
                "--model".to_string(),
                settings.codex_model.clone(),
                "--json".to_string(),
                "--sandbox".to_string(),
                settings.sandbox_mode.clone(),
            ],
            OutputShape::JsonLinesStrict,
        ),
        AdapterKind::Copilot => (
            settings.copilot_cli_path.clone(),
            vec!["exec".to_string(), "--json".to_string()],
            OutputShape::JsonLinesLenient,
        ),
        AdapterKind::Claude => {
            let mut args = Vec::new();
            if let Some(script) = &settings.anthropic_wrapper_script {
                args.push(script.display().to_string());
            }
            args.extend([
                "messages".to_string(),
                "create".to_string(),
                "-m".to_string(),
                settings.anthropic_model.clone(),
                "--max-tokens".to_string(),
                settings.anthropic_max_tokens.to_string(),
                "--json".to_string(),
            ]);
            (
                settings.anthropic_cli_path.clone(),
                args,
                OutputShape::SingleJson,
            )
        }
        AdapterKind::Gemini => {
            let mut args = vec!["chat".to_string(), "--json".to_string()];
            if let Some(model) = settings.gemini_model.as_ref().filter(|m| !m.is_empty()) {
                args.push("--model".to_string());
                args.push(model.clone());
            }
            if let Some(max_tokens) = settings.gemini_max_output_tokens.filter(|n| *n > 0) {
                args.push("--max-output-tokens".to_string());
                args.push(max_tokens.to_string());
            }
            (
                settings.gemini_cli_path.clone(),
                args,
                OutputShape::JsonLinesLenient,
            )
        }
        AdapterKind::Mock => (String::new(), Vec::new(), OutputShape::JsonLinesLenient),
    };

    args.extend(settings.extra_args.iter().cloned());
    if kind == AdapterKind::Claude {
        args.push("-p".to_string());
    }
    args.push(prompt.to_string());

    let mut env_overrides = BTreeMap::new();
    if let (Some(variable), Some(value)) = (credential_env_var(kind), settings.credential_for(kind))
    {
        env_overrides.insert(variable.to_string(), value.to_string());
    }

    InvocationSpec {
        binary,
        args,
        env_overrides,
        output_shape,
    }
}
