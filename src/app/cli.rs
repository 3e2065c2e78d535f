#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Yaml,
    Afl,
}

impl OutputMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "yaml" => Some(Self::Yaml),
            "afl" => Some(Self::Afl),
            _ => None,
        }
    }

    pub fn requests_afl(self) -> bool {
        self == Self::Afl
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Help,
    Prompt { prompt: String, output: OutputMode },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CliError {
    #[error("missing prompt text")]
    MissingPrompt,
    #[error("`--output` expects `yaml` or `afl`, got `{0}`")]
    InvalidOutputMode(String),
    #[error("`--output` requires a value")]
    MissingOutputValue,
}

/// Leading `--output` options are consumed; everything after them is prompt text.
pub fn parse_cli_args(args: &[String]) -> Result<CliCommand, CliError> {
    let mut output = OutputMode::default();
    let mut index = 0;
    while let Some(arg) = args.get(index) {
        match arg.as_str() {
            "-h" | "--help" => return Ok(CliCommand::Help),
            "--output" => {
                let value = args.get(index + 1).ok_or(CliError::MissingOutputValue)?;
                output = OutputMode::parse(value)
                    .ok_or_else(|| CliError::InvalidOutputMode(value.clone()))?;
                index += 2;
            }
            "--" => {
                index += 1;
                break;
            }
            other => match other.strip_prefix("--output=") {
                Some(value) => {
                    output = OutputMode::parse(value)
                        .ok_or_else(|| CliError::InvalidOutputMode(value.to_string()))?;
                    index += 1;
                }
                None => break,
            },
        }
    }

    let prompt = args[index.min(args.len())..].join(" ").trim().to_string();
    if prompt.is_empty() {
        return Err(CliError::MissingPrompt);
    }
    Ok(CliCommand::Prompt { prompt, output })
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Usage:".to_string(),
        "  agentflow [--output yaml|afl] \"<prompt text>\"".to_string(),
        String::new(),
        "Runs the prompt through the configured agent adapter and writes a plan artifact."
            .to_string(),
        String::new(),
        "Options:".to_string(),
        "  --output yaml|afl                    Also emit an AgentFlowLanguage file with `afl`"
            .to_string(),
        "  -h, --help                           Show this help".to_string(),
        String::new(),
        "Environment:".to_string(),
        "  AGENTFLOW_ADAPTER                    codex, copilot, claude, gemini or mock".to_string(),
        "  AGENTFLOW_CONFIG                     Optional YAML settings file".to_string(),
        "  AGENTFLOW_OUTPUT_DIR                 Directory for plan artifacts".to_string(),
        "  AGENTFLOW_TIMEOUT_SECONDS            Per-call process timeout".to_string(),
    ]
}

pub fn help_text() -> String {
    cli_help_lines().join("\n")
}
