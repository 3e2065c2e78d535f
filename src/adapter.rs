use crate::config::Settings;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod invocation;
pub mod mock;
pub mod output_parse;
pub mod runner;

pub use invocation::{build_invocation, credential_env_var};
pub use mock::MockAdapter;
pub use output_parse::{parse_jsonl_lenient, parse_jsonl_strict, parse_single_json, OutputShape};
pub use runner::{run_process, ProcessOutput};

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("{variable} must be set in the environment or settings for the {provider} adapter")]
    MissingCredential {
        provider: AdapterKind,
        variable: &'static str,
    },
    #[error("{provider} cli binary missing: {binary}")]
    MissingBinary {
        provider: AdapterKind,
        binary: String,
        log: Option<Box<InvocationLog>>,
    },
    #[error("{provider} cli exited with {exit_code}: {stderr}")]
    NonZeroExit {
        provider: AdapterKind,
        exit_code: i32,
        stderr: String,
        log: Option<Box<InvocationLog>>,
    },
    #[error("{provider} cli timed out after {timeout_ms}ms")]
    Timeout {
        provider: AdapterKind,
        timeout_ms: u64,
        log: Option<Box<InvocationLog>>,
    },
    #[error("{provider} cli produced no output")]
    EmptyOutput { provider: AdapterKind },
    #[error("failed to parse {provider} output: {reason}")]
    ParseFailure {
        provider: AdapterKind,
        reason: String,
        log: Option<Box<InvocationLog>>,
    },
    #[error("{provider} cli completed without a final assistant message")]
    MissingMessage { provider: AdapterKind },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl AdapterError {
    pub fn invocation_log(&self) -> Option<&InvocationLog> {
        match self {
            AdapterError::MissingBinary { log, .. }
            | AdapterError::NonZeroExit { log, .. }
            | AdapterError::Timeout { log, .. }
            | AdapterError::ParseFailure { log, .. } => log.as_deref(),
            AdapterError::MissingCredential { .. }
            | AdapterError::EmptyOutput { .. }
            | AdapterError::MissingMessage { .. }
            | AdapterError::Io { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    Codex,
    Copilot,
    Claude,
    Gemini,
    Mock,
}

impl AdapterKind {
    pub const ALL: [AdapterKind; 5] = [
        AdapterKind::Codex,
        AdapterKind::Copilot,
        AdapterKind::Claude,
        AdapterKind::Gemini,
        AdapterKind::Mock,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Codex => "codex",
            Self::Copilot => "copilot",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Mock => "mock",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "codex" => Some(Self::Codex),
            "copilot" => Some(Self::Copilot),
            "claude" => Some(Self::Claude),
            "gemini" => Some(Self::Gemini),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }

    /// Credential that must resolve before the provider cli is spawned, if any.
    pub fn required_credential(self) -> Option<&'static str> {
        match self {
            Self::Codex | Self::Claude => credential_env_var(self),
            Self::Copilot | Self::Gemini | Self::Mock => None,
        }
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub timeout: Duration,
    pub working_directory: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            working_directory: None,
        }
    }
}

/// Normalized outcome of one adapter invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterResult {
    pub message: String,
    pub events: Vec<Value>,
    pub usage: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationSpec {
    pub binary: String,
    pub args: Vec<String>,
    pub env_overrides: BTreeMap<String, String>,
    pub output_shape: OutputShape,
}

impl InvocationSpec {
    pub fn command_form(&self) -> String {
        format!("{} {}", self.binary, self.args.join(" "))
    }
}

#[derive(Debug, Clone)]
pub struct InvocationLog {
    pub provider: AdapterKind,
    pub command_form: String,
    pub working_directory: Option<PathBuf>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// Uniform contract over every agent-invocation mechanism.
pub trait Adapter {
    fn kind(&self) -> AdapterKind;

    fn run(&self, prompt: &str, options: &RunOptions) -> Result<AdapterResult, AdapterError>;
}

/// Adapter backed by an external provider cli.
#[derive(Debug, Clone)]
pub struct CliAdapter {
    kind: AdapterKind,
    settings: Settings,
}

impl CliAdapter {
    pub fn new(kind: AdapterKind, settings: Settings) -> Self {
        Self { kind, settings }
    }

    fn ensure_credential(&self) -> Result<(), AdapterError> {
        let Some(variable) = self.kind.required_credential() else {
            return Ok(());
        };
        if credential_available(self.kind, &self.settings) {
            return Ok(());
        }
        Err(AdapterError::MissingCredential {
            provider: self.kind,
            variable,
        })
    }
}

/// True when the provider needs no credential or `settings` carries one.
pub fn credential_available(kind: AdapterKind, settings: &Settings) -> bool {
    kind.required_credential().is_none() || settings.credential_for(kind).is_some()
}

impl Adapter for CliAdapter {
    fn kind(&self) -> AdapterKind {
        self.kind
    }

    fn run(&self, prompt: &str, options: &RunOptions) -> Result<AdapterResult, AdapterError> {
        self.ensure_credential()?;
        let spec = build_invocation(self.kind, &self.settings, prompt);
        let output = run_process(self.kind, &spec, options)?;
        let parsed = match spec.output_shape {
            OutputShape::SingleJson => parse_single_json(self.kind, &output.stdout),
            OutputShape::JsonLinesStrict => parse_jsonl_strict(self.kind, &output.stdout),
            OutputShape::JsonLinesLenient => parse_jsonl_lenient(self.kind, &output.stdout),
        };
        parsed.map_err(|err| match err {
            AdapterError::ParseFailure {
                provider, reason, ..
            } => AdapterError::ParseFailure {
                provider,
                reason,
                log: Some(Box::new(output.log.clone())),
            },
            other => other,
        })
    }
}

/// Closed set of adapter variants selectable from configuration.
#[derive(Debug, Clone)]
pub enum AgentAdapter {
    Codex(CliAdapter),
    Copilot(CliAdapter),
    Claude(CliAdapter),
    Gemini(CliAdapter),
    Mock(MockAdapter),
}

impl AgentAdapter {
    pub fn from_settings(kind: AdapterKind, settings: &Settings) -> Self {
        let cli = || CliAdapter::new(kind, settings.clone());
        match kind {
            AdapterKind::Codex => Self::Codex(cli()),
            AdapterKind::Copilot => Self::Copilot(cli()),
            AdapterKind::Claude => Self::Claude(cli()),
            AdapterKind::Gemini => Self::Gemini(cli()),
            AdapterKind::Mock => Self::Mock(MockAdapter),
        }
    }
}

impl Adapter for AgentAdapter {
    fn kind(&self) -> AdapterKind {
        match self {
            Self::Codex(inner) | Self::Copilot(inner) | Self::Claude(inner) | Self::Gemini(inner) => {
                inner.kind()
            }
            Self::Mock(inner) => inner.kind(),
        }
    }

    fn run(&self, prompt: &str, options: &RunOptions) -> Result<AdapterResult, AdapterError> {
        match self {
            Self::Codex(inner) | Self::Copilot(inner) | Self::Claude(inner) | Self::Gemini(inner) => {
                inner.run(prompt, options)
            }
            Self::Mock(inner) => inner.run(prompt, options),
        }
    }
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> AdapterError {
    AdapterError::Io {
        path: path.display().to_string(),
        source,
    }
}
