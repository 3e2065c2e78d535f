use super::ConfigError;
use crate::adapter::AdapterKind;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "AGENTFLOW_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub adapter: String,
    pub timeout_seconds: u64,
    pub output_dir: PathBuf,
    pub extra_args: Vec<String>,

    pub openai_api_key: Option<String>,
    pub codex_cli_path: String,
    pub codex_model: String,
    pub sandbox_mode: String,

    pub copilot_cli_path: String,
    pub copilot_token: Option<String>,

    pub anthropic_api_key: Option<String>,
    pub anthropic_cli_path: String,
    pub anthropic_model: String,
    pub anthropic_max_tokens: u32,
    pub anthropic_wrapper_script: Option<PathBuf>,

    pub gemini_cli_path: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: Option<String>,
    pub gemini_max_output_tokens: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            adapter: "codex".to_string(),
            timeout_seconds: 120,
            output_dir: PathBuf::from("."),
            extra_args: Vec::new(),
            openai_api_key: None,
            codex_cli_path: "codex".to_string(),
            codex_model: "gpt-5-mini".to_string(),
            sandbox_mode: "workspace-write".to_string(),
            copilot_cli_path: "copilot".to_string(),
            copilot_token: None,
            anthropic_api_key: None,
            anthropic_cli_path: "anthropic".to_string(),
            anthropic_model: "claude-3-5-sonnet-latest".to_string(),
            anthropic_max_tokens: 1024,
            anthropic_wrapper_script: None,
            gemini_cli_path: "gemini".to_string(),
            gemini_api_key: None,
            gemini_model: None,
            gemini_max_output_tokens: None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Defaults, then the optional YAML file named by `AGENTFLOW_CONFIG`, then
    /// environment overrides. `lookup` stands in for the process environment.
    pub fn load<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match non_empty(lookup(CONFIG_PATH_ENV)) {
            Some(path) => Self::from_path(Path::new(&path))?,
            None => Self::default(),
        };
        settings.apply_env(&lookup);
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply_env<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| non_empty(lookup(key));

        if let Some(v) = text("AGENTFLOW_ADAPTER") {
            self.adapter = v.to_ascii_lowercase();
        }
        if let Some(v) = text("AGENTFLOW_TIMEOUT_SECONDS").and_then(|v| v.trim().parse().ok()) {
            self.timeout_seconds = v;
        }
        if let Some(v) = text("AGENTFLOW_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = text("OPENAI_API_KEY") {
            self.openai_api_key = Some(v);
        }
        if let Some(v) = text("AGENTFLOW_CODEX_PATH") {
            self.codex_cli_path = v;
        }
        if let Some(v) = text("AGENTFLOW_CODEX_MODEL") {
            self.codex_model = v;
        }
        if let Some(v) = text("AGENTFLOW_SANDBOX") {
            self.sandbox_mode = v;
        }
        if let Some(v) = text("AGENTFLOW_COPILOT_PATH") {
            self.copilot_cli_path = v;
        }
        if let Some(v) = text("AGENTFLOW_COPILOT_TOKEN") {
            self.copilot_token = Some(v);
        }
        if let Some(v) = text("ANTHROPIC_API_KEY") {
            self.anthropic_api_key = Some(v);
        }
        if let Some(v) = text("AGENTFLOW_ANTHROPIC_PATH") {
            self.anthropic_cli_path = v;
        }
        if let Some(v) = text("AGENTFLOW_ANTHROPIC_MODEL") {
            self.anthropic_model = v;
        }
        if let Some(v) = text("AGENTFLOW_ANTHROPIC_MAX_TOKENS").and_then(|v| v.trim().parse().ok())
        {
            self.anthropic_max_tokens = v;
        }
        if let Some(v) = text("AGENTFLOW_GEMINI_PATH") {
            self.gemini_cli_path = v;
        }
        if let Some(v) = text("GEMINI_API_KEY") {
            self.gemini_api_key = Some(v);
        }
        if let Some(v) = text("AGENTFLOW_GEMINI_MODEL") {
            self.gemini_model = Some(v);
        }
        if let Some(v) =
            text("AGENTFLOW_GEMINI_MAX_OUTPUT_TOKENS").and_then(|v| v.trim().parse().ok())
        {
            self.gemini_max_output_tokens = Some(v);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_seconds == 0 {
            return Err(ConfigError::Settings(
                "`timeout_seconds` must be greater than zero".to_string(),
            ));
        }
        self.adapter_kind()?;
        Ok(())
    }

    pub fn adapter_kind(&self) -> Result<AdapterKind, ConfigError> {
        AdapterKind::parse(&self.adapter)
            .ok_or_else(|| ConfigError::UnknownAdapter(self.adapter.clone()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Credential configured for the provider, if any. Never reads the process environment.
    pub fn credential_for(&self, kind: AdapterKind) -> Option<&str> {
        let value = match kind {
            AdapterKind::Codex => self.openai_api_key.as_deref(),
            AdapterKind::Claude => self.anthropic_api_key.as_deref(),
            AdapterKind::Copilot => self.copilot_token.as_deref(),
            AdapterKind::Gemini => self.gemini_api_key.as_deref(),
            AdapterKind::Mock => None,
        };
        value.filter(|v| !v.is_empty())
    }
}
