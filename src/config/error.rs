#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid yaml in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("settings validation failed: {0}")]
    Settings(String),
    #[error("unknown adapter `{0}`; use one of: codex, copilot, claude, gemini, mock")]
    UnknownAdapter(String),
    #[error("{variable} must be set in the environment or settings for the {adapter} adapter")]
    MissingCredential {
        adapter: String,
        variable: &'static str,
    },
}
