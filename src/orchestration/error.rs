#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("plan document could not be encoded: {0}")]
    Encode(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("yaml error at {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}
