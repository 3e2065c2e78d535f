pub mod error;
pub mod settings;

pub use error::ConfigError;
pub use settings::{Settings, CONFIG_PATH_ENV};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterKind;
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_environment() {
        let settings = Settings::load(lookup_from(&[])).expect("load");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.adapter_kind().expect("kind"), AdapterKind::Codex);
        assert_eq!(settings.timeout().as_secs(), 120);
    }

    #[test]
    fn environment_overrides_defaults() {
        let settings = Settings::load(lookup_from(&[
            ("AGENTFLOW_ADAPTER", "Claude"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("AGENTFLOW_ANTHROPIC_MAX_TOKENS", "2048"),
            ("AGENTFLOW_TIMEOUT_SECONDS", "30"),
            ("AGENTFLOW_OUTPUT_DIR", "/tmp/plans"),
            ("AGENTFLOW_GEMINI_MAX_OUTPUT_TOKENS", "not-a-number"),
            ("OPENAI_API_KEY", ""),
        ]))
        .expect("load");
        assert_eq!(settings.adapter_kind().expect("kind"), AdapterKind::Claude);
        assert_eq!(settings.credential_for(AdapterKind::Claude), Some("sk-ant"));
        assert_eq!(settings.credential_for(AdapterKind::Codex), None);
        assert_eq!(settings.anthropic_max_tokens, 2048);
        assert_eq!(settings.timeout_seconds, 30);
        assert_eq!(settings.output_dir, PathBuf::from("/tmp/plans"));
        assert_eq!(settings.gemini_max_output_tokens, None);
    }

    #[test]
    fn yaml_file_is_layered_under_environment() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("agentflow.yaml");
        fs::write(
            &path,
            "adapter: gemini\ngemini_model: gemini-pro\ntimeout_seconds: 45\nextra_args: [\"--quiet\"]\n",
        )
        .expect("write config");
        let path_str = path.display().to_string();

        let settings = Settings::load(lookup_from(&[
            (CONFIG_PATH_ENV, path_str.as_str()),
            ("AGENTFLOW_TIMEOUT_SECONDS", "10"),
        ]))
        .expect("load");
        assert_eq!(settings.adapter_kind().expect("kind"), AdapterKind::Gemini);
        assert_eq!(settings.gemini_model.as_deref(), Some("gemini-pro"));
        assert_eq!(settings.timeout_seconds, 10);
        assert_eq!(settings.extra_args, vec!["--quiet".to_string()]);
        assert_eq!(settings.codex_cli_path, "codex");
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let err = Settings::load(lookup_from(&[("AGENTFLOW_ADAPTER", "openai")]))
            .expect_err("unknown adapter");
        assert!(matches!(err, ConfigError::UnknownAdapter(ref id) if id == "openai"));

        let zero = Settings {
            timeout_seconds: 0,
            ..Settings::default()
        };
        assert!(matches!(zero.validate(), Err(ConfigError::Settings(_))));
    }

    #[test]
    fn unreadable_config_file_reports_path() {
        let err = Settings::load(lookup_from(&[(CONFIG_PATH_ENV, "/nonexistent/agentflow.yaml")]))
            .expect_err("missing file");
        match err {
            ConfigError::Read { path, .. } => assert!(path.ends_with("agentflow.yaml")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
