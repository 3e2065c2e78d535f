use chrono::Utc;
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn run_log_path(output_dir: &Path) -> PathBuf {
    output_dir.join("logs/agentflow.log")
}

/// Appends one JSON line `{timestamp, event, ..fields}` to the run log.
pub fn append_run_event(
    output_dir: &Path,
    event: &str,
    fields: &[(&str, Value)],
) -> std::io::Result<()> {
    let mut payload = Map::new();
    payload.insert(
        "timestamp".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    payload.insert("event".to_string(), Value::String(event.to_string()));
    for (key, value) in fields {
        payload.insert((*key).to_string(), value.clone());
    }
    let line = serde_json::to_string(&payload)
        .map_err(|source| std::io::Error::other(source.to_string()))?;

    let path = run_log_path(output_dir);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    writeln!(file, "{line}")
}

/// Best-effort variant used on the run path; a log that cannot be appended never fails a run.
pub fn record_run_event(output_dir: &Path, event: &str, fields: &[(&str, Value)]) {
    if let Err(err) = append_run_event(output_dir, event, fields) {
        tracing::debug!(event, error = %err, "run event not recorded");
    }
}
