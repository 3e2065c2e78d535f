use crate::orchestration::error::OrchestratorError;
use crate::orchestration::plan::PlanDocument;
use crate::shared::fs_atomic::atomic_write_file;
use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub fn plan_base_name(timestamp: DateTime<Utc>) -> String {
    timestamp.format("agentflow-%Y%m%d%H%M%S").to_string()
}

/// Claims `<base>.yaml` in `output_dir`, then `<base>-1.yaml`, `<base>-2.yaml`, ...
/// The first free name is created empty so a concurrent run cannot take it.
/// Returns the path and the derived plan id.
pub fn resolve_plan_path(
    output_dir: &Path,
    base_name: &str,
) -> Result<(PathBuf, String), OrchestratorError> {
    let io = |path: &Path, source| OrchestratorError::Io {
        path: path.display().to_string(),
        source,
    };
    fs::create_dir_all(output_dir).map_err(|source| io(output_dir, source))?;

    let mut candidate = output_dir.join(format!("{base_name}.yaml"));
    let mut suffix = 1u32;
    loop {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(_) => break,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                candidate = output_dir.join(format!("{base_name}-{suffix}.yaml"));
                suffix += 1;
            }
            Err(source) => return Err(io(&candidate, source)),
        }
    }

    let stem = candidate
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(base_name);
    let tail = stem.split_once('-').map_or(stem, |(_, tail)| tail);
    let plan_id = format!("plan-{tail}");
    Ok((candidate, plan_id))
}

pub fn afl_path_for(plan_path: &Path) -> PathBuf {
    plan_path.with_extension("afl")
}

pub fn encode_plan(document: &PlanDocument) -> Result<String, OrchestratorError> {
    serde_yaml::to_string(document).map_err(|err| OrchestratorError::Encode(err.to_string()))
}

pub fn write_plan(path: &Path, document: &PlanDocument) -> Result<(), OrchestratorError> {
    let body = encode_plan(document)?;
    atomic_write_file(path, body.as_bytes()).map_err(|source| OrchestratorError::Io {
        path: path.display().to_string(),
        source,
    })
}

pub fn read_plan(path: &Path) -> Result<PlanDocument, OrchestratorError> {
    let raw = fs::read_to_string(path).map_err(|source| OrchestratorError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| OrchestratorError::Yaml {
        path: path.display().to_string(),
        source,
    })
}

pub fn write_afl(path: &Path, afl_text: &str) -> Result<(), OrchestratorError> {
    let body = format!("{}\n", afl_text.trim_end());
    atomic_write_file(path, body.as_bytes()).map_err(|source| OrchestratorError::Io {
        path: path.display().to_string(),
        source,
    })
}
