//! Versioned output store.
//!
//! Every executed step saves an [`OutputRecord`] under its output
//! name. Records are append-only: re-execution after a loopback adds a
//! new version, never overwrites one. Versions are numbered from 1
//! with no gaps per name. Each save writes two YAML snapshots into the
//! run directory, `<name>.yaml` (latest) and `<name>.v<N>.yaml`
//! (immutable version), via temp-file-plus-rename so readers never see
//! a partial file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::HistoryPolicy;

/// One conversational turn carried back by the expert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub message: String,
}

/// The durable record of one step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub final_answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryTurn>,
    pub expert: String,
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loopback_target: Option<String>,
}

impl OutputRecord {
    pub fn now_timestamp() -> String {
        Local::now().to_rfc3339()
    }
}

/// In-memory latest/history view plus the on-disk run directory.
#[derive(Debug)]
pub struct OutputStore {
    dir: PathBuf,
    versions: BTreeMap<String, Vec<OutputRecord>>,
}

fn write_yaml_atomic(path: &Path, record: &OutputRecord) -> Result<()> {
    let contents = serde_yaml::to_string(record).context("serialize output record")?;
    let tmp = path.with_extension("yaml.tmp");
    fs::write(&tmp, contents).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} into place", path.display()))?;
    Ok(())
}

impl OutputStore {
    /// Create a run-unique directory `<root>/<workflow>_<timestamp>`
    /// and an empty store over it. A timestamp collision appends a
    /// numeric suffix rather than reusing the directory.
    pub fn create(root: &Path, workflow_name: &str) -> Result<Self> {
        fs::create_dir_all(root).with_context(|| format!("create {}", root.display()))?;
        let stamp = Local::now().format("%Y-%m-%d-%H-%M-%S");
        let base = format!("{workflow_name}_{stamp}");
        let mut candidate = root.join(&base);
        let mut attempt = 1u32;
        loop {
            match fs::create_dir(&candidate) {
                Ok(()) => break,
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    attempt += 1;
                    candidate = root.join(format!("{base}-{attempt}"));
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("create {}", candidate.display()));
                }
            }
        }
        debug!(dir = %candidate.display(), "created run output directory");
        Ok(OutputStore {
            dir: candidate,
            versions: BTreeMap::new(),
        })
    }

    /// A store over an existing directory. Used by tests and by the
    /// validator when it writes its artifact next to run outputs.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        Ok(OutputStore {
            dir,
            versions: BTreeMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append a new version under `name` and persist both snapshots.
    /// Returns the 1-based version id.
    pub fn save(&mut self, name: &str, record: OutputRecord) -> Result<u32> {
        let versions = self.versions.entry(name.to_string()).or_default();
        versions.push(record);
        let version = u32::try_from(versions.len()).context("version count overflow")?;
        let record = versions.last().expect("just pushed");

        write_yaml_atomic(&self.dir.join(format!("{name}.yaml")), record)?;
        write_yaml_atomic(&self.dir.join(format!("{name}.v{version}.yaml")), record)?;
        debug!(output = name, version, "saved output record");
        Ok(version)
    }

    /// The newest record under `name`.
    pub fn latest(&self, name: &str) -> Option<&OutputRecord> {
        self.versions.get(name).and_then(|v| v.last())
    }

    pub fn version_count(&self, name: &str) -> usize {
        self.versions.get(name).map_or(0, Vec::len)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }

    /// Prior-version text for history-aware prompts. The latest record
    /// is the current content, so history covers everything before it;
    /// a name with fewer than two versions has none.
    pub fn history_text(&self, name: &str, policy: HistoryPolicy) -> Option<String> {
        let versions = self.versions.get(name)?;
        let priors = versions.split_last().map(|(_, rest)| rest)?;
        if priors.is_empty() {
            return None;
        }
        match policy {
            HistoryPolicy::Latest => priors.last().map(|r| r.final_answer.clone()),
            HistoryPolicy::All => Some(
                priors
                    .iter()
                    .enumerate()
                    .map(|(i, r)| format!("[version {}]\n{}", i + 1, r.final_answer))
                    .collect::<Vec<_>>()
                    .join("\n\n"),
            ),
        }
    }
}
