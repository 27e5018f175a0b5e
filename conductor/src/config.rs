//! Run configuration loaded from a TOML file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Run configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable
/// and automatable. Missing fields default to sensible values; a
/// missing file is the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Root directory for per-run output directories.
    pub outputs_dir: String,

    /// Directory holding composite-action template files.
    pub macros_dir: String,

    /// Validate the workflow before running it.
    pub validate: bool,

    pub expert: ExpertConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExpertConfig {
    /// Command to invoke per expert call; the expert name is appended
    /// as the final argument and the prompt arrives on stdin.
    pub command: Vec<String>,

    /// Per-call wall-clock budget in seconds.
    pub call_timeout_secs: u64,

    /// Truncate expert stdout/stderr beyond this many bytes.
    pub response_limit_bytes: usize,
}

impl Default for ExpertConfig {
    fn default() -> Self {
        Self {
            command: vec!["expert".to_string()],
            call_timeout_secs: 10 * 60,
            response_limit_bytes: 1_000_000,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            outputs_dir: "outputs".to_string(),
            macros_dir: "macros".to_string(),
            validate: true,
            expert: ExpertConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.expert.call_timeout_secs == 0 {
            return Err(anyhow!("expert.call_timeout_secs must be > 0"));
        }
        if self.expert.response_limit_bytes == 0 {
            return Err(anyhow!("expert.response_limit_bytes must be > 0"));
        }
        if self.expert.command.is_empty() || self.expert.command[0].trim().is_empty() {
            return Err(anyhow!("expert.command must be a non-empty array"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunConfig> {
    if !path.exists() {
        let cfg = RunConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RunConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = RunConfig {
            validate: false,
            ..RunConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn rejects_empty_expert_command() {
        let cfg = RunConfig {
            expert: ExpertConfig {
                command: Vec::new(),
                ..ExpertConfig::default()
            },
            ..RunConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_timeout() {
        let cfg = RunConfig {
            expert: ExpertConfig {
                call_timeout_secs: 0,
                ..ExpertConfig::default()
            },
            ..RunConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
