//! Expert invocation boundary.
//!
//! The interpreter sees one synchronous seam: hand a named expert a
//! fully resolved prompt, get back an answer. [`CommandExpert`] is the
//! production implementation, spawning a configured command with the
//! expert name appended to its argv and the prompt on stdin. The
//! command replies on stdout, ideally as a JSON [`ExpertResponse`];
//! plain text is accepted as a bare answer so simple scripts work as
//! experts too.

use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::outputs::HistoryTurn;
use crate::process::run_command_with_timeout;

/// What an expert hands back for one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpertResponse {
    pub final_answer: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryTurn>,
}

/// The one seam the interpreter suspends on.
pub trait ExpertCaller {
    fn call(&self, expert: &str, prompt: &str) -> Result<ExpertResponse>;
}

/// Calls experts by spawning an external command.
#[derive(Debug, Clone)]
pub struct CommandExpert {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandExpert {
    pub fn new(argv: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        CommandExpert {
            argv,
            timeout,
            output_limit_bytes,
        }
    }
}

impl ExpertCaller for CommandExpert {
    #[instrument(skip_all, fields(expert = %expert, prompt_bytes = prompt.len()))]
    fn call(&self, expert: &str, prompt: &str) -> Result<ExpertResponse> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("expert command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).arg(expert);

        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )?;

        if output.timed_out {
            return Err(anyhow!(
                "expert '{expert}' timed out after {}s",
                self.timeout.as_secs()
            ));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "expert '{expert}' exited with {}: {}",
                output.status,
                output.stderr_excerpt(512)
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("expert '{expert}' produced no output"));
        }

        match serde_json::from_str::<ExpertResponse>(trimmed) {
            Ok(response) => Ok(response),
            Err(err) => {
                debug!(err = %err, "expert output is not a response object, using raw text");
                Ok(ExpertResponse {
                    final_answer: trimmed.to_string(),
                    history: Vec::new(),
                })
            }
        }
    }
}
