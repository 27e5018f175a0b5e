//! Fatal error taxonomy for workflow runs.
//!
//! Every variant aborts the run it occurs in. Callers that need to
//! branch on the category (the CLI exit-code mapping, tests) use
//! `anyhow::Error::downcast_ref::<EngineError>()`. Decision-parse
//! degradation is deliberately absent: a malformed decision response is
//! the extractor's documented fallback to `decision = false`, not an
//! error.
//!
//! Step numbers in messages are 1-based, matching the numbering shown
//! in validator output and run logs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Document or string table could not be parsed; the run never starts.
    #[error("failed to load workflow: {0}")]
    Load(String),

    /// Pre-run validation reported blocking errors.
    #[error("workflow validation failed with {count} error(s)")]
    Validation { count: usize },

    /// A step is missing a required field for its type.
    #[error("step {step} ({action}): missing required field '{field}'")]
    StepField {
        step: usize,
        action: &'static str,
        field: &'static str,
    },

    /// A DECIDE chain never reached `true` within its budget.
    #[error("step {step} (DECIDE): loop limit {limit} reached for target '{target}'")]
    LoopLimitExceeded {
        step: usize,
        target: String,
        limit: u32,
    },

    /// A loopback target id matches no step in the document.
    #[error("step {step} (DECIDE): loopback target '{target}' does not match any step id")]
    UnresolvedLoopbackTarget { step: usize, target: String },

    /// The document names an action type the interpreter does not know.
    #[error("step {step}: unknown action type '{action}'")]
    UnknownActionType { step: usize, action: String },

    /// The external expert call failed or returned an unusable response.
    #[error("step {step} ({action}): expert '{expert}' invocation failed: {message}")]
    Invocation {
        step: usize,
        action: &'static str,
        expert: String,
        message: String,
    },

    /// A COMPLEX step survived to execution (its template failed to load).
    #[error("step {step} (COMPLEX): composite action '{action}' was never expanded")]
    UnexpandedComplex { step: usize, action: String },

    /// The run was cancelled between steps.
    #[error("run cancelled")]
    Cancelled,
}
