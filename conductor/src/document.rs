//! Workflow document data model and YAML loading.
//!
//! The wire format is the original ordered list of single-key maps
//! (`- PROMPT: {...}`), but steps are materialized into a proper sum
//! type: the single key is checked explicitly and an unknown key is an
//! [`EngineError::UnknownActionType`] at load, never skipped.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::EngineError;

/// How much prior-version history a PROMPT step wants appended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryPolicy {
    /// Only the immediately preceding version.
    #[default]
    #[serde(rename = "LATEST")]
    Latest,
    /// Every prior version, concatenated.
    #[serde(rename = "ALL")]
    All,
}

pub(crate) const DEFAULT_LOOP_LIMIT: u32 = 10;

fn default_loop_limit() -> u32 {
    DEFAULT_LOOP_LIMIT
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_default_policy(policy: &HistoryPolicy) -> bool {
    *policy == HistoryPolicy::Latest
}

/// A PROMPT step: resolve inputs, call the expert, record the answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptStep {
    pub expert: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, alias = "append-history", skip_serializing_if = "is_false")]
    pub append_history: bool,
    #[serde(
        default,
        alias = "append-history-type",
        skip_serializing_if = "is_default_policy"
    )]
    pub append_history_type: HistoryPolicy,
}

/// A DECIDE step: ask the expert for a structured judgement and either
/// advance or loop back to the step named by `loopback_target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecideStep {
    pub expert: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loopback_target: Option<String>,
    #[serde(default = "default_loop_limit")]
    pub loop_limit: u32,
    /// Deprecated numeric offset loopback. Parsed only so the validator
    /// can reject documents that still carry it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loopback: Option<i64>,
}

/// A COMPLEX step: an invocation of a named composite-action template.
/// Exists only before macro expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComplexStep {
    pub action: String,
    pub expert: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    pub output: String,
}

/// One entry in the action sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionStep {
    Prompt(PromptStep),
    Decide(DecideStep),
    Complex(ComplexStep),
}

impl ActionStep {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionStep::Prompt(_) => "PROMPT",
            ActionStep::Decide(_) => "DECIDE",
            ActionStep::Complex(_) => "COMPLEX",
        }
    }

    pub fn expert(&self) -> &str {
        match self {
            ActionStep::Prompt(step) => &step.expert,
            ActionStep::Decide(step) => &step.expert,
            ActionStep::Complex(step) => &step.expert,
        }
    }

    pub fn output(&self) -> &str {
        match self {
            ActionStep::Prompt(step) => &step.output,
            ActionStep::Decide(step) => &step.output,
            ActionStep::Complex(step) => &step.output,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            ActionStep::Prompt(step) => step.id.as_deref(),
            ActionStep::Decide(step) => step.id.as_deref(),
            ActionStep::Complex(_) => None,
        }
    }

    pub fn inputs(&self) -> &[String] {
        match self {
            ActionStep::Prompt(step) => &step.inputs,
            ActionStep::Decide(step) => &step.inputs,
            ActionStep::Complex(_) => &[],
        }
    }

    /// Parse one step from its single-key-map wire form.
    ///
    /// `step` is the 1-based position in the document, used for error
    /// messages only.
    pub fn from_value(step: usize, value: &Value) -> Result<Self> {
        let mapping = value.as_mapping().ok_or_else(|| {
            EngineError::Load(format!("step {step} is not a map of action type to fields"))
        })?;
        if mapping.len() != 1 {
            return Err(EngineError::Load(format!(
                "step {step} must have exactly one action type key, found {}",
                mapping.len()
            ))
            .into());
        }
        let (key, fields) = mapping.iter().next().expect("len checked above");
        let action = key.as_str().ok_or_else(|| {
            EngineError::Load(format!("step {step} has a non-string action type key"))
        })?;
        let parsed = match action {
            "PROMPT" => ActionStep::Prompt(
                serde_yaml::from_value(fields.clone())
                    .map_err(|err| EngineError::Load(format!("step {step} (PROMPT): {err}")))?,
            ),
            "DECIDE" => ActionStep::Decide(
                serde_yaml::from_value(fields.clone())
                    .map_err(|err| EngineError::Load(format!("step {step} (DECIDE): {err}")))?,
            ),
            "COMPLEX" => ActionStep::Complex(
                serde_yaml::from_value(fields.clone())
                    .map_err(|err| EngineError::Load(format!("step {step} (COMPLEX): {err}")))?,
            ),
            other => {
                return Err(EngineError::UnknownActionType {
                    step,
                    action: other.to_string(),
                }
                .into());
            }
        };
        Ok(parsed)
    }

    /// Serialize back to the single-key-map wire form.
    pub fn to_value(&self) -> Result<Value> {
        let fields = match self {
            ActionStep::Prompt(step) => serde_yaml::to_value(step),
            ActionStep::Decide(step) => serde_yaml::to_value(step),
            ActionStep::Complex(step) => serde_yaml::to_value(step),
        }
        .context("serialize action step")?;
        let mut mapping = serde_yaml::Mapping::new();
        mapping.insert(Value::String(self.kind().to_string()), fields);
        Ok(Value::Mapping(mapping))
    }
}

/// A parsed workflow document: the raw `STRINGS` mapping (resolved
/// later by the string table loader) plus a non-empty action sequence.
/// Immutable after parsing; macro expansion produces a new document.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDocument {
    pub strings: Option<Value>,
    pub actions: Vec<ActionStep>,
}

/// Load and parse a workflow document from a YAML file.
pub fn load_document(path: &Path) -> Result<WorkflowDocument> {
    let contents = fs::read_to_string(path)
        .map_err(|err| EngineError::Load(format!("read {}: {err}", path.display())))?;
    parse_document(&contents)
}

/// Parse a workflow document from YAML source.
pub fn parse_document(source: &str) -> Result<WorkflowDocument> {
    let root: Value = serde_yaml::from_str(source)
        .map_err(|err| EngineError::Load(format!("parse workflow yaml: {err}")))?;
    let mapping = root
        .as_mapping()
        .ok_or_else(|| EngineError::Load("workflow document must be a mapping".to_string()))?;

    let strings = mapping.get("STRINGS").cloned();

    let actions_value = mapping
        .get("ACTIONS")
        .ok_or_else(|| EngineError::Load("missing ACTIONS section".to_string()))?;
    let raw_actions = actions_value
        .as_sequence()
        .ok_or_else(|| EngineError::Load("ACTIONS must be a sequence".to_string()))?;
    if raw_actions.is_empty() {
        return Err(EngineError::Load("ACTIONS is empty".to_string()).into());
    }

    let mut actions = Vec::with_capacity(raw_actions.len());
    for (index, raw) in raw_actions.iter().enumerate() {
        actions.push(ActionStep::from_value(index + 1, raw)?);
    }

    Ok(WorkflowDocument { strings, actions })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prompt_decide_and_complex_steps() {
        let doc = parse_document(
            r#"
STRINGS:
  STR_GREETING: hello
ACTIONS:
  - PROMPT:
      id: draft
      expert: Writer
      inputs: [STR_GREETING]
      output: draft_out
      append-history: true
      append-history-type: ALL
  - DECIDE:
      expert: Reviewer
      inputs: [draft_out]
      output: review
      loopback_target: draft
  - COMPLEX:
      action: summarize
      expert: Editor
      data:
        topic: birds
      output: summary
"#,
        )
        .expect("parse");

        assert_eq!(doc.actions.len(), 3);
        let ActionStep::Prompt(prompt) = &doc.actions[0] else {
            panic!("expected PROMPT");
        };
        assert_eq!(prompt.id.as_deref(), Some("draft"));
        assert!(prompt.append_history);
        assert_eq!(prompt.append_history_type, HistoryPolicy::All);

        let ActionStep::Decide(decide) = &doc.actions[1] else {
            panic!("expected DECIDE");
        };
        assert_eq!(decide.loopback_target.as_deref(), Some("draft"));
        assert_eq!(decide.loop_limit, DEFAULT_LOOP_LIMIT);
        assert_eq!(decide.loopback, None);

        let ActionStep::Complex(complex) = &doc.actions[2] else {
            panic!("expected COMPLEX");
        };
        assert_eq!(complex.data.get("topic").map(String::as_str), Some("birds"));
    }

    #[test]
    fn unknown_action_type_is_a_load_error() {
        let err = parse_document(
            r#"
ACTIONS:
  - SHOUT:
      expert: Crier
      output: noise
"#,
        )
        .expect_err("should fail");
        let engine_err = err
            .downcast_ref::<EngineError>()
            .expect("typed engine error");
        assert!(matches!(
            engine_err,
            EngineError::UnknownActionType { step: 1, .. }
        ));
    }

    #[test]
    fn empty_actions_is_a_load_error() {
        let err = parse_document("ACTIONS: []\n").expect_err("should fail");
        assert!(err.to_string().contains("ACTIONS is empty"));
    }

    #[test]
    fn step_with_two_keys_is_rejected() {
        let err = parse_document(
            r#"
ACTIONS:
  - PROMPT:
      expert: A
      output: a
    DECIDE:
      expert: B
      output: b
"#,
        )
        .expect_err("should fail");
        assert!(err.to_string().contains("exactly one action type key"));
    }

    #[test]
    fn step_round_trips_through_wire_form() {
        let step = ActionStep::Decide(DecideStep {
            expert: "Reviewer".to_string(),
            inputs: vec!["draft".to_string()],
            output: "verdict".to_string(),
            id: Some("gate".to_string()),
            description: None,
            loopback_target: Some("draft_step".to_string()),
            loop_limit: 3,
            loopback: None,
        });
        let value = step.to_value().expect("to value");
        let back = ActionStep::from_value(1, &value).expect("from value");
        assert_eq!(back, step);
    }
}
