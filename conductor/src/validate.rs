//! Static workflow validation.
//!
//! Runs after macro expansion and before execution. Errors block the
//! run; warnings do not. The validator also writes a fully resolved
//! copy of the document as a YAML artifact so a reviewer can see the
//! exact prompts a run would assemble, with the original tokens kept
//! alongside as annotations. The artifact is advisory output only;
//! execution always works from the in-memory document.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::document::{ActionStep, WorkflowDocument};
use crate::strings::{STR_USER_INPUT, StringTable};
use crate::template;

/// Accumulated validation findings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check an expanded document against its string table.
pub fn validate_document(doc: &WorkflowDocument, strings: &StringTable) -> ValidationReport {
    let mut report = ValidationReport::default();
    let id_map = id_indices(doc);

    for (index, step) in doc.actions.iter().enumerate() {
        let number = index + 1;
        let kind = step.kind();

        if step.expert().trim().is_empty() {
            report
                .errors
                .push(format!("Step {number} ({kind}): missing required field 'expert'"));
        }
        if step.output().trim().is_empty() {
            report
                .errors
                .push(format!("Step {number} ({kind}): missing required field 'output'"));
        }

        match step {
            ActionStep::Prompt(_) | ActionStep::Decide(_) => {
                if step.inputs().is_empty() {
                    report
                        .warnings
                        .push(format!("Step {number} ({kind}): has no inputs"));
                }
                for token in step.inputs() {
                    if token.starts_with("STR_")
                        && token != STR_USER_INPUT
                        && !strings.contains(token)
                    {
                        report.errors.push(format!(
                            "Step {number} ({kind}): input '{token}' is not defined in STRINGS"
                        ));
                    }
                }
            }
            ActionStep::Complex(complex) => {
                report.errors.push(format!(
                    "Step {number} (COMPLEX): composite action '{}' was not expanded",
                    complex.action
                ));
            }
        }

        if let ActionStep::Decide(decide) = step {
            if decide.loopback.is_some() {
                report.errors.push(format!(
                    "Step {number} (DECIDE): numeric 'loopback' is no longer supported, \
                     use 'loopback_target' with a step id"
                ));
            }
            if decide.loop_limit == 0 {
                report
                    .errors
                    .push(format!("Step {number} (DECIDE): loop_limit must be > 0"));
            }
            match decide.loopback_target.as_deref().filter(|t| !t.is_empty()) {
                None => {
                    report.errors.push(format!(
                        "Step {number} (DECIDE): missing required field 'loopback_target'"
                    ));
                }
                Some(target) => match id_map.iter().find(|(id, _)| id.as_str() == target) {
                    None => {
                        report.errors.push(format!(
                            "Step {number} (DECIDE): loopback target '{target}' does not \
                             match any step id"
                        ));
                    }
                    Some((_, target_index)) if *target_index == index => {
                        report
                            .warnings
                            .push(format!("Step {number} (DECIDE): loops back to itself"));
                    }
                    Some(_) => {}
                },
            }
        }
    }

    for index in unreachable_steps(doc, &id_map) {
        report.warnings.push(format!(
            "Step {} ({}) is unreachable",
            index + 1,
            doc.actions[index].kind()
        ));
    }

    debug!(
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "validation finished"
    );
    report
}

fn id_indices(doc: &WorkflowDocument) -> Vec<(String, usize)> {
    let mut ids = Vec::new();
    for (index, step) in doc.actions.iter().enumerate() {
        if let Some(id) = step.id() {
            // Later definitions shadow earlier ones, matching the
            // interpreter's id map.
            ids.retain(|(existing, _)| existing != id);
            ids.push((id.to_string(), index));
        }
    }
    ids
}

/// Walk the control-flow graph from the first step. Every step flows
/// to its successor (DECIDE on acceptance) and a DECIDE additionally
/// to its resolved loopback target.
fn unreachable_steps(doc: &WorkflowDocument, id_map: &[(String, usize)]) -> Vec<usize> {
    let total = doc.actions.len();
    let mut seen = BTreeSet::new();
    let mut stack = vec![0usize];
    while let Some(index) = stack.pop() {
        if index >= total || !seen.insert(index) {
            continue;
        }
        if index + 1 < total {
            stack.push(index + 1);
        }
        if let ActionStep::Decide(decide) = &doc.actions[index]
            && let Some(target) = decide.loopback_target.as_deref()
            && let Some((_, target_index)) = id_map.iter().find(|(id, _)| id.as_str() == target)
        {
            stack.push(*target_index);
        }
    }
    (0..total).filter(|index| !seen.contains(index)).collect()
}

/// Write the resolved-document artifact.
///
/// Each step's inputs are replaced by the text the interpreter would
/// assemble from the string table (output names and `STR_USER_INPUT`
/// stay symbolic, their content is runtime state), with the original
/// token list preserved under `__original_inputs__`.
pub fn write_artifact(
    doc: &WorkflowDocument,
    strings: &StringTable,
    report: &ValidationReport,
    path: &Path,
) -> Result<()> {
    let mut actions = Vec::with_capacity(doc.actions.len());
    for step in &doc.actions {
        let mut value = step.to_value()?;
        if let Value::Mapping(step_map) = &mut value
            && let Some(Value::Mapping(fields)) = step_map.get_mut(step.kind())
        {
            annotate_inputs(fields, step.inputs(), strings);
        }
        actions.push(value);
    }

    let mut metadata = Mapping::new();
    metadata.insert(
        Value::String("generated_at".to_string()),
        Value::String(Local::now().to_rfc3339()),
    );
    metadata.insert(
        Value::String("validation_status".to_string()),
        Value::String(if report.ok() { "passed" } else { "failed" }.to_string()),
    );
    metadata.insert(
        Value::String("error_count".to_string()),
        Value::Number(report.errors.len().into()),
    );
    metadata.insert(
        Value::String("warning_count".to_string()),
        Value::Number(report.warnings.len().into()),
    );

    let mut root = Mapping::new();
    root.insert(
        Value::String("__metadata__".to_string()),
        Value::Mapping(metadata),
    );
    root.insert(
        Value::String("__validation_errors__".to_string()),
        string_list(&report.errors),
    );
    root.insert(
        Value::String("__validation_warnings__".to_string()),
        string_list(&report.warnings),
    );
    root.insert(
        Value::String("ACTIONS".to_string()),
        Value::Sequence(actions),
    );

    let contents =
        serde_yaml::to_string(&Value::Mapping(root)).context("serialize validation artifact")?;
    let tmp = path.with_extension("yaml.tmp");
    fs::write(&tmp, contents).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename {} into place", path.display()))?;
    debug!(path = %path.display(), "wrote validation artifact");
    Ok(())
}

fn annotate_inputs(fields: &mut Mapping, inputs: &[String], strings: &StringTable) {
    if inputs.is_empty() {
        return;
    }
    let mut resolved = Vec::with_capacity(inputs.len());
    let mut changed = false;
    for token in inputs {
        let text = if token == STR_USER_INPUT {
            token.clone()
        } else if let Some(value) = strings.get(token) {
            changed = true;
            value.to_string()
        } else {
            let substituted = template::resolve_str(token, strings.variables());
            changed |= substituted != *token;
            substituted
        };
        resolved.push(Value::String(text));
    }
    if changed {
        fields.insert(
            Value::String("__original_inputs__".to_string()),
            string_list(inputs),
        );
        fields.insert(
            Value::String("inputs".to_string()),
            Value::Sequence(resolved),
        );
    }
}

fn string_list(items: &[String]) -> Value {
    Value::Sequence(items.iter().map(|s| Value::String(s.clone())).collect())
}
