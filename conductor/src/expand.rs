//! Macro expansion of COMPLEX steps.
//!
//! A COMPLEX step names a composite-action template stored in the
//! macro directory. Expansion is a pure function of the template file
//! and the invocation: placeholders are substituted from the
//! invocation's `expert` plus its `data` entries, the resulting steps
//! replace the COMPLEX entry in place, and the template itself is
//! never mutated.
//!
//! Expansion is one-shot. A COMPLEX step emitted by a template is left
//! as-is; the validator flags it and the interpreter refuses to
//! execute it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_yaml::Value;
use tracing::{debug, warn};

use crate::document::{ActionStep, ComplexStep, WorkflowDocument};
use crate::error::EngineError;
use crate::template;

const TEMPLATE_EXTENSIONS: [&str; 2] = ["yml", "yaml"];

/// Loads and expands composite-action templates from one directory.
#[derive(Debug, Clone)]
pub struct MacroLibrary {
    dir: PathBuf,
}

impl MacroLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        MacroLibrary { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load the raw step list for a template, probing `<name>.yml`
    /// then `<name>.yaml`. The file may be a bare step sequence or a
    /// mapping with an `ACTIONS` key.
    fn load_template(&self, name: &str) -> Result<Vec<Value>> {
        let mut last_err = None;
        for ext in TEMPLATE_EXTENSIONS {
            let path = self.dir.join(format!("{name}.{ext}"));
            match std::fs::read_to_string(&path) {
                Ok(contents) => {
                    let root: Value = serde_yaml::from_str(&contents).map_err(|err| {
                        EngineError::Load(format!("parse {}: {err}", path.display()))
                    })?;
                    let steps = match &root {
                        Value::Sequence(steps) => steps.clone(),
                        Value::Mapping(mapping) => mapping
                            .get("ACTIONS")
                            .and_then(Value::as_sequence)
                            .cloned()
                            .ok_or_else(|| {
                                EngineError::Load(format!(
                                    "template {} has no ACTIONS sequence",
                                    path.display()
                                ))
                            })?,
                        _ => {
                            return Err(EngineError::Load(format!(
                                "template {} must be a sequence or mapping",
                                path.display()
                            ))
                            .into());
                        }
                    };
                    if steps.is_empty() {
                        return Err(EngineError::Load(format!(
                            "template {} has no steps",
                            path.display()
                        ))
                        .into());
                    }
                    debug!(template = name, path = %path.display(), "loaded composite action");
                    return Ok(steps);
                }
                Err(err) => last_err = Some((path, err)),
            }
        }
        let (path, err) = last_err.expect("at least one extension probed");
        Err(EngineError::Load(format!(
            "composite action '{name}' not found (last tried {}): {err}",
            path.display()
        ))
        .into())
    }

    /// Expand one invocation into primitive steps.
    ///
    /// Substitution variables are the invocation's `expert` plus every
    /// `data` entry. If the template's final step is a PROMPT, its
    /// output is re-linked to the invocation's `output` so the
    /// composite action's result is addressable under the caller's
    /// chosen name.
    pub fn expand_invocation(&self, invocation: &ComplexStep) -> Result<Vec<ActionStep>> {
        let raw_steps = self.load_template(&invocation.action)?;

        let mut vars: BTreeMap<String, Value> = BTreeMap::new();
        vars.insert(
            "expert".to_string(),
            Value::String(invocation.expert.clone()),
        );
        for (key, value) in &invocation.data {
            vars.insert(key.clone(), Value::String(value.clone()));
        }

        let mut steps = Vec::with_capacity(raw_steps.len());
        for (index, raw) in raw_steps.iter().enumerate() {
            let resolved = template::resolve_value(raw, &vars);
            steps.push(ActionStep::from_value(index + 1, &resolved)?);
        }

        if let Some(ActionStep::Prompt(last)) = steps.last_mut() {
            last.output = invocation.output.clone();
        }
        Ok(steps)
    }
}

/// Replace every COMPLEX step in the document with its expansion.
///
/// A template that fails to load or parse leaves the raw COMPLEX step
/// in place with a warning; the run then fails loudly when the
/// interpreter reaches it.
pub fn expand_document(doc: &WorkflowDocument, library: &MacroLibrary) -> WorkflowDocument {
    let mut actions = Vec::with_capacity(doc.actions.len());
    for (index, step) in doc.actions.iter().enumerate() {
        match step {
            ActionStep::Complex(invocation) => match library.expand_invocation(invocation) {
                Ok(expanded) => {
                    debug!(
                        step = index + 1,
                        action = %invocation.action,
                        count = expanded.len(),
                        "expanded composite action"
                    );
                    actions.extend(expanded);
                }
                Err(err) => {
                    warn!(
                        step = index + 1,
                        action = %invocation.action,
                        error = %err,
                        "composite action expansion failed, leaving step unexpanded"
                    );
                    actions.push(step.clone());
                }
            },
            other => actions.push(other.clone()),
        }
    }
    WorkflowDocument {
        strings: doc.strings.clone(),
        actions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_document;

    fn write_template(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).expect("write template");
    }

    fn invocation(action: &str, output: &str, data: &[(&str, &str)]) -> ComplexStep {
        ComplexStep {
            action: action.to_string(),
            expert: "Ghostwriter".to_string(),
            data: data
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            output: output.to_string(),
        }
    }

    #[test]
    fn expands_with_expert_and_data_substitution() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_template(
            dir.path(),
            "draft.yml",
            r#"
- PROMPT:
    expert: "{{expert}}"
    inputs: ["write about {{topic}}"]
    output: inner_draft
"#,
        );
        let library = MacroLibrary::new(dir.path());
        let steps = library
            .expand_invocation(&invocation("draft", "final_draft", &[("topic", "owls")]))
            .expect("expand");

        assert_eq!(steps.len(), 1);
        let ActionStep::Prompt(prompt) = &steps[0] else {
            panic!("expected PROMPT");
        };
        assert_eq!(prompt.expert, "Ghostwriter");
        assert_eq!(prompt.inputs, vec!["write about owls".to_string()]);
        // Final PROMPT output is re-linked to the invocation output.
        assert_eq!(prompt.output, "final_draft");
    }

    #[test]
    fn trailing_decide_output_is_not_relinked() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_template(
            dir.path(),
            "gated.yml",
            r#"
- PROMPT:
    id: attempt
    expert: "{{expert}}"
    inputs: ["try {{topic}}"]
    output: attempt_out
- DECIDE:
    expert: "{{expert}}"
    inputs: [attempt_out]
    output: gate_out
    loopback_target: attempt
"#,
        );
        let library = MacroLibrary::new(dir.path());
        let steps = library
            .expand_invocation(&invocation("gated", "caller_out", &[("topic", "owls")]))
            .expect("expand");

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].output(), "gate_out");
    }

    #[test]
    fn probes_yml_before_yaml() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_template(
            dir.path(),
            "pick.yml",
            "- PROMPT:\n    expert: FromYml\n    output: out\n",
        );
        write_template(
            dir.path(),
            "pick.yaml",
            "- PROMPT:\n    expert: FromYaml\n    output: out\n",
        );
        let library = MacroLibrary::new(dir.path());
        let steps = library
            .expand_invocation(&invocation("pick", "out", &[]))
            .expect("expand");
        assert_eq!(steps[0].expert(), "FromYml");
    }

    #[test]
    fn missing_template_leaves_complex_step_in_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let doc = parse_document(
            r#"
ACTIONS:
  - COMPLEX:
      action: no_such
      expert: A
      output: out
"#,
        )
        .expect("parse");
        let expanded = expand_document(&doc, &MacroLibrary::new(dir.path()));
        assert_eq!(expanded.actions.len(), 1);
        assert!(matches!(expanded.actions[0], ActionStep::Complex(_)));
    }

    #[test]
    fn unbound_placeholder_survives_as_marker() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_template(
            dir.path(),
            "partial.yml",
            r#"
- PROMPT:
    expert: "{{expert}}"
    inputs: ["{{missing}}"]
    output: out
"#,
        );
        let library = MacroLibrary::new(dir.path());
        let steps = library
            .expand_invocation(&invocation("partial", "out", &[]))
            .expect("expand");
        let ActionStep::Prompt(prompt) = &steps[0] else {
            panic!("expected PROMPT");
        };
        assert_eq!(prompt.inputs, vec!["{{UNDEFINED:missing}}".to_string()]);
    }
}
