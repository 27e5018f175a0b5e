//! String table loading and resolution.
//!
//! A workflow's `STRINGS` section maps `STR_*` names to prompt text.
//! It can live inline in the document or in an external YAML file
//! (either a bare mapping or wrapped under a top-level `STRINGS:` key).
//! An optional `VARIABLES` sub-mapping is extracted first and used for
//! one pass of `{{name}}` substitution over the remaining entries;
//! variables themselves are never addressable as inputs.
//!
//! `STR_USER_INPUT` is reserved: it is always present in the loaded
//! table, populated from the caller-supplied input when given, falling
//! back to the document's own value, then to the empty string.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde_yaml::Value;

use crate::error::EngineError;
use crate::template;

pub const STR_USER_INPUT: &str = "STR_USER_INPUT";
const VARIABLES_KEY: &str = "VARIABLES";
const STRINGS_KEY: &str = "STRINGS";

/// The resolved string table for one run.
#[derive(Debug, Clone, Default)]
pub struct StringTable {
    strings: BTreeMap<String, String>,
    variables: BTreeMap<String, Value>,
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

impl StringTable {
    /// A table with no document strings, just the reserved user input.
    pub fn empty(user_input: Option<&str>) -> Self {
        let mut table = StringTable::default();
        table
            .strings
            .insert(STR_USER_INPUT.to_string(), user_input.unwrap_or("").to_string());
        table
    }

    /// Build a table from an inline `STRINGS` mapping.
    pub fn from_value(value: &Value, user_input: Option<&str>) -> Result<Self> {
        let mapping = value
            .as_mapping()
            .ok_or_else(|| EngineError::Load("STRINGS must be a mapping".to_string()))?;

        let mut variables = BTreeMap::new();
        if let Some(vars_value) = mapping.get(VARIABLES_KEY) {
            let vars_mapping = vars_value
                .as_mapping()
                .ok_or_else(|| EngineError::Load("VARIABLES must be a mapping".to_string()))?;
            for (key, val) in vars_mapping {
                let name = key.as_str().ok_or_else(|| {
                    EngineError::Load("VARIABLES keys must be strings".to_string())
                })?;
                variables.insert(name.to_string(), val.clone());
            }
        }

        let mut strings = BTreeMap::new();
        for (key, val) in mapping {
            let name = key
                .as_str()
                .ok_or_else(|| EngineError::Load("STRINGS keys must be strings".to_string()))?;
            if name == VARIABLES_KEY {
                continue;
            }
            let text = scalar_text(val).ok_or_else(|| {
                EngineError::Load(format!("string '{name}' must be a scalar value"))
            })?;
            strings.insert(name.to_string(), template::resolve_str(&text, &variables));
        }

        match user_input {
            Some(input) => {
                strings.insert(STR_USER_INPUT.to_string(), input.to_string());
            }
            None => {
                strings
                    .entry(STR_USER_INPUT.to_string())
                    .or_insert_with(String::new);
            }
        }

        Ok(StringTable { strings, variables })
    }

    /// Load a table from an external YAML file.
    ///
    /// Accepts either a bare mapping of names to text or a document
    /// with a top-level `STRINGS:` wrapper.
    pub fn from_file(path: &Path, user_input: Option<&str>) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|err| EngineError::Load(format!("read {}: {err}", path.display())))?;
        let root: Value = serde_yaml::from_str(&contents)
            .map_err(|err| EngineError::Load(format!("parse {}: {err}", path.display())))?;
        let source = root
            .as_mapping()
            .and_then(|m| m.get(STRINGS_KEY))
            .unwrap_or(&root);
        Self::from_value(source, user_input)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.strings.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strings.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.strings.keys().map(String::as_str)
    }

    pub fn variables(&self) -> &BTreeMap<String, Value> {
        &self.variables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).expect("yaml")
    }

    #[test]
    fn resolves_variables_in_string_entries_once() {
        let table = StringTable::from_value(
            &mapping(
                r#"
VARIABLES:
  subject: owls
STR_TASK: "write about {{subject}}"
"#,
            ),
            None,
        )
        .expect("load");
        assert_eq!(table.get("STR_TASK"), Some("write about owls"));
        // VARIABLES entries are not addressable strings.
        assert!(!table.contains("subject"));
        assert!(table.variables().contains_key("subject"));
    }

    #[test]
    fn user_input_overrides_document_value() {
        let source = mapping("STR_USER_INPUT: from doc\nSTR_A: a\n");
        let table = StringTable::from_value(&source, Some("from cli")).expect("load");
        assert_eq!(table.get(STR_USER_INPUT), Some("from cli"));

        let table = StringTable::from_value(&source, None).expect("load");
        assert_eq!(table.get(STR_USER_INPUT), Some("from doc"));
    }

    #[test]
    fn user_input_defaults_to_empty_when_absent_everywhere() {
        let table = StringTable::from_value(&mapping("STR_A: a\n"), None).expect("load");
        assert_eq!(table.get(STR_USER_INPUT), Some(""));
    }

    #[test]
    fn unknown_variable_leaves_visible_marker() {
        let table =
            StringTable::from_value(&mapping("STR_A: \"use {{missing}}\"\n"), None).expect("load");
        assert_eq!(table.get("STR_A"), Some("use {{UNDEFINED:missing}}"));
    }

    #[test]
    fn non_mapping_strings_section_is_a_load_error() {
        let err = StringTable::from_value(&mapping("- a\n- b\n"), None).expect_err("should fail");
        assert!(err.to_string().contains("STRINGS must be a mapping"));
    }

    #[test]
    fn external_file_accepts_wrapped_and_bare_shapes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let wrapped = dir.path().join("wrapped.yaml");
        std::fs::write(&wrapped, "STRINGS:\n  STR_A: wrapped\n").expect("write");
        let bare = dir.path().join("bare.yaml");
        std::fs::write(&bare, "STR_A: bare\n").expect("write");

        let table = StringTable::from_file(&wrapped, None).expect("load wrapped");
        assert_eq!(table.get("STR_A"), Some("wrapped"));
        let table = StringTable::from_file(&bare, None).expect("load bare");
        assert_eq!(table.get("STR_A"), Some("bare"));
    }
}
