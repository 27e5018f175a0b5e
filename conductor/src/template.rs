//! `{{name}}` placeholder substitution.
//!
//! Resolution is a single pass: a placeholder whose value itself
//! contains `{{...}}` is not re-expanded. A name with no binding is
//! replaced by the literal marker `{{UNDEFINED:name}}` so the gap
//! stays visible in prompts and artifacts instead of failing the run.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::Value;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^}]+)\}\}").expect("valid placeholder regex"));

/// Render a bound value into the string being substituted.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Substitute every `{{name}}` in `text` from `vars`.
///
/// Placeholder names are trimmed before lookup, so `{{ topic }}` and
/// `{{topic}}` bind the same variable. Text without placeholders is
/// returned unchanged.
pub fn resolve_str(text: &str, vars: &BTreeMap<String, Value>) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = caps[1].trim();
            match vars.get(name) {
                Some(value) => render(value),
                None => format!("{{{{UNDEFINED:{name}}}}}"),
            }
        })
        .into_owned()
}

/// Substitute placeholders throughout a YAML value.
///
/// Strings are resolved, mappings and sequences are walked, every
/// other scalar passes through untouched. Mapping keys are resolved
/// too, so templates may parameterize field values and data keys alike.
pub fn resolve_value(value: &Value, vars: &BTreeMap<String, Value>) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_str(s, vars)),
        Value::Sequence(items) => {
            Value::Sequence(items.iter().map(|item| resolve_value(item, vars)).collect())
        }
        Value::Mapping(mapping) => Value::Mapping(
            mapping
                .iter()
                .map(|(k, v)| (resolve_value(k, vars), resolve_value(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn substitutes_known_names_and_trims_whitespace() {
        let bound = vars(&[("topic", "owls")]);
        assert_eq!(resolve_str("about {{topic}}", &bound), "about owls");
        assert_eq!(resolve_str("about {{ topic }}", &bound), "about owls");
    }

    #[test]
    fn unknown_name_becomes_undefined_marker() {
        let bound = vars(&[]);
        assert_eq!(
            resolve_str("about {{topic}}", &bound),
            "about {{UNDEFINED:topic}}"
        );
    }

    #[test]
    fn substitution_is_single_pass() {
        // A value containing placeholder syntax is not expanded again.
        let bound = vars(&[("a", "{{b}}"), ("b", "deep")]);
        assert_eq!(resolve_str("{{a}}", &bound), "{{b}}");
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        let bound = vars(&[("topic", "owls")]);
        assert_eq!(resolve_str("plain text", &bound), "plain text");
    }

    #[test]
    fn resolves_nested_values() {
        let bound = vars(&[("who", "Reviewer")]);
        let value: Value = serde_yaml::from_str(
            r#"
expert: "{{who}}"
inputs:
  - "greet {{who}}"
limit: 3
"#,
        )
        .expect("yaml");
        let resolved = resolve_value(&value, &bound);
        let mapping = resolved.as_mapping().expect("mapping");
        assert_eq!(
            mapping.get("expert"),
            Some(&Value::String("Reviewer".into()))
        );
        let inputs = mapping
            .get("inputs")
            .and_then(Value::as_sequence)
            .expect("sequence");
        assert_eq!(inputs[0], Value::String("greet Reviewer".into()));
        // Non-string scalars pass through.
        assert_eq!(mapping.get("limit"), Some(&Value::Number(3.into())));
    }

    #[test]
    fn renders_scalar_bindings_as_plain_text() {
        let mut bound = BTreeMap::new();
        bound.insert("n".to_string(), Value::Number(7.into()));
        bound.insert("flag".to_string(), Value::Bool(true));
        assert_eq!(resolve_str("{{n}}/{{flag}}", &bound), "7/true");
    }
}
