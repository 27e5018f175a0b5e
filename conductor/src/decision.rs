//! Decision extraction from expert responses.
//!
//! A DECIDE step asks the expert for a JSON object with `explanation`
//! and `decision` fields, but responses arrive embedded in prose,
//! fenced code blocks, or not as JSON at all. Extraction never fails:
//! when no usable object is found the whole response becomes the
//! explanation and the decision falls back to a case-insensitive
//! `TRUE` scan, defaulting to `false`.

use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct DecisionObject {
    explanation: String,
    decision: bool,
}

/// Find the first balanced `{...}` span in `text`, honoring string
/// literals and escapes so braces inside quoted values do not
/// terminate the scan early.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract `(explanation, decision)` from a raw expert response.
///
/// JSON-first: the first balanced object carrying both fields wins.
/// Otherwise the trimmed response is the explanation and the decision
/// is whether the response mentions `TRUE` in any case.
pub fn extract_decision(response: &str) -> (String, bool) {
    if let Some(candidate) = first_json_object(response)
        && let Ok(parsed) = serde_json::from_str::<DecisionObject>(candidate)
    {
        return (parsed.explanation, parsed.decision);
    }
    debug!("no structured decision object found, falling back to text scan");
    let decision = response.to_uppercase().contains("TRUE");
    (response.trim().to_string(), decision)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_bare_json_object() {
        let (explanation, decision) =
            extract_decision(r#"{"explanation": "looks complete", "decision": true}"#);
        assert_eq!(explanation, "looks complete");
        assert!(decision);
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let response = r#"Here is my verdict:
```json
{"explanation": "missing the summary section", "decision": false}
```
Let me know if you need more."#;
        let (explanation, decision) = extract_decision(response);
        assert_eq!(explanation, "missing the summary section");
        assert!(!decision);
    }

    #[test]
    fn braces_inside_string_values_do_not_break_the_scan() {
        let response = r#"{"explanation": "the {draft} uses placeholders", "decision": true}"#;
        let (explanation, decision) = extract_decision(response);
        assert_eq!(explanation, "the {draft} uses placeholders");
        assert!(decision);
    }

    #[test]
    fn falls_back_to_true_scan_without_json() {
        let (explanation, decision) = extract_decision("  The answer is TRUE, ship it.  ");
        assert_eq!(explanation, "The answer is TRUE, ship it.");
        assert!(decision);

        let (_, decision) = extract_decision("the draft is true to form");
        assert!(decision);

        let (explanation, decision) = extract_decision("needs another pass");
        assert_eq!(explanation, "needs another pass");
        assert!(!decision);
    }

    #[test]
    fn incomplete_json_object_falls_back() {
        let response = r#"{"explanation": "only half an object""#;
        let (explanation, decision) = extract_decision(response);
        assert_eq!(explanation, response.trim());
        assert!(!decision);
    }

    #[test]
    fn json_missing_a_field_falls_back() {
        let response = r#"{"explanation": "no verdict given"}"#;
        let (explanation, decision) = extract_decision(response);
        assert_eq!(explanation, response);
        assert!(!decision);
    }
}
