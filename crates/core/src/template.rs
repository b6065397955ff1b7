//! Template-reference substitution for step parameters.
//!
//! Step parameters may embed `{{stepId.path}}` tokens. Before dispatch,
//! the engine resolves each token against the results of already
//! succeeded steps (and the execution input, addressable as
//! `{{input.path}}`). The path after the step id is a dotted lookup into
//! the step's JSON result; numeric segments index into arrays.
//!
//! A missing step or path is a definition bug, not a transient fault:
//! resolution fails with [`TemplateError`] and the step fails without
//! retry.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// Template resolution failure. Fatal for the step; never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// The token's step id has no recorded result.
    #[error("template references unknown step result: {{{{{token}}}}}")]
    UnknownStep {
        /// The full dotted token, e.g. `a.result.text`.
        token: String,
    },
    /// The dotted path does not exist inside the referenced result.
    #[error("template path not found in step result: {{{{{token}}}}}")]
    PathNotFound {
        /// The full dotted token.
        token: String,
    },
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Step ids and path segments: word characters plus `-`, joined by dots.
    RE.get_or_init(|| Regex::new(r"\{\{\s*([\w\-]+(?:\.[\w\-]+)*)\s*\}\}").unwrap())
}

/// Resolves every `{{stepId.path}}` token in `parameters` against
/// `results` (a map from step id to that step's result JSON).
///
/// A string that consists of exactly one token is replaced by the
/// referenced value itself, preserving its JSON type. Tokens embedded
/// in a longer string are stringified in place (strings unquoted,
/// other values in JSON notation).
///
/// # Errors
///
/// Returns [`TemplateError`] if any token references an unknown step
/// or a path missing from that step's result.
pub fn resolve_parameters(
    parameters: &Value,
    results: &HashMap<String, Value>,
) -> Result<Value, TemplateError> {
    match parameters {
        Value::String(s) => resolve_string(s, results),
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_parameters(v, results))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolve_parameters(v, results)?)))
            .collect::<Result<serde_json::Map<_, _>, _>>()
            .map(Value::Object),
        // Numbers, booleans, and null contain no tokens.
        other => Ok(other.clone()),
    }
}

fn resolve_string(s: &str, results: &HashMap<String, Value>) -> Result<Value, TemplateError> {
    let re = token_regex();

    // Whole-string token: substitute the raw value, keeping its type.
    if let Some(caps) = re.captures(s) {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        if whole == s {
            let token = &caps[1];
            return lookup(token, results).cloned();
        }
    }

    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in re.captures_iter(s) {
        let m = caps.get(0).expect("capture 0 always present");
        out.push_str(&s[last..m.start()]);
        let value = lookup(&caps[1], results)?;
        match value {
            Value::String(inner) => out.push_str(inner),
            other => out.push_str(&other.to_string()),
        }
        last = m.end();
    }
    out.push_str(&s[last..]);
    Ok(Value::String(out))
}

fn lookup<'a>(
    token: &str,
    results: &'a HashMap<String, Value>,
) -> Result<&'a Value, TemplateError> {
    let mut segments = token.split('.');
    let step_id = segments.next().expect("split yields at least one segment");

    let mut current = results.get(step_id).ok_or_else(|| TemplateError::UnknownStep {
        token: token.to_string(),
    })?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|idx| items.get(idx)),
            _ => None,
        }
        .ok_or_else(|| TemplateError::PathNotFound {
            token: token.to_string(),
        })?;
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn results() -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("a".to_string(), json!({"result": "hello", "count": 3}));
        map.insert(
            "b".to_string(),
            json!({"items": ["x", "y"], "nested": {"deep": {"flag": true}}}),
        );
        map.insert("input".to_string(), json!({"topic": "AI"}));
        map
    }

    #[test]
    fn whole_string_token_substitutes_value() {
        let params = json!({"text": "{{a.result}}"});
        let resolved = resolve_parameters(&params, &results()).unwrap();
        assert_eq!(resolved, json!({"text": "hello"}));
    }

    #[test]
    fn whole_string_token_preserves_non_string_type() {
        let params = json!({"n": "{{a.count}}", "flag": "{{b.nested.deep.flag}}"});
        let resolved = resolve_parameters(&params, &results()).unwrap();
        assert_eq!(resolved, json!({"n": 3, "flag": true}));
    }

    #[test]
    fn embedded_token_stringifies() {
        let params = json!({"text": "say {{a.result}} {{a.count}} times"});
        let resolved = resolve_parameters(&params, &results()).unwrap();
        assert_eq!(resolved, json!({"text": "say hello 3 times"}));
    }

    #[test]
    fn input_is_addressable() {
        let params = json!({"topic": "{{input.topic}}"});
        let resolved = resolve_parameters(&params, &results()).unwrap();
        assert_eq!(resolved, json!({"topic": "AI"}));
    }

    #[test]
    fn array_index_path() {
        let params = json!("{{b.items.1}}");
        let resolved = resolve_parameters(&params, &results()).unwrap();
        assert_eq!(resolved, json!("y"));
    }

    #[test]
    fn nested_containers_resolve_recursively() {
        let params = json!({
            "list": ["{{a.result}}", {"inner": "{{a.count}}"}],
            "plain": 7,
        });
        let resolved = resolve_parameters(&params, &results()).unwrap();
        assert_eq!(
            resolved,
            json!({"list": ["hello", {"inner": 3}], "plain": 7})
        );
    }

    #[test]
    fn unknown_step_fails() {
        let params = json!("{{ghost.result}}");
        let err = resolve_parameters(&params, &results()).unwrap_err();
        assert_eq!(
            err,
            TemplateError::UnknownStep {
                token: "ghost.result".to_string()
            }
        );
    }

    #[test]
    fn missing_path_fails() {
        let params = json!("{{a.missing}}");
        let err = resolve_parameters(&params, &results()).unwrap_err();
        assert_eq!(
            err,
            TemplateError::PathNotFound {
                token: "a.missing".to_string()
            }
        );
    }

    #[test]
    fn path_through_scalar_fails() {
        let params = json!("{{a.result.deeper}}");
        let err = resolve_parameters(&params, &results()).unwrap_err();
        assert!(matches!(err, TemplateError::PathNotFound { .. }));
    }

    #[test]
    fn non_template_values_pass_through() {
        let params = json!({"n": 42, "s": "no tokens here", "b": false, "z": null});
        let resolved = resolve_parameters(&params, &results()).unwrap();
        assert_eq!(resolved, params);
    }

    #[test]
    fn whitespace_inside_braces_is_tolerated() {
        let params = json!("{{ a.result }}");
        let resolved = resolve_parameters(&params, &results()).unwrap();
        assert_eq!(resolved, json!("hello"));
    }
}
