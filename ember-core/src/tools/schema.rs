//! Minimal JSON-schema check for tool arguments.
//!
//! Only the subset tool definitions actually use is checked: the top-level
//! object shape, `required`, per-property `type` and `enum`. Undeclared
//! properties are accepted.

use serde_json::{Map, Value};

/// Check `value` against a tool's parameter schema.
///
/// Returns the argument object on success, or a human-readable reason.
pub fn validate(schema: &Value, value: Value) -> Result<Map<String, Value>, String> {
    let Value::Object(arguments) = value else {
        return Err(format!("expected a JSON object, got {}", type_name(&value)));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !arguments.contains_key(key) {
                return Err(format!("missing required parameter '{key}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, property) in properties {
            let Some(actual) = arguments.get(key) else {
                continue;
            };
            if let Some(expected) = property.get("type")
                && !type_matches(expected, actual)
            {
                return Err(format!(
                    "parameter '{key}' should be {}, got {}",
                    describe_type(expected),
                    type_name(actual)
                ));
            }
            if let Some(allowed) = property.get("enum").and_then(Value::as_array)
                && !allowed.contains(actual)
            {
                return Err(format!("parameter '{key}' must be one of {}", Value::from(allowed.clone())));
            }
        }
    }

    Ok(arguments)
}

/// Names of the parameters the schema marks as required.
pub fn required_parameters(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn type_matches(expected: &Value, actual: &Value) -> bool {
    match expected {
        Value::String(name) => single_type_matches(name, actual),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| single_type_matches(name, actual)),
        _ => true,
    }
}

fn single_type_matches(name: &str, actual: &Value) -> bool {
    match name {
        "string" => actual.is_string(),
        "integer" => actual.is_i64() || actual.is_u64(),
        "number" => actual.is_number(),
        "boolean" => actual.is_boolean(),
        "array" => actual.is_array(),
        "object" => actual.is_object(),
        "null" => actual.is_null(),
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "a": {"type": "integer"},
                "unit": {"type": "string", "enum": ["c", "f"]},
                "tags": {"type": ["array", "null"]}
            },
            "required": ["a"]
        })
    }

    #[test]
    fn test_valid_arguments() {
        let args = validate(&schema(), json!({"a": 1, "unit": "c"})).unwrap();
        assert_eq!(args["a"], 1);
    }

    #[test]
    fn test_missing_required() {
        let err = validate(&schema(), json!({"unit": "c"})).unwrap_err();
        assert!(err.contains("missing required parameter 'a'"));
    }

    #[test]
    fn test_wrong_type() {
        let err = validate(&schema(), json!({"a": "one"})).unwrap_err();
        assert_eq!(err, "parameter 'a' should be integer, got string");
    }

    #[test]
    fn test_float_is_not_integer() {
        assert!(validate(&schema(), json!({"a": 1.5})).is_err());
    }

    #[test]
    fn test_enum_violation() {
        let err = validate(&schema(), json!({"a": 1, "unit": "k"})).unwrap_err();
        assert!(err.contains("must be one of"));
    }

    #[test]
    fn test_union_type() {
        assert!(validate(&schema(), json!({"a": 1, "tags": null})).is_ok());
        assert!(validate(&schema(), json!({"a": 1, "tags": ["x"]})).is_ok());
        assert!(validate(&schema(), json!({"a": 1, "tags": 3})).is_err());
    }

    #[test]
    fn test_non_object_rejected() {
        let err = validate(&schema(), json!([1, 2])).unwrap_err();
        assert_eq!(err, "expected a JSON object, got array");
    }

    #[test]
    fn test_undeclared_keys_ignored() {
        assert!(validate(&schema(), json!({"a": 1, "extra": true})).is_ok());
    }

    #[test]
    fn test_required_parameters() {
        assert_eq!(required_parameters(&schema()), vec!["a"]);
        assert!(required_parameters(&json!({})).is_empty());
    }
}
