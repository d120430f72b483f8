//! Tool-call decoding with malformed-argument recovery.
//!
//! Models frequently emit almost-JSON: trailing commas, Python literals,
//! single quotes, or arguments double-wrapped by the provider. [`decode`]
//! tries a fixed sequence of deterministic rewrites and accepts the first
//! candidate that both parses and matches the tool's parameter schema.
//! Calls that never match become [`MalformedToolCall`]s with a diagnostic
//! the model can act on.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ToolDefinition;
use super::schema;

/// Rewrite that made a raw argument string decodable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    /// Took the nested `"arguments"` field of a double-wrapped call.
    UnwrappedArguments,
    /// Removed commas before `}` or `]`.
    StrippedTrailingCommas,
    /// Surrounded bare key-value text with braces.
    WrappedInBraces,
    /// Rewrote `True`/`False`/`None`/`nil`.
    NormalizedLiterals,
    /// Turned single-quoted strings into double-quoted ones.
    ConvertedQuotes,
}

/// A tool call whose arguments matched a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedToolCall {
    /// Position of the call within the response.
    pub index: u32,
    /// Function name.
    pub name: String,
    /// Schema-checked arguments.
    pub arguments: Map<String, Value>,
    /// Last rewrite applied, if any.
    pub recovery: Option<Recovery>,
}

impl DecodedToolCall {
    /// Call signature, e.g. `get_weather(city: "Oslo")`.
    pub fn signature(&self) -> String {
        super::format_call(&self.name, &self.arguments)
    }
}

/// A tool call that could not be decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedToolCall {
    /// Position of the call within the response.
    pub index: u32,
    /// Function name, if the model sent one.
    pub name: Option<String>,
    /// Argument text exactly as accumulated from the stream.
    pub raw_arguments: String,
    /// Why decoding failed.
    pub error: String,
}

impl MalformedToolCall {
    /// Call signature using the raw argument text.
    pub fn signature(&self) -> String {
        format!(
            "{}({})",
            self.name.as_deref().unwrap_or("<unnamed>"),
            self.raw_arguments
        )
    }
}

/// Outcome of decoding one accumulated tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Arguments matched the tool's schema.
    Call(DecodedToolCall),
    /// No candidate matched.
    Malformed(MalformedToolCall),
}

/// Decode an accumulated `(name, arguments)` pair against the offered tools.
pub fn decode(
    index: u32,
    name: Option<&str>,
    raw_arguments: &str,
    tools: &[ToolDefinition],
) -> Decoded {
    let malformed = |error: String| {
        Decoded::Malformed(MalformedToolCall {
            index,
            name: name.map(str::to_string),
            raw_arguments: raw_arguments.to_string(),
            error,
        })
    };

    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return malformed("the function call has no name".to_string());
    };

    let Some(tool) = tools.iter().find(|t| t.name == name) else {
        let available: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        return malformed(format!(
            "unknown function '{}'; available functions: {}",
            name,
            available.join(", ")
        ));
    };
    let parameters = &tool.input_schema;

    let trimmed = raw_arguments.trim();
    if trimmed.is_empty() {
        let required = schema::required_parameters(parameters);
        if required.is_empty() {
            return Decoded::Call(DecodedToolCall {
                index,
                name: name.to_string(),
                arguments: Map::new(),
                recovery: None,
            });
        }
        return malformed(format!(
            "arguments are empty; '{}' requires: {}",
            name,
            required.join(", ")
        ));
    }

    let mut parse_error: Option<String> = None;
    let mut schema_error: Option<String> = None;

    for (recovery, candidate) in candidates(trimmed) {
        match serde_json::from_str::<Value>(&candidate) {
            Ok(value) => match schema::validate(parameters, value) {
                Ok(arguments) => {
                    if let Some(step) = recovery {
                        tracing::debug!(tool = %name, ?step, "decode: recovered malformed arguments");
                    }
                    return Decoded::Call(DecodedToolCall {
                        index,
                        name: name.to_string(),
                        arguments,
                        recovery,
                    });
                }
                Err(e) => {
                    schema_error.get_or_insert(e);
                }
            },
            Err(e) => {
                parse_error.get_or_insert(e.to_string());
            }
        }
    }

    match (schema_error, parse_error) {
        (Some(e), _) => malformed(format!(
            "arguments are valid JSON but do not match the parameters of '{name}': {e}"
        )),
        (None, Some(e)) => malformed(format!("arguments are not valid JSON: {e}")),
        (None, None) => malformed("arguments could not be decoded".to_string()),
    }
}

/// Candidate argument strings in recovery order.
///
/// The unwrap step stands alone; the later rewrites build on each other.
/// A rewrite that leaves the text unchanged adds no candidate.
///
/// The order is fixed: commas are stripped before braces are added, so bare
/// text ending in a comma (`"a": 1,`) stays malformed.
fn candidates(raw: &str) -> Vec<(Option<Recovery>, String)> {
    let mut out = vec![(None, raw.to_string())];

    if let Some(inner) = unwrap_arguments(raw) {
        out.push((Some(Recovery::UnwrappedArguments), inner));
    }

    let mut current = raw.to_string();
    let steps: [(Recovery, fn(&str) -> String); 4] = [
        (Recovery::StrippedTrailingCommas, strip_trailing_commas),
        (Recovery::WrappedInBraces, wrap_in_braces),
        (Recovery::NormalizedLiterals, normalize_literals),
        (Recovery::ConvertedQuotes, convert_single_quotes),
    ];
    for (recovery, rewrite) in steps {
        let next = rewrite(&current);
        if next != current {
            out.push((Some(recovery), next.clone()));
            current = next;
        }
    }

    out
}

fn unwrap_arguments(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    match value.get("arguments")? {
        Value::String(inner) => Some(inner.clone()),
        inner @ Value::Object(_) => Some(inner.to_string()),
        _ => None,
    }
}

fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn wrap_in_braces(text: &str) -> String {
    if text.starts_with('{') {
        text.to_string()
    } else {
        format!("{{{text}}}")
    }
}

fn normalize_literals(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut word = String::new();
    let mut in_string = false;
    let mut escaped = false;

    let flush = |word: &mut String, out: &mut String| {
        let replacement = match word.as_str() {
            "True" => "true",
            "False" => "false",
            "None" | "nil" => "null",
            other => other,
        };
        out.push_str(replacement);
        word.clear();
    };

    for c in text.chars() {
        if in_string {
            out.push(c);
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if c.is_alphanumeric() || c == '_' {
            word.push(c);
            continue;
        }
        flush(&mut word, &mut out);
        if c == '"' {
            in_string = true;
        }
        out.push(c);
    }
    flush(&mut word, &mut out);
    out
}

fn convert_single_quotes(text: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Outside,
        Double,
        Single,
    }

    let mut out = String::with_capacity(text.len());
    let mut state = State::Outside;
    let mut escaped = false;

    for c in text.chars() {
        match state {
            State::Outside => match c {
                '"' => {
                    state = State::Double;
                    out.push(c);
                }
                '\'' => {
                    state = State::Single;
                    out.push('"');
                }
                _ => out.push(c),
            },
            State::Double => {
                out.push(c);
                match c {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    '"' => state = State::Outside,
                    _ => {}
                }
            }
            State::Single => {
                if escaped {
                    escaped = false;
                    if c == '\'' {
                        out.push('\'');
                    } else {
                        out.push('\\');
                        out.push(c);
                    }
                    continue;
                }
                match c {
                    '\\' => escaped = true,
                    '\'' => {
                        state = State::Outside;
                        out.push('"');
                    }
                    '"' => out.push_str("\\\""),
                    _ => out.push(c),
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, schema: Value) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: None,
            input_schema: schema,
        }
    }

    fn registry() -> Vec<ToolDefinition> {
        vec![
            tool(
                "count",
                json!({
                    "type": "object",
                    "properties": {"a": {"type": "integer"}},
                    "required": ["a"]
                }),
            ),
            tool(
                "search",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "exact": {"type": "boolean"},
                        "limit": {"type": ["integer", "null"]}
                    },
                    "required": ["query"]
                }),
            ),
            tool("now", json!({"type": "object"})),
        ]
    }

    fn expect_call(decoded: Decoded) -> DecodedToolCall {
        match decoded {
            Decoded::Call(call) => call,
            Decoded::Malformed(m) => panic!("expected a decoded call, got {m:?}"),
        }
    }

    fn expect_malformed(decoded: Decoded) -> MalformedToolCall {
        match decoded {
            Decoded::Malformed(m) => m,
            Decoded::Call(c) => panic!("expected a malformed call, got {c:?}"),
        }
    }

    #[test]
    fn test_valid_json_needs_no_recovery() {
        let call = expect_call(decode(0, Some("count"), r#"{"a": 1}"#, &registry()));
        assert_eq!(call.arguments["a"], 1);
        assert_eq!(call.recovery, None);
    }

    #[test]
    fn test_trailing_comma_recovered() {
        let call = expect_call(decode(0, Some("count"), r#"{"a": 1,}"#, &registry()));
        assert_eq!(Value::Object(call.arguments), json!({"a": 1}));
        assert_eq!(call.recovery, Some(Recovery::StrippedTrailingCommas));
    }

    #[test]
    fn test_recovered_matches_well_formed() {
        let reg = registry();
        let clean = expect_call(decode(0, Some("search"), r#"{"query": "rust", "exact": true, "limit": null}"#, &reg));
        let messy = expect_call(decode(0, Some("search"), "{'query': 'rust', 'exact': True, 'limit': None,}", &reg));
        assert_eq!(clean.arguments, messy.arguments);
        assert_eq!(messy.recovery, Some(Recovery::ConvertedQuotes));
    }

    #[test]
    fn test_double_wrapped_object() {
        let raw = r#"{"name": "count", "arguments": {"a": 7}}"#;
        let call = expect_call(decode(0, Some("count"), raw, &registry()));
        assert_eq!(call.arguments["a"], 7);
        assert_eq!(call.recovery, Some(Recovery::UnwrappedArguments));
    }

    #[test]
    fn test_double_wrapped_string() {
        let raw = r#"{"arguments": "{\"a\": 2}"}"#;
        let call = expect_call(decode(0, Some("count"), raw, &registry()));
        assert_eq!(call.arguments["a"], 2);
        assert_eq!(call.recovery, Some(Recovery::UnwrappedArguments));
    }

    #[test]
    fn test_bare_key_value_wrapped() {
        let call = expect_call(decode(0, Some("count"), r#""a": 3"#, &registry()));
        assert_eq!(call.arguments["a"], 3);
        assert_eq!(call.recovery, Some(Recovery::WrappedInBraces));
    }

    #[test]
    fn test_bare_text_with_trailing_comma_stays_malformed() {
        let m = expect_malformed(decode(0, Some("count"), r#""a": 1,"#, &registry()));
        assert!(m.error.starts_with("arguments are not valid JSON"));
    }

    #[test]
    fn test_python_literals_normalized() {
        let call = expect_call(decode(
            0,
            Some("search"),
            r#"{"query": "True story", "exact": False}"#,
            &registry(),
        ));
        assert_eq!(call.arguments["exact"], false);
        assert_eq!(call.arguments["query"], "True story");
        assert_eq!(call.recovery, Some(Recovery::NormalizedLiterals));
    }

    #[test]
    fn test_single_quotes_keep_apostrophes_in_double_quoted_strings() {
        let converted = convert_single_quotes(r#"{'query': "it's", 'q2': 'say "hi"'}"#);
        let value: Value = serde_json::from_str(&converted).unwrap();
        assert_eq!(value["query"], "it's");
        assert_eq!(value["q2"], "say \"hi\"");
    }

    #[test]
    fn test_trailing_comma_inside_string_untouched() {
        assert_eq!(strip_trailing_commas(r#"{"a": ",}"}"#), r#"{"a": ",}"}"#);
        assert_eq!(strip_trailing_commas("[1, 2 ,\n]"), "[1, 2 \n]");
    }

    #[test]
    fn test_empty_arguments_without_required() {
        let call = expect_call(decode(0, Some("now"), "  ", &registry()));
        assert!(call.arguments.is_empty());
    }

    #[test]
    fn test_empty_arguments_with_required() {
        let m = expect_malformed(decode(2, Some("count"), "", &registry()));
        assert_eq!(m.index, 2);
        assert!(m.error.contains("arguments are empty"));
        assert!(m.error.contains('a'));
    }

    #[test]
    fn test_schema_mismatch_diagnostic() {
        let m = expect_malformed(decode(0, Some("count"), r#"{"a": "one"}"#, &registry()));
        assert!(m.error.contains("valid JSON but do not match"));
        assert!(m.error.contains("parameter 'a' should be integer"));
        assert_eq!(m.raw_arguments, r#"{"a": "one"}"#);
    }

    #[test]
    fn test_invalid_json_diagnostic() {
        let m = expect_malformed(decode(0, Some("count"), "{a: [", &registry()));
        assert!(m.error.starts_with("arguments are not valid JSON"));
    }

    #[test]
    fn test_unknown_function() {
        let m = expect_malformed(decode(0, Some("fly"), "{}", &registry()));
        assert!(m.error.contains("unknown function 'fly'"));
        assert!(m.error.contains("count"));
    }

    #[test]
    fn test_missing_name() {
        let m = expect_malformed(decode(1, None, "{}", &registry()));
        assert_eq!(m.name, None);
        assert!(m.error.contains("no name"));
    }

    #[test]
    fn test_signature() {
        let call = expect_call(decode(0, Some("count"), r#"{"a": 1}"#, &registry()));
        assert_eq!(call.signature(), "count(a: 1)");
        let m = expect_malformed(decode(0, Some("count"), "oops", &registry()));
        assert_eq!(m.signature(), "count(oops)");
    }
}
