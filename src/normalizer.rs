//! Repairs near-JSON tool-argument strings into valid JSON.
//!
//! Models streaming through local OpenAI-compatible servers frequently emit
//! tool-call arguments that are not quite valid JSON: a stray `null` wrapper,
//! double-encoded strings, unquoted keys, unbalanced brackets, or a bare
//! comma-separated positional list. `normalize` is a deterministic, pure,
//! one-directional heuristic pipeline over these shapes. It never tries to
//! be clever about recovering the "true" structure; it only walks a fixed
//! list of repairs and stops at the first one that yields valid JSON.

use serde_json::Value;

/// Repair `raw` into a JSON object/array string, using `param_order` (the
/// tool's declared parameter names, in schema order) to map a bare
/// positional array onto named fields.
///
/// If no repair step succeeds, `raw` is returned unchanged — the caller
/// (the tool registry) decides whether to treat that as a hard failure.
pub fn normalize(raw: &str, param_order: &[String]) -> String {
    if let Some(value) = strict_valid(raw) {
        return value;
    }

    let mut current = raw.to_string();

    current = strip_null_wrapping(&current);
    if let Some(v) = strict_valid(&current) {
        return v;
    }

    current = unescape_double_encoded(&current);
    if let Some(v) = strict_valid(&current) {
        return v;
    }

    current = escape_stray_quotes(&current);
    current = quote_bare_keys(&current);
    current = balance_brackets(&current);
    current = remove_illegal_escapes(&current);

    if let Some(v) = strict_valid(&current) {
        return rewrite_array_to_object(v, param_order);
    }

    if let Some(array_literal) = positional_to_array(&current) {
        if let Some(v) = strict_valid(&array_literal) {
            return rewrite_array_to_object(v, param_order);
        }
    }

    raw.to_string()
}

/// Step 1: parse as-is; succeed only if the whole string is consumed (no
/// trailing tokens) and the result is a JSON object or array.
fn strict_valid(input: &str) -> Option<String> {
    let trimmed = input.trim();
    let mut de = serde_json::Deserializer::from_str(trimmed);
    let value: Value = serde_json::de::Deserialize::deserialize(&mut de).ok()?;
    de.end().ok()?;
    if value.is_object() || value.is_array() {
        Some(trimmed.to_string())
    } else {
        None
    }
}

/// Step 2: repeatedly strip a leading/trailing literal `null` as long as
/// what remains still parses as a JSON object, array, or quoted string.
fn strip_null_wrapping(input: &str) -> String {
    let mut s = input.trim().to_string();
    loop {
        let stripped_prefix = s.strip_prefix("null").map(|r| r.trim_start().to_string());
        let stripped_suffix = s.strip_suffix("null").map(|r| r.trim_end().to_string());

        let candidate = stripped_prefix.or(stripped_suffix);
        match candidate {
            Some(c) if looks_structurally_valid(&c) => {
                s = c;
            }
            _ => break,
        }
    }
    s
}

fn looks_structurally_valid(s: &str) -> bool {
    let t = s.trim();
    (t.starts_with('{') && t.ends_with('}'))
        || (t.starts_with('[') && t.ends_with(']'))
        || (t.starts_with('"') && t.ends_with('"') && t.len() >= 2)
}

/// Step 3: if the whole string is a quoted `"{...}"` or `"[...]"`, unescape
/// one level (the common "double-encoded JSON" vendor quirk).
fn unescape_double_encoded(input: &str) -> String {
    let t = input.trim();
    if t.len() >= 2 && t.starts_with('"') && t.ends_with('"') {
        if let Ok(Value::String(inner)) = serde_json::from_str::<Value>(t) {
            let inner_trimmed = inner.trim();
            if (inner_trimmed.starts_with('{') && inner_trimmed.ends_with('}'))
                || (inner_trimmed.starts_with('[') && inner_trimmed.ends_with(']'))
            {
                return inner;
            }
        }
    }
    input.to_string()
}

/// Step 4: escape stray control characters (`"`, `\n`, `\r`, `\t`, `\`) that
/// appear inside an unquoted string value between `:` and the next
/// structural terminator (`,`, `}`, `]`). Does not touch content that is
/// already inside a properly quoted string.
fn escape_stray_quotes(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escape_next = false;

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if escape_next {
            out.push(c);
            escape_next = false;
            i += 1;
            continue;
        }
        match c {
            '\\' if in_string => {
                out.push(c);
                escape_next = true;
            }
            '"' if in_string => {
                if closes_string(&chars, i + 1) {
                    in_string = false;
                    out.push('"');
                } else {
                    out.push('\\');
                    out.push('"');
                }
            }
            '"' => {
                in_string = true;
                out.push('"');
            }
            '\n' if in_string => out.push_str("\\n"),
            '\r' if in_string => out.push_str("\\r"),
            '\t' if in_string => out.push_str("\\t"),
            _ => out.push(c),
        }
        i += 1;
    }
    out
}

/// Looks ahead from `start` (skipping whitespace) to decide whether a `"`
/// at the preceding position is the real end of a string value, i.e. is
/// followed by a structural terminator or end of input rather than more
/// string content.
fn closes_string(chars: &[char], start: usize) -> bool {
    let mut i = start;
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i >= chars.len() || matches!(chars[i], ':' | ',' | '}' | ']')
}

/// Step 5: `{key: x}` → `{"key": x}`. Only quotes bare identifiers that
/// appear where an object key is expected (after `{` or `,`, before `:`).
fn quote_bare_keys(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    let mut in_string = false;

    while i < chars.len() {
        let c = chars[i];
        if c == '"' {
            in_string = !in_string;
            out.push(c);
            i += 1;
            continue;
        }
        if in_string {
            out.push(c);
            i += 1;
            continue;
        }
        if c == '{' || c == ',' {
            out.push(c);
            i += 1;
            // skip whitespace
            while i < chars.len() && chars[i].is_whitespace() {
                out.push(chars[i]);
                i += 1;
            }
            // bare identifier?
            if i < chars.len() && (chars[i].is_alphabetic() || chars[i] == '_') {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let mut j = i;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ':' {
                    out.push('"');
                    out.push_str(&chars[start..i].iter().collect::<String>());
                    out.push('"');
                } else {
                    out.push_str(&chars[start..i].iter().collect::<String>());
                }
            }
            continue;
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Step 6: append missing closing brackets, trim unmatched leading extras.
fn balance_brackets(input: &str) -> String {
    let mut s = input.trim().to_string();

    // Trim leading extra closers that have no matching opener.
    while let Some(first) = s.chars().next() {
        if first == '}' || first == ']' {
            s.remove(0);
        } else {
            break;
        }
    }

    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;
    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => stack.push(c),
            '}' if !in_string => {
                if stack.last() == Some(&'{') {
                    stack.pop();
                }
            }
            ']' if !in_string => {
                if stack.last() == Some(&'[') {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    if in_string {
        s.push('"');
    }
    for opener in stack.iter().rev() {
        s.push(match opener {
            '{' => '}',
            '[' => ']',
            _ => unreachable!(),
        });
    }
    s
}

/// Step 7: drop backslash escapes that aren't one of the legal JSON escape
/// characters, leaving the escaped character bare.
fn remove_illegal_escapes(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' && i + 1 < chars.len() {
            let next = chars[i + 1];
            if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') {
                out.push(chars[i]);
                out.push(next);
            } else {
                out.push(next);
            }
            i += 2;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

/// Step 8: a bracket-less, comma-separated list (`"/x", 10`) becomes a JSON
/// array (`["/x", 10]`). Only applies when there's no enclosing `{`/`[` and
/// at least one top-level comma outside quotes.
fn positional_to_array(input: &str) -> Option<String> {
    let t = input.trim();
    if t.starts_with('{') || t.starts_with('[') || t.is_empty() {
        return None;
    }

    let mut in_string = false;
    let mut escape_next = false;
    let mut has_top_level_comma = false;
    for c in t.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            ',' if !in_string => has_top_level_comma = true,
            _ => {}
        }
    }

    if has_top_level_comma {
        Some(format!("[{t}]"))
    } else {
        None
    }
}

/// Step 9: if the final normalized value is a JSON array, map its elements
/// positionally onto `param_order` to produce an object. If there's no
/// schema to map against, the array is returned as-is (the caller still
/// gets valid JSON, just not an object).
fn rewrite_array_to_object(json_text: String, param_order: &[String]) -> String {
    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&json_text) else {
        return json_text;
    };
    if param_order.is_empty() {
        return json_text;
    }

    let mut map = serde_json::Map::new();
    for (name, value) in param_order.iter().zip(items.into_iter()) {
        map.insert(name.clone(), value);
    }
    serde_json::to_string(&Value::Object(map)).unwrap_or(json_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_object_or_array(s: &str) {
        let v: Value = serde_json::from_str(s).unwrap_or_else(|e| panic!("not json: {s}: {e}"));
        assert!(v.is_object() || v.is_array(), "not object/array: {s}");
    }

    #[test]
    fn strictly_valid_passes_through_unchanged() {
        let s = r#"{"x":1,"y":2}"#;
        assert_eq!(normalize(s, &[]), s);
    }

    #[test]
    fn strips_null_wrapper() {
        let out = normalize(r#"null{"x":1}"#, &[]);
        assert_object_or_array(&out);
        assert_eq!(out, r#"{"x":1}"#);
    }

    #[test]
    fn unescapes_double_encoded() {
        let raw = r#""{\"x\":1}""#;
        let out = normalize(raw, &[]);
        assert_object_or_array(&out);
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["x"], 1);
    }

    #[test]
    fn quotes_bare_keys() {
        let out = quote_bare_keys("{path: \"/x\", lines: 10}");
        assert_eq!(out, "{\"path\": \"/x\", \"lines\": 10}");
    }

    #[test]
    fn repairs_bare_keys_end_to_end_scenario_s4() {
        let schema_order = vec!["path".to_string(), "lines".to_string()];
        let raw = r#"path: "/x", lines: 10"#;
        let out = normalize(raw, &schema_order);
        assert_object_or_array(&out);
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["path"], "/x");
        assert_eq!(v["lines"], 10);
    }

    #[test]
    fn balances_missing_closing_brace() {
        let out = balance_brackets(r#"{"x":1"#);
        assert_eq!(out, r#"{"x":1}"#);
    }

    #[test]
    fn trims_leading_extra_closer() {
        let out = balance_brackets(r#"}{"x":1}"#);
        assert_eq!(out, r#"{"x":1}"#);
    }

    #[test]
    fn positional_list_becomes_array() {
        let out = normalize(r#""a", 1, true"#, &[]);
        assert_object_or_array(&out);
        let v: Value = serde_json::from_str(&out).unwrap();
        assert!(v.is_array());
    }

    #[test]
    fn array_maps_to_object_by_param_order() {
        let order = vec!["x".to_string(), "y".to_string()];
        let out = normalize("[1, 2]", &order);
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["x"], 1);
        assert_eq!(v["y"], 2);
    }

    #[test]
    fn idempotent_on_valid_input_invariant_6() {
        let samples = [r#"{"a":1}"#, r#"[1,2,3]"#, r#"{"nested":{"a":true}}"#];
        for s in samples {
            assert_eq!(normalize(s, &[]), s);
        }
    }

    #[test]
    fn unchanged_when_unrepairable() {
        let raw = "not json at all and no commas either !!!";
        assert_eq!(normalize(raw, &[]), raw);
    }

    #[test]
    fn never_unescapes_string_fields_recursively() {
        let raw = r#"{"note": "a \"quoted\" word"}"#;
        let out = normalize(raw, &[]);
        assert_eq!(out, raw);
    }

    #[test]
    fn escapes_stray_quote_inside_string_value() {
        let raw = r#"{"note": "she said "hi" to me"}"#;
        let out = escape_stray_quotes(raw);
        assert_eq!(out, r#"{"note": "she said \"hi\" to me"}"#);
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["note"], "she said \"hi\" to me");
    }

    #[test]
    fn escapes_literal_newline_inside_string_value() {
        let raw = "{\"note\": \"line one\nline two\"}";
        let out = escape_stray_quotes(raw);
        assert_eq!(out, r#"{"note": "line one\nline two"}"#);
        assert_object_or_array(&out);
    }
}
