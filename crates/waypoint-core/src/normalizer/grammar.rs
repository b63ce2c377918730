//! The line-oriented step language.
//!
//! ```text
//! line   := [marker] [id ':'] action param* [ 'after' id (',' id)* ]
//! marker := '-' | '*' | digits '.' | digits ')'
//! param  := key '=' value
//! value  := '"' escaped-string '"' | '@' id ['.' path] | json-scalar | bare-word
//! ```
//!
//! Blank lines, `#` comments and code fences are ignored. A line that does not
//! fit the grammar is dropped with a warning; it never aborts the batch.

use log::warn;
use serde_json::Value;

use super::Draft;
use crate::models::{ParamValue, Params, Reference};

const AFTER: &str = "after";

/// Parses every line; returns the drafts and one warning per dropped line.
pub fn parse(source: &str) -> (Vec<Draft>, Vec<String>) {
    let mut drafts = Vec::new();
    let mut warnings = Vec::new();

    for (index, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("```") {
            continue;
        }
        match parse_line(line) {
            Ok(draft) => drafts.push(draft),
            Err(reason) => {
                let warning = format!("line {}: dropped '{}': {}", index + 1, line, reason);
                warn!("{warning}");
                warnings.push(warning);
            }
        }
    }
    (drafts, warnings)
}

fn parse_line(line: &str) -> Result<Draft, String> {
    let body = strip_marker(line);
    let mut tokens = tokenize(body)?.into_iter();

    let mut id = None;
    let mut first = tokens.next().ok_or("no action")?;
    if let Some(label) = first.strip_suffix(':') {
        if !is_identifier(label) {
            return Err(format!("'{label}' is not a valid step id"));
        }
        id = Some(label.to_string());
        first = tokens.next().ok_or("no action after the step id")?;
    }

    let action = first;
    if !is_identifier(&action) {
        return Err(format!("'{action}' is not an action name"));
    }

    let mut params = Params::new();
    let mut depends_on = None;
    while let Some(token) = tokens.next() {
        if token == AFTER {
            let rest: String = tokens.by_ref().collect::<Vec<_>>().join("");
            let ids: Vec<String> = rest
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(String::from)
                .collect();
            if ids.is_empty() {
                return Err("'after' needs at least one step id".to_string());
            }
            if let Some(bad) = ids.iter().find(|id| !is_identifier(id)) {
                return Err(format!("'{bad}' is not a valid step id"));
            }
            depends_on = Some(ids);
            break;
        }
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, found '{token}'"))?;
        if !is_identifier(key) {
            return Err(format!("'{key}' is not a parameter name"));
        }
        params.insert(key.to_string(), parse_value(value)?);
    }

    Ok(Draft {
        id,
        action,
        params,
        depends_on,
    })
}

fn strip_marker(line: &str) -> &str {
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return rest.trim_start();
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return rest.trim_start();
        }
    }
    line
}

/// Splits on whitespace outside double quotes. Quotes stay in the token.
fn tokenize(body: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in body.chars() {
        if in_quotes {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_quotes = false;
            }
        } else if c.is_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            if c == '"' {
                in_quotes = true;
            }
            current.push(c);
        }
    }
    if in_quotes {
        return Err("unterminated string".to_string());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn parse_value(raw: &str) -> Result<ParamValue, String> {
    if raw.is_empty() {
        return Err("empty value".to_string());
    }
    if raw.starts_with('"') {
        let text: String =
            serde_json::from_str(raw).map_err(|_| format!("malformed string {raw}"))?;
        return Ok(ParamValue::Literal(Value::String(text)));
    }
    if let Some(target) = raw.strip_prefix('@') {
        let (step, path) = match target.split_once('.') {
            Some((step, path)) => (step, Some(path)),
            None => (target, None),
        };
        if !is_identifier(step) {
            return Err(format!("'{raw}' is not a valid reference"));
        }
        if path.is_some_and(|p| p.is_empty() || p.split('.').any(str::is_empty)) {
            return Err(format!("'{raw}' has an empty path segment"));
        }
        return Ok(ParamValue::Reference(Reference::new(step, path)));
    }
    Ok(ParamValue::Literal(
        serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
    ))
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
