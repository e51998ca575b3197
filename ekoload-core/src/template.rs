//! `${name}` substitution over JSON values.
//!
//! Substitution never fails: placeholders whose name does not resolve against the
//! session variables are left in the output verbatim.

use serde_json::Value;

use crate::Vars;

/// Renders every string inside `value`, recursing through arrays and objects.
///
/// A string consisting of exactly one placeholder yields the variable's raw value, so
/// `"${count}"` stays a number when `count` is a number.
pub fn render(value: &Value, vars: &Vars) -> Value {
    match value {
        Value::String(s) => {
            if let Some(name) = whole_placeholder(s)
                && let Some(v) = lookup(vars, name)
            {
                return v.clone();
            }
            Value::String(render_string(s, vars))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| render(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Renders a string, stringifying non-string values.
pub fn render_string(input: &str, vars: &Vars) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };

        match lookup(vars, after[..end].trim()) {
            Some(Value::String(s)) => out.push_str(s),
            Some(v) => out.push_str(&v.to_string()),
            None => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

/// Resolves `name` against the session variables.
///
/// Exact keys win (loop variables such as `$loopCount` are plain keys); otherwise a dotted
/// path walks into objects and arrays, e.g. `user.roles.0`.
pub fn lookup<'a>(vars: &'a Vars, name: &str) -> Option<&'a Value> {
    if name.is_empty() {
        return None;
    }
    if let Some(v) = vars.get(name) {
        return Some(v);
    }

    let mut parts = name.split('.');
    let mut cur = vars.get(parts.next()?)?;
    for part in parts {
        cur = match cur {
            Value::Object(m) => m.get(part)?,
            Value::Array(a) => a.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

fn whole_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    if inner.contains('}') || inner.contains("${") {
        return None;
    }
    Some(inner.trim())
}
