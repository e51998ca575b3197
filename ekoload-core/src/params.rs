//! Resolution of a call step's declared parameters against session variables.
//!
//! Three spec shapes pull values out of the session:
//!
//! - an array whose object elements name variable keys: every named key present in the
//!   session is collected into one object (union across elements);
//! - an object whose values are objects naming variable keys: each entry is matched on its
//!   own and the last entry with at least one match replaces earlier results;
//! - a string starting with [`SIGIL`]: the remainder is looked up directly.
//!
//! A contextual result is wrapped in a one-element array, the shape the wire protocol
//! expects. When nothing matched, the spec is rendered as a template instead.

use serde_json::{Map, Value};

use crate::Vars;
use crate::template;

pub const SIGIL: char = '$';

pub fn resolve(spec: &Value, vars: &Vars) -> Value {
    let contextual = match spec {
        Value::Array(items) => from_array(items, vars),
        Value::Object(entries) => from_object(entries, vars),
        Value::String(s) => from_sigil(s, vars),
        _ => None,
    };

    match contextual {
        Some(v) => Value::Array(vec![v]),
        None => template::render(spec, vars),
    }
}

fn collect_matches(names: &Map<String, Value>, vars: &Vars, out: &mut Map<String, Value>) {
    for key in names.keys() {
        match vars.get(key) {
            Some(Value::Null) | None => {}
            Some(v) => {
                out.insert(key.clone(), v.clone());
            }
        }
    }
}

fn from_array(items: &[Value], vars: &Vars) -> Option<Value> {
    let mut result = Map::new();
    for item in items {
        if let Value::Object(names) = item {
            collect_matches(names, vars, &mut result);
        }
    }
    (!result.is_empty()).then_some(Value::Object(result))
}

fn from_object(entries: &Map<String, Value>, vars: &Vars) -> Option<Value> {
    let mut result = None;
    for entry in entries.values() {
        if let Value::Object(names) = entry {
            let mut matched = Map::new();
            collect_matches(names, vars, &mut matched);
            if !matched.is_empty() {
                result = Some(matched);
            }
        }
    }
    result.map(Value::Object)
}

fn from_sigil(s: &str, vars: &Vars) -> Option<Value> {
    let name = s.strip_prefix(SIGIL)?;
    if name.is_empty() || name.starts_with('{') {
        return None;
    }

    template::lookup(vars, name)
        .or_else(|| vars.get(s))
        .filter(|v| !v.is_null())
        .cloned()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn vars(v: Value) -> Vars {
        match v {
            Value::Object(m) => m,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn array_of_objects_collects_union_of_known_keys() {
        let vars = vars(json!({ "userId": "u1", "room": "r9", "other": 1 }));
        let spec = json!([{ "userId": null }, "ignored", { "room": 0, "unknown": 0 }]);

        assert_eq!(
            resolve(&spec, &vars),
            json!([{ "userId": "u1", "room": "r9" }])
        );
    }

    #[test]
    fn object_of_objects_last_matching_entry_wins() {
        let vars = vars(json!({ "a": 1, "b": 2, "c": 3 }));
        let spec = json!({
            "first": { "a": true },
            "second": { "b": true, "zzz": true },
            "third": { "nope": true }
        });

        // `third` matches nothing, so `second` is the last entry that produced a result.
        assert_eq!(resolve(&spec, &vars), json!([{ "b": 2 }]));
    }

    #[test]
    fn object_entries_overwrite_instead_of_merging() {
        let vars = vars(json!({ "a": 1, "b": 2 }));
        let spec = json!({ "x": { "a": 0 }, "y": { "b": 0 } });
        assert_eq!(resolve(&spec, &vars), json!([{ "b": 2 }]));
    }

    #[test]
    fn sigil_string_is_a_direct_lookup() {
        let vars = vars(json!({ "profile": { "name": "eve" }, "$loopCount": 2 }));
        assert_eq!(
            resolve(&json!("$profile"), &vars),
            json!([{ "name": "eve" }])
        );
        assert_eq!(resolve(&json!("$loopCount"), &vars), json!([2]));
    }

    #[test]
    fn falls_back_to_templating_when_nothing_matches() {
        let vars = vars(json!({ "room": "lobby" }));

        assert_eq!(resolve(&json!({}), &vars), json!({}));
        assert_eq!(resolve(&json!([]), &vars), json!([]));
        assert_eq!(
            resolve(&json!({ "room": "${room}" }), &vars),
            json!({ "room": "lobby" })
        );
        assert_eq!(resolve(&json!("$missing"), &vars), json!("$missing"));
        assert_eq!(resolve(&json!("${room}"), &vars), json!("lobby"));
    }

    #[test]
    fn scalar_specs_never_fail() {
        let vars = Vars::new();
        for spec in [json!(null), json!(true), json!(42), json!(1.5), json!("plain")] {
            assert_eq!(resolve(&spec, &vars), spec);
        }
    }

    #[test]
    fn null_session_values_do_not_count_as_matches() {
        let vars = vars(json!({ "a": null }));
        let spec = json!([{ "a": 0 }]);
        assert_eq!(resolve(&spec, &vars), spec);
    }

    #[test]
    fn resolution_does_not_mutate_vars() {
        let vars = vars(json!({ "a": 1 }));
        let before = vars.clone();
        let _ = resolve(&json!([{ "a": 0 }]), &vars);
        let _ = resolve(&json!("$a"), &vars);
        assert_eq!(vars, before);
    }
}
