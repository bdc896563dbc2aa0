use serde_json::{Value, json};
use std::collections::BTreeSet;
use verity_common::protocol::{
    ChangeKind, Evidence, Parameters, StateChange, StateDiff, clamp_confidence, is_cell_reference,
};

/// Confidence reported when both snapshots exist and nothing changed.
const NO_CHANGE_CONFIDENCE: f64 = 0.8;

/// Leaf-level differences between two JSON documents.
///
/// Objects are compared over the union of their keys, arrays index by index
/// and scalars by equality.
pub fn diff_values(before: &Value, after: &Value) -> Vec<StateChange> {
    let mut changes = Vec::new();
    walk(String::new(), before, after, &mut changes);
    changes
}

fn walk(path: String, before: &Value, after: &Value, out: &mut Vec<StateChange>) {
    match (before, after) {
        (Value::Object(a), Value::Object(b)) => {
            let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            for key in keys {
                let child = join_key(&path, key);
                match (a.get(key), b.get(key)) {
                    (Some(x), Some(y)) => walk(child, x, y, out),
                    (Some(x), None) => out.push(change(child, ChangeKind::Removed, Some(x), None)),
                    (None, Some(y)) => out.push(change(child, ChangeKind::Added, None, Some(y))),
                    (None, None) => {}
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            for i in 0..a.len().max(b.len()) {
                let child = format!("{}[{}]", path, i);
                match (a.get(i), b.get(i)) {
                    (Some(x), Some(y)) => walk(child, x, y, out),
                    (Some(x), None) => out.push(change(child, ChangeKind::Removed, Some(x), None)),
                    (None, Some(y)) => out.push(change(child, ChangeKind::Added, None, Some(y))),
                    (None, None) => {}
                }
            }
        }
        (x, y) if x != y => out.push(change(path, ChangeKind::Modified, Some(x), Some(y))),
        _ => {}
    }
}

fn join_key(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn change(path: String, kind: ChangeKind, before: Option<&Value>, after: Option<&Value>) -> StateChange {
    let formatting = segments(&path).any(|s| s.to_lowercase().contains("format"));
    StateChange {
        path,
        kind,
        before: before.cloned(),
        after: after.cloned(),
        formatting,
    }
}

/// Path segments with array indices stripped (`rows[2].A1` -> `rows`, `A1`).
fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.')
        .map(|s| s.split('[').next().unwrap_or(s))
        .filter(|s| !s.is_empty())
}

/// Innermost cell-reference segment of a path, uppercased.
fn cell_in_path(path: &str) -> Option<String> {
    segments(path)
        .filter(|s| is_cell_reference(s))
        .last()
        .map(str::to_uppercase)
}

/// Compare the backend snapshots of one bundle.
///
/// `trust` is the confidence assigned when a concrete change is found.
pub fn compare(state: &Evidence<Value>, trust: f64) -> StateDiff {
    if let Some(reason) = state.failure() {
        return StateDiff::unavailable("Backend snapshot failed", Some(reason.to_string()));
    }
    let Some((before, after)) = state.pair() else {
        return StateDiff::unavailable("No backend state available for comparison", None);
    };

    let changes = diff_values(before, after);
    if changes.is_empty() {
        return StateDiff {
            has_changes: false,
            description: "No changes detected".to_string(),
            confidence: NO_CHANGE_CONFIDENCE,
            tool_name: "no_change".to_string(),
            parameters: Parameters::new(),
            changes,
            error: None,
        };
    }

    let (tool_name, parameters, description) = interpret(&changes);
    StateDiff {
        has_changes: true,
        description,
        confidence: clamp_confidence(trust),
        tool_name,
        parameters,
        changes,
        error: None,
    }
}

fn interpret(changes: &[StateChange]) -> (String, Parameters, String) {
    let data: Vec<&StateChange> = changes.iter().filter(|c| !c.formatting).collect();
    let mut params = Parameters::new();

    if data.len() == 1
        && let Some(cell) = cell_in_path(&data[0].path)
    {
        let value = data[0].after.clone().unwrap_or(Value::Null);
        let description = match &value {
            Value::Null => format!("Cleared cell {}", cell),
            Value::String(s) => format!("Wrote {:?} in cell {}", s, cell),
            other => format!("Wrote {} in cell {}", other, cell),
        };
        params.insert("cell".into(), json!(cell));
        params.insert("value".into(), value);
        return ("write_cell".to_string(), params, description);
    }

    if data.is_empty() {
        let cells: BTreeSet<String> = changes.iter().filter_map(|c| cell_in_path(&c.path)).collect();
        let cells: Vec<String> = cells.into_iter().collect();
        let description = if cells.is_empty() {
            "Formatting changed".to_string()
        } else {
            format!("Formatting changed on {}", cells.join(", "))
        };
        params.insert("cells".into(), json!(cells));
        return ("format_cell".to_string(), params, description);
    }

    let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
    params.insert("paths".into(), json!(paths));
    params.insert("change_count".into(), json!(changes.len()));
    (
        "modify_data".to_string(),
        params,
        format!("Backend data changed at {} path(s)", changes.len()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(before: Value, after: Value) -> Evidence<Value> {
        Evidence::Captured {
            before: Some(before),
            after,
        }
    }

    #[test]
    fn single_cell_write() {
        let diff = compare(
            &pair(
                json!({"values": {"A1": "", "B1": "2"}}),
                json!({"values": {"A1": "x", "B1": "2"}}),
            ),
            0.95,
        );
        assert!(diff.has_changes);
        assert_eq!(diff.confidence, 0.95);
        assert_eq!(diff.tool_name, "write_cell");
        assert_eq!(diff.parameters["cell"], "A1");
        assert_eq!(diff.parameters["value"], "x");
    }

    #[test]
    fn formatting_only_change() {
        let diff = compare(
            &pair(
                json!({"formatting": {"b2": {"bold": false}}}),
                json!({"formatting": {"b2": {"bold": true}}}),
            ),
            0.95,
        );
        assert_eq!(diff.tool_name, "format_cell");
        assert_eq!(diff.parameters["cells"], json!(["B2"]));
    }

    #[test]
    fn array_growth_is_modify_data() {
        let diff = compare(&pair(json!({"rows": [1, 2]}), json!({"rows": [1, 3, 4]})), 0.95);
        assert_eq!(diff.tool_name, "modify_data");
        assert_eq!(diff.parameters["change_count"], 2);
        let kinds: Vec<ChangeKind> = diff.changes.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Modified, ChangeKind::Added]);
        assert_eq!(diff.changes[1].path, "rows[2]");
    }

    #[test]
    fn unchanged_and_missing_states() {
        let same = compare(&pair(json!({"a": 1}), json!({"a": 1})), 0.95);
        assert!(!same.has_changes);
        assert_eq!(same.confidence, 0.8);

        let missing = compare(
            &Evidence::Captured {
                before: None,
                after: json!({}),
            },
            0.95,
        );
        assert_eq!(missing.confidence, 0.0);
        assert_eq!(compare(&Evidence::NotRequested, 0.95).confidence, 0.0);
    }
}
