//! JSON patch (RFC 6902) diffing between two graph snapshots.
//!
//! `diff` walks objects member by member. Empty objects are replaced whole.
//! Arrays are compared by common prefix and suffix: a pure insertion becomes
//! `add` operations, a pure deletion becomes `remove` operations, and any
//! other change replaces the array.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
}

impl PatchOp {
    pub fn path(&self) -> &str {
        match self {
            PatchOp::Add { path, .. } | PatchOp::Remove { path } | PatchOp::Replace { path, .. } => path,
        }
    }
}

/// Escape one reference token (RFC 6901).
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Forward patch turning `before` into `after`.
pub fn diff(before: &Value, after: &Value) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff_into("", before, after, &mut ops);
    ops
}

fn diff_into(path: &str, before: &Value, after: &Value, ops: &mut Vec<PatchOp>) {
    if before == after {
        return;
    }
    match (before, after) {
        (Value::Object(a), Value::Object(b)) if !a.is_empty() => {
            for key in a.keys().filter(|k| !b.contains_key(*k)) {
                ops.push(PatchOp::Remove {
                    path: format!("{}/{}", path, escape_token(key)),
                });
            }
            for (key, value) in b {
                let child = format!("{}/{}", path, escape_token(key));
                match a.get(key) {
                    Some(old) => diff_into(&child, old, value, ops),
                    None => ops.push(PatchOp::Add {
                        path: child,
                        value: value.clone(),
                    }),
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => diff_array(path, a, b, ops),
        _ => ops.push(PatchOp::Replace {
            path: path.to_string(),
            value: after.clone(),
        }),
    }
}

fn diff_array(path: &str, a: &[Value], b: &[Value], ops: &mut Vec<PatchOp>) {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();

    if a.len() == b.len() {
        for i in prefix..a.len() {
            diff_into(&format!("{}/{}", path, i), &a[i], &b[i], ops);
        }
        return;
    }

    let max_suffix = a.len().min(b.len()) - prefix;
    let suffix = a
        .iter()
        .rev()
        .zip(b.iter().rev())
        .take(max_suffix)
        .take_while(|(x, y)| x == y)
        .count();
    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];

    if a_mid.is_empty() {
        for (k, value) in b_mid.iter().enumerate() {
            ops.push(PatchOp::Add {
                path: format!("{}/{}", path, prefix + k),
                value: value.clone(),
            });
        }
    } else if b_mid.is_empty() {
        for _ in a_mid {
            ops.push(PatchOp::Remove {
                path: format!("{}/{}", path, prefix),
            });
        }
    } else {
        ops.push(PatchOp::Replace {
            path: path.to_string(),
            value: Value::Array(b.to_vec()),
        });
    }
}

/// Apply operations in order. Stops at the first operation that does not fit.
pub fn apply_patch(doc: &mut Value, ops: &[PatchOp]) -> Result<()> {
    for op in ops {
        apply_one(doc, op)?;
    }
    Ok(())
}

fn split_pointer(path: &str) -> Result<(Vec<String>, String)> {
    if path.is_empty() {
        return Ok((Vec::new(), String::new()));
    }
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| Error::InvalidMessage(format!("bad pointer: {}", path)))?;
    let mut tokens: Vec<String> = rest.split('/').map(unescape_token).collect();
    let last = tokens.pop().unwrap_or_default();
    Ok((tokens, last))
}

fn walk<'a>(doc: &'a mut Value, tokens: &[String]) -> Result<&'a mut Value> {
    let mut cur = doc;
    for token in tokens {
        cur = match cur {
            Value::Object(map) => map.get_mut(token),
            Value::Array(items) => token.parse::<usize>().ok().and_then(move |i| items.get_mut(i)),
            _ => None,
        }
        .ok_or_else(|| Error::InvalidMessage(format!("missing path segment: {}", token)))?;
    }
    Ok(cur)
}

fn index_of(token: &str, len: usize, allow_end: bool) -> Result<usize> {
    if allow_end && token == "-" {
        return Ok(len);
    }
    let idx: usize = token
        .parse()
        .map_err(|_| Error::InvalidMessage(format!("bad array index: {}", token)))?;
    let limit = if allow_end { len } else { len.saturating_sub(1) };
    if idx > limit || (!allow_end && len == 0) {
        return Err(Error::InvalidMessage(format!("array index out of range: {}", idx)));
    }
    Ok(idx)
}

fn apply_one(doc: &mut Value, op: &PatchOp) -> Result<()> {
    let (parents, last) = split_pointer(op.path())?;
    if op.path().is_empty() {
        return match op {
            PatchOp::Add { value, .. } | PatchOp::Replace { value, .. } => {
                *doc = value.clone();
                Ok(())
            }
            PatchOp::Remove { .. } => Err(Error::InvalidMessage("cannot remove document root".into())),
        };
    }

    let parent = walk(doc, &parents)?;
    match (op, parent) {
        (PatchOp::Add { value, .. }, Value::Object(map))
        | (PatchOp::Replace { value, .. }, Value::Object(map)) => {
            if matches!(op, PatchOp::Replace { .. }) && !map.contains_key(&last) {
                return Err(Error::InvalidMessage(format!("replace of missing member: {}", last)));
            }
            map.insert(last, value.clone());
        }
        (PatchOp::Remove { .. }, Value::Object(map)) => {
            map.remove(&last)
                .ok_or_else(|| Error::InvalidMessage(format!("remove of missing member: {}", last)))?;
        }
        (PatchOp::Add { value, .. }, Value::Array(items)) => {
            let idx = index_of(&last, items.len(), true)?;
            items.insert(idx, value.clone());
        }
        (PatchOp::Replace { value, .. }, Value::Array(items)) => {
            let idx = index_of(&last, items.len(), false)?;
            items[idx] = value.clone();
        }
        (PatchOp::Remove { .. }, Value::Array(items)) => {
            let idx = index_of(&last, items.len(), false)?;
            items.remove(idx);
        }
        _ => return Err(Error::InvalidMessage(format!("cannot apply at {}", op.path()))),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_documents_produce_nothing() {
        let doc = json!({ "a": [1, 2], "b": { "c": null } });
        assert!(diff(&doc, &doc).is_empty());
    }

    #[test]
    fn nested_member_replace() {
        let a = json!({ "nodes": { "x": { "label": "A", "description": null } } });
        let b = json!({ "nodes": { "x": { "label": "A", "description": "hello" } } });
        assert_eq!(
            diff(&a, &b),
            vec![PatchOp::Replace {
                path: "/nodes/x/description".into(),
                value: json!("hello")
            }]
        );
    }

    #[test]
    fn empty_object_is_replaced_whole() {
        let a = json!({ "aspects": {} });
        let b = json!({ "aspects": { "Technical": 0.8, "Practical": 0.2 } });
        let ops = diff(&a, &b);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].path(), "/aspects");
    }

    #[test]
    fn array_append_and_removal() {
        let a = json!({ "links": [1, 2, 3] });
        let appended = json!({ "links": [1, 2, 3, 4, 5] });
        assert_eq!(
            diff(&a, &appended),
            vec![
                PatchOp::Add { path: "/links/3".into(), value: json!(4) },
                PatchOp::Add { path: "/links/4".into(), value: json!(5) },
            ]
        );

        let removed = json!({ "links": [1, 3] });
        assert_eq!(diff(&a, &removed), vec![PatchOp::Remove { path: "/links/1".into() }]);
    }

    #[test]
    fn keys_are_escaped() {
        let a = json!({ "m": { "k": 1 } });
        let b = json!({ "m": { "k": 1, "a/b~c": 2 } });
        assert_eq!(diff(&a, &b)[0].path(), "/m/a~1b~0c");
    }

    #[test]
    fn applying_the_diff_reproduces_the_target() {
        let a = json!({
            "name": "Untitled Graph",
            "nodes": { "n1": { "label": "A", "aspects": {} }, "n2": { "label": "B", "aspects": { "x": 1 } } },
            "links": [{ "s": "n1", "t": "n2" }, { "s": "n2", "t": "n1" }, { "s": "n1", "t": "n1" }],
            "focusNodeId": "n1"
        });
        let b = json!({
            "name": "Rust",
            "nodes": { "n1": { "label": "A", "aspects": { "y": 0.5 } }, "n3": { "label": "C", "aspects": {} } },
            "links": [{ "s": "n1", "t": "n3" }],
            "focusNodeId": null
        });
        let mut doc = a.clone();
        apply_patch(&mut doc, &diff(&a, &b)).unwrap();
        assert_eq!(doc, b);
    }

    #[test]
    fn ops_serialize_as_rfc6902() {
        let op = PatchOp::Remove { path: "/nodes/x".into() };
        assert_eq!(serde_json::to_value(&op).unwrap(), json!({ "op": "remove", "path": "/nodes/x" }));
    }
}
