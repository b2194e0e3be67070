//! MongoDB-style update operators applied to a materialized document
//! (§4.6: "`$set, $unset, $inc, $push(+$each,$position,$slice,$sort),
//! $pull, $link, $unlink`").

use parquedb_core::{Document, EntityId, Error, Result, Value};

/// One field touched by `$link`/`$unlink`, surfaced to the caller so the
/// relationship index can materialize the backward edge alongside the
/// forward one stored on the document (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkChange {
    pub predicate: String,
    pub target: EntityId,
    pub linked: bool,
}

/// Apply every operator in `patch` to `doc`, returning the mutated
/// document and the `$link`/`$unlink` changes the caller must also apply
/// to the relationship index. Unrecognized `$`-prefixed top-level keys
/// produce `InvalidUpdate`.
pub fn apply(mut doc: Document, patch: &Document) -> Result<(Document, Vec<LinkChange>)> {
    let mut links = Vec::new();
    for (op, args) in patch {
        let fields = args.as_map().ok_or_else(|| {
            Error::invalid_update(format!("operator {op} must map field -> value"))
        })?;
        match op.as_str() {
            "$set" => {
                for (field, value) in fields {
                    set_path(&mut doc, field, value.clone());
                }
            }
            "$unset" => {
                for field in fields.keys() {
                    unset_path(&mut doc, field);
                }
            }
            "$inc" => {
                for (field, delta) in fields {
                    apply_inc(&mut doc, field, delta)?;
                }
            }
            "$push" => {
                for (field, spec) in fields {
                    apply_push(&mut doc, field, spec)?;
                }
            }
            "$pull" => {
                for (field, matcher) in fields {
                    apply_pull(&mut doc, field, matcher);
                }
            }
            "$link" => {
                for (predicate, target) in fields {
                    links.extend(apply_link(&mut doc, predicate, target, true)?);
                }
            }
            "$unlink" => {
                for (predicate, target) in fields {
                    links.extend(apply_link(&mut doc, predicate, target, false)?);
                }
            }
            other => return Err(Error::invalid_update(format!("unknown update operator {other:?}"))),
        }
    }
    Ok((doc, links))
}

fn set_path(doc: &mut Document, path: &str, value: Value) {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else { return };
    let rest: Vec<&str> = segments.collect();
    if rest.is_empty() {
        doc.insert(first.to_string(), value);
        return;
    }
    let entry = doc.entry(first.to_string()).or_insert_with(|| Value::Map(Document::new()));
    set_nested(entry, &rest, value);
}

fn set_nested(current: &mut Value, path: &[&str], value: Value) {
    if path.is_empty() {
        *current = value;
        return;
    }
    if !matches!(current, Value::Map(_)) {
        *current = Value::Map(Document::new());
    }
    if let Value::Map(m) = current {
        let entry = m.entry(path[0].to_string()).or_insert_with(|| Value::Map(Document::new()));
        set_nested(entry, &path[1..], value);
    }
}

fn unset_path(doc: &mut Document, path: &str) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = match segments.pop() {
        Some(l) => l,
        None => return,
    };
    unset_nested(doc, &segments, last);
}

fn unset_nested(doc: &mut Document, path: &[&str], last: &str) {
    if path.is_empty() {
        doc.remove(last);
        return;
    }
    if let Some(Value::Map(m)) = doc.get_mut(path[0]) {
        unset_nested(m, &path[1..], last);
    }
}

fn apply_inc(doc: &mut Document, field: &str, delta: &Value) -> Result<()> {
    let delta_f = delta.as_f64().ok_or_else(|| Error::invalid_update(format!("$inc on {field} needs a number")))?;
    let current = doc.get(field);
    let updated = match current {
        None => delta.clone(),
        Some(Value::Int(i)) if delta.as_i64().is_some() => Value::Int(i + delta.as_i64().unwrap()),
        Some(v) => Value::Float(v.as_f64().unwrap_or(0.0) + delta_f),
    };
    doc.insert(field.to_string(), updated);
    Ok(())
}

fn apply_push(doc: &mut Document, field: &str, spec: &Value) -> Result<()> {
    let mut array = match doc.remove(field) {
        Some(Value::Array(a)) => a,
        Some(_) => return Err(Error::invalid_update(format!("$push target {field} is not an array"))),
        None => Vec::new(),
    };

    let (items, position, slice, sort_desc): (Vec<Value>, Option<usize>, Option<i64>, Option<bool>) = match spec {
        Value::Map(m) if m.contains_key("$each") => {
            let each = m.get("$each").and_then(Value::as_array).map(|a| a.to_vec()).unwrap_or_default();
            let position = m.get("$position").and_then(Value::as_i64).map(|p| p.max(0) as usize);
            let slice = m.get("$slice").and_then(Value::as_i64);
            let sort_desc = m.get("$sort").and_then(Value::as_i64).map(|d| d < 0);
            (each, position, slice, sort_desc)
        }
        other => (vec![other.clone()], None, None, None),
    };

    match position {
        Some(pos) if pos <= array.len() => {
            for (offset, item) in items.into_iter().enumerate() {
                array.insert(pos + offset, item);
            }
        }
        _ => array.extend(items),
    }

    if let Some(desc) = sort_desc {
        array.sort_by(|a, b| {
            let ord = a.as_f64().partial_cmp(&b.as_f64()).unwrap_or(std::cmp::Ordering::Equal);
            if desc {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    if let Some(n) = slice {
        let len = array.len() as i64;
        if n >= 0 {
            array.truncate(n as usize);
        } else {
            let keep_from = (len + n).max(0) as usize;
            array = array.split_off(keep_from.min(array.len()));
        }
    }

    doc.insert(field.to_string(), Value::Array(array));
    Ok(())
}

fn apply_pull(doc: &mut Document, field: &str, matcher: &Value) {
    if let Some(Value::Array(a)) = doc.get(field).cloned() {
        let filtered: Vec<Value> = a.into_iter().filter(|item| !matches_pull(item, matcher)).collect();
        doc.insert(field.to_string(), Value::Array(filtered));
    }
}

fn matches_pull(item: &Value, matcher: &Value) -> bool {
    match matcher {
        Value::Map(conditions) => match item {
            Value::Map(fields) => conditions.iter().all(|(k, v)| fields.get(k) == Some(v)),
            _ => false,
        },
        other => item == other,
    }
}

fn apply_link(doc: &mut Document, predicate: &str, target: &Value, linked: bool) -> Result<Vec<LinkChange>> {
    let targets: Vec<EntityId> = match target {
        Value::Reference(id) => vec![id.clone()],
        Value::String(s) => vec![EntityId::parse(s)
            .map_err(|e| Error::invalid_update(format!("$link target {s:?}: {e}")))?],
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::Reference(id) => Ok(id.clone()),
                Value::String(s) => {
                    EntityId::parse(s).map_err(|e| Error::invalid_update(format!("$link target {s:?}: {e}")))
                }
                _ => Err(Error::invalid_update("$link array entries must be references or ids")),
            })
            .collect::<Result<Vec<_>>>()?,
        _ => return Err(Error::invalid_update(format!("$link on {predicate} needs a reference"))),
    };

    let mut array = match doc.remove(predicate) {
        Some(Value::Array(a)) => a,
        Some(Value::Reference(id)) => vec![Value::Reference(id)],
        _ => Vec::new(),
    };

    let mut changes = Vec::with_capacity(targets.len());
    for id in targets {
        let already = array.iter().any(|v| matches!(v, Value::Reference(r) if *r == id));
        if linked && !already {
            array.push(Value::Reference(id.clone()));
        } else if !linked && already {
            array.retain(|v| !matches!(v, Value::Reference(r) if *r == id));
        }
        // Idempotent either way (§4.7): emit the change regardless so the
        // relationship index can converge, even on a repeated call.
        changes.push(LinkChange { predicate: predicate.to_string(), target: id, linked });
    }
    doc.insert(predicate.to_string(), Value::Array(array));
    Ok(changes)
}
