//! C8: the aggregation pipeline (§4.8, §8 scenario S6).

use super::matches;
use parquedb_core::{get_path, Document, Error, Result, Value};
use std::cmp::Ordering;

/// Resolves a `$lookup` stage's `from` collection name to the documents
/// currently visible to the caller (already reconstructed/filtered by the
/// entity engine — the evaluator itself has no storage access).
pub trait LookupSource {
    fn documents(&self, collection: &str) -> Vec<Document>;
}

impl<F: Fn(&str) -> Vec<Document>> LookupSource for F {
    fn documents(&self, collection: &str) -> Vec<Document> {
        self(collection)
    }
}

/// Run `pipeline` over `input`, left to right, as a sequence of pure
/// stage functions (§4.8).
pub fn run(pipeline: &[Document], input: Vec<Document>, lookups: &dyn LookupSource) -> Result<Vec<Document>> {
    let mut docs = input;
    for stage in pipeline {
        let Some((name, args)) = stage.iter().next() else {
            return Err(Error::invalid_filter("empty pipeline stage"));
        };
        docs = match name.as_str() {
            "$match" => {
                let filter = args.as_map().ok_or_else(|| Error::invalid_filter("$match needs a filter document"))?;
                let mut kept = Vec::with_capacity(docs.len());
                for d in docs {
                    if matches(&d, filter)? {
                        kept.push(d);
                    }
                }
                kept
            }
            "$sort" => sort_stage(docs, args)?,
            "$limit" => {
                let n = args.as_i64().ok_or_else(|| Error::invalid_filter("$limit needs an integer"))? as usize;
                docs.into_iter().take(n).collect()
            }
            "$skip" => {
                let n = args.as_i64().ok_or_else(|| Error::invalid_filter("$skip needs an integer"))? as usize;
                docs.into_iter().skip(n).collect()
            }
            "$project" => project_stage(docs, args, true)?,
            "$addFields" | "$set" => project_stage(docs, args, false)?,
            "$unset" => unset_stage(docs, args)?,
            "$unwind" => unwind_stage(docs, args)?,
            "$group" => group_stage(docs, args)?,
            "$count" => {
                let field = args.as_str().ok_or_else(|| Error::invalid_filter("$count needs a field name"))?;
                let mut out = Document::new();
                out.insert(field.to_string(), Value::Int(docs.len() as i64));
                vec![out]
            }
            "$lookup" => lookup_stage(docs, args, lookups)?,
            other => return Err(Error::invalid_filter(format!("unknown pipeline stage {other:?}"))),
        };
    }
    Ok(docs)
}

fn eval_expr(doc: &Document, expr: &Value) -> Value {
    match expr {
        Value::String(s) if s.starts_with('$') => {
            get_path(doc, &s[1..]).cloned().unwrap_or(Value::Null)
        }
        other => other.clone(),
    }
}

fn sort_direction(spec: &Value) -> Result<bool> {
    match spec {
        Value::Int(1) => Ok(true),
        Value::Int(-1) => Ok(false),
        Value::String(s) if s.eq_ignore_ascii_case("asc") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("desc") => Ok(false),
        other => Err(Error::invalid_filter(format!("bad sort direction {other:?}"))),
    }
}

fn sort_stage(mut docs: Vec<Document>, args: &Value) -> Result<Vec<Document>> {
    let spec = args.as_map().ok_or_else(|| Error::invalid_filter("$sort needs a document"))?;
    let keys: Vec<(String, bool)> = spec
        .iter()
        .map(|(k, v)| sort_direction(v).map(|asc| (k.clone(), asc)))
        .collect::<Result<_>>()?;
    docs.sort_by(|a, b| {
        for (field, ascending) in &keys {
            let av = get_path(a, field);
            let bv = get_path(b, field);
            let ord = compare_values(av, bv);
            if ord != Ordering::Equal {
                return if *ascending { ord } else { ord.reverse() };
            }
        }
        Ordering::Equal
    });
    Ok(docs)
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a.and_then(Value::as_f64), b.and_then(Value::as_f64)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => match (a.and_then(Value::as_str), b.and_then(Value::as_str)) {
            (Some(x), Some(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}

fn project_stage(docs: Vec<Document>, args: &Value, exclusive: bool) -> Result<Vec<Document>> {
    let spec = args.as_map().ok_or_else(|| Error::invalid_filter("$project needs a document"))?;
    let include_mode = exclusive && spec.values().any(|v| matches!(v, Value::Int(1) | Value::Bool(true)));
    Ok(docs
        .into_iter()
        .map(|doc| {
            if !exclusive {
                // $addFields/$set: compute and merge, keep everything else.
                let mut out = doc.clone();
                for (field, expr) in spec {
                    out.insert(field.clone(), eval_expr(&doc, expr));
                }
                return out;
            }
            if include_mode {
                let mut out = Document::new();
                for field in crate::document::ALWAYS_PROJECTED_FIELDS {
                    if let Some(v) = doc.get(*field) {
                        out.insert(field.to_string(), v.clone());
                    }
                }
                for (field, expr) in spec {
                    match expr {
                        Value::Int(0) | Value::Bool(false) => {}
                        Value::Int(_) | Value::Bool(true) => {
                            if let Some(v) = doc.get(field) {
                                out.insert(field.clone(), v.clone());
                            }
                        }
                        computed => {
                            out.insert(field.clone(), eval_expr(&doc, computed));
                        }
                    }
                }
                out
            } else {
                let mut out = doc.clone();
                for field in spec.keys() {
                    if !crate::document::ALWAYS_PROJECTED_FIELDS.contains(&field.as_str()) {
                        out.remove(field);
                    }
                }
                out
            }
        })
        .collect())
}

fn unset_stage(docs: Vec<Document>, args: &Value) -> Result<Vec<Document>> {
    let fields: Vec<String> = match args {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(|| Error::invalid_filter("$unset entries must be strings")))
            .collect::<Result<_>>()?,
        other => return Err(Error::invalid_filter(format!("$unset needs a string or array, got {other:?}"))),
    };
    Ok(docs
        .into_iter()
        .map(|mut doc| {
            for f in &fields {
                doc.remove(f);
            }
            doc
        })
        .collect())
}

fn unwind_stage(docs: Vec<Document>, args: &Value) -> Result<Vec<Document>> {
    let (path, preserve_empty) = match args {
        Value::String(s) => (s.clone(), false),
        Value::Map(m) => {
            let path = m.get("path").and_then(Value::as_str).ok_or_else(|| Error::invalid_filter("$unwind needs path"))?.to_string();
            let preserve = matches!(m.get("preserveNullAndEmptyArrays"), Some(Value::Bool(true)));
            (path, preserve)
        }
        other => return Err(Error::invalid_filter(format!("bad $unwind spec {other:?}"))),
    };
    let field = path.strip_prefix('$').unwrap_or(&path);
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        match doc.get(field) {
            Some(Value::Array(items)) if !items.is_empty() => {
                for item in items.clone() {
                    let mut d = doc.clone();
                    d.insert(field.to_string(), item);
                    out.push(d);
                }
            }
            _ if preserve_empty => out.push(doc),
            Some(Value::Array(_)) => {} // empty array, drop unless preserving
            _ => {}
        }
    }
    Ok(out)
}

fn group_stage(docs: Vec<Document>, args: &Value) -> Result<Vec<Document>> {
    let spec = args.as_map().ok_or_else(|| Error::invalid_filter("$group needs a document"))?;
    let id_expr = spec.get("_id").ok_or_else(|| Error::invalid_filter("$group needs _id"))?;
    let accumulators: Vec<(&String, &Value)> = spec.iter().filter(|(k, _)| k.as_str() != "_id").collect();

    let mut order: Vec<Value> = Vec::new();
    let mut groups: Vec<(Value, Vec<Document>)> = Vec::new();
    for doc in docs {
        let key = eval_expr(&doc, id_expr);
        if let Some(pos) = order.iter().position(|k| k == &key) {
            groups[pos].1.push(doc);
        } else {
            order.push(key.clone());
            groups.push((key, vec![doc]));
        }
    }

    let mut results = Vec::with_capacity(groups.len());
    for (key, members) in groups {
        let mut out = Document::new();
        out.insert("_id".to_string(), key);
        for (field, accum_spec) in &accumulators {
            let (op, expr) = accum_spec
                .as_map()
                .and_then(|m| m.iter().next())
                .ok_or_else(|| Error::invalid_filter("group accumulator needs one $op"))?;
            out.insert(field.to_string(), apply_accumulator(op, expr, &members)?);
        }
        results.push(out);
    }
    Ok(results)
}

fn apply_accumulator(op: &str, expr: &Value, members: &[Document]) -> Result<Value> {
    let values: Vec<Value> = members.iter().map(|d| eval_expr(d, expr)).collect();
    Ok(match op {
        "$sum" => {
            if let Value::Int(n) = expr {
                Value::Int(*n * members.len() as i64)
            } else {
                let total: f64 = values.iter().filter_map(Value::as_f64).sum();
                Value::Float(total)
            }
        }
        "$avg" => {
            let nums: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
            let avg = if nums.is_empty() { 0.0 } else { nums.iter().sum::<f64>() / nums.len() as f64 };
            Value::Float(avg)
        }
        "$min" => values.into_iter().filter(|v| !v.is_null()).min_by(|a, b| compare_values(Some(a), Some(b))).unwrap_or(Value::Null),
        "$max" => values.into_iter().filter(|v| !v.is_null()).max_by(|a, b| compare_values(Some(a), Some(b))).unwrap_or(Value::Null),
        "$push" => Value::Array(values),
        "$addToSet" => {
            let mut set = Vec::new();
            for v in values {
                if !set.contains(&v) {
                    set.push(v);
                }
            }
            Value::Array(set)
        }
        "$first" => values.into_iter().next().unwrap_or(Value::Null),
        "$last" => values.into_iter().last().unwrap_or(Value::Null),
        other => return Err(Error::invalid_filter(format!("unknown group accumulator {other:?}"))),
    })
}

fn lookup_stage(docs: Vec<Document>, args: &Value, lookups: &dyn LookupSource) -> Result<Vec<Document>> {
    let spec = args.as_map().ok_or_else(|| Error::invalid_filter("$lookup needs a document"))?;
    let from = field_str(spec, "from")?;
    let local_field = field_str(spec, "localField")?;
    let foreign_field = field_str(spec, "foreignField")?;
    let as_field = field_str(spec, "as")?;

    let foreign_docs = lookups.documents(from);
    Ok(docs
        .into_iter()
        .map(|mut doc| {
            let local_value = get_path(&doc, local_field).cloned();
            let matched: Vec<Value> = foreign_docs
                .iter()
                .filter(|f| local_value.is_some() && get_path(f, foreign_field) == local_value.as_ref())
                .map(|f| Value::Map(f.clone()))
                .collect();
            doc.insert(as_field.to_string(), Value::Array(matched));
            doc
        })
        .collect())
}

fn field_str<'a>(spec: &'a Document, name: &str) -> Result<&'a str> {
    spec.get(name).and_then(Value::as_str).ok_or_else(|| Error::invalid_filter(format!("$lookup needs {name}")))
}
