//! C8: the filter predicate evaluator (§4.8).

pub mod aggregate;

use parquedb_core::{get_path, Document, Error, Result, Value};
use regex::Regex;

/// A candidate surfaced by an index (FTS/vector) that the planner wants
/// the evaluator to additionally check against any residual, non-index
/// predicates (§4.10).
pub type CandidateId = String;

/// Evaluate `filter` (a raw document of `$operator` clauses and plain
/// field equality) against `doc`. An unrecognized `$`-prefixed key at any
/// level is `InvalidFilter` (§4.8).
pub fn matches(doc: &Document, filter: &Document) -> Result<bool> {
    for (key, clause) in filter {
        if !matches_clause(doc, key, clause)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_clause(doc: &Document, key: &str, clause: &Value) -> Result<bool> {
    match key {
        "$and" => all_of(doc, clause),
        "$or" => any_of(doc, clause),
        "$nor" => Ok(!any_of(doc, clause)?),
        "$not" => {
            let sub = clause.as_map().ok_or_else(|| Error::invalid_filter("$not needs a filter document"))?;
            Ok(!matches(doc, sub)?)
        }
        "$text" => evaluate_text(doc, clause),
        "$vector" => evaluate_vector(doc, clause),
        field => {
            let actual = get_path(doc, field);
            match clause {
                Value::Map(ops) if ops.keys().all(|k| k.starts_with('$')) => {
                    evaluate_operators(actual, ops)
                }
                literal => Ok(actual == Some(literal)),
            }
        }
    }
}

fn all_of(doc: &Document, clause: &Value) -> Result<bool> {
    let items = clause.as_array().ok_or_else(|| Error::invalid_filter("$and/$or need an array"))?;
    for item in items {
        let sub = item.as_map().ok_or_else(|| Error::invalid_filter("$and/$or entries must be filter documents"))?;
        if !matches(doc, sub)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_of(doc: &Document, clause: &Value) -> Result<bool> {
    let items = clause.as_array().ok_or_else(|| Error::invalid_filter("$and/$or need an array"))?;
    for item in items {
        let sub = item.as_map().ok_or_else(|| Error::invalid_filter("$and/$or entries must be filter documents"))?;
        if matches(doc, sub)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// `$text` without a full-text index falls back to a naive substring scan
/// over string fields, so pipelines still behave when C10 has no FTS
/// index mounted for the collection.
fn evaluate_text(doc: &Document, clause: &Value) -> Result<bool> {
    let search = clause
        .as_map()
        .and_then(|m| m.get("$search"))
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_filter("$text needs $search"))?;
    let needle = search.to_lowercase();
    Ok(doc.values().any(|v| matches!(v, Value::String(s) if s.to_lowercase().contains(&needle))))
}

/// `$vector` has no meaning without a mounted vector index (§4.10 routes
/// it there); without one, residual evaluation treats it as satisfied so
/// the planner's composed AND degrades to "index decides".
fn evaluate_vector(_doc: &Document, clause: &Value) -> Result<bool> {
    clause
        .as_map()
        .filter(|m| m.contains_key("$field") && m.contains_key("$near"))
        .ok_or_else(|| Error::invalid_filter("$vector needs $field and $near"))?;
    Ok(true)
}

fn evaluate_operators(actual: Option<&Value>, ops: &Document) -> Result<bool> {
    for (op, expected) in ops {
        let ok = match op.as_str() {
            "$eq" => actual == Some(expected),
            "$ne" => actual != Some(expected),
            "$gt" => compare_numeric(actual, expected, |o| o == std::cmp::Ordering::Greater),
            "$gte" => compare_numeric(actual, expected, |o| o != std::cmp::Ordering::Less),
            "$lt" => compare_numeric(actual, expected, |o| o == std::cmp::Ordering::Less),
            "$lte" => compare_numeric(actual, expected, |o| o != std::cmp::Ordering::Greater),
            "$in" => {
                let set = expected.as_array().ok_or_else(|| Error::invalid_filter("$in needs an array"))?;
                actual.map(|a| set.contains(a)).unwrap_or(false)
            }
            "$nin" => {
                let set = expected.as_array().ok_or_else(|| Error::invalid_filter("$nin needs an array"))?;
                !actual.map(|a| set.contains(a)).unwrap_or(false)
            }
            "$exists" => {
                let want = matches!(expected, Value::Bool(true));
                actual.is_some() == want
            }
            "$regex" => {
                let pattern = expected.as_str().ok_or_else(|| Error::invalid_filter("$regex needs a string"))?;
                let flags = ops.get("$options").and_then(Value::as_str).unwrap_or("");
                evaluate_regex(actual, pattern, flags)?
            }
            "$options" => true, // consumed alongside $regex
            "$size" => {
                let want = expected.as_i64().ok_or_else(|| Error::invalid_filter("$size needs an integer"))?;
                actual.and_then(Value::size).map(|n| n as i64 == want).unwrap_or(false)
            }
            other => return Err(Error::invalid_filter(format!("unknown operator {other:?}"))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn compare_numeric(actual: Option<&Value>, expected: &Value, accept: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    let (Some(a), Some(b)) = (actual.and_then(Value::as_f64), expected.as_f64()) else {
        return false;
    };
    a.partial_cmp(&b).map(accept).unwrap_or(false)
}

fn evaluate_regex(actual: Option<&Value>, pattern: &str, flags: &str) -> Result<bool> {
    let Some(s) = actual.and_then(Value::as_str) else {
        // "$regex on a non-string field evaluates to false" (§4.8).
        return Ok(false);
    };
    let anchored = if flags.contains('i') { format!("(?i){pattern}") } else { pattern.to_string() };
    let re = Regex::new(&anchored).map_err(|e| Error::invalid_filter(format!("bad $regex {pattern:?}: {e}")))?;
    Ok(re.is_match(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn doc() -> Document {
        let mut d = Document::new();
        d.insert("title".to_string(), Value::String("Hello World".into()));
        d.insert("views".to_string(), Value::Int(10));
        d.insert("tags".to_string(), Value::Array(vec![Value::String("tech".into()), Value::String("db".into())]));
        d
    }

    fn op(name: &str, value: Value) -> Document {
        let mut m = BTreeMap::new();
        m.insert(name.to_string(), value);
        m
    }

    fn field_filter(field: &str, ops: Document) -> Document {
        let mut f = Document::new();
        f.insert(field.to_string(), Value::Map(ops));
        f
    }

    #[test]
    fn plain_equality_matches() {
        let mut f = Document::new();
        f.insert("views".to_string(), Value::Int(10));
        assert!(matches(&doc(), &f).unwrap());
    }

    #[test]
    fn gte_and_lt_compose() {
        let mut ops = op("$gte", Value::Int(5));
        ops.insert("$lt".to_string(), Value::Int(20));
        assert!(matches(&doc(), &field_filter("views", ops)).unwrap());
    }

    #[test]
    fn in_checks_membership() {
        let f = field_filter("views", op("$in", Value::Array(vec![Value::Int(10), Value::Int(20)])));
        assert!(matches(&doc(), &f).unwrap());
    }

    #[test]
    fn exists_distinguishes_missing_field() {
        assert!(matches(&doc(), &field_filter("title", op("$exists", Value::Bool(true)))).unwrap());
        assert!(matches(&doc(), &field_filter("missing", op("$exists", Value::Bool(false)))).unwrap());
    }

    #[test]
    fn regex_matches_case_insensitively_with_options() {
        let mut ops = op("$regex", Value::String("^hello".into()));
        ops.insert("$options".to_string(), Value::String("i".into()));
        assert!(matches(&doc(), &field_filter("title", ops)).unwrap());
    }

    #[test]
    fn regex_on_non_string_field_is_false() {
        assert!(!matches(&doc(), &field_filter("views", op("$regex", Value::String("10".into())))).unwrap());
    }

    #[test]
    fn size_checks_array_length() {
        assert!(matches(&doc(), &field_filter("tags", op("$size", Value::Int(2)))).unwrap());
    }

    #[test]
    fn unknown_operator_is_invalid_filter() {
        let err = matches(&doc(), &field_filter("views", op("$bogus", Value::Int(1)))).unwrap_err();
        assert_eq!(err.kind(), parquedb_core::ErrorKind::InvalidQuery);
    }

    #[test]
    fn and_or_nor_compose() {
        let mut and_clauses = Document::new();
        and_clauses.insert(
            "$and".to_string(),
            Value::Array(vec![
                Value::Map(field_filter("views", op("$gt", Value::Int(5)))),
                Value::Map(field_filter("title", op("$exists", Value::Bool(true)))),
            ]),
        );
        assert!(matches(&doc(), &and_clauses).unwrap());

        let mut nor_clauses = Document::new();
        nor_clauses.insert(
            "$nor".to_string(),
            Value::Array(vec![Value::Map(field_filter("views", op("$gt", Value::Int(100))))]),
        );
        assert!(matches(&doc(), &nor_clauses).unwrap());
    }

    #[test]
    fn text_search_falls_back_to_substring_scan() {
        let mut text = Document::new();
        text.insert("$search".to_string(), Value::String("world".into()));
        let mut f = Document::new();
        f.insert("$text".to_string(), Value::Map(text));
        assert!(matches(&doc(), &f).unwrap());
    }
}
