//! C10: picks an access path for a filter, composing an index's candidate
//! set with the evaluator's residual predicate check (§4.10).

use parquedb_core::{Document, EntityId, Result};

/// A full-text index capable of returning candidate ids for a `$text`
/// clause on a given field.
pub trait FtsIndex: Send + Sync {
    /// `true` if this index covers `field`.
    fn covers(&self, field: &str) -> bool;
    /// Candidate entities matching `search`, most relevant first.
    fn search(&self, field: &str, search: &str) -> Vec<EntityId>;
}

/// A vector index capable of nearest-neighbor search on a given field.
pub trait VectorIndex: Send + Sync {
    /// `true` if this index covers `field`.
    fn covers(&self, field: &str) -> bool;
    /// The `k` nearest entities to `near`.
    fn nearest(&self, field: &str, near: &[f64], k: usize) -> Vec<EntityId>;
}

/// The access path the planner chose for a query.
pub enum Plan {
    /// No index applies; evaluate the filter over every live entity.
    FullScan,
    /// Drive from full-text search results, then apply the residual
    /// filter (the clauses outside `$text`) to each candidate.
    Fts { field: String, search: String },
    /// Drive from vector nearest-neighbor results, then apply the
    /// residual filter.
    Vector { field: String, near: Vec<f64>, k: usize },
}

/// Choose a [`Plan`] for `filter`, given the indexes mounted for this
/// namespace. `$text`/`$vector` combined with other predicates compose as
/// AND: the index supplies candidates, the evaluator filters the rest
/// (§4.10).
pub fn plan(filter: &Document, fts: Option<&dyn FtsIndex>, vector: Option<&dyn VectorIndex>) -> Result<Plan> {
    if let Some(text) = filter.get("$text") {
        let spec = text.as_map().ok_or_else(|| parquedb_core::Error::invalid_filter("$text needs a document"))?;
        let search = spec
            .get("$search")
            .and_then(parquedb_core::Value::as_str)
            .ok_or_else(|| parquedb_core::Error::invalid_filter("$text needs $search"))?
            .to_string();
        let field = spec.get("$field").and_then(parquedb_core::Value::as_str).unwrap_or_default().to_string();
        if fts.is_some_and(|i| field.is_empty() || i.covers(&field)) {
            return Ok(Plan::Fts { field, search });
        }
    }
    if let Some(vector_clause) = filter.get("$vector") {
        let spec = vector_clause.as_map().ok_or_else(|| parquedb_core::Error::invalid_filter("$vector needs a document"))?;
        let field = spec
            .get("$field")
            .and_then(parquedb_core::Value::as_str)
            .ok_or_else(|| parquedb_core::Error::invalid_filter("$vector needs $field"))?
            .to_string();
        let near: Vec<f64> = spec
            .get("$near")
            .and_then(parquedb_core::Value::as_array)
            .map(|a| a.iter().filter_map(parquedb_core::Value::as_f64).collect())
            .ok_or_else(|| parquedb_core::Error::invalid_filter("$vector needs $near"))?;
        let k = spec.get("$k").and_then(parquedb_core::Value::as_i64).unwrap_or(10) as usize;
        if vector.is_some_and(|i| i.covers(&field)) {
            return Ok(Plan::Vector { field, near, k });
        }
    }
    Ok(Plan::FullScan)
}

/// Candidates returned by the chosen plan's index, resolved against the
/// mounted index implementations.
pub fn candidates(plan: &Plan, fts: Option<&dyn FtsIndex>, vector: Option<&dyn VectorIndex>) -> Option<Vec<EntityId>> {
    match plan {
        Plan::FullScan => None,
        Plan::Fts { field, search } => fts.map(|i| i.search(field, search)),
        Plan::Vector { field, near, k } => vector.map(|i| i.nearest(field, near, *k)),
    }
}
