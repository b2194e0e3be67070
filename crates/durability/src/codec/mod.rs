//! Columnar (Parquet) codecs for the durable artifacts named in the
//! persisted file layout: event batches, pending row-groups, and the
//! canonical per-namespace entity snapshot. All three share the same
//! "one row per affected entity/event" shape and so reuse the same
//! encode/decode machinery, parameterized by schema.

pub mod entity_batch;
pub mod event_batch;
