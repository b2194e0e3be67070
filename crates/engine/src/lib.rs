//! The entity engine: reconstruction-backed CRUD and bulk operations,
//! relationship indexing, filter/aggregation evaluation, and query planning
//! (§4.6-§4.10).

pub mod cache;
pub mod document;
pub mod entity_engine;
pub mod filter;
pub mod planner;
pub mod relationships;
pub mod update_ops;

pub use cache::EntityCache;
pub use entity_engine::{
    CreateOptions, DeleteOptions, EngineConfig, EntityEngine, FindOptions, GetOptions, UpdateOptions,
};
pub use relationships::RelationshipIndex;
