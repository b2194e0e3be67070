//! Shared types for ParqueDB: entity identity, the document value model,
//! events, and the unified error type.
//!
//! Every other crate in the workspace depends on `parquedb-core`; it has no
//! dependency on storage, durability, or the engine itself so that the data
//! model can be reasoned about independently of how it is persisted.

pub mod contract;
pub mod error;
pub mod event;
pub mod limits;
pub mod value;

pub use contract::entity_id::EntityId;
pub use contract::namespace::Namespace;
pub use contract::timestamp::Timestamp;
pub use contract::version::Version;
pub use error::{Error, ErrorKind, Result};
pub use event::{Event, EventId, EventTarget, Op};
pub use value::{get_path, Document, Value};
