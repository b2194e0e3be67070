//! C1 (Blob Store) and C2 (Path Utilities).
//!
//! A byte-addressable key→bytes store with list/stat/exists/delete and
//! atomic conditional writes (§4.1), plus the path normalization and
//! glob-matching helpers every backend and every upper layer shares (§4.2).

pub mod local;
pub mod memory;
pub mod path;
pub mod store;

pub use local::LocalFsStore;
pub use memory::MemoryStore;
pub use path::{
    apply_prefix, compile_glob, content_tag, normalize_file_path, normalize_storage_path,
    normalize_prefix, strip_prefix, TagMode,
};
pub use store::{BlobMeta, BlobStore, ListOptions, ListPage, PutOptions, WriteOptions};
