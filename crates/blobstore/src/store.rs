//! The [`BlobStore`] trait: the one abstraction every durable layer above
//! it is written against (§4.1, §6 "storage-backend contract").

use async_trait::async_trait;
use parquedb_core::Result;

/// Metadata returned by [`BlobStore::stat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMeta {
    /// Size in bytes.
    pub size: u64,
    /// Last-modified time, milliseconds since epoch.
    pub mtime: i64,
    /// Opaque tag consumed by [`BlobStore::write_conditional`].
    pub etag: String,
}

/// A page of [`BlobStore::list`] results.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Paths found, relative to the backend root.
    pub paths: Vec<String>,
    /// Metadata for each path, present only if `ListOptions::with_meta`.
    pub meta: Vec<Option<BlobMeta>>,
    /// Opaque continuation cursor; `None` when the listing is complete.
    pub cursor: Option<String>,
}

/// Options controlling [`BlobStore::list`] pagination.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Resume after this cursor.
    pub cursor: Option<String>,
    /// Maximum paths to return in this page.
    pub limit: Option<usize>,
    /// Whether to populate [`ListPage::meta`] (costs one extra round trip
    /// per entry on backends that don't return it inline).
    pub with_meta: bool,
}

/// Options for a plain (non-conditional) [`BlobStore::write`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Opaque content-type-ish tag forwarded to the backend, unused by the
    /// local/memory backends but kept for parity with object-store-backed
    /// implementations that want it.
    pub content_hint: Option<String>,
}

/// What a caller expects the current object's tag to be, for
/// [`BlobStore::write_conditional`] (§4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOptions {
    /// Create-if-absent: fails with `AlreadyExists` if anything exists at
    /// the path.
    IfAbsent,
    /// Compare-and-swap: fails with `ETagMismatch` if the current tag
    /// differs from `etag`.
    IfMatch {
        /// The tag the caller last observed.
        etag: String,
    },
}

/// Byte-addressable storage with atomic conditional writes (§4.1).
///
/// Implementations MUST NOT emulate [`BlobStore::write_conditional`] as a
/// stat-then-write: the underlying primitive must guarantee that N
/// concurrent writers targeting the same path with the same expectation
/// produce exactly one success (§8 invariant 4).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read the full contents at `path`.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Unconditionally write `bytes` to `path`, creating or overwriting.
    async fn write(&self, path: &str, bytes: Vec<u8>, opts: WriteOptions) -> Result<String>;

    /// Atomically write `bytes` to `path` under the given precondition,
    /// returning the new tag on success.
    async fn write_conditional(&self, path: &str, bytes: Vec<u8>, opts: PutOptions) -> Result<String>;

    /// `true` if an object exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Metadata for the object at `path`.
    async fn stat(&self, path: &str) -> Result<BlobMeta>;

    /// Delete the object at `path`. Deleting a missing path is not an
    /// error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// List paths under `prefix`, paginated.
    async fn list(&self, prefix: &str, opts: ListOptions) -> Result<ListPage>;

    /// Write `bytes` to `path` such that readers never observe a partial
    /// file: stage to a temp location and atomically publish.
    async fn write_file_atomic(&self, path: &str, bytes: Vec<u8>) -> Result<String>;
}
