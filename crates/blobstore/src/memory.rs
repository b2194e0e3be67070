//! In-memory [`BlobStore`], backed by `object_store::memory::InMemory`.
//!
//! Used for tests and for ephemeral databases; conditional writes are
//! still real compare-and-swap operations, not a stat-then-write shortcut,
//! since they go through the same `put_opts` path as every other backend.

use crate::path::{has_traversal, normalize_storage_path};
use crate::store::{BlobMeta, BlobStore, ListOptions, ListPage, PutOptions, WriteOptions};
use async_trait::async_trait;
use futures::StreamExt;
use object_store::memory::InMemory;
use object_store::path::Path as ObjPath;
use object_store::{ObjectStore, PutMode, PutPayload, UpdateVersion};
use parquedb_core::{Error, Result};
use std::sync::Arc;

/// An in-memory blob store, one instance per database handle.
pub struct MemoryStore {
    inner: Arc<InMemory>,
}

impl MemoryStore {
    /// Create a fresh, empty store.
    pub fn new() -> Self {
        MemoryStore { inner: Arc::new(InMemory::new()) }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn validated_path(path: &str) -> Result<ObjPath> {
    if has_traversal(path) {
        return Err(Error::validation(format!("path {path:?} contains traversal segments")));
    }
    let normalized = normalize_storage_path(path);
    ObjPath::parse(&normalized).map_err(|e| Error::validation(format!("invalid path {path:?}: {e}")))
}

fn map_object_store_err(path: &str, expected_etag: Option<String>, err: object_store::Error) -> Error {
    match err {
        object_store::Error::AlreadyExists { .. } => Error::AlreadyExists { path: path.to_string() },
        object_store::Error::Precondition { .. } | object_store::Error::NotModified { .. } => {
            Error::ETagMismatch { path: path.to_string(), expected_etag, actual_etag: None }
        }
        object_store::Error::NotFound { .. } => Error::backend(format!("not found: {path}")),
        other => Error::backend_with_source(format!("object_store error at {path}"), other),
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let p = validated_path(path)?;
        let result = self
            .inner
            .get(&p)
            .await
            .map_err(|e| map_object_store_err(path, None, e))?;
        let bytes = result.bytes().await.map_err(|e| Error::backend_with_source("read body", e))?;
        Ok(bytes.to_vec())
    }

    async fn write(&self, path: &str, bytes: Vec<u8>, _opts: WriteOptions) -> Result<String> {
        let p = validated_path(path)?;
        let result = self
            .inner
            .put(&p, PutPayload::from(bytes))
            .await
            .map_err(|e| map_object_store_err(path, None, e))?;
        Ok(result.e_tag.unwrap_or_default())
    }

    async fn write_conditional(&self, path: &str, bytes: Vec<u8>, opts: PutOptions) -> Result<String> {
        let p = validated_path(path)?;
        let (mode, expected) = match opts {
            PutOptions::IfAbsent => (PutMode::Create, None),
            PutOptions::IfMatch { etag } => (
                PutMode::Update(UpdateVersion { e_tag: Some(etag.clone()), version: None }),
                Some(etag),
            ),
        };
        let put_opts = object_store::PutOptions { mode, ..Default::default() };
        let result = self
            .inner
            .put_opts(&p, PutPayload::from(bytes), put_opts)
            .await
            .map_err(|e| map_object_store_err(path, expected, e))?;
        Ok(result.e_tag.unwrap_or_default())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let p = validated_path(path)?;
        match self.inner.head(&p).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(map_object_store_err(path, None, e)),
        }
    }

    async fn stat(&self, path: &str) -> Result<BlobMeta> {
        let p = validated_path(path)?;
        let meta = self.inner.head(&p).await.map_err(|e| map_object_store_err(path, None, e))?;
        Ok(BlobMeta {
            size: meta.size as u64,
            mtime: meta.last_modified.timestamp_millis(),
            etag: meta.e_tag.unwrap_or_default(),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let p = validated_path(path)?;
        match self.inner.delete(&p).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(map_object_store_err(path, None, e)),
        }
    }

    async fn list(&self, prefix: &str, opts: ListOptions) -> Result<ListPage> {
        let normalized = normalize_storage_path(prefix);
        let prefix_path = if normalized.is_empty() {
            None
        } else {
            Some(ObjPath::parse(&normalized).map_err(|e| Error::validation(e.to_string()))?)
        };
        let mut stream = self.inner.list(prefix_path.as_ref());
        let mut paths = Vec::new();
        let mut meta = Vec::new();
        let skip_until = opts.cursor.clone();
        let mut skipping = skip_until.is_some();
        while let Some(item) = stream.next().await {
            let object_meta = item.map_err(|e| Error::backend_with_source("list", e))?;
            let path_str = object_meta.location.to_string();
            if skipping {
                if Some(&path_str) == skip_until.as_ref() {
                    skipping = false;
                }
                continue;
            }
            if let Some(limit) = opts.limit {
                if paths.len() >= limit {
                    return Ok(ListPage { paths, meta, cursor: Some(path_str) });
                }
            }
            if opts.with_meta {
                meta.push(Some(BlobMeta {
                    size: object_meta.size as u64,
                    mtime: object_meta.last_modified.timestamp_millis(),
                    etag: object_meta.e_tag.clone().unwrap_or_default(),
                }));
            } else {
                meta.push(None);
            }
            paths.push(path_str);
        }
        Ok(ListPage { paths, meta, cursor: None })
    }

    async fn write_file_atomic(&self, path: &str, bytes: Vec<u8>) -> Result<String> {
        // InMemory's `put` already replaces the whole value atomically; no
        // separate staging step is needed.
        self.write(path, bytes, WriteOptions::default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let store = MemoryStore::new();
        store.write("a/b.txt", b"hello".to_vec(), WriteOptions::default()).await.unwrap();
        let bytes = store.read("a/b.txt").await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn exclusive_create_fails_on_existing_path() {
        let store = MemoryStore::new();
        store
            .write_conditional("k", b"a".to_vec(), PutOptions::IfAbsent)
            .await
            .unwrap();
        let err = store
            .write_conditional("k", b"b".to_vec(), PutOptions::IfAbsent)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn cas_fails_with_stale_etag() {
        let store = MemoryStore::new();
        let etag = store
            .write_conditional("k", b"a".to_vec(), PutOptions::IfAbsent)
            .await
            .unwrap();
        store
            .write_conditional("k", b"b".to_vec(), PutOptions::IfMatch { etag: etag.clone() })
            .await
            .unwrap();
        let err = store
            .write_conditional("k", b"c".to_vec(), PutOptions::IfMatch { etag })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ETagMismatch { .. }));
    }

    #[tokio::test]
    async fn concurrent_exclusive_creates_exactly_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .write_conditional("shared", vec![i], PutOptions::IfAbsent)
                    .await
            }));
        }
        let mut ok_count = 0;
        let mut conflict_count = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok_count += 1,
                Err(Error::AlreadyExists { .. }) => conflict_count += 1,
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        }
        assert_eq!(ok_count, 1);
        assert_eq!(conflict_count, 7);
    }

    #[tokio::test]
    async fn list_respects_prefix_and_limit() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .write(&format!("events/batch-{i}.parquet"), vec![0u8], WriteOptions::default())
                .await
                .unwrap();
        }
        store.write("other/thing.bin", vec![0u8], WriteOptions::default()).await.unwrap();

        let page = store
            .list("events", ListOptions { limit: Some(3), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(page.paths.len(), 3);
        assert!(page.cursor.is_some());

        let full = store.list("events", ListOptions::default()).await.unwrap();
        assert_eq!(full.paths.len(), 5);
    }

    #[tokio::test]
    async fn delete_missing_path_is_not_an_error() {
        let store = MemoryStore::new();
        store.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_traversal_paths() {
        let store = MemoryStore::new();
        let err = store.read("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, Error::ValidationError { .. }));
    }
}
