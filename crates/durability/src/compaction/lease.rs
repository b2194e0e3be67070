//! The compactor's exclusive namespace lock: a conditional-write sentinel
//! blob with a timestamped lease (§4.11, §5 "shared resources").

use crate::config::CompactionConfig;
use parquedb_blobstore::{BlobStore, PutOptions};
use parquedb_core::{Error, Namespace, Result, Timestamp};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseBody {
    holder: String,
    expires_at: i64,
}

fn lease_path(ns: &Namespace) -> String {
    format!("meta/locks/{ns}.lease.json")
}

/// A held lease on a namespace's compaction lock. Dropping this value
/// without calling [`NamespaceLease::release`] leaves the lease to expire
/// naturally; it does not panic or block.
pub struct NamespaceLease {
    store: Arc<dyn BlobStore>,
    ns: Namespace,
    holder: String,
    etag: String,
}

impl std::fmt::Debug for NamespaceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceLease")
            .field("ns", &self.ns)
            .field("holder", &self.holder)
            .field("etag", &self.etag)
            .finish()
    }
}

impl NamespaceLease {
    /// Try to acquire `ns`'s compaction lease, retrying a held-but-expired
    /// lease up to `config.max_retries` times with jittered backoff.
    /// Returns `Err(Error::AlreadyExists)`-shaped conflict if another
    /// holder's lease is still live after retries are exhausted.
    pub async fn acquire(
        store: Arc<dyn BlobStore>,
        ns: &Namespace,
        holder: impl Into<String>,
        config: CompactionConfig,
    ) -> Result<Self> {
        let holder = holder.into();
        let path = lease_path(ns);
        let mut attempt = 0;

        loop {
            let body = LeaseBody { holder: holder.clone(), expires_at: Timestamp::now().as_millis() + config.lease_ms };
            let bytes = serde_json::to_vec(&body).expect("lease body always serializes");

            match store.write_conditional(&path, bytes.clone(), PutOptions::IfAbsent).await {
                Ok(etag) => {
                    debug!(ns = %ns, holder = %holder, "acquired namespace lease");
                    return Ok(NamespaceLease { store, ns: ns.clone(), holder, etag });
                }
                Err(Error::AlreadyExists { .. }) => {
                    // Someone holds it; see if their lease already expired.
                    let current = store.read(&path).await?;
                    let existing: LeaseBody = serde_json::from_slice(&current)
                        .map_err(|e| Error::backend_with_source("decode lease sentinel", e))?;
                    let meta = store.stat(&path).await?;
                    if existing.expires_at < Timestamp::now().as_millis() {
                        match store
                            .write_conditional(&path, bytes, PutOptions::IfMatch { etag: meta.etag.clone() })
                            .await
                        {
                            Ok(etag) => {
                                debug!(ns = %ns, holder = %holder, "stole expired namespace lease");
                                return Ok(NamespaceLease { store, ns: ns.clone(), holder, etag });
                            }
                            Err(Error::ETagMismatch { .. }) => {
                                // Raced another stealer; fall through to retry.
                            }
                            Err(e) => return Err(e),
                        }
                    }

                    attempt += 1;
                    if attempt > config.max_retries {
                        warn!(ns = %ns, "gave up acquiring namespace lease after {attempt} attempts");
                        return Err(Error::backend(format!(
                            "namespace {ns} lease held by {} until {}",
                            existing.holder, existing.expires_at
                        )));
                    }
                    backoff(config.backoff_base_ms, attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Extend the lease's expiry by another full TTL. Intended to be
    /// called halfway through the configured TTL while compaction runs, so
    /// a slow fold never loses its lock mid-flight.
    pub async fn renew(&mut self, config: CompactionConfig) -> Result<()> {
        let body = LeaseBody { holder: self.holder.clone(), expires_at: Timestamp::now().as_millis() + config.lease_ms };
        let bytes = serde_json::to_vec(&body).expect("lease body always serializes");
        let etag = self
            .store
            .write_conditional(&lease_path(&self.ns), bytes, PutOptions::IfMatch { etag: self.etag.clone() })
            .await?;
        self.etag = etag;
        Ok(())
    }

    /// Release the lease by deleting the sentinel blob.
    pub async fn release(self) -> Result<()> {
        self.store.delete(&lease_path(&self.ns)).await
    }
}

async fn backoff(base_ms: u64, attempt: u32) {
    let exp = base_ms.saturating_mul(1u64 << attempt.min(10));
    let jitter = rand::thread_rng().gen_range(0..=exp / 2 + 1);
    tokio::time::sleep(std::time::Duration::from_millis(exp + jitter)).await;
}
