//! Index builder with a shared, time-limited cache.
//!
//! An upload batch is keyed by the fingerprint of its names and contents.
//! The first caller for a key stages the files, loads them, and builds the
//! index; concurrent callers for the same key wait for that build and share
//! its result. Entries older than the cache TTL are rebuilt on next use.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use ragchat_core::error::{RagChatError, Result};
use ragchat_core::types::UploadedFileSet;
use ragchat_vector::{DocumentIndex, DocumentLoader, IndexConstructor};

struct CachedIndex {
    index: Arc<DocumentIndex>,
    built_at: Instant,
}

/// One cache key. The cell is filled at most once; a failed build leaves it
/// empty for the next caller.
#[derive(Default)]
struct CacheSlot {
    cell: OnceCell<CachedIndex>,
}

impl CacheSlot {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.cell
            .get()
            .map(|cached| cached.built_at.elapsed() > ttl)
            .unwrap_or(false)
    }
}

/// Stages uploads and builds (or reuses) the index for them.
pub struct IndexBuilder {
    staging_dir: PathBuf,
    loader: Arc<dyn DocumentLoader>,
    constructor: Arc<dyn IndexConstructor>,
    ttl: Duration,
    cache: Mutex<HashMap<String, Arc<CacheSlot>>>,
}

impl IndexBuilder {
    pub fn new(
        staging_dir: impl Into<PathBuf>,
        loader: Arc<dyn DocumentLoader>,
        constructor: Arc<dyn IndexConstructor>,
        ttl: Duration,
    ) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            loader,
            constructor,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Return the index for this batch, building it if it is not cached or
    /// its entry has expired.
    pub async fn configure_index(&self, files: &UploadedFileSet) -> Result<Arc<DocumentIndex>> {
        if files.is_empty() {
            return Err(RagChatError::EmptyUpload);
        }
        let key = files.fingerprint();
        let slot = self.slot(&key)?;

        if slot.cell.initialized() {
            debug!(key = %short(&key), "Index cache hit");
        }
        let cached = slot
            .cell
            .get_or_try_init(|| async {
                let index = self.build(&key, files).await?;
                Ok::<_, RagChatError>(CachedIndex {
                    index,
                    built_at: Instant::now(),
                })
            })
            .await?;
        Ok(Arc::clone(&cached.index))
    }

    /// Slot for `key`, replacing it first if its entry has expired.
    fn slot(&self, key: &str) -> Result<Arc<CacheSlot>> {
        let mut cache = self.lock()?;
        if let Some(slot) = cache.get(key) {
            if !slot.is_stale(self.ttl) {
                return Ok(Arc::clone(slot));
            }
            debug!(key = %short(key), "Index cache entry expired");
        }
        let slot = Arc::new(CacheSlot::default());
        cache.insert(key.to_string(), Arc::clone(&slot));
        Ok(slot)
    }

    async fn build(&self, key: &str, files: &UploadedFileSet) -> Result<Arc<DocumentIndex>> {
        info!(key = %short(key), files = files.len(), "Building index");
        self.stage(files).await?;
        let documents = self
            .loader
            .load(&self.staging_dir)
            .await
            .map_err(into_index_build)?;
        self.constructor
            .build(documents)
            .await
            .map_err(into_index_build)
    }

    /// Write each file to the staging directory under its base name.
    async fn stage(&self, files: &UploadedFileSet) -> Result<()> {
        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|e| {
                RagChatError::StagingIo(format!("{}: {}", self.staging_dir.display(), e))
            })?;
        for file in files.files() {
            let name = staging_name(&file.name)?;
            let path = self.staging_dir.join(name);
            tokio::fs::write(&path, &file.content)
                .await
                .map_err(|e| RagChatError::StagingIo(format!("{}: {}", path.display(), e)))?;
            debug!(path = %path.display(), bytes = file.content.len(), "Staged upload");
        }
        Ok(())
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_stale(&self) -> Result<usize> {
        let mut cache = self.lock()?;
        let before = cache.len();
        cache.retain(|_, slot| !slot.is_stale(self.ttl));
        Ok(before - cache.len())
    }

    /// Number of keys with a built index.
    pub fn cached_len(&self) -> usize {
        self.lock()
            .map(|c| c.values().filter(|s| s.cell.initialized()).count())
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Arc<CacheSlot>>>> {
        self.cache
            .lock()
            .map_err(|e| RagChatError::IndexBuild(format!("index cache lock poisoned: {}", e)))
    }
}

/// Base name of an uploaded file. Names that would escape the staging
/// directory or name nothing are rejected.
fn staging_name(name: &str) -> Result<&str> {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.trim().is_empty());
    match base {
        Some(base) => {
            if base != name {
                warn!(name = %name, base = %base, "Upload name reduced to its base name");
            }
            Ok(base)
        }
        None => Err(RagChatError::StagingIo(format!(
            "invalid upload file name: {:?}",
            name
        ))),
    }
}

fn into_index_build(err: RagChatError) -> RagChatError {
    match err {
        RagChatError::IndexBuild(_) => err,
        other => RagChatError::IndexBuild(other.to_string()),
    }
}

fn short(key: &str) -> &str {
    &key[..key.len().min(12)]
}
