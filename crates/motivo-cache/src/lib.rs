//! Context Cache (C2): fingerprint -> context vector, two tiers.
//!
//! A bounded in-memory LRU sits in front of a durable on-disk store keyed by
//! a cryptographic digest of the fingerprint. Disk writes are
//! write-temp-then-rename so a reader never observes a half-written entry.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lru::LruCache;
use std::num::NonZeroUsize;
use thiserror::Error;

/// A fixed-dimension floating-point context vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextVector(pub Vec<f32>);

impl ContextVector {
    /// Number of components.
    pub fn dim(&self) -> usize {
        self.0.len()
    }
}

/// Errors from cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Underlying filesystem operation failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// On-disk entry was truncated or had an invalid header.
    #[error("corrupt cache entry at {0}")]
    Corrupt(PathBuf),
}

/// Digest a fingerprint string into the hex filename used on disk.
pub fn digest(fingerprint: &str) -> String {
    hex::encode(blake3::hash(fingerprint.as_bytes()).as_bytes())
}

/// Two-tier cache: bounded LRU in memory, atomic-rename store on disk.
pub struct ContextCache {
    memory: Mutex<LruCache<String, ContextVector>>,
    disk_dir: PathBuf,
}

impl ContextCache {
    /// Opens (creating if absent) a cache rooted at `disk_dir` with the given
    /// in-memory capacity (minimum 100 per §3).
    pub fn open(disk_dir: impl Into<PathBuf>, capacity: usize) -> Result<Self, CacheError> {
        let disk_dir = disk_dir.into();
        std::fs::create_dir_all(&disk_dir)?;
        let capacity = NonZeroUsize::new(capacity.max(100))
            .unwrap_or(NonZeroUsize::new(100).unwrap_or(NonZeroUsize::MIN));
        Ok(Self {
            memory: Mutex::new(LruCache::new(capacity)),
            disk_dir,
        })
    }

    fn disk_path(&self, fingerprint: &str) -> PathBuf {
        self.disk_dir.join(format!("{}.ctx", digest(fingerprint)))
    }

    /// Looks up `fingerprint`: memory tier first, then disk, promoting disk
    /// hits into memory under the LRU policy.
    pub fn get(&self, fingerprint: &str) -> Result<Option<ContextVector>, CacheError> {
        {
            let mut memory = self.memory.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = memory.get(fingerprint) {
                return Ok(Some(hit.clone()));
            }
        }
        let path = self.disk_path(fingerprint);
        if !path.exists() {
            return Ok(None);
        }
        let ctx = read_entry(&path)?;
        let mut memory = self.memory.lock().unwrap_or_else(|e| e.into_inner());
        memory.put(fingerprint.to_string(), ctx.clone());
        Ok(Some(ctx))
    }

    /// Writes `value` for `fingerprint`: atomically to disk, then into the
    /// memory tier (evicting the least-recently-used entry if at capacity).
    /// Idempotent: repeated `put`s for the same key simply overwrite.
    pub fn put(&self, fingerprint: &str, value: ContextVector) -> Result<(), CacheError> {
        write_entry_atomic(&self.disk_dir, &self.disk_path(fingerprint), &value)?;
        let mut memory = self.memory.lock().unwrap_or_else(|e| e.into_inner());
        memory.put(fingerprint.to_string(), value);
        Ok(())
    }

    /// Drops the memory tier. Disk entries are untouched; use [`Self::purge`]
    /// to also remove them.
    pub fn clear(&self) {
        let mut memory = self.memory.lock().unwrap_or_else(|e| e.into_inner());
        memory.clear();
    }

    /// Removes every entry from the disk tier (explicit, separate from `clear`).
    pub fn purge(&self) -> Result<(), CacheError> {
        self.clear();
        for entry in std::fs::read_dir(&self.disk_dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) == Some("ctx") {
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// The on-disk path a given fingerprint would be cached at, for
    /// reporting back to clients as a `cache_file` reference (§6).
    pub fn cache_file_path(&self, fingerprint: &str) -> PathBuf {
        self.disk_path(fingerprint)
    }
}

fn write_entry_atomic(dir: &Path, dest: &Path, value: &ContextVector) -> Result<(), CacheError> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    let dim: u32 = value.dim() as u32;
    tmp.write_all(&dim.to_le_bytes())?;
    for component in &value.0 {
        tmp.write_all(&component.to_le_bytes())?;
    }
    tmp.flush()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

fn read_entry(path: &Path) -> Result<ContextVector, CacheError> {
    let mut file = std::fs::File::open(path)?;
    let mut header = [0u8; 4];
    file.read_exact(&mut header)
        .map_err(|_| CacheError::Corrupt(path.to_path_buf()))?;
    let dim = u32::from_le_bytes(header) as usize;
    let mut buf = vec![0u8; dim * 4];
    file.read_exact(&mut buf)
        .map_err(|_| CacheError::Corrupt(path.to_path_buf()))?;
    let values = buf
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(ContextVector(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ContextCache::open(dir.path(), 100).expect("open");
        let value = ContextVector(vec![1.0, 2.0, 3.0]);
        cache.put("fp-a", value.clone()).expect("put");
        let got = cache.get("fp-a").expect("get").expect("present");
        assert_eq!(got, value);
    }

    #[test]
    fn disk_hit_promotes_into_memory() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let cache = ContextCache::open(dir.path(), 100).expect("open");
            cache
                .put("fp-b", ContextVector(vec![9.0]))
                .expect("put");
        }
        // Fresh cache instance: memory tier is empty, disk tier survives.
        let cache = ContextCache::open(dir.path(), 100).expect("reopen");
        let got = cache.get("fp-b").expect("get").expect("present on disk");
        assert_eq!(got, ContextVector(vec![9.0]));
    }

    #[test]
    fn clear_drops_memory_but_not_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ContextCache::open(dir.path(), 100).expect("open");
        cache.put("fp-c", ContextVector(vec![1.0])).expect("put");
        cache.clear();
        let got = cache.get("fp-c").expect("get").expect("still on disk");
        assert_eq!(got, ContextVector(vec![1.0]));
    }

    #[test]
    fn purge_removes_disk_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ContextCache::open(dir.path(), 100).expect("open");
        cache.put("fp-d", ContextVector(vec![1.0])).expect("put");
        cache.purge().expect("purge");
        assert!(cache.get("fp-d").expect("get").is_none());
    }

    #[test]
    fn missing_key_returns_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ContextCache::open(dir.path(), 100).expect("open");
        assert!(cache.get("absent").expect("get").is_none());
    }
}
