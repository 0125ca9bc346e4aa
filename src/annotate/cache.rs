//! Response Cache
//!
//! Persists raw LLM responses keyed by request fingerprint so identical
//! requests are never paid for twice, across runs. Entries are written once
//! and never mutated; `clear()` is the only removal path — no eviction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache database error: {0}")]
    Database(#[from] sled::Error),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stored raw response plus enough metadata to audit where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Raw response text exactly as the backend returned it
    pub raw: String,
    /// Backend that produced the response
    pub backend: String,
    /// Model identifier used
    pub model: String,
    /// When the entry was first stored
    pub stored_at: DateTime<Utc>,
}

/// On-disk request→response cache.
///
/// Key: fingerprint hex string. Value: JSON-serialized `CachedResponse`.
/// sled serializes concurrent writers internally; reads proceed lock-free.
/// Durability is best-effort via sled's background flushing — on crash the
/// last few stores may be lost, which only costs a repeat call.
#[derive(Clone)]
pub struct ResponseCache {
    db: Arc<sled::Db>,
}

impl ResponseCache {
    /// Open or create the cache at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let db = sled::open(path)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Look up a response by fingerprint.
    pub fn lookup(&self, fingerprint: &str) -> Result<Option<CachedResponse>, CacheError> {
        match self.db.get(fingerprint.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Store a response under its fingerprint.
    ///
    /// Entries are immutable: if the fingerprint is already present the
    /// existing entry wins and the new value is discarded.
    pub fn store(&self, fingerprint: &str, response: &CachedResponse) -> Result<(), CacheError> {
        if self.db.contains_key(fingerprint.as_bytes())? {
            return Ok(());
        }
        let value = serde_json::to_vec(response)?;
        self.db.insert(fingerprint.as_bytes(), value)?;
        Ok(())
    }

    /// Number of cached responses.
    pub fn len(&self) -> usize {
        self.db.len()
    }

    /// True when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Cache size on disk in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.db.size_on_disk().unwrap_or(0)
    }

    /// Remove every entry. The only removal path.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.db.clear()?;
        self.db.flush()?;
        Ok(())
    }

    /// Flush pending writes to disk. Called once at the end of a batch run.
    pub fn flush(&self) -> Result<(), CacheError> {
        self.db.flush()?;
        Ok(())
    }
}
