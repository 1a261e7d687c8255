//! Chunked value codec.
//!
//! Stores JSON values of any size on top of a [`CacheStore`] with a fixed per-entry
//! ceiling. A value that fits is written directly under its key. A larger value is cut
//! into contiguous fragments written under `<key>_chunk_<i>`, followed by a manifest
//! under `<key>_meta` listing the fragment keys in reassembly order.
//!
//! Reassembly is all-or-nothing: one missing fragment makes the whole value absent.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::store::CacheStore;
use crate::error::{ConnectorError, ConnectorResult};

const META_SUFFIX: &str = "_meta";
const CHUNK_SUFFIX: &str = "_chunk_";

/// Manifest written under `<key>_meta`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkManifest {
    /// Fragment keys in write order, which is also reassembly order
    pub chunks: Vec<String>,
    /// Byte length of the reassembled value
    pub total_length: usize,
}

/// How a value ended up in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredLayout {
    Direct,
    Chunked { chunks: usize },
}

pub fn meta_key(key: &str) -> String {
    format!("{}{}", key, META_SUFFIX)
}

pub fn chunk_key(key: &str, index: usize) -> String {
    format!("{}{}{}", key, CHUNK_SUFFIX, index)
}

/// Split `value` into pieces of at most `max_bytes`, never cutting a UTF-8 sequence.
///
/// `max_bytes` must be at least 4.
pub fn split_utf8(value: &str, max_bytes: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = value;
    while !rest.is_empty() {
        let mut end = max_bytes.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (head, tail) = rest.split_at(end);
        pieces.push(head);
        rest = tail;
    }
    pieces
}

/// Chunking codec over a size-bounded store
pub struct ChunkedCodec {
    store: Arc<dyn CacheStore>,
    chunk_bytes: usize,
    max_ttl: Duration,
}

impl ChunkedCodec {
    /// Create a codec. `chunk_bytes` must be below the store ceiling.
    pub fn new(store: Arc<dyn CacheStore>, chunk_bytes: usize, max_ttl: Duration) -> ConnectorResult<Self> {
        if chunk_bytes < 4 || chunk_bytes >= store.max_value_bytes() {
            return Err(ConnectorError::ConfigError(format!(
                "chunk size {} must be between 4 and the store ceiling {} (exclusive)",
                chunk_bytes,
                store.max_value_bytes()
            )));
        }
        Ok(Self {
            store,
            chunk_bytes,
            max_ttl,
        })
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Serialize and store `value` under `key`, chunking when it exceeds the ceiling.
    ///
    /// Any previous entry under `key` is removed first and the manifest is published
    /// last, so a reader never pairs a new manifest with fragments of an older value.
    /// A value whose manifest would not fit the store is rejected before any fragment
    /// is written.
    pub async fn write<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> ConnectorResult<StoredLayout> {
        let serialized = serde_json::to_string(value)?;
        let ttl = ttl.min(self.max_ttl);

        self.remove(key).await?;

        if serialized.len() <= self.store.max_value_bytes() {
            debug!("Storing '{}' directly ({} bytes)", key, serialized.len());
            self.store.put(key, serialized, ttl).await?;
            return Ok(StoredLayout::Direct);
        }

        let pieces = split_utf8(&serialized, self.chunk_bytes);
        let manifest = ChunkManifest {
            chunks: (0..pieces.len()).map(|index| chunk_key(key, index)).collect(),
            total_length: serialized.len(),
        };
        let raw_manifest = serde_json::to_string(&manifest)?;
        if raw_manifest.len() > self.store.max_value_bytes() {
            return Err(ConnectorError::CacheError(format!(
                "'{}': manifest for {} chunks is {} bytes, store limit is {}",
                key,
                manifest.chunks.len(),
                raw_manifest.len(),
                self.store.max_value_bytes()
            )));
        }

        for (chunk, piece) in manifest.chunks.iter().zip(pieces) {
            self.store.put(chunk, piece.to_string(), ttl).await?;
        }
        self.store.put(&meta_key(key), raw_manifest, ttl).await?;

        debug!(
            "Stored '{}' as {} chunks ({} bytes)",
            key,
            manifest.chunks.len(),
            manifest.total_length
        );
        Ok(StoredLayout::Chunked {
            chunks: manifest.chunks.len(),
        })
    }

    /// Read and deserialize the value under `key`.
    ///
    /// Returns `Ok(None)` for a miss, including a chunked entry with any fragment
    /// missing. Undecodable content yields [`ConnectorError::CacheCorrupt`].
    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> ConnectorResult<Option<T>> {
        if let Some(direct) = self.store.get(key).await? {
            return serde_json::from_str(&direct)
                .map(Some)
                .map_err(|e| ConnectorError::CacheCorrupt(format!("'{}': {}", key, e)));
        }

        let manifest = match self.read_manifest(key).await? {
            Some(manifest) => manifest,
            None => return Ok(None),
        };

        let mut assembled = String::with_capacity(manifest.total_length);
        for chunk in &manifest.chunks {
            match self.store.get(chunk).await? {
                Some(piece) => assembled.push_str(&piece),
                None => {
                    warn!("Chunk '{}' of '{}' is missing, treating entry as absent", chunk, key);
                    return Ok(None);
                }
            }
        }

        if assembled.len() != manifest.total_length {
            return Err(ConnectorError::CacheCorrupt(format!(
                "'{}': reassembled {} bytes, manifest says {}",
                key,
                assembled.len(),
                manifest.total_length
            )));
        }

        serde_json::from_str(&assembled)
            .map(Some)
            .map_err(|e| ConnectorError::CacheCorrupt(format!("'{}': {}", key, e)))
    }

    /// Remove the direct entry, every listed fragment, then the manifest.
    ///
    /// Removing an absent key is a no-op.
    pub async fn remove(&self, key: &str) -> ConnectorResult<()> {
        self.store.remove(key).await?;

        let meta = meta_key(key);
        match self.read_manifest(key).await {
            Ok(Some(manifest)) => {
                for chunk in &manifest.chunks {
                    self.store.remove(chunk).await?;
                }
            }
            Ok(None) => return Ok(()),
            Err(e) => warn!("Dropping unreadable manifest '{}': {}", meta, e),
        }
        self.store.remove(&meta).await
    }

    async fn read_manifest(&self, key: &str) -> ConnectorResult<Option<ChunkManifest>> {
        let meta = meta_key(key);
        match self.store.get(&meta).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| ConnectorError::CacheCorrupt(format!("'{}': {}", meta, e))),
            None => Ok(None),
        }
    }
}
