//! Content-addressed blob storage.
//!
//! Blobs are stored exactly once under their SHA-256 hash, fanned out on
//! the first hex byte (`blobs/ab/<hex>`). Writes go to a temp file and are
//! renamed into place, so a blob path exists iff the blob is complete;
//! readers never observe a half-written blob.

use crate::error::{RavenError, RavenResult};
use crate::types::ContentHash;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// UTF-8 byte order mark, stripped from text blobs on read.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Per-blob metadata, persisted in the catalog rather than beside the blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMeta {
    pub size: u64,
    pub is_text: bool,
    /// Detected encoding when the blob decodes as text.
    pub encoding: Option<TextEncoding>,
    /// Above the parse cap: stored, but derived stages skip it.
    pub oversized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    Utf8,
    /// Windows-1252 / Latin-1 fallback used by older game files.
    Latin1,
}

/// Content store rooted at `<data_dir>/store`.
pub struct ContentStore {
    blob_dir: PathBuf,
    max_parse_bytes: u64,
}

impl ContentStore {
    pub fn open(store_dir: &Path, max_parse_bytes: u64) -> RavenResult<Self> {
        let blob_dir = store_dir.join("blobs");
        fs::create_dir_all(&blob_dir).map_err(|e| RavenError::io(&blob_dir, e))?;
        Ok(Self {
            blob_dir,
            max_parse_bytes,
        })
    }

    fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        let hex = hash.to_hex();
        self.blob_dir.join(&hex[..2]).join(&hex)
    }

    /// Store a blob. Idempotent: returns `(hash, is_new)`.
    pub fn put(&self, bytes: &[u8]) -> RavenResult<(ContentHash, bool, BlobMeta)> {
        let hash = ContentHash::of(bytes);
        let meta = self.classify(bytes);
        let path = self.blob_path(&hash);

        if path.exists() {
            return Ok((hash, false, meta));
        }

        let parent = path.parent().expect("blob path has a parent");
        fs::create_dir_all(parent).map_err(|e| RavenError::io(parent, e))?;

        // Write-temp-then-rename keeps partially written blobs invisible.
        let tmp = parent.join(format!(".tmp.{}.{}", std::process::id(), hash.to_hex()));
        {
            let mut f = fs::File::create(&tmp).map_err(|e| RavenError::io(&tmp, e))?;
            f.write_all(bytes).map_err(|e| RavenError::io(&tmp, e))?;
            f.sync_all().map_err(|e| RavenError::io(&tmp, e))?;
        }
        match fs::rename(&tmp, &path) {
            Ok(()) => Ok((hash, true, meta)),
            Err(e) if path.exists() => {
                // Lost a benign race with another writer of the same blob.
                let _ = fs::remove_file(&tmp);
                let _ = e;
                Ok((hash, false, meta))
            }
            Err(e) => Err(RavenError::io(&path, e)),
        }
    }

    pub fn exists(&self, hash: &ContentHash) -> bool {
        self.blob_path(hash).exists()
    }

    pub fn get_bytes(&self, hash: &ContentHash) -> RavenResult<Vec<u8>> {
        let path = self.blob_path(hash);
        fs::read(&path).map_err(|_| RavenError::BlobMissing {
            hash: hash.to_hex(),
        })
    }

    /// Return the blob decoded as text, or `None` when it is binary.
    /// BOM is stripped; Latin-1 fallback decodes byte-for-byte.
    pub fn get_text(&self, hash: &ContentHash) -> RavenResult<Option<String>> {
        let bytes = self.get_bytes(hash)?;
        Ok(decode_text(&bytes))
    }

    /// Classify raw bytes into blob metadata.
    pub fn classify(&self, bytes: &[u8]) -> BlobMeta {
        let size = bytes.len() as u64;
        let oversized = size > self.max_parse_bytes;
        match detect_encoding(bytes) {
            Some(encoding) => BlobMeta {
                size,
                is_text: true,
                encoding: Some(encoding),
                oversized,
            },
            None => BlobMeta {
                size,
                is_text: false,
                encoding: None,
                oversized,
            },
        }
    }
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

/// Text detection: valid UTF-8 (after BOM strip) wins; NUL bytes mean
/// binary; anything else falls back to Latin-1.
fn detect_encoding(bytes: &[u8]) -> Option<TextEncoding> {
    let body = strip_bom(bytes);
    if body.contains(&0) {
        return None;
    }
    if std::str::from_utf8(body).is_ok() {
        Some(TextEncoding::Utf8)
    } else {
        Some(TextEncoding::Latin1)
    }
}

/// Decode bytes to text following the detected encoding, or `None` for binary.
pub fn decode_text(bytes: &[u8]) -> Option<String> {
    let body = strip_bom(bytes);
    match detect_encoding(bytes)? {
        TextEncoding::Utf8 => std::str::from_utf8(body).ok().map(str::to_owned),
        TextEncoding::Latin1 => Some(body.iter().map(|&b| b as char).collect()),
    }
}
