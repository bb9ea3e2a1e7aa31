//! Manifest scanner: walks a content root and produces
//! `(relpath, mtime, size, hash)` tuples plus a Merkle-style root hash.
//!
//! The walk streams; memory is bounded by one file's bytes. Exclude rules
//! cover dot-directories, VCS metadata, build output, and OS junk.

use crate::error::{RavenError, RavenResult};
use crate::paths::VPath;
use crate::types::ContentHash;
use ignore::WalkBuilder;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Directory names never descended into.
const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "__pycache__",
    "node_modules",
    "target",
    ".vs",
    ".idea",
];

/// File names ignored wherever they appear.
const EXCLUDED_FILES: &[&str] = &["Thumbs.db", "desktop.ini", ".DS_Store"];

/// One scanned file.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub relpath: VPath,
    pub abs_path: PathBuf,
    pub mtime_ms: i64,
    pub size: u64,
    pub hash: ContentHash,
}

/// A completed scan: entries plus the root hash over the normalized
/// `relpath ‖ 0x00 ‖ content_hash` sequence, sorted by relpath.
#[derive(Debug)]
pub struct Manifest {
    pub entries: Vec<ScanEntry>,
    pub root_hash: ContentHash,
}

/// Lazily walk `root`, yielding candidate file paths with exclude rules
/// applied. Hidden files (dot-prefixed) are skipped.
pub fn walk_files(root: &Path) -> impl Iterator<Item = PathBuf> + use<> {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(true)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .follow_links(false)
        .require_git(false)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                return !EXCLUDED_DIRS.contains(&name.as_ref());
            }
            !EXCLUDED_FILES.contains(&name.as_ref())
        });

    builder
        .build()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .map(|entry| entry.into_path())
}

/// Stat and hash one file.
pub fn scan_file(root: &Path, abs_path: &Path) -> RavenResult<ScanEntry> {
    let relpath = VPath::from_root(root, abs_path).ok_or_else(|| {
        RavenError::Bug(format!(
            "scanned path '{}' escapes root '{}'",
            abs_path.display(),
            root.display()
        ))
    })?;
    let meta = std::fs::metadata(abs_path).map_err(|e| RavenError::io(abs_path, e))?;
    let mtime_ms = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    let bytes = std::fs::read(abs_path).map_err(|e| RavenError::io(abs_path, e))?;
    Ok(ScanEntry {
        relpath,
        abs_path: abs_path.to_path_buf(),
        mtime_ms,
        size: meta.len(),
        hash: ContentHash::of(&bytes),
    })
}

/// Scan a whole root. Hashing is parallel; the result is sorted by
/// normalized relpath and carries the Merkle root.
pub fn scan_root(root: &Path) -> RavenResult<Manifest> {
    if !root.is_dir() {
        return Err(RavenError::io(
            root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        ));
    }

    let paths: Vec<PathBuf> = walk_files(root).collect();
    let mut entries = paths
        .par_iter()
        .map(|p| scan_file(root, p))
        .collect::<RavenResult<Vec<_>>>()?;

    entries.sort_by(|a, b| a.relpath.cmp_key().cmp(&b.relpath.cmp_key()));
    let root_hash = root_hash_of(&entries);
    Ok(Manifest { entries, root_hash })
}

/// Root hash over the sorted `relpath ‖ 0x00 ‖ content_hash` sequence.
pub fn root_hash_of(sorted_entries: &[ScanEntry]) -> ContentHash {
    let mut hasher = Sha256::new();
    for entry in sorted_entries {
        hasher.update(entry.relpath.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(entry.hash.as_bytes());
    }
    ContentHash::from_digest(hasher.finalize().into())
}
