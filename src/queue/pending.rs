//! Pending-refresh log: how out-of-daemon writers hand work to the daemon.
//!
//! Append-only UTF-8 text, one record per line, pipe-delimited:
//!
//! ```text
//! WRITE|mod_name|relpath
//! DELETE|mod_name|relpath
//! ```
//!
//! Appends are multi-writer, guarded by an OS file lock. Read-and-truncate
//! is writer-only and atomic relative to appenders under the same lock.

use crate::error::{RavenError, RavenResult};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RefreshOp {
    Write,
    Delete,
}

impl RefreshOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Write => "WRITE",
            Self::Delete => "DELETE",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "WRITE" => Some(Self::Write),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// One pending-refresh record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshEntry {
    pub op: RefreshOp,
    pub mod_name: String,
    pub relpath: String,
}

pub struct PendingRefreshLog {
    path: PathBuf,
}

impl PendingRefreshLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Append one record under an exclusive file lock. Safe from any
    /// process.
    pub fn append(&self, op: RefreshOp, mod_name: &str, relpath: &str) -> RavenResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RavenError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RavenError::io(&self.path, e))?;
        file.lock().map_err(|e| RavenError::io(&self.path, e))?;
        let result = writeln!(file, "{}|{}|{}", op.as_str(), mod_name, relpath)
            .and_then(|()| file.flush())
            .map_err(|e| RavenError::io(&self.path, e));
        let _ = file.unlock();
        result
    }

    /// Atomically read all records and truncate the log. Writer-only.
    pub fn drain(&self) -> RavenResult<Vec<RefreshEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| RavenError::io(&self.path, e))?;
        file.lock().map_err(|e| RavenError::io(&self.path, e))?;
        let mut content = String::new();
        let result = file
            .read_to_string(&mut content)
            .and_then(|_| file.set_len(0))
            .and_then(|()| file.seek(SeekFrom::Start(0)).map(|_| ()))
            .map_err(|e| RavenError::io(&self.path, e));
        let _ = file.unlock();
        result?;

        Ok(content
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    return None;
                }
                let mut parts = line.splitn(3, '|');
                let op = RefreshOp::parse(parts.next()?)?;
                let mod_name = parts.next()?.to_string();
                let relpath = parts.next()?.to_string();
                Some(RefreshEntry {
                    op,
                    mod_name,
                    relpath,
                })
            })
            .collect())
    }

    pub fn has_pending(&self) -> bool {
        std::fs::metadata(&self.path)
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }

    /// Count records without clearing.
    pub fn pending_count(&self) -> usize {
        std::fs::read_to_string(&self.path)
            .map(|s| s.lines().filter(|l| !l.trim().is_empty()).count())
            .unwrap_or(0)
    }
}
