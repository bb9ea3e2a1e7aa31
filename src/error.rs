//! Error types for the indexing engine.
//!
//! Structured errors via thiserror. Each variant of [`RavenError`] maps to
//! one kind in the engine's error taxonomy; [`ErrorClass`] is the compact
//! form recorded on failed queue tasks.

use crate::types::{FileId, ParserVersionId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for engine operations.
#[derive(Error, Debug)]
pub enum RavenError {
    /// File system errors: missing file, permissions, disk full.
    #[error("io error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Text file could not be decoded. The blob is still stored as binary;
    /// derived stages that need text are skipped.
    #[error("cannot decode '{path}' as text")]
    Encoding { path: PathBuf },

    /// Parser produced a partial AST with diagnostics.
    #[error("parse error in '{relpath}' at {line}:{col}: {message}")]
    Parse {
        relpath: String,
        line: u32,
        col: u32,
        message: String,
    },

    /// A parse exceeded its deadline. The worker was killed and respawned.
    #[error("parse exceeded deadline of {deadline_ms} ms")]
    Timeout { deadline_ms: u64 },

    /// A parse worker exited or its pipe broke mid-request.
    #[error("parse worker (pid {pid}) crashed: {reason}")]
    WorkerCrash { pid: u32, reason: String },

    /// Another daemon holds the store's writer lock.
    #[error("another writer holds the store lock (pid {holder_pid}, acquired at {acquired_at})")]
    WriterLock { holder_pid: u32, acquired_at: i64 },

    /// A derived row from a stale parser version was found where the
    /// current one was required.
    #[error("derived artifact from stale parser version {found} (current {current})")]
    SchemaMismatch {
        found: ParserVersionId,
        current: ParserVersionId,
    },

    /// Invariant violation. The task is failed with a diagnostic record;
    /// the daemon keeps running.
    #[error("invariant violation: {0}")]
    Bug(String),

    #[error("file record {id} not found in the catalog")]
    FileNotFound { id: FileId },

    #[error("content version {0} not found in the catalog")]
    VersionNotFound(u32),

    #[error("blob {hash} missing from the content store")]
    BlobMissing { hash: String },

    #[error("invalid playset: {reason}")]
    InvalidPlayset { reason: String },

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("search index failure during {operation}: {cause}")]
    Search { operation: String, cause: String },

    #[error("{0}")]
    General(String),
}

impl RavenError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Compact failure class for queue task records.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Io { .. } | Self::FileNotFound { .. } | Self::BlobMissing { .. } => {
                ErrorClass::Io
            }
            Self::Encoding { .. } => ErrorClass::Encoding,
            Self::Parse { .. } => ErrorClass::ParseError,
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::WorkerCrash { .. } => ErrorClass::WorkerCrash,
            Self::WriterLock { .. } => ErrorClass::WriterLock,
            Self::SchemaMismatch { .. } => ErrorClass::SchemaMismatch,
            _ => ErrorClass::Bug,
        }
    }
}

/// Failure classes recorded on queue tasks. Only `timeout` and
/// `worker_crash` are retried, each at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Io,
    Encoding,
    ParseError,
    Timeout,
    WorkerCrash,
    WriterLock,
    SchemaMismatch,
    Bug,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::WorkerCrash)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Io => "io",
            Self::Encoding => "encoding",
            Self::ParseError => "parse_error",
            Self::Timeout => "timeout",
            Self::WorkerCrash => "worker_crash",
            Self::WriterLock => "writer_lock",
            Self::SchemaMismatch => "schema_mismatch",
            Self::Bug => "bug",
        }
    }
}

/// Errors specific to the parse worker pool.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("failed to spawn parse worker: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },

    #[error("worker stdin closed while dispatching request {request_id}")]
    StdinClosed { request_id: u64 },

    #[error("request {request_id} timed out after {deadline_ms} ms")]
    Deadline { request_id: u64, deadline_ms: u64 },

    #[error("worker (pid {pid}) exited unexpectedly")]
    WorkerExited { pid: u32 },

    #[error("malformed worker response: {0}")]
    Protocol(String),
}

impl From<PoolError> for RavenError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Deadline { deadline_ms, .. } => RavenError::Timeout { deadline_ms },
            PoolError::WorkerExited { pid } => RavenError::WorkerCrash {
                pid,
                reason: "worker exited".into(),
            },
            PoolError::StdinClosed { request_id } => RavenError::WorkerCrash {
                pid: 0,
                reason: format!("stdin closed dispatching request {request_id}"),
            },
            other => RavenError::General(other.to_string()),
        }
    }
}

/// Result alias for engine operations.
pub type RavenResult<T> = Result<T, RavenError>;

/// Result alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_class_mapping() {
        let err = RavenError::Timeout { deadline_ms: 30_000 };
        assert_eq!(err.class(), ErrorClass::Timeout);
        assert!(err.class().is_retryable());

        let err = RavenError::Parse {
            relpath: "common/traits/00.txt".into(),
            line: 3,
            col: 7,
            message: "unexpected '}'".into(),
        };
        assert_eq!(err.class(), ErrorClass::ParseError);
        assert!(!err.class().is_retryable());
    }

    #[test]
    fn class_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorClass::WorkerCrash).unwrap();
        assert_eq!(json, "\"worker_crash\"");
        assert_eq!(ErrorClass::ParseError.as_str(), "parse_error");
    }
}
