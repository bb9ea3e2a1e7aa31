//! Single-writer guarantee via an OS-level exclusive file lock.
//!
//! The lock file sits in the store's daemon directory and carries JSON
//! `{pid, acquired_at, store_path}` describing the holder. Acquisition is
//! non-blocking: a second daemon observes the holder and refuses to start
//! with the reserved exit code.

use crate::error::{RavenError, RavenResult};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions, TryLockError};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Reserved exit code when another writer exists (EX_CONFIG).
pub const EXIT_WRITER_EXISTS: i32 = 78;

/// Lock-holder record written into the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterLockInfo {
    pub pid: u32,
    /// Unix seconds.
    pub acquired_at: i64,
    pub store_path: PathBuf,
}

/// Status surface for `status` and health checks.
#[derive(Debug, Clone, Serialize)]
pub struct WriterLockStatus {
    pub lock_exists: bool,
    pub holder_pid: Option<u32>,
    pub holder_alive: bool,
    pub acquired_at: Option<i64>,
    pub can_acquire: bool,
}

/// The writer lock. Holds the lock for its lifetime once acquired.
pub struct WriterLock {
    lock_path: PathBuf,
    store_path: PathBuf,
    file: Option<File>,
}

impl WriterLock {
    pub fn new(lock_path: &Path, store_path: &Path) -> Self {
        Self {
            lock_path: lock_path.to_path_buf(),
            store_path: store_path.to_path_buf(),
            file: None,
        }
    }

    /// Attempt a non-blocking exclusive acquisition. Returns false when
    /// another process holds the lock.
    pub fn acquire(&mut self) -> RavenResult<bool> {
        if self.file.is_some() {
            return Ok(true);
        }
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RavenError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| RavenError::io(&self.lock_path, e))?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Ok(false),
            Err(TryLockError::Error(e)) => return Err(RavenError::io(&self.lock_path, e)),
        }

        let info = WriterLockInfo {
            pid: std::process::id(),
            acquired_at: chrono::Utc::now().timestamp(),
            store_path: self.store_path.clone(),
        };
        let body = serde_json::to_string(&info)
            .map_err(|e| RavenError::General(format!("lock info serialize: {e}")))?;
        file.set_len(0).map_err(|e| RavenError::io(&self.lock_path, e))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| RavenError::io(&self.lock_path, e))?;
        file.write_all(body.as_bytes())
            .map_err(|e| RavenError::io(&self.lock_path, e))?;
        file.flush().map_err(|e| RavenError::io(&self.lock_path, e))?;

        self.file = Some(file);
        Ok(true)
    }

    /// Acquire or return the structured writer-lock error.
    pub fn acquire_or_fail(&mut self) -> RavenResult<()> {
        if self.acquire()? {
            return Ok(());
        }
        let info = self.holder_info();
        Err(RavenError::WriterLock {
            holder_pid: info.as_ref().map(|i| i.pid).unwrap_or(0),
            acquired_at: info.as_ref().map(|i| i.acquired_at).unwrap_or(0),
        })
    }

    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.file.is_some()
    }

    /// Read the holder record without touching the lock.
    pub fn holder_info(&self) -> Option<WriterLockInfo> {
        let text = std::fs::read_to_string(&self.lock_path).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Liveness probe: does the holder pid still exist? Heuristic; the
    /// pid may have been recycled by an unrelated process.
    pub fn is_holder_alive(&self) -> bool {
        let Some(info) = self.holder_info() else {
            return false;
        };
        pid_exists(info.pid)
    }

    pub fn status(&self) -> WriterLockStatus {
        match self.holder_info() {
            None => WriterLockStatus {
                lock_exists: false,
                holder_pid: None,
                holder_alive: false,
                acquired_at: None,
                can_acquire: true,
            },
            Some(info) => {
                let holder_alive = pid_exists(info.pid);
                WriterLockStatus {
                    lock_exists: true,
                    holder_pid: Some(info.pid),
                    holder_alive,
                    acquired_at: Some(info.acquired_at),
                    can_acquire: !holder_alive,
                }
            }
        }
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn pid_exists(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).is_some()
}
