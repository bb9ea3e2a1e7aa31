//! The build daemon: single writer, phase loop, graceful shutdown.
//!
//! One daemon per store, enforced by the writer lock. Each cycle drains
//! the pending-refresh log, processes a FIFO batch of queued tasks,
//! commits, and checks the stop sentinel. CPU-heavy parsing runs
//! out-of-process in the parse pool.

use super::pending::{PendingRefreshLog, RefreshOp};
use super::writer_lock::WriterLock;
use crate::config::Settings;
use crate::engine::{Engine, ParseBackend, ProcessStats};
use crate::error::RavenResult;
use crate::pool::{ParsePool, PoolConfig, WorkerCommand};
use crate::queue::TaskStatus;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// What one daemon cycle did; surfaced in logs and tests.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct DaemonPhaseReport {
    pub refreshed: usize,
    pub deleted: usize,
    pub processed: ProcessStats,
}

pub struct Daemon {
    engine: Engine,
    pool: ParsePool,
    lock: WriterLock,
    pending: PendingRefreshLog,
    stop_path: PathBuf,
    batch: usize,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon").finish_non_exhaustive()
    }
}

impl Daemon {
    /// Acquire the writer lock and bring up the worker pool. Fails with
    /// the writer-lock error when another daemon owns the store.
    pub fn start(settings: Arc<Settings>) -> RavenResult<Self> {
        let mut lock = WriterLock::new(&settings.writer_lock_path(), &settings.data_dir);
        lock.acquire_or_fail()?;

        let mut engine = Engine::open(Arc::clone(&settings))?;
        let reclaimed = engine
            .queue_mut()
            .reclaim_stale(settings.build.lease_timeout_secs)?;
        if reclaimed > 0 {
            tracing::info!(reclaimed, "reclaimed in-progress tasks from a previous run");
        }

        let command = WorkerCommand::current_exe(settings.build.max_parses_per_worker)
            .map_err(|e| crate::error::RavenError::General(format!("worker command: {e}")))?;
        let pool = ParsePool::spawn(PoolConfig {
            size: settings.build.pool_size,
            default_deadline: Duration::from_secs(settings.build.parse_timeout_secs),
            command,
        })
        .map_err(crate::error::RavenError::from)?;

        let pending = PendingRefreshLog::new(&settings.pending_refresh_path());
        let stop_path = settings.stop_sentinel_path();
        // A stale sentinel from a previous stop must not kill this run.
        let _ = std::fs::remove_file(&stop_path);
        let batch = settings.build.batch_size;

        Ok(Self {
            engine,
            pool,
            lock,
            pending,
            stop_path,
            batch,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// One phase cycle: pending-refresh drain, then a FIFO batch.
    pub fn run_cycle(&mut self) -> RavenResult<DaemonPhaseReport> {
        let mut report = DaemonPhaseReport::default();

        for entry in self.pending.drain()? {
            let applied = match entry.op {
                RefreshOp::Write => self.engine.refresh_file(&entry.mod_name, &entry.relpath)?,
                RefreshOp::Delete => self.engine.refresh_delete(&entry.mod_name, &entry.relpath)?,
            };
            if applied {
                match entry.op {
                    RefreshOp::Write => report.refreshed += 1,
                    RefreshOp::Delete => report.deleted += 1,
                }
            }
        }

        report.processed = self
            .engine
            .process_queue(ParseBackend::Pool(&self.pool), Some(self.batch))?;
        Ok(report)
    }

    /// Run until the stop sentinel appears, sleeping while idle.
    pub fn run(&mut self) -> RavenResult<()> {
        tracing::info!(pid = std::process::id(), "daemon running");
        loop {
            if self.stop_requested() {
                tracing::info!("stop requested; draining");
                break;
            }
            let report = self.run_cycle()?;
            let idle = report.refreshed == 0
                && report.deleted == 0
                && report.processed == ProcessStats::default();
            if idle {
                std::thread::sleep(Duration::from_millis(500));
            }
        }
        self.shutdown()
    }

    /// Process everything already queued, then return. Used by one-shot
    /// CLI ingest and tests.
    pub fn run_until_idle(&mut self) -> RavenResult<DaemonPhaseReport> {
        let mut total = DaemonPhaseReport::default();
        loop {
            let report = self.run_cycle()?;
            total.refreshed += report.refreshed;
            total.deleted += report.deleted;
            total.processed.completed += report.processed.completed;
            total.processed.failed += report.processed.failed;
            total.processed.skipped += report.processed.skipped;
            let pending_left = self
                .engine
                .queue()
                .tasks()
                .any(|t| t.status == TaskStatus::Pending);
            if !pending_left && !self.pending.has_pending() {
                break;
            }
        }
        Ok(total)
    }

    fn stop_requested(&self) -> bool {
        self.stop_path.exists()
    }

    /// Graceful shutdown: drain commits, stop workers, release the lock.
    pub fn shutdown(&mut self) -> RavenResult<()> {
        self.engine.commit_all()?;
        self.pool.shutdown();
        let _ = std::fs::remove_file(&self.stop_path);
        self.lock.release();
        tracing::info!("daemon stopped");
        Ok(())
    }

    pub fn pool(&self) -> &ParsePool {
        &self.pool
    }
}

/// Ask a running daemon to stop by dropping the sentinel it polls.
pub fn request_stop(settings: &Settings) -> RavenResult<()> {
    let path = settings.stop_sentinel_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| crate::error::RavenError::io(parent, e))?;
    }
    std::fs::write(&path, b"stop\n").map_err(|e| crate::error::RavenError::io(&path, e))
}
