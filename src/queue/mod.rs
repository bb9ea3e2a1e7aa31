//! Durable FIFO build queue.
//!
//! Tasks bind a `file_id` only; relpath and cvid are derived from the
//! catalog, never duplicated here. Each task carries the fingerprint
//! captured at enqueue, its envelope, and a status. The claim protocol is
//! "earliest pending build_id wins", so FIFO follows from the monotonic id
//! under the single writer.

pub mod daemon;
pub mod pending;
pub mod writer_lock;

pub use daemon::{Daemon, DaemonPhaseReport};
pub use pending::{PendingRefreshLog, RefreshEntry, RefreshOp};
pub use writer_lock::{EXIT_WRITER_EXISTS, WriterLock, WriterLockInfo, WriterLockStatus};

use crate::error::{ErrorClass, RavenError, RavenResult};
use crate::routing::Envelope;
use crate::types::{BuildId, FileId, Fingerprint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// At-most-one retry after a retryable failure.
pub const MAX_RETRIES: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

/// One queued processing task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub build_id: BuildId,
    pub file_id: FileId,
    pub envelope: Envelope,
    /// Captured at enqueue; compared against the catalog before work.
    pub fingerprint: Fingerprint,
    pub status: TaskStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unix seconds of the last claim; the lease for crash reclamation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<i64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueDoc {
    next_build_id: u64,
    tasks: Vec<Task>,
}

/// Per-status counts for the status surface.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// The queue. Mutations accumulate in memory; `commit` snapshots to disk,
/// and mutations auto-commit every `batch_size` changes to amortize
/// durability.
pub struct BuildQueue {
    path: PathBuf,
    next_build_id: u64,
    tasks: BTreeMap<BuildId, Task>,
    dirty: usize,
    batch_size: usize,
}

impl BuildQueue {
    pub fn open(path: &Path, batch_size: usize) -> RavenResult<Self> {
        let doc = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|e| RavenError::io(path, e))?;
            serde_json::from_str::<QueueDoc>(&text).map_err(|e| {
                RavenError::General(format!("queue '{}' is unreadable: {e}", path.display()))
            })?
        } else {
            QueueDoc::default()
        };
        let mut tasks = BTreeMap::new();
        for task in doc.tasks {
            tasks.insert(task.build_id, task);
        }
        Ok(Self {
            path: path.to_path_buf(),
            next_build_id: doc.next_build_id,
            tasks,
            dirty: 0,
            batch_size: batch_size.max(1),
        })
    }

    /// Enqueue a task. Returns its monotonically increasing build id.
    pub fn enqueue(
        &mut self,
        file_id: FileId,
        envelope: Envelope,
        fingerprint: Fingerprint,
    ) -> RavenResult<BuildId> {
        self.next_build_id += 1;
        let build_id = BuildId(self.next_build_id);
        self.tasks.insert(
            build_id,
            Task {
                build_id,
                file_id,
                envelope,
                fingerprint,
                status: TaskStatus::Pending,
                attempts: 0,
                error_class: None,
                error: None,
                claimed_at: None,
            },
        );
        self.touch()?;
        Ok(build_id)
    }

    /// Claim the earliest pending task: pending → in_progress with a
    /// lease timestamp.
    pub fn claim_next(&mut self) -> RavenResult<Option<Task>> {
        let next = self
            .tasks
            .values()
            .find(|t| t.status == TaskStatus::Pending)
            .map(|t| t.build_id);
        let Some(build_id) = next else {
            return Ok(None);
        };
        let task = self.tasks.get_mut(&build_id).expect("id just found");
        task.status = TaskStatus::InProgress;
        task.claimed_at = Some(chrono::Utc::now().timestamp());
        let snapshot = task.clone();
        self.touch()?;
        Ok(Some(snapshot))
    }

    pub fn complete(&mut self, build_id: BuildId) -> RavenResult<()> {
        self.transition(build_id, TaskStatus::Completed, None, None)
    }

    pub fn skip(&mut self, build_id: BuildId, reason: &str) -> RavenResult<()> {
        self.transition(build_id, TaskStatus::Skipped, None, Some(reason.to_string()))
    }

    /// Fail a task. Retryable classes are requeued until the retry bound;
    /// everything else is terminal.
    pub fn fail(
        &mut self,
        build_id: BuildId,
        class: ErrorClass,
        message: &str,
    ) -> RavenResult<TaskStatus> {
        let task = self
            .tasks
            .get_mut(&build_id)
            .ok_or_else(|| RavenError::Bug(format!("unknown build id {build_id}")))?;
        if class.is_retryable() && task.attempts < MAX_RETRIES {
            task.attempts += 1;
            task.status = TaskStatus::Pending;
            task.error_class = Some(class);
            task.error = Some(message.to_string());
            task.claimed_at = None;
            self.touch()?;
            Ok(TaskStatus::Pending)
        } else {
            task.status = TaskStatus::Failed;
            task.error_class = Some(class);
            task.error = Some(message.to_string());
            self.touch()?;
            Ok(TaskStatus::Failed)
        }
    }

    fn transition(
        &mut self,
        build_id: BuildId,
        status: TaskStatus,
        class: Option<ErrorClass>,
        message: Option<String>,
    ) -> RavenResult<()> {
        let task = self
            .tasks
            .get_mut(&build_id)
            .ok_or_else(|| RavenError::Bug(format!("unknown build id {build_id}")))?;
        task.status = status;
        task.error_class = class;
        task.error = message;
        self.touch()
    }

    /// Reclaim in-progress tasks whose lease is older than the timeout.
    /// Used after daemon restart.
    pub fn reclaim_stale(&mut self, lease_timeout_secs: u64) -> RavenResult<usize> {
        let now = chrono::Utc::now().timestamp();
        let mut reclaimed = 0;
        for task in self.tasks.values_mut() {
            if task.status == TaskStatus::InProgress {
                let stale = task
                    .claimed_at
                    .is_none_or(|t| now - t >= lease_timeout_secs as i64);
                if stale {
                    task.status = TaskStatus::Pending;
                    task.claimed_at = None;
                    reclaimed += 1;
                }
            }
        }
        if reclaimed > 0 {
            self.touch()?;
        }
        Ok(reclaimed)
    }

    pub fn task(&self, build_id: BuildId) -> Option<&Task> {
        self.tasks.get(&build_id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    /// Drop completed/skipped history. Used by `reset`.
    pub fn clear(&mut self) -> RavenResult<()> {
        self.tasks.clear();
        self.commit()
    }

    fn touch(&mut self) -> RavenResult<()> {
        self.dirty += 1;
        if self.dirty >= self.batch_size {
            self.commit()?;
        }
        Ok(())
    }

    /// Atomically snapshot the queue to disk.
    pub fn commit(&mut self) -> RavenResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RavenError::io(parent, e))?;
        }
        let doc = QueueDoc {
            next_build_id: self.next_build_id,
            tasks: self.tasks.values().cloned().collect(),
        };
        let text = serde_json::to_string(&doc)
            .map_err(|e| RavenError::General(format!("queue serialize: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(|e| RavenError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| RavenError::io(&self.path, e))?;
        self.dirty = 0;
        Ok(())
    }
}
