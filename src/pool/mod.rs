//! Parse worker pool: one supervisor, N persistent child processes.
//!
//! Requests are dispatched round-robin and correlated by request id; one
//! reader thread per worker routes responses back. A request that misses
//! its deadline gets its worker killed and respawned; the pool never
//! blocks on a single slow file.

pub mod worker;

pub use worker::{WorkerInbound, WorkerOutbound, WorkerRequest, run_worker};

pub use crate::error::{PoolError, PoolResult};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// A successful parse as it crosses the pool boundary.
#[derive(Debug, Clone)]
pub struct ParsedBlob {
    /// Serialized [`crate::parsing::script::ParseOutcome`].
    pub ast_json: String,
    pub node_count: u64,
}

/// Parse input: a file on disk or inline content.
pub enum ParseInput<'a> {
    Path(&'a Path),
    Content { text: &'a str, filename: &'a str },
}

/// How worker processes are launched.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Launch the current executable's hidden `parse-worker` subcommand.
    pub fn current_exe(max_parses: u32) -> std::io::Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            args: vec![
                "parse-worker".to_string(),
                "--max-parses".to_string(),
                max_parses.to_string(),
            ],
        })
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub size: usize,
    pub default_deadline: Duration,
    pub command: WorkerCommand,
}

type ReplySender = Sender<PoolResult<ParsedBlob>>;

struct PendingEntry {
    worker: usize,
    tx: ReplySender,
}

struct SlotState {
    child: Child,
    stdin: ChildStdin,
    pid: u32,
}

struct Slot {
    state: Mutex<Option<SlotState>>,
    alive: Arc<AtomicBool>,
}

/// The supervisor. Owns the worker processes for its lifetime.
pub struct ParsePool {
    config: PoolConfig,
    slots: Vec<Slot>,
    cursor: AtomicUsize,
    next_id: AtomicU64,
    pending: Arc<DashMap<u64, PendingEntry>>,
}

impl ParsePool {
    /// Spawn the pool. Every worker must signal ready before this returns.
    pub fn spawn(config: PoolConfig) -> PoolResult<Self> {
        let pending: Arc<DashMap<u64, PendingEntry>> = Arc::new(DashMap::new());
        let mut slots = Vec::with_capacity(config.size);
        for index in 0..config.size {
            let alive = Arc::new(AtomicBool::new(false));
            let state = spawn_worker(&config.command, index, &alive, &pending)?;
            slots.push(Slot {
                state: Mutex::new(Some(state)),
                alive,
            });
        }
        Ok(Self {
            config,
            slots,
            cursor: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            pending,
        })
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Parse with the pool's default deadline.
    pub fn parse(&self, input: ParseInput<'_>) -> PoolResult<ParsedBlob> {
        self.parse_with_deadline(input, self.config.default_deadline)
    }

    /// Dispatch one parse and wait for its reply or deadline.
    pub fn parse_with_deadline(
        &self,
        input: ParseInput<'_>,
        deadline: Duration,
    ) -> PoolResult<ParsedBlob> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let slot = &self.slots[index];

        let request = match input {
            ParseInput::Path(path) => WorkerRequest {
                id,
                path: Some(path.to_path_buf()),
                content: None,
                filename: None,
                timeout_ms: Some(deadline.as_millis() as u64),
            },
            ParseInput::Content { text, filename } => WorkerRequest {
                id,
                path: None,
                content: Some(text.to_string()),
                filename: Some(filename.to_string()),
                timeout_ms: Some(deadline.as_millis() as u64),
            },
        };
        let line = serde_json::to_string(&request)
            .map_err(|e| PoolError::Protocol(format!("request serialize: {e}")))?;

        // One in-flight request per worker: the slot lock is held for the
        // whole round trip, which also lets a deadline kill the right child.
        let mut guard = slot.state.lock();
        if guard.is_none() || !slot.alive.load(Ordering::Acquire) {
            *guard = Some(spawn_worker(
                &self.config.command,
                index,
                &slot.alive,
                &self.pending,
            )?);
        }
        let state = guard.as_mut().expect("slot was just respawned");

        let (tx, rx): (ReplySender, Receiver<PoolResult<ParsedBlob>>) = bounded(1);
        self.pending.insert(id, PendingEntry { worker: index, tx });

        let pid = state.pid;
        if writeln!(state.stdin, "{line}")
            .and_then(|()| state.stdin.flush())
            .is_err()
        {
            self.pending.remove(&id);
            slot.alive.store(false, Ordering::Release);
            if let Some(mut state) = guard.take() {
                let _ = state.child.kill();
            }
            return Err(PoolError::StdinClosed { request_id: id });
        }

        match rx.recv_timeout(deadline) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                // Deadline miss: kill the worker hard; it respawns on the
                // next dispatch to this slot.
                self.pending.remove(&id);
                if let Some(mut state) = guard.take() {
                    let _ = state.child.kill();
                    let _ = state.child.wait();
                }
                slot.alive.store(false, Ordering::Release);
                Err(PoolError::Deadline {
                    request_id: id,
                    deadline_ms: deadline.as_millis() as u64,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.pending.remove(&id);
                slot.alive.store(false, Ordering::Release);
                Err(PoolError::WorkerExited { pid })
            }
        }
    }

    /// Ask every worker to shut down cleanly; kill whatever remains.
    pub fn shutdown(&self) {
        for slot in &self.slots {
            let mut guard = slot.state.lock();
            if let Some(state) = guard.take() {
                let SlotState {
                    mut child,
                    mut stdin,
                    ..
                } = state;
                let _ = writeln!(stdin, "{}", r#"{"command":"shutdown"}"#);
                let _ = stdin.flush();
                // Closing stdin ends the worker loop even if the command
                // was never read.
                drop(stdin);
                let mut exited = false;
                for _ in 0..20 {
                    if matches!(child.try_wait(), Ok(Some(_))) {
                        exited = true;
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                if !exited {
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
            slot.alive.store(false, Ordering::Release);
        }
    }
}

impl Drop for ParsePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn one worker, wait for its ready line, and start its reader thread.
fn spawn_worker(
    command: &WorkerCommand,
    index: usize,
    alive: &Arc<AtomicBool>,
    pending: &Arc<DashMap<u64, PendingEntry>>,
) -> PoolResult<SlotState> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    // Keep terminal interrupts away from the workers; the supervisor owns
    // their lifecycle.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().map_err(|source| PoolError::Spawn { source })?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| PoolError::Protocol("worker stdin not piped".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PoolError::Protocol("worker stdout not piped".into()))?;
    let pid = child.id();

    let mut reader = BufReader::new(stdout);
    let mut first_line = String::new();
    reader
        .read_line(&mut first_line)
        .map_err(|e| PoolError::Protocol(format!("worker {pid} produced no ready line: {e}")))?;
    match serde_json::from_str::<WorkerOutbound>(first_line.trim()) {
        Ok(WorkerOutbound::Ready { ready: true, .. }) => {}
        other => {
            let _ = child.kill();
            return Err(PoolError::Protocol(format!(
                "worker {pid} did not signal ready: {other:?}"
            )));
        }
    }

    alive.store(true, Ordering::Release);
    spawn_reader_thread(index, pid, reader, Arc::clone(alive), Arc::clone(pending));

    Ok(SlotState { child, stdin, pid })
}

fn spawn_reader_thread(
    index: usize,
    pid: u32,
    reader: BufReader<ChildStdout>,
    alive: Arc<AtomicBool>,
    pending: Arc<DashMap<u64, PendingEntry>>,
) {
    std::thread::Builder::new()
        .name(format!("parse-worker-reader-{index}"))
        .spawn(move || {
            for line in reader.lines() {
                let Ok(line) = line else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<WorkerOutbound>(line) {
                    Ok(WorkerOutbound::Ok {
                        id,
                        ast_json,
                        node_count,
                        ..
                    }) => {
                        if let Some((_, entry)) = pending.remove(&id) {
                            let _ = entry.tx.send(Ok(ParsedBlob {
                                ast_json,
                                node_count,
                            }));
                        }
                    }
                    Ok(WorkerOutbound::Err {
                        id,
                        error_type,
                        error,
                        ..
                    }) => {
                        if let Some((_, entry)) = pending.remove(&id) {
                            let _ = entry
                                .tx
                                .send(Err(PoolError::Protocol(format!("{error_type}: {error}"))));
                        }
                    }
                    Ok(WorkerOutbound::Recycle { parses, .. }) => {
                        tracing::debug!(pid, parses, "worker recycling");
                        alive.store(false, Ordering::Release);
                    }
                    Ok(WorkerOutbound::Ready { .. }) => {}
                    Err(e) => {
                        tracing::warn!(pid, error = %e, "unparseable worker line");
                    }
                }
            }
            // EOF: the worker is gone. Fail whatever was still in flight
            // on this slot.
            alive.store(false, Ordering::Release);
            let stale: Vec<u64> = pending
                .iter()
                .filter(|entry| entry.value().worker == index)
                .map(|entry| *entry.key())
                .collect();
            for id in stale {
                if let Some((_, entry)) = pending.remove(&id) {
                    let _ = entry.tx.send(Err(PoolError::WorkerExited { pid }));
                }
            }
        })
        .expect("reader thread spawn");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_command_targets_current_exe() {
        let cmd = WorkerCommand::current_exe(5000).unwrap();
        assert_eq!(cmd.args[0], "parse-worker");
        assert!(cmd.args.contains(&"5000".to_string()));
    }

    #[test]
    fn request_lines_round_trip() {
        let request = WorkerRequest {
            id: 42,
            path: None,
            content: Some("a = 1".into()),
            filename: Some("x.txt".into()),
            timeout_ms: Some(30_000),
        };
        let line = serde_json::to_string(&request).unwrap();
        // The wire form omits absent fields entirely.
        assert!(!line.contains("path"));
        let back: WorkerInbound = serde_json::from_str(&line).unwrap();
        assert!(matches!(back, WorkerInbound::Request(r) if r.id == 42));
    }

    #[test]
    fn shutdown_line_is_a_command() {
        let back: WorkerInbound = serde_json::from_str(r#"{"command":"shutdown"}"#).unwrap();
        assert!(matches!(back, WorkerInbound::Command { command } if command == "shutdown"));
    }
}
