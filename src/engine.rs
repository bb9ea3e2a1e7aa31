//! The engine: one value owning the content store, catalog, queue,
//! artifact cache, and search index.
//!
//! There is no process-wide state; entry points receive an [`Engine`] and
//! the daemon holds the only writer. Readers open their own engine over
//! the same store and see point-in-time snapshots.

use crate::artifacts::{ArtifactStore, AstArtifact, ExtractorRegistry, LocRow};
use crate::config::Settings;
use crate::error::{ErrorClass, RavenError, RavenResult};
use crate::parsing::localization::parse_localization;
use crate::parsing::script::{ParseOutcome, parse_source};
use crate::paths::VPath;
use crate::pool::{ParseInput, ParsePool, ParsedBlob, PoolError};
use crate::queue::{BuildQueue, Task, TaskStatus};
use crate::registry::playset::Playset;
use crate::registry::Registry;
use crate::resolve::{ConflictReport, PolicyMatrix, Resolver};
use crate::routing::{Envelope, RoutingTable};
use crate::scan;
use crate::search::ContentIndex;
use crate::store::ContentStore;
use crate::types::{Cvid, FileKind};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// What one ingest run did.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub cvid: u32,
    pub reused_version: bool,
    pub files_total: usize,
    pub files_changed: usize,
    pub tasks_enqueued: usize,
}

/// Where PARSE work runs: the persistent worker pool (the daemon's
/// mode), or in-process for embedded and test use.
#[derive(Clone, Copy)]
pub enum ParseBackend<'a> {
    Pool(&'a ParsePool),
    InProcess,
}

/// Outcome counters for one processing pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessStats {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct Engine {
    settings: Arc<Settings>,
    store: ContentStore,
    registry: Registry,
    queue: BuildQueue,
    artifacts: ArtifactStore,
    content_index: ContentIndex,
    routing: RoutingTable,
    policies: PolicyMatrix,
    extractors: ExtractorRegistry,
}

impl Engine {
    /// Open (creating on first use) every store under the data directory.
    pub fn open(settings: Arc<Settings>) -> RavenResult<Self> {
        std::fs::create_dir_all(&settings.data_dir)
            .map_err(|e| RavenError::io(&settings.data_dir, e))?;
        let store = ContentStore::open(&settings.store_dir(), settings.build.max_parse_bytes)?;
        let mut registry = Registry::open(&settings.catalog_path())?;
        let parser_version = registry.current_parser_version();
        let queue = BuildQueue::open(&settings.queue_path(), settings.build.batch_size)?;
        let artifacts = ArtifactStore::open(&settings.artifacts_dir(), parser_version)?;
        let content_index = ContentIndex::open(&settings.search_dir())?;
        let routing = RoutingTable::load_or_default(&settings.routing_path())?;
        Ok(Self {
            settings,
            store,
            registry,
            queue,
            artifacts,
            content_index,
            routing,
            policies: PolicyMatrix::default(),
            extractors: ExtractorRegistry::default(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn content_index(&self) -> &ContentIndex {
        &self.content_index
    }

    pub fn policies(&self) -> &PolicyMatrix {
        &self.policies
    }

    pub fn queue(&self) -> &BuildQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut BuildQueue {
        &mut self.queue
    }

    pub fn pending_refresh_log(&self) -> crate::queue::PendingRefreshLog {
        crate::queue::PendingRefreshLog::new(&self.settings.pending_refresh_path())
    }

    /// Ingest a vanilla game directory.
    pub fn ingest_vanilla(&mut self, root: &Path, version_string: &str) -> RavenResult<IngestReport> {
        let manifest = scan::scan_root(root)?;
        let (cvid, reused) =
            self.registry
                .upsert_vanilla(version_string, manifest.root_hash, root);
        self.ingest_manifest(cvid, reused, &manifest)
    }

    /// Ingest a mod directory.
    pub fn ingest_mod(
        &mut self,
        root: &Path,
        name: &str,
        workshop_id: Option<&str>,
    ) -> RavenResult<IngestReport> {
        let manifest = scan::scan_root(root)?;
        let (cvid, reused) = self
            .registry
            .upsert_mod(name, workshop_id, manifest.root_hash, root);
        self.ingest_manifest(cvid, reused, &manifest)
    }

    /// Bind a scanned manifest into the catalog and queue derived work.
    /// Re-ingesting identical bytes touches nothing: same cvid, no new
    /// blobs, no new tasks.
    fn ingest_manifest(
        &mut self,
        cvid: Cvid,
        reused_version: bool,
        manifest: &scan::Manifest,
    ) -> RavenResult<IngestReport> {
        let mut files_changed = 0;
        let mut tasks_enqueued = 0;
        for entry in &manifest.entries {
            let Some((kind, envelope)) = self.routing.route(&entry.relpath) else {
                continue;
            };
            let bytes = std::fs::read(&entry.abs_path)
                .map_err(|e| RavenError::io(&entry.abs_path, e))?;
            // Blob first, then the record that references it: a record
            // never points at a missing blob.
            let (hash, _is_new, meta) = self.store.put(&bytes)?;
            debug_assert_eq!(hash, entry.hash);
            let (file_id, changed) = self.registry.register_file(cvid, entry, kind, meta);
            if !changed {
                continue;
            }
            files_changed += 1;
            let fingerprint = crate::types::Fingerprint::new(entry.mtime_ms, entry.size, hash);
            if envelope != Envelope::INGEST || meta.is_text {
                self.queue.enqueue(file_id, envelope, fingerprint)?;
                tasks_enqueued += 1;
            }
        }
        self.commit_all()?;
        tracing::info!(
            cvid = cvid.value(),
            files = manifest.entries.len(),
            changed = files_changed,
            "ingest complete"
        );
        Ok(IngestReport {
            cvid: cvid.value(),
            reused_version,
            files_total: manifest.entries.len(),
            files_changed,
            tasks_enqueued,
        })
    }

    /// Claim and process queued tasks FIFO until the queue is empty or
    /// `limit` tasks have been handled.
    pub fn process_queue(
        &mut self,
        backend: ParseBackend<'_>,
        limit: Option<usize>,
    ) -> RavenResult<ProcessStats> {
        let mut stats = ProcessStats::default();
        let mut handled = 0;
        while limit.is_none_or(|l| handled < l) {
            let Some(task) = self.queue.claim_next()? else {
                break;
            };
            handled += 1;
            match self.run_task(backend, &task) {
                Ok(TaskOutcome::Completed) => {
                    self.queue.complete(task.build_id)?;
                    stats.completed += 1;
                }
                Ok(TaskOutcome::Skipped(reason)) => {
                    self.queue.skip(task.build_id, &reason)?;
                    stats.skipped += 1;
                }
                Err(err) => {
                    let class = err.class();
                    let after = self.queue.fail(task.build_id, class, &err.to_string())?;
                    if after == TaskStatus::Failed {
                        stats.failed += 1;
                        tracing::warn!(
                            build_id = task.build_id.0,
                            class = class.as_str(),
                            error = %err,
                            "task failed"
                        );
                    } else {
                        tracing::debug!(
                            build_id = task.build_id.0,
                            class = class.as_str(),
                            "task requeued for retry"
                        );
                    }
                }
            }
        }
        self.commit_all()?;
        Ok(stats)
    }

    /// Run one task's derived stages. INGEST already happened when the
    /// task was enqueued.
    fn run_task(&mut self, backend: ParseBackend<'_>, task: &Task) -> RavenResult<TaskOutcome> {
        let (relpath, cvid, content_hash, deleted) = {
            let file = self.registry.file(task.file_id)?;
            (
                file.relpath.clone(),
                file.cvid,
                file.content_hash,
                file.deleted,
            )
        };
        if deleted {
            return Ok(TaskOutcome::Skipped("file deleted".into()));
        }
        // Fingerprint identity governs re-entry: a stale task for
        // superseded content is skipped, a fresh task exists for the new
        // fingerprint.
        let current = self.registry.file(task.file_id)?.fingerprint;
        if !current.matches(&task.fingerprint) {
            return Ok(TaskOutcome::Skipped("fingerprint changed".into()));
        }

        let meta = self
            .registry
            .blob_meta(&content_hash)
            .copied()
            .ok_or_else(|| RavenError::Bug(format!("no blob metadata for {content_hash}")))?;

        if !meta.is_text {
            // Binary blob: stored and done; derived stages need text.
            return Ok(TaskOutcome::Completed);
        }
        if meta.oversized && task.envelope.intersects(Envelope::PARSE | Envelope::LOCALIZATION) {
            return Ok(TaskOutcome::Skipped("above parse size cap".into()));
        }

        let text = self
            .store
            .get_text(&content_hash)?
            .ok_or_else(|| RavenError::Encoding {
                path: relpath.as_str().into(),
            })?;

        // Text content is searchable regardless of further stages.
        self.content_index
            .index_file(cvid, task.file_id, relpath.as_str(), &text)?;

        if task.envelope.contains(Envelope::LOCALIZATION) {
            let loc = parse_localization(&text);
            let rows: Vec<LocRow> = loc
                .entries
                .iter()
                .map(|entry| LocRow {
                    content_hash,
                    language: loc.language.clone(),
                    key: entry.key.clone(),
                    version: entry.version,
                    raw_value: entry.raw_value.clone(),
                    plain_text: entry.plain_text(),
                    line: entry.line,
                    scripted_refs: entry.scripted_refs.clone(),
                    variable_refs: entry.variable_refs.clone(),
                    icon_refs: entry.icon_refs.clone(),
                })
                .collect();
            self.artifacts.replace_localization(content_hash, rows);
        }

        if task.envelope.contains(Envelope::PARSE) {
            let artifact = match self.artifacts.load_ast(&content_hash)? {
                Some(artifact) => artifact,
                None => {
                    let deadline = Duration::from_secs(self.settings.build.parse_timeout_secs);
                    let blob = match backend {
                        ParseBackend::Pool(pool) => pool
                            .parse_with_deadline(
                                ParseInput::Content {
                                    text: &text,
                                    filename: relpath.as_str(),
                                },
                                deadline,
                            )
                            .map_err(raven_from_pool)?,
                        ParseBackend::InProcess => {
                            let outcome = parse_source(&text, relpath.as_str());
                            ParsedBlob {
                                node_count: outcome.node_count(),
                                ast_json: serde_json::to_string(&outcome).map_err(|e| {
                                    RavenError::Bug(format!("outcome serialize: {e}"))
                                })?,
                            }
                        }
                    };
                    let outcome: ParseOutcome =
                        serde_json::from_str(&blob.ast_json).map_err(|e| {
                            RavenError::Bug(format!("worker returned malformed AST JSON: {e}"))
                        })?;
                    let artifact = AstArtifact {
                        content_hash,
                        parser_version_id: self.artifacts.parser_version_id(),
                        parse_ok: outcome.parse_ok,
                        node_count: blob.node_count,
                        root: outcome.root,
                        diagnostics: outcome.diagnostics,
                    };
                    self.artifacts.store_ast(&artifact)?;
                    artifact
                }
            };

            if !artifact.parse_ok {
                // Partial AST is cached; symbol and reference extraction
                // are skipped and the task records the parse failure.
                let first = artifact.diagnostics.first();
                return Err(RavenError::Parse {
                    relpath: relpath.as_str().to_string(),
                    line: first.map(|d| d.line).unwrap_or(0),
                    col: first.map(|d| d.col).unwrap_or(0),
                    message: first
                        .map(|d| d.message.clone())
                        .unwrap_or_else(|| "parse failed".into()),
                });
            }

            if task.envelope.contains(Envelope::SYMBOLS) {
                let rows = self
                    .extractors
                    .extract_symbols(&artifact.root, &relpath, task.file_id);
                self.artifacts.replace_symbols(task.file_id, rows);
            }
            if task.envelope.contains(Envelope::REFS) {
                let rows = self.extractors.extract_refs(&artifact.root, task.file_id);
                self.artifacts.replace_refs(task.file_id, rows);
            }
        }

        // LOOKUPS is routed but currently ingest-only.
        Ok(TaskOutcome::Completed)
    }

    /// Re-scan one file inside a mod's source directory (pending-refresh
    /// handling).
    pub fn refresh_file(&mut self, mod_name: &str, relpath: &str) -> RavenResult<bool> {
        let rel = VPath::new(relpath);
        let Some(cvid) = self.registry.latest_mod_cv_by_name(mod_name) else {
            return Ok(false);
        };
        let hint = self
            .registry
            .version(cvid)?
            .source_hint
            .clone()
            .ok_or_else(|| RavenError::Bug(format!("cv{} has no source hint", cvid.value())))?;
        let abs = hint.join(rel.as_str());
        if !abs.is_file() {
            return Ok(false);
        }
        let entry = scan::scan_file(&hint, &abs)?;
        let Some((kind, envelope)) = self.routing.route(&entry.relpath) else {
            return Ok(false);
        };
        let bytes = std::fs::read(&abs).map_err(|e| RavenError::io(&abs, e))?;
        let (hash, _, meta) = self.store.put(&bytes)?;
        let (file_id, changed) = self.registry.register_file(cvid, &entry, kind, meta);
        if changed {
            let fingerprint = crate::types::Fingerprint::new(entry.mtime_ms, entry.size, hash);
            self.queue.enqueue(file_id, envelope, fingerprint)?;
        }
        Ok(changed)
    }

    /// Mark one file deleted (pending-refresh DELETE).
    pub fn refresh_delete(&mut self, mod_name: &str, relpath: &str) -> RavenResult<bool> {
        let rel = VPath::new(relpath);
        let Some(cvid) = self.registry.latest_mod_cv_by_name(mod_name) else {
            return Ok(false);
        };
        match self.registry.mark_deleted(cvid, &rel) {
            Some(file_id) => {
                self.content_index.remove_file(file_id)?;
                self.artifacts.replace_symbols(file_id, Vec::new());
                self.artifacts.replace_refs(file_id, Vec::new());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Build a validated playset from raw cvid values.
    pub fn playset(&self, cvids: &[u32]) -> RavenResult<Playset> {
        let cvids = cvids
            .iter()
            .map(|&v| {
                Cvid::new(v).ok_or(RavenError::InvalidPlayset {
                    reason: "cvid 0 is reserved".into(),
                })
            })
            .collect::<RavenResult<Vec<_>>>()?;
        Playset::new(&self.registry, cvids)
    }

    pub fn resolver<'a>(&'a self, playset: &'a Playset) -> Resolver<'a> {
        Resolver::new(&self.registry, &self.artifacts, &self.policies, playset)
    }

    /// Generate the conflicts.v1 report for a playset.
    pub fn report(&self, playset: &Playset, with_symbols_hash: bool) -> ConflictReport {
        ConflictReport::generate(&self.resolver(playset), with_symbols_hash)
    }

    /// Flush every dirty store: catalog, queue, artifact tables, search
    /// index.
    pub fn commit_all(&mut self) -> RavenResult<()> {
        self.registry.save()?;
        self.queue.commit()?;
        self.artifacts.commit()?;
        self.content_index.commit()?;
        Ok(())
    }

    /// Drop derived state and the queue; blobs and the catalog survive.
    pub fn reset_derived(&mut self) -> RavenResult<()> {
        self.queue.clear()?;
        std::fs::remove_dir_all(self.settings.artifacts_dir())
            .or_else(ignore_missing)
            .map_err(|e| RavenError::io(self.settings.artifacts_dir(), e))?;
        std::fs::remove_dir_all(self.settings.search_dir())
            .or_else(ignore_missing)
            .map_err(|e| RavenError::io(self.settings.search_dir(), e))?;
        let parser_version = self.artifacts.parser_version_id();
        self.artifacts = ArtifactStore::open(&self.settings.artifacts_dir(), parser_version)?;
        self.content_index = ContentIndex::open(&self.settings.search_dir())?;
        Ok(())
    }

    /// Does any routed file of this kind still exist? Used by `status`.
    pub fn file_count(&self, kind: Option<FileKind>) -> usize {
        self.registry
            .catalog()
            .files
            .iter()
            .filter(|f| !f.deleted && kind.is_none_or(|k| f.kind == k))
            .count()
    }
}

enum TaskOutcome {
    Completed,
    Skipped(String),
}

fn raven_from_pool(err: PoolError) -> RavenError {
    err.into()
}

fn ignore_missing(err: std::io::Error) -> std::io::Result<()> {
    if err.kind() == std::io::ErrorKind::NotFound {
        Ok(())
    } else {
        Err(err)
    }
}
