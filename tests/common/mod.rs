//! Shared fixtures for integration tests: temp stores, content roots,
//! and a one-call ingest-and-build helper.

use modraven::engine::ParseBackend;
use modraven::{Engine, Settings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestStore {
    pub _dir: TempDir,
    pub settings: Arc<Settings>,
}

impl TestStore {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.data_dir = dir.path().join("store");
        Self {
            _dir: dir,
            settings: Arc::new(settings),
        }
    }

    pub fn engine(&self) -> Engine {
        Engine::open(Arc::clone(&self.settings)).unwrap()
    }
}

/// Write one file under a content root, creating parents.
pub fn write_file(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// A content root directory under its own tempdir.
pub struct ContentRoot {
    pub dir: TempDir,
}

impl ContentRoot {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn with(self, rel: &str, contents: &str) -> Self {
        write_file(self.dir.path(), rel, contents);
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Ingest a vanilla root and run the queue to completion in-process.
pub fn ingest_vanilla(engine: &mut Engine, root: &Path, version: &str) -> u32 {
    let report = engine.ingest_vanilla(root, version).unwrap();
    engine.process_queue(ParseBackend::InProcess, None).unwrap();
    report.cvid
}

/// Ingest a mod root and run the queue to completion in-process.
pub fn ingest_mod(engine: &mut Engine, root: &Path, name: &str) -> u32 {
    let report = engine.ingest_mod(root, name, None).unwrap();
    engine.process_queue(ParseBackend::InProcess, None).unwrap();
    report.cvid
}

/// Count blob files in the content store directory.
pub fn blob_count(settings: &Settings) -> usize {
    fn walk(dir: &PathBuf, count: &mut usize) {
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, count);
                } else {
                    *count += 1;
                }
            }
        }
    }
    let mut count = 0;
    walk(&settings.store_dir().join("blobs"), &mut count);
    count
}
