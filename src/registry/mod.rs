//! Version registry: vanilla versions, mod packages, content versions,
//! file records, blob metadata, parser versions.
//!
//! Everything lives in one catalog document, snapshot-persisted as JSON by
//! the single writer. Readers load a point-in-time copy and never contend
//! with the writer.

pub mod playset;

use crate::error::{RavenError, RavenResult};
use crate::parsing::{self, ParserVersionRec};
use crate::paths::VPath;
use crate::scan::ScanEntry;
use crate::store::BlobMeta;
use crate::types::{ContentHash, Cvid, FileId, FileKind, Fingerprint, ParserVersionId, VersionKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A named snapshot of the base game. Unique by root hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VanillaVersion {
    pub id: u32,
    pub version_string: String,
    pub root_hash: ContentHash,
}

/// A mod's stable identity across versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModPackage {
    pub id: u32,
    pub workshop_id: Option<String>,
    pub name: String,
    pub path_hint: Option<PathBuf>,
}

/// One concrete snapshot of a vanilla version or a mod package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentVersion {
    pub cvid: Cvid,
    pub kind: VersionKind,
    pub vanilla_id: Option<u32>,
    pub package_id: Option<u32>,
    pub root_hash: ContentHash,
    pub ingested_at: String,
    /// Ingest-only hint; never exposed in reports or query results.
    pub source_hint: Option<PathBuf>,
}

/// A (content version, relpath) pair pointing at a content blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: FileId,
    pub cvid: Cvid,
    pub relpath: VPath,
    pub content_hash: ContentHash,
    pub fingerprint: Fingerprint,
    pub kind: FileKind,
    pub deleted: bool,
}

/// The persisted catalog document.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub next_cvid: u32,
    #[serde(default)]
    pub next_file_id: u32,
    #[serde(default)]
    pub next_vanilla_id: u32,
    #[serde(default)]
    pub next_package_id: u32,
    #[serde(default)]
    pub next_parser_id: u32,
    #[serde(default)]
    pub vanilla: Vec<VanillaVersion>,
    #[serde(default)]
    pub packages: Vec<ModPackage>,
    #[serde(default)]
    pub versions: Vec<ContentVersion>,
    #[serde(default)]
    pub files: Vec<FileRecord>,
    #[serde(default)]
    pub blobs: HashMap<ContentHash, BlobMeta>,
    #[serde(default)]
    pub parsers: Vec<ParserVersionRec>,
}

/// What an ingest did.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub cvid: Cvid,
    pub reused_version: bool,
    pub files_total: usize,
    pub files_changed: Vec<FileId>,
}

/// The registry: catalog plus in-memory lookup indices.
pub struct Registry {
    path: PathBuf,
    catalog: Catalog,
    by_file_id: HashMap<FileId, usize>,
    by_cvid_relpath: HashMap<(Cvid, String), FileId>,
}

impl Registry {
    /// Load the catalog, or start empty when none exists yet.
    pub fn open(path: &Path) -> RavenResult<Self> {
        let catalog = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|e| RavenError::io(path, e))?;
            serde_json::from_str(&text).map_err(|e| RavenError::General(format!(
                "catalog '{}' is unreadable: {e}",
                path.display()
            )))?
        } else {
            Catalog::default()
        };
        let mut registry = Self {
            path: path.to_path_buf(),
            catalog,
            by_file_id: HashMap::new(),
            by_cvid_relpath: HashMap::new(),
        };
        registry.rebuild_indices();
        Ok(registry)
    }

    fn rebuild_indices(&mut self) {
        self.by_file_id.clear();
        self.by_cvid_relpath.clear();
        for (idx, file) in self.catalog.files.iter().enumerate() {
            self.by_file_id.insert(file.file_id, idx);
            self.by_cvid_relpath
                .insert((file.cvid, file.relpath.cmp_key()), file.file_id);
        }
    }

    /// Atomically persist the catalog snapshot.
    pub fn save(&self) -> RavenResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RavenError::io(parent, e))?;
        }
        let text = serde_json::to_string(&self.catalog)
            .map_err(|e| RavenError::General(format!("catalog serialize: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(|e| RavenError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| RavenError::io(&self.path, e))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // ---- parser versions ----

    /// Resolve the current parser build to a registered id, creating the
    /// record on first sight.
    pub fn current_parser_version(&mut self) -> ParserVersionId {
        let version_string = parsing::PARSER_VERSION;
        let source_hash = parsing::parser_source_hash();
        if let Some(rec) = self
            .catalog
            .parsers
            .iter()
            .find(|p| p.version_string == version_string && p.source_hash == source_hash)
        {
            return rec.id;
        }
        self.catalog.next_parser_id += 1;
        let id = ParserVersionId::new(self.catalog.next_parser_id).expect("non-zero parser id");
        self.catalog.parsers.push(ParserVersionRec {
            id,
            version_string: version_string.to_string(),
            source_hash: source_hash.to_string(),
            vcs_commit: parsing::build_commit().map(str::to_owned),
            description: parsing::PARSER_DESCRIPTION.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        });
        id
    }

    // ---- content versions ----

    /// Resolve a scanned vanilla root to a content version. Reuses the
    /// existing CV when (version_string, root_hash) already exists.
    pub fn upsert_vanilla(
        &mut self,
        version_string: &str,
        root_hash: ContentHash,
        source_hint: &Path,
    ) -> (Cvid, bool) {
        if let Some(vv) = self
            .catalog
            .vanilla
            .iter()
            .find(|v| v.version_string == version_string && v.root_hash == root_hash)
        {
            let vanilla_id = vv.id;
            if let Some(cv) = self
                .catalog
                .versions
                .iter()
                .find(|cv| cv.vanilla_id == Some(vanilla_id) && cv.root_hash == root_hash)
            {
                return (cv.cvid, true);
            }
        }

        self.catalog.next_vanilla_id += 1;
        let vanilla_id = self.catalog.next_vanilla_id;
        self.catalog.vanilla.push(VanillaVersion {
            id: vanilla_id,
            version_string: version_string.to_string(),
            root_hash,
        });
        let cvid = self.new_cvid();
        self.catalog.versions.push(ContentVersion {
            cvid,
            kind: VersionKind::Vanilla,
            vanilla_id: Some(vanilla_id),
            package_id: None,
            root_hash,
            ingested_at: chrono::Utc::now().to_rfc3339(),
            source_hint: Some(source_hint.to_path_buf()),
        });
        (cvid, false)
    }

    /// Resolve a scanned mod root to a content version. The package is
    /// found by workshop id when present, else by display name; the CV is
    /// reused when the root hash is unchanged.
    pub fn upsert_mod(
        &mut self,
        name: &str,
        workshop_id: Option<&str>,
        root_hash: ContentHash,
        source_hint: &Path,
    ) -> (Cvid, bool) {
        let package_id = match self.catalog.packages.iter().find(|p| match workshop_id {
            Some(wid) => p.workshop_id.as_deref() == Some(wid),
            None => p.workshop_id.is_none() && p.name == name,
        }) {
            Some(pkg) => pkg.id,
            None => {
                self.catalog.next_package_id += 1;
                let id = self.catalog.next_package_id;
                self.catalog.packages.push(ModPackage {
                    id,
                    workshop_id: workshop_id.map(str::to_owned),
                    name: name.to_string(),
                    path_hint: Some(source_hint.to_path_buf()),
                });
                id
            }
        };

        if let Some(cv) = self
            .catalog
            .versions
            .iter()
            .find(|cv| cv.package_id == Some(package_id) && cv.root_hash == root_hash)
        {
            return (cv.cvid, true);
        }

        let cvid = self.new_cvid();
        self.catalog.versions.push(ContentVersion {
            cvid,
            kind: VersionKind::Mod,
            vanilla_id: None,
            package_id: Some(package_id),
            root_hash,
            ingested_at: chrono::Utc::now().to_rfc3339(),
            source_hint: Some(source_hint.to_path_buf()),
        });
        (cvid, false)
    }

    fn new_cvid(&mut self) -> Cvid {
        self.catalog.next_cvid += 1;
        Cvid::new(self.catalog.next_cvid).expect("non-zero cvid")
    }

    pub fn version(&self, cvid: Cvid) -> RavenResult<&ContentVersion> {
        self.catalog
            .versions
            .iter()
            .find(|cv| cv.cvid == cvid)
            .ok_or(RavenError::VersionNotFound(cvid.value()))
    }

    /// Human-readable name for a content version: mod display name or the
    /// vanilla version string.
    pub fn display_name(&self, cvid: Cvid) -> String {
        let Ok(cv) = self.version(cvid) else {
            return format!("cv{}", cvid.value());
        };
        match cv.kind {
            VersionKind::Vanilla => cv
                .vanilla_id
                .and_then(|id| self.catalog.vanilla.iter().find(|v| v.id == id))
                .map(|v| format!("vanilla {}", v.version_string))
                .unwrap_or_else(|| format!("cv{}", cvid.value())),
            VersionKind::Mod => cv
                .package_id
                .and_then(|id| self.catalog.packages.iter().find(|p| p.id == id))
                .map(|p| p.name.clone())
                .unwrap_or_else(|| format!("cv{}", cvid.value())),
        }
    }

    pub fn vanilla_version_string(&self, cvid: Cvid) -> Option<String> {
        let cv = self.version(cvid).ok()?;
        let id = cv.vanilla_id?;
        self.catalog
            .vanilla
            .iter()
            .find(|v| v.id == id)
            .map(|v| v.version_string.clone())
    }

    // ---- file records ----

    /// Bind a scanned file into a content version. Returns the record id
    /// and whether the content changed (new record or new hash).
    pub fn register_file(
        &mut self,
        cvid: Cvid,
        entry: &ScanEntry,
        kind: FileKind,
        meta: BlobMeta,
    ) -> (FileId, bool) {
        self.catalog.blobs.entry(entry.hash).or_insert(meta);
        let fingerprint = Fingerprint::new(entry.mtime_ms, entry.size, entry.hash);
        let key = (cvid, entry.relpath.cmp_key());

        if let Some(&file_id) = self.by_cvid_relpath.get(&key) {
            let idx = self.by_file_id[&file_id];
            let record = &mut self.catalog.files[idx];
            let changed = record.content_hash != entry.hash || record.deleted;
            record.content_hash = entry.hash;
            record.fingerprint = fingerprint;
            record.kind = kind;
            record.deleted = false;
            return (file_id, changed);
        }

        self.catalog.next_file_id += 1;
        let file_id = FileId::new(self.catalog.next_file_id).expect("non-zero file id");
        let record = FileRecord {
            file_id,
            cvid,
            relpath: entry.relpath.clone(),
            content_hash: entry.hash,
            fingerprint,
            kind,
            deleted: false,
        };
        self.by_file_id.insert(file_id, self.catalog.files.len());
        self.by_cvid_relpath.insert(key, file_id);
        self.catalog.files.push(record);
        (file_id, true)
    }

    pub fn file(&self, file_id: FileId) -> RavenResult<&FileRecord> {
        self.by_file_id
            .get(&file_id)
            .map(|&idx| &self.catalog.files[idx])
            .ok_or(RavenError::FileNotFound { id: file_id })
    }

    pub fn lookup(&self, cvid: Cvid, relpath: &VPath) -> Option<&FileRecord> {
        let file_id = self.by_cvid_relpath.get(&(cvid, relpath.cmp_key()))?;
        let idx = self.by_file_id.get(file_id)?;
        Some(&self.catalog.files[*idx])
    }

    /// Live (non-deleted) files of one content version.
    pub fn files_of(&self, cvid: Cvid) -> impl Iterator<Item = &FileRecord> {
        self.catalog
            .files
            .iter()
            .filter(move |f| f.cvid == cvid && !f.deleted)
    }

    /// Mark a file deleted. Records are never purged while a live playset
    /// report may reference them.
    pub fn mark_deleted(&mut self, cvid: Cvid, relpath: &VPath) -> Option<FileId> {
        let file_id = *self.by_cvid_relpath.get(&(cvid, relpath.cmp_key()))?;
        let idx = self.by_file_id[&file_id];
        self.catalog.files[idx].deleted = true;
        Some(file_id)
    }

    /// Mods whose display name matches, newest content version first.
    pub fn latest_mod_cv_by_name(&self, name: &str) -> Option<Cvid> {
        let package_id = self
            .catalog
            .packages
            .iter()
            .find(|p| p.name == name)?
            .id;
        self.catalog
            .versions
            .iter()
            .filter(|cv| cv.package_id == Some(package_id))
            .map(|cv| cv.cvid)
            .max()
    }

    pub fn latest_mod_cv_by_workshop_id(&self, workshop_id: &str) -> Option<Cvid> {
        let package_id = self
            .catalog
            .packages
            .iter()
            .find(|p| p.workshop_id.as_deref() == Some(workshop_id))?
            .id;
        self.catalog
            .versions
            .iter()
            .filter(|cv| cv.package_id == Some(package_id))
            .map(|cv| cv.cvid)
            .max()
    }

    pub fn blob_meta(&self, hash: &ContentHash) -> Option<&BlobMeta> {
        self.catalog.blobs.get(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentHash;

    fn entry(rel: &str, contents: &[u8]) -> ScanEntry {
        ScanEntry {
            relpath: VPath::new(rel),
            abs_path: PathBuf::from(format!("/src/{rel}")),
            mtime_ms: 1000,
            size: contents.len() as u64,
            hash: ContentHash::of(contents),
        }
    }

    fn meta(contents: &[u8]) -> BlobMeta {
        BlobMeta {
            size: contents.len() as u64,
            is_text: true,
            encoding: Some(crate::store::TextEncoding::Utf8),
            oversized: false,
        }
    }

    fn temp_registry() -> (tempfile::TempDir, Registry) {
        let dir = tempfile::tempdir().unwrap();
        let reg = Registry::open(&dir.path().join("catalog.json")).unwrap();
        (dir, reg)
    }

    #[test]
    fn vanilla_upsert_is_idempotent() {
        let (_dir, mut reg) = temp_registry();
        let hash = ContentHash::of(b"root");
        let (cv1, reused1) = reg.upsert_vanilla("1.12.4", hash, Path::new("/game"));
        let (cv2, reused2) = reg.upsert_vanilla("1.12.4", hash, Path::new("/game"));
        assert_eq!(cv1, cv2);
        assert!(!reused1);
        assert!(reused2);
    }

    #[test]
    fn changed_root_hash_creates_a_new_cv() {
        let (_dir, mut reg) = temp_registry();
        let (cv1, _) = reg.upsert_vanilla("1.12.4", ContentHash::of(b"a"), Path::new("/game"));
        let (cv2, _) = reg.upsert_vanilla("1.12.4", ContentHash::of(b"b"), Path::new("/game"));
        assert_ne!(cv1, cv2);
    }

    #[test]
    fn mod_identity_prefers_workshop_id() {
        let (_dir, mut reg) = temp_registry();
        let (cv1, _) =
            reg.upsert_mod("Cool Mod", Some("123"), ContentHash::of(b"v1"), Path::new("/m"));
        // Renamed on the workshop, same id, new content.
        let (cv2, reused) =
            reg.upsert_mod("Cooler Mod", Some("123"), ContentHash::of(b"v2"), Path::new("/m"));
        assert!(!reused);
        assert_ne!(cv1, cv2);
        assert_eq!(reg.catalog().packages.len(), 1);
    }

    #[test]
    fn register_file_tracks_change() {
        let (_dir, mut reg) = temp_registry();
        let (cvid, _) = reg.upsert_mod("m", None, ContentHash::of(b"r"), Path::new("/m"));

        let e1 = entry("common/traits/a.txt", b"one");
        let (id1, changed1) = reg.register_file(cvid, &e1, FileKind::Script, meta(b"one"));
        assert!(changed1);

        // Same content again: same record, unchanged.
        let (id2, changed2) = reg.register_file(cvid, &e1, FileKind::Script, meta(b"one"));
        assert_eq!(id1, id2);
        assert!(!changed2);

        // New content, same path: same record, changed.
        let e2 = entry("common/traits/a.txt", b"two");
        let (id3, changed3) = reg.register_file(cvid, &e2, FileKind::Script, meta(b"two"));
        assert_eq!(id1, id3);
        assert!(changed3);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let (_dir, mut reg) = temp_registry();
        let (cvid, _) = reg.upsert_mod("m", None, ContentHash::of(b"r"), Path::new("/m"));
        reg.register_file(
            cvid,
            &entry("Common/Traits/A.txt", b"x"),
            FileKind::Script,
            meta(b"x"),
        );
        assert!(reg.lookup(cvid, &VPath::new("common/traits/a.txt")).is_some());
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        {
            let mut reg = Registry::open(&path).unwrap();
            let (cvid, _) = reg.upsert_mod("m", Some("9"), ContentHash::of(b"r"), Path::new("/m"));
            reg.register_file(
                cvid,
                &entry("events/e.txt", b"ev"),
                FileKind::Script,
                meta(b"ev"),
            );
            reg.save().unwrap();
        }
        let reg = Registry::open(&path).unwrap();
        let cvid = reg.latest_mod_cv_by_workshop_id("9").unwrap();
        assert!(reg.lookup(cvid, &VPath::new("events/e.txt")).is_some());
        assert_eq!(reg.display_name(cvid), "m");
    }

    #[test]
    fn parser_version_registers_once() {
        let (_dir, mut reg) = temp_registry();
        let a = reg.current_parser_version();
        let b = reg.current_parser_version();
        assert_eq!(a, b);
        assert_eq!(reg.catalog().parsers.len(), 1);
    }

    #[test]
    fn mark_deleted_keeps_the_record() {
        let (_dir, mut reg) = temp_registry();
        let (cvid, _) = reg.upsert_mod("m", None, ContentHash::of(b"r"), Path::new("/m"));
        let rel = VPath::new("events/e.txt");
        reg.register_file(cvid, &entry("events/e.txt", b"x"), FileKind::Script, meta(b"x"));
        let id = reg.mark_deleted(cvid, &rel).unwrap();
        assert!(reg.file(id).unwrap().deleted);
        assert_eq!(reg.files_of(cvid).count(), 0);
    }
}
