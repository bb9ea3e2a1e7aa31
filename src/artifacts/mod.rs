//! Derived-artifact cache: ASTs, symbols, references, localization
//! entries.
//!
//! Every artifact is a pure function of (content hash, parser version).
//! Rows from older parser versions are ignored at load, never deleted:
//! the per-version AST directories may still serve a running session.
//! Before new rows land for a file, the previous generation for that file
//! is dropped wholesale; there is no partial-update mode.

pub mod symbols;

pub use symbols::{ExtractorRegistry, ExtractorRule};

use crate::error::{RavenError, RavenResult};
use crate::parsing::script::{AstNode, Diagnostic};
use crate::types::{ContentHash, FileId, ParserVersionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A cached parse result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstArtifact {
    pub content_hash: ContentHash,
    pub parser_version_id: ParserVersionId,
    pub parse_ok: bool,
    pub node_count: u64,
    pub root: AstNode,
    pub diagnostics: Vec<Diagnostic>,
}

/// A symbol definition row. The defining file's cvid is derived through
/// the catalog, never duplicated here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRow {
    pub name: String,
    pub kind: String,
    pub defining_file_id: FileId,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A symbol use row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefRow {
    pub name: String,
    pub kind: String,
    pub using_file_id: FileId,
    pub line: u32,
    pub context: String,
}

/// One localization entry row plus its embedded references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocRow {
    pub content_hash: ContentHash,
    pub language: String,
    pub key: String,
    pub version: u32,
    pub raw_value: String,
    pub plain_text: String,
    pub line: u32,
    pub scripted_refs: Vec<String>,
    pub variable_refs: Vec<String>,
    pub icon_refs: Vec<String>,
}

// Flat row lists on disk; the per-file maps are rebuilt on load.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TablesDoc {
    parser_version_id: Option<ParserVersionId>,
    symbols: Vec<SymbolRow>,
    refs: Vec<RefRow>,
    localization: Vec<LocRow>,
}

/// The artifact store: AST files on disk plus the three row tables.
pub struct ArtifactStore {
    dir: PathBuf,
    tables_path: PathBuf,
    parser_version_id: ParserVersionId,
    symbols: BTreeMap<FileId, Vec<SymbolRow>>,
    refs: BTreeMap<FileId, Vec<RefRow>>,
    localization: BTreeMap<ContentHash, Vec<LocRow>>,
    dirty: bool,
}

impl ArtifactStore {
    /// Open the store for the current parser version. Tables persisted by
    /// an older parser version are ignored; their rows regenerate lazily.
    pub fn open(dir: &Path, parser_version_id: ParserVersionId) -> RavenResult<Self> {
        std::fs::create_dir_all(dir).map_err(|e| RavenError::io(dir, e))?;
        let tables_path = dir.join("tables.json");
        let mut store = Self {
            dir: dir.to_path_buf(),
            tables_path: tables_path.clone(),
            parser_version_id,
            symbols: BTreeMap::new(),
            refs: BTreeMap::new(),
            localization: BTreeMap::new(),
            dirty: false,
        };
        if tables_path.exists() {
            let text =
                std::fs::read_to_string(&tables_path).map_err(|e| RavenError::io(&tables_path, e))?;
            let doc: TablesDoc = serde_json::from_str(&text).map_err(|e| {
                RavenError::General(format!("artifact tables unreadable: {e}"))
            })?;
            if doc.parser_version_id == Some(parser_version_id) {
                for row in doc.symbols {
                    store.symbols.entry(row.defining_file_id).or_default().push(row);
                }
                for row in doc.refs {
                    store.refs.entry(row.using_file_id).or_default().push(row);
                }
                for row in doc.localization {
                    store.localization.entry(row.content_hash).or_default().push(row);
                }
            } else {
                tracing::info!(
                    stale = ?doc.parser_version_id,
                    current = %parser_version_id,
                    "ignoring artifact tables from a different parser version"
                );
            }
        }
        Ok(store)
    }

    pub fn parser_version_id(&self) -> ParserVersionId {
        self.parser_version_id
    }

    // ---- AST cache ----

    fn ast_path(&self, hash: &ContentHash, pvid: ParserVersionId) -> PathBuf {
        self.dir
            .join("asts")
            .join(pvid.value().to_string())
            .join(format!("{}.json", hash.to_hex()))
    }

    pub fn has_ast(&self, hash: &ContentHash) -> bool {
        self.ast_path(hash, self.parser_version_id).exists()
    }

    pub fn store_ast(&self, artifact: &AstArtifact) -> RavenResult<()> {
        if artifact.parser_version_id != self.parser_version_id {
            return Err(RavenError::SchemaMismatch {
                found: artifact.parser_version_id,
                current: self.parser_version_id,
            });
        }
        let path = self.ast_path(&artifact.content_hash, artifact.parser_version_id);
        let parent = path.parent().expect("ast path has a parent");
        std::fs::create_dir_all(parent).map_err(|e| RavenError::io(parent, e))?;
        let text = serde_json::to_string(artifact)
            .map_err(|e| RavenError::General(format!("ast serialize: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(|e| RavenError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| RavenError::io(&path, e))
    }

    /// Load an AST for the current parser version.
    pub fn load_ast(&self, hash: &ContentHash) -> RavenResult<Option<AstArtifact>> {
        let path = self.ast_path(hash, self.parser_version_id);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(|e| RavenError::io(&path, e))?;
        let artifact: AstArtifact = serde_json::from_str(&text)
            .map_err(|e| RavenError::General(format!("ast artifact unreadable: {e}")))?;
        Ok(Some(artifact))
    }

    // ---- symbol / reference tables ----

    /// Replace the symbol generation for one defining file.
    pub fn replace_symbols(&mut self, file_id: FileId, rows: Vec<SymbolRow>) {
        if rows.is_empty() {
            self.symbols.remove(&file_id);
        } else {
            self.symbols.insert(file_id, rows);
        }
        self.dirty = true;
    }

    /// Replace the reference generation for one using file.
    pub fn replace_refs(&mut self, file_id: FileId, rows: Vec<RefRow>) {
        if rows.is_empty() {
            self.refs.remove(&file_id);
        } else {
            self.refs.insert(file_id, rows);
        }
        self.dirty = true;
    }

    /// Replace the localization generation for one content blob.
    pub fn replace_localization(&mut self, hash: ContentHash, rows: Vec<LocRow>) {
        if rows.is_empty() {
            self.localization.remove(&hash);
        } else {
            self.localization.insert(hash, rows);
        }
        self.dirty = true;
    }

    pub fn symbols_of(&self, file_id: FileId) -> &[SymbolRow] {
        self.symbols.get(&file_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn refs_of(&self, file_id: FileId) -> &[RefRow] {
        self.refs.get(&file_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn localization_of(&self, hash: &ContentHash) -> &[LocRow] {
        self.localization
            .get(hash)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn all_symbols(&self) -> impl Iterator<Item = &SymbolRow> {
        self.symbols.values().flatten()
    }

    pub fn all_refs(&self) -> impl Iterator<Item = &RefRow> {
        self.refs.values().flatten()
    }

    /// Persist the row tables when anything changed.
    pub fn commit(&mut self) -> RavenResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let doc = TablesDoc {
            parser_version_id: Some(self.parser_version_id),
            symbols: self.symbols.values().flatten().cloned().collect(),
            refs: self.refs.values().flatten().cloned().collect(),
            localization: self.localization.values().flatten().cloned().collect(),
        };
        let text = serde_json::to_string(&doc)
            .map_err(|e| RavenError::General(format!("tables serialize: {e}")))?;
        let tmp = self.tables_path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(|e| RavenError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.tables_path)
            .map_err(|e| RavenError::io(&self.tables_path, e))?;
        self.dirty = false;
        Ok(())
    }
}
