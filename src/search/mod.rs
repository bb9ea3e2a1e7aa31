//! Search indices: a tantivy full-text index over text content and a
//! case-insensitive prefix index over symbol names.
//!
//! Every query path takes an ordered cvid list and enforces visibility
//! against it; nothing outside the playset leaks into results.

use crate::artifacts::ArtifactStore;
use crate::error::{RavenError, RavenResult};
use crate::registry::Registry;
use crate::types::{Cvid, FileId};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{
    FAST, Field, INDEXED, IndexRecordOption, STORED, STRING, Schema, SchemaBuilder,
    TextFieldIndexing, TextOptions, Value,
};
use tantivy::{Index, IndexReader, IndexSettings, IndexWriter, ReloadPolicy, TantivyDocument, Term};

fn search_err(operation: &str, cause: impl std::fmt::Display) -> RavenError {
    RavenError::Search {
        operation: operation.to_string(),
        cause: cause.to_string(),
    }
}

/// Schema fields for the content index.
struct ContentSchema {
    cvid: Field,
    file_id: Field,
    relpath: Field,
    content: Field,
}

impl ContentSchema {
    fn build() -> (Schema, ContentSchema) {
        let mut builder = SchemaBuilder::default();
        let cvid = builder.add_u64_field("cvid", INDEXED | STORED | FAST);
        let file_id = builder.add_u64_field("file_id", INDEXED | STORED | FAST);
        let text_options = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer("default")
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();
        let relpath = builder.add_text_field("relpath", STRING | STORED);
        let content = builder.add_text_field("content", text_options);
        let schema = builder.build();
        (
            schema,
            ContentSchema {
                cvid,
                file_id,
                relpath,
                content,
            },
        )
    }
}

/// A full-text hit, carrying the contributing cvid.
#[derive(Debug, Clone)]
pub struct ContentHit {
    pub cvid: Cvid,
    pub file_id: FileId,
    pub relpath: String,
    pub score: f32,
}

/// Tantivy-backed content index.
pub struct ContentIndex {
    index: Index,
    reader: IndexReader,
    schema: ContentSchema,
    writer: Mutex<Option<IndexWriter<TantivyDocument>>>,
}

impl ContentIndex {
    pub fn open(dir: &Path) -> RavenResult<Self> {
        std::fs::create_dir_all(dir).map_err(|e| RavenError::io(dir, e))?;
        let (schema, content_schema) = ContentSchema::build();
        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir).map_err(|e| search_err("open", e))?
        } else {
            let mmap = MmapDirectory::open(dir).map_err(|e| search_err("open", e))?;
            Index::create(mmap, schema, IndexSettings::default())
                .map_err(|e| search_err("create", e))?
        };
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| search_err("reader", e))?;
        Ok(Self {
            index,
            reader,
            schema: content_schema,
            writer: Mutex::new(None),
        })
    }

    fn with_writer<T>(
        &self,
        f: impl FnOnce(&mut IndexWriter<TantivyDocument>) -> RavenResult<T>,
    ) -> RavenResult<T> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| RavenError::Bug("content index writer poisoned".into()))?;
        if guard.is_none() {
            let writer = self
                .index
                .writer::<TantivyDocument>(50_000_000)
                .map_err(|e| search_err("writer", e))?;
            *guard = Some(writer);
        }
        f(guard.as_mut().expect("writer was just created"))
    }

    /// Replace the indexed text for one file.
    pub fn index_file(
        &self,
        cvid: Cvid,
        file_id: FileId,
        relpath: &str,
        content: &str,
    ) -> RavenResult<()> {
        self.with_writer(|writer| {
            writer.delete_term(Term::from_field_u64(
                self.schema.file_id,
                file_id.value() as u64,
            ));
            let mut doc = TantivyDocument::new();
            doc.add_u64(self.schema.cvid, cvid.value() as u64);
            doc.add_u64(self.schema.file_id, file_id.value() as u64);
            doc.add_text(self.schema.relpath, relpath);
            doc.add_text(self.schema.content, content);
            writer
                .add_document(doc)
                .map_err(|e| search_err("add_document", e))?;
            Ok(())
        })
    }

    pub fn remove_file(&self, file_id: FileId) -> RavenResult<()> {
        self.with_writer(|writer| {
            writer.delete_term(Term::from_field_u64(
                self.schema.file_id,
                file_id.value() as u64,
            ));
            Ok(())
        })
    }

    /// Commit pending writes and reload the reader.
    pub fn commit(&self) -> RavenResult<()> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| RavenError::Bug("content index writer poisoned".into()))?;
        if let Some(mut writer) = guard.take() {
            writer.commit().map_err(|e| search_err("commit", e))?;
            self.reader.reload().map_err(|e| search_err("reload", e))?;
        }
        Ok(())
    }

    /// Ranked full-text search, scoped to the given cvids.
    pub fn search_text(
        &self,
        cvids: &[Cvid],
        query_str: &str,
        limit: usize,
    ) -> RavenResult<Vec<ContentHit>> {
        if cvids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();

        let parser = QueryParser::for_index(&self.index, vec![self.schema.content]);
        let text_query = parser
            .parse_query_lenient(query_str)
            .0;

        let cvid_terms: Vec<(Occur, Box<dyn Query>)> = cvids
            .iter()
            .map(|cvid| {
                (
                    Occur::Should,
                    Box::new(TermQuery::new(
                        Term::from_field_u64(self.schema.cvid, cvid.value() as u64),
                        IndexRecordOption::Basic,
                    )) as Box<dyn Query>,
                )
            })
            .collect();
        let scoped = BooleanQuery::new(vec![
            (Occur::Must, text_query),
            (Occur::Must, Box::new(BooleanQuery::new(cvid_terms))),
        ]);

        let top_docs = searcher
            .search(&scoped, &TopDocs::with_limit(limit))
            .map_err(|e| search_err("search", e))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address).map_err(|e| search_err("doc", e))?;
            let cvid = doc
                .get_first(self.schema.cvid)
                .and_then(|v| v.as_u64())
                .and_then(|v| Cvid::new(v as u32));
            let file_id = doc
                .get_first(self.schema.file_id)
                .and_then(|v| v.as_u64())
                .and_then(|v| FileId::new(v as u32));
            let relpath = doc
                .get_first(self.schema.relpath)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if let (Some(cvid), Some(file_id)) = (cvid, file_id) {
                hits.push(ContentHit {
                    cvid,
                    file_id,
                    relpath,
                    score,
                });
            }
        }
        Ok(hits)
    }
}

/// One row in the symbol prefix index.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolHit {
    pub name: String,
    pub kind: String,
    pub cvid: Cvid,
    pub file_id: FileId,
    pub relpath: String,
    pub line: u32,
    pub exact: bool,
}

/// Case-insensitive prefix index over symbol names, rebuilt from the
/// artifact tables. Range scans over the folded key.
pub struct SymbolPrefixIndex {
    by_folded_name: BTreeMap<String, Vec<usize>>,
    entries: Vec<SymbolHit>,
}

impl SymbolPrefixIndex {
    /// Build from the current artifact tables and catalog.
    pub fn build(registry: &Registry, artifacts: &ArtifactStore) -> Self {
        let mut entries = Vec::new();
        let mut by_folded_name: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for row in artifacts.all_symbols() {
            let Ok(file) = registry.file(row.defining_file_id) else {
                continue;
            };
            if file.deleted {
                continue;
            }
            let idx = entries.len();
            entries.push(SymbolHit {
                name: row.name.clone(),
                kind: row.kind.clone(),
                cvid: file.cvid,
                file_id: row.defining_file_id,
                relpath: file.relpath.as_str().to_string(),
                line: row.line,
                exact: false,
            });
            by_folded_name
                .entry(row.name.to_lowercase())
                .or_default()
                .push(idx);
        }
        Self {
            by_folded_name,
            entries,
        }
    }

    /// Exact + prefix search, scoped to the given cvids. Exact matches
    /// sort first.
    pub fn search(&self, cvids: &[Cvid], query: &str, limit: usize) -> Vec<SymbolHit> {
        if limit == 0 {
            return Vec::new();
        }
        let visible: HashSet<Cvid> = cvids.iter().copied().collect();
        let folded = query.to_lowercase();
        let mut hits = Vec::new();
        for (name, indices) in self.by_folded_name.range(folded.clone()..) {
            if !name.starts_with(&folded) {
                break;
            }
            let exact = name == &folded;
            for &idx in indices {
                let entry = &self.entries[idx];
                if !visible.contains(&entry.cvid) {
                    continue;
                }
                let mut hit = entry.clone();
                hit.exact = exact;
                hits.push(hit);
            }
        }
        hits.sort_by(|a, b| {
            b.exact
                .cmp(&a.exact)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.cvid.cmp(&b.cvid))
        });
        hits.truncate(limit);
        hits
    }

    /// Every visible symbol with exactly this name, any kind.
    pub fn lookup_exact(&self, cvids: &[Cvid], name: &str) -> Vec<SymbolHit> {
        let visible: HashSet<Cvid> = cvids.iter().copied().collect();
        self.by_folded_name
            .get(&name.to_lowercase())
            .map(|indices| {
                indices
                    .iter()
                    .map(|&idx| self.entries[idx].clone())
                    .filter(|hit| visible.contains(&hit.cvid))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
