//! Playset-scoped, read-only query surface.
//!
//! Every result carries the contributing cvid so callers can cite their
//! source. Queries are best-effort over what is indexed; partial build
//! state narrows results, it never raises.

use crate::engine::Engine;
use crate::error::RavenResult;
use crate::paths::VPath;
use crate::registry::playset::Playset;
use crate::search::SymbolPrefixIndex;
use crate::types::FileKind;
use serde::Serialize;

/// A symbol search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolResult {
    pub name: String,
    pub kind: String,
    pub cvid: u32,
    pub source_name: String,
    pub relpath: String,
    pub line: u32,
    pub exact: bool,
}

/// A file search hit.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub relpath: String,
    pub cvid: u32,
    pub source_name: String,
    pub kind: FileKind,
    /// True when this record wins the playset's load order for its path.
    pub winner: bool,
}

/// A content search hit.
#[derive(Debug, Clone, Serialize)]
pub struct ContentResult {
    pub relpath: String,
    pub cvid: u32,
    pub source_name: String,
    /// First matching line, 1-based.
    pub line: u32,
    pub excerpt: String,
}

/// A ranked full-text hit from the content index.
#[derive(Debug, Clone, Serialize)]
pub struct TextSearchResult {
    pub relpath: String,
    pub cvid: u32,
    pub source_name: String,
    pub score: f32,
}

/// The winning file at a relpath, with its text when decodable.
#[derive(Debug, Clone, Serialize)]
pub struct FileContents {
    pub relpath: String,
    pub cvid: u32,
    pub source_name: String,
    pub kind: FileKind,
    pub text: Option<String>,
}

/// Outcome of an exhaustive negative check.
#[derive(Debug, Clone, Serialize)]
pub struct NotExistsResult {
    pub name: String,
    pub confirmed_absent: bool,
    pub symbol_matches: usize,
    pub reference_matches: usize,
}

impl Engine {
    /// Exact + prefix symbol search over the playset.
    pub fn search_symbols(
        &self,
        playset: &Playset,
        query: &str,
        limit: usize,
    ) -> Vec<SymbolResult> {
        let index = SymbolPrefixIndex::build(self.registry(), self.artifacts());
        index
            .search(playset.cvids(), query, limit)
            .into_iter()
            .map(|hit| SymbolResult {
                source_name: self.registry().display_name(hit.cvid),
                name: hit.name,
                kind: hit.kind,
                cvid: hit.cvid.value(),
                relpath: hit.relpath,
                line: hit.line,
                exact: hit.exact,
            })
            .collect()
    }

    /// Glob search over relpaths visible in the playset.
    pub fn search_files(
        &self,
        playset: &Playset,
        relpath_glob: &str,
        limit: usize,
    ) -> RavenResult<Vec<FileResult>> {
        let pattern = glob::Pattern::new(&relpath_glob.to_lowercase()).map_err(|e| {
            crate::error::RavenError::General(format!("bad glob '{relpath_glob}': {e}"))
        })?;
        let resolver = self.resolver(playset);
        let winners = resolver.file_winners();

        let mut results = Vec::new();
        'outer: for cvid in playset.cvids() {
            for record in self.registry().files_of(*cvid) {
                if !pattern.matches(&record.relpath.cmp_key()) {
                    continue;
                }
                let winner = winners
                    .get(&record.relpath.cmp_key())
                    .map(|w| w.file_id == record.file_id)
                    .unwrap_or(false);
                results.push(FileResult {
                    relpath: record.relpath.as_str().to_string(),
                    cvid: cvid.value(),
                    source_name: self.registry().display_name(*cvid),
                    kind: record.kind,
                    winner,
                });
                if results.len() >= limit {
                    break 'outer;
                }
            }
        }
        results.sort_by(|a, b| a.relpath.cmp(&b.relpath).then(a.cvid.cmp(&b.cvid)));
        Ok(results)
    }

    /// Ranked full-text search over indexed text content, scoped to the
    /// playset. Backed by the content index the build pipeline maintains;
    /// for exact substring matching see [`Engine::search_content`].
    pub fn search_text(
        &self,
        playset: &Playset,
        query: &str,
        limit: usize,
    ) -> RavenResult<Vec<TextSearchResult>> {
        let hits = self
            .content_index()
            .search_text(playset.cvids(), query, limit)?;
        Ok(hits
            .into_iter()
            .map(|hit| TextSearchResult {
                relpath: hit.relpath,
                source_name: self.registry().display_name(hit.cvid),
                cvid: hit.cvid.value(),
                score: hit.score,
            })
            .collect())
    }

    /// Substring search over the winning text blobs of the playset.
    pub fn search_content(
        &self,
        playset: &Playset,
        needle: &str,
        limit: usize,
    ) -> RavenResult<Vec<ContentResult>> {
        if needle.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let resolver = self.resolver(playset);
        let mut results = Vec::new();
        for (_, record) in resolver.file_winners() {
            let is_text = self
                .registry()
                .blob_meta(&record.content_hash)
                .map(|m| m.is_text)
                .unwrap_or(false);
            if !is_text {
                continue;
            }
            let Some(text) = self.store().get_text(&record.content_hash)? else {
                continue;
            };
            if let Some((line_no, line)) = text
                .lines()
                .enumerate()
                .find(|(_, line)| line.contains(needle))
            {
                results.push(ContentResult {
                    relpath: record.relpath.as_str().to_string(),
                    cvid: record.cvid.value(),
                    source_name: self.registry().display_name(record.cvid),
                    line: (line_no + 1) as u32,
                    excerpt: line.trim().chars().take(160).collect(),
                });
                if results.len() >= limit {
                    break;
                }
            }
        }
        Ok(results)
    }

    /// The winning FileRecord for a relpath, plus its text when the blob
    /// decodes.
    pub fn get_file(&self, playset: &Playset, relpath: &str) -> RavenResult<Option<FileContents>> {
        let rel = VPath::new(relpath);
        let resolver = self.resolver(playset);
        let Some(record) = resolver.resolve_file(&rel) else {
            return Ok(None);
        };
        let text = self.store().get_text(&record.content_hash)?;
        Ok(Some(FileContents {
            relpath: record.relpath.as_str().to_string(),
            cvid: record.cvid.value(),
            source_name: self.registry().display_name(record.cvid),
            kind: record.kind,
            text,
        }))
    }

    /// Exhaustive negative check over symbols and references.
    pub fn confirm_not_exists(&self, playset: &Playset, name: &str) -> NotExistsResult {
        let index = SymbolPrefixIndex::build(self.registry(), self.artifacts());
        let symbol_matches = index.lookup_exact(playset.cvids(), name).len();

        let visible: std::collections::HashSet<_> = playset.cvids().iter().copied().collect();
        let folded = name.to_lowercase();
        let reference_matches = self
            .artifacts()
            .all_refs()
            .filter(|r| r.name.to_lowercase() == folded)
            .filter(|r| {
                self.registry()
                    .file(r.using_file_id)
                    .map(|f| visible.contains(&f.cvid))
                    .unwrap_or(false)
            })
            .count();

        NotExistsResult {
            name: name.to_string(),
            confirmed_absent: symbol_matches == 0 && reference_matches == 0,
            symbol_matches,
            reference_matches,
        }
    }
}
