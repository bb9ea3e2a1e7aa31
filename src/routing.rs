//! Routing table: the single place that maps a relative path to a file
//! type and its processing envelope.
//!
//! An envelope is an ordered set of pipeline stages, kept as a bitmask.
//! A file's envelope is fixed the moment the file is identified; no other
//! component re-derives routing from the path.

use crate::error::{RavenError, RavenResult};
use crate::paths::VPath;
use crate::types::FileKind;
use bitflags::bitflags;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

bitflags! {
    /// Processing stages, in pipeline order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Envelope: u8 {
        const INGEST       = 1 << 0;
        const PARSE        = 1 << 1;
        const SYMBOLS      = 1 << 2;
        const REFS         = 1 << 3;
        const LOCALIZATION = 1 << 4;
        const LOOKUPS      = 1 << 5;
    }
}

impl Envelope {
    /// Ordered stage names, for the persisted form.
    pub fn stage_names(&self) -> Vec<&'static str> {
        const STAGES: &[(Envelope, &str)] = &[
            (Envelope::INGEST, "INGEST"),
            (Envelope::PARSE, "PARSE"),
            (Envelope::SYMBOLS, "SYMBOLS"),
            (Envelope::REFS, "REFS"),
            (Envelope::LOCALIZATION, "LOCALIZATION"),
            (Envelope::LOOKUPS, "LOOKUPS"),
        ];
        STAGES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    pub fn from_stage_names<'a>(names: impl IntoIterator<Item = &'a str>) -> RavenResult<Self> {
        let mut env = Envelope::empty();
        for name in names {
            env |= match name {
                "INGEST" => Envelope::INGEST,
                "PARSE" => Envelope::PARSE,
                "SYMBOLS" => Envelope::SYMBOLS,
                "REFS" => Envelope::REFS,
                "LOCALIZATION" => Envelope::LOCALIZATION,
                "LOOKUPS" => Envelope::LOOKUPS,
                other => {
                    return Err(RavenError::Config {
                        reason: format!("unknown pipeline stage '{other}'"),
                    });
                }
            };
        }
        Ok(env)
    }
}

impl Serialize for Envelope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        Envelope::from_bits(bits).ok_or_else(|| serde::de::Error::custom("invalid envelope bits"))
    }
}

/// One path predicate row.
#[derive(Debug, Clone)]
struct RouteRule {
    pattern: glob::Pattern,
    kind: FileKind,
}

/// The routing table. Pure data; built once, consulted everywhere.
#[derive(Debug)]
pub struct RoutingTable {
    rules: Vec<RouteRule>,
    extensions: IndexMap<String, FileKind>,
    envelopes: IndexMap<FileKind, Envelope>,
    skip_extensions: BTreeSet<String>,
}

/// Persisted form: three maps plus a skip set.
#[derive(Debug, Serialize, Deserialize)]
struct RoutingDoc {
    patterns: IndexMap<String, String>,
    extensions: IndexMap<String, String>,
    envelopes: IndexMap<String, String>,
    stages: IndexMap<String, Vec<String>>,
    skip_extensions: BTreeSet<String>,
}

fn kind_from_str(s: &str) -> RavenResult<FileKind> {
    match s {
        "script" => Ok(FileKind::Script),
        "localization" => Ok(FileKind::Localization),
        "data" => Ok(FileKind::Data),
        "binary" => Ok(FileKind::Binary),
        "unknown" => Ok(FileKind::Unknown),
        other => Err(RavenError::Config {
            reason: format!("unknown file type '{other}'"),
        }),
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        let pattern_rows: &[(&str, FileKind)] = &[
            ("common/**/*.txt", FileKind::Script),
            ("events/**/*.txt", FileKind::Script),
            ("events/*.txt", FileKind::Script),
            ("localization/**/*.yml", FileKind::Localization),
            ("history/**", FileKind::Data),
            ("map_data/**/*.csv", FileKind::Data),
            ("gfx/**", FileKind::Binary),
            ("sound/**", FileKind::Binary),
            ("music/**", FileKind::Binary),
            ("**/*.dds", FileKind::Binary),
        ];
        let rules = pattern_rows
            .iter()
            .map(|(pat, kind)| RouteRule {
                pattern: glob::Pattern::new(pat).expect("static glob pattern"),
                kind: *kind,
            })
            .collect();

        // Extension fallback for files the predicate rows do not cover.
        // Deliberately no "txt" row: a stray txt outside common/ or
        // events/ stays unknown.
        let mut extensions = IndexMap::new();
        extensions.insert("yml".to_string(), FileKind::Localization);
        extensions.insert("csv".to_string(), FileKind::Data);
        extensions.insert("dds".to_string(), FileKind::Binary);

        let mut envelopes = IndexMap::new();
        envelopes.insert(
            FileKind::Script,
            Envelope::INGEST | Envelope::PARSE | Envelope::SYMBOLS | Envelope::REFS,
        );
        envelopes.insert(
            FileKind::Localization,
            Envelope::INGEST | Envelope::LOCALIZATION,
        );
        envelopes.insert(FileKind::Data, Envelope::INGEST);
        envelopes.insert(FileKind::Binary, Envelope::INGEST);
        envelopes.insert(FileKind::Unknown, Envelope::INGEST);

        let skip_extensions = ["tmp", "bak", "swp", "log"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        Self {
            rules,
            extensions,
            envelopes,
            skip_extensions,
        }
    }
}

impl RoutingTable {
    /// Route a relative path. Returns `None` for files in the skip set.
    pub fn route(&self, relpath: &VPath) -> Option<(FileKind, Envelope)> {
        if let Some(ext) = relpath.extension() {
            if self.skip_extensions.contains(&ext) {
                return None;
            }
        }
        let kind = self.kind_of(relpath);
        let envelope = self
            .envelopes
            .get(&kind)
            .copied()
            .unwrap_or(Envelope::INGEST);
        Some((kind, envelope))
    }

    fn kind_of(&self, relpath: &VPath) -> FileKind {
        let key = relpath.cmp_key();
        for rule in &self.rules {
            if rule.pattern.matches(&key) {
                return rule.kind;
            }
        }
        // Extension fallback for files outside the predicate rows.
        if let Some(ext) = relpath.extension() {
            if let Some(kind) = self.extensions.get(&ext) {
                return *kind;
            }
        }
        FileKind::Unknown
    }

    pub fn envelope_for(&self, kind: FileKind) -> Envelope {
        self.envelopes
            .get(&kind)
            .copied()
            .unwrap_or(Envelope::INGEST)
    }

    /// Load from the persisted JSON form, or fall back to defaults when
    /// the file does not exist yet.
    pub fn load_or_default(path: &Path) -> RavenResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| RavenError::io(path, e))?;
        let doc: RoutingDoc =
            serde_json::from_str(&text).map_err(|e| RavenError::Config {
                reason: format!("invalid routing table '{}': {e}", path.display()),
            })?;

        let mut rules = Vec::new();
        for (pat, kind) in &doc.patterns {
            let pattern = glob::Pattern::new(pat).map_err(|e| RavenError::Config {
                reason: format!("bad routing pattern '{pat}': {e}"),
            })?;
            rules.push(RouteRule {
                pattern,
                kind: kind_from_str(kind)?,
            });
        }

        let mut extensions = IndexMap::new();
        for (ext, kind) in &doc.extensions {
            extensions.insert(ext.clone(), kind_from_str(kind)?);
        }

        let mut envelopes = IndexMap::new();
        for (kind, envelope_name) in &doc.envelopes {
            let stages = doc.stages.get(envelope_name).ok_or_else(|| {
                RavenError::Config {
                    reason: format!("envelope '{envelope_name}' has no stage list"),
                }
            })?;
            envelopes.insert(
                kind_from_str(kind)?,
                Envelope::from_stage_names(stages.iter().map(String::as_str))?,
            );
        }

        Ok(Self {
            rules,
            extensions,
            envelopes,
            skip_extensions: doc.skip_extensions,
        })
    }

    /// Persist in the documented JSON form.
    pub fn save(&self, path: &Path) -> RavenResult<()> {
        let mut patterns = IndexMap::new();
        for rule in &self.rules {
            patterns.insert(rule.pattern.as_str().to_string(), rule.kind.as_str().to_string());
        }
        let mut extensions = IndexMap::new();
        for (ext, kind) in &self.extensions {
            extensions.insert(ext.clone(), kind.as_str().to_string());
        }
        let mut envelopes = IndexMap::new();
        let mut stages = IndexMap::new();
        for (kind, envelope) in &self.envelopes {
            let envelope_name = format!("{}_envelope", kind.as_str());
            envelopes.insert(kind.as_str().to_string(), envelope_name.clone());
            stages.insert(
                envelope_name,
                envelope.stage_names().iter().map(|s| s.to_string()).collect(),
            );
        }
        let doc = RoutingDoc {
            patterns,
            extensions,
            envelopes,
            stages,
            skip_extensions: self.skip_extensions.clone(),
        };
        let text = serde_json::to_string_pretty(&doc)
            .map_err(|e| RavenError::General(format!("routing table serialize: {e}")))?;
        std::fs::write(path, text).map_err(|e| RavenError::io(path, e))
    }
}
