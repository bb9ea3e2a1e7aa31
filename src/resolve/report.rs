//! Deterministic, schema-versioned conflict report over a playset.
//!
//! Two runs on the same inputs produce byte-identical JSON except for
//! `generated_at`. Arrays sort by relpath or unit key, then load order;
//! summary maps are ordered.

use super::contributions::{ConflictUnit, RiskLevel};
use super::{FileConflict, Resolver};
use crate::types::{ContentHash, VersionKind};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const REPORT_SCHEMA: &str = "conflicts.v1";

#[derive(Debug, Clone, Serialize)]
pub struct ReportContext {
    /// Ordered cvid list of the playset.
    pub playset: Vec<u32>,
    pub playset_hash: String,
    pub vanilla_version: Option<String>,
    /// Mod display names in load order, vanilla excluded.
    pub mod_names: Vec<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RiskCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

impl RiskCounts {
    fn bump(&mut self, risk: RiskLevel) {
        match risk {
            RiskLevel::Low => self.low += 1,
            RiskLevel::Medium => self.medium += 1,
            RiskLevel::High => self.high += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub file_conflicts: usize,
    pub id_conflicts: usize,
    pub by_risk: RiskCounts,
    pub by_domain: BTreeMap<String, usize>,
}

/// The `conflicts.v1` document.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictReport {
    pub schema: &'static str,
    pub generated_at: String,
    pub context: ReportContext,
    pub file_level: Vec<FileConflict>,
    pub id_level: Vec<ConflictUnit>,
    pub summary: ReportSummary,
    /// Stable hash over sorted unit keys, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbols_hash: Option<String>,
}

impl ConflictReport {
    /// Generate the report for a resolved playset.
    pub fn generate(resolver: &Resolver<'_>, with_symbols_hash: bool) -> Self {
        let resolution = resolver.resolve();
        let playset = resolver.playset();
        let registry = resolver.registry();

        let mut file_level = resolution.file_conflicts;
        file_level.sort_by(|a, b| a.relpath.cmp(&b.relpath));
        for conflict in &mut file_level {
            conflict.candidates.sort_by_key(|c| c.load_order);
        }

        let mut id_level = resolution.id_conflicts;
        id_level.sort_by(|a, b| a.unit_key.cmp(&b.unit_key));
        for conflict in &mut id_level {
            conflict.candidates.sort_by_key(|c| c.load_order);
        }

        let mut by_risk = RiskCounts::default();
        let mut by_domain: BTreeMap<String, usize> = BTreeMap::new();
        for conflict in &file_level {
            by_risk.bump(conflict.risk);
        }
        for conflict in &id_level {
            by_risk.bump(conflict.risk);
            *by_domain.entry(conflict.domain.clone()).or_default() += 1;
        }

        let vanilla_version = playset
            .cvids()
            .first()
            .and_then(|cvid| registry.vanilla_version_string(*cvid));
        let mod_names = playset
            .cvids()
            .iter()
            .filter(|cvid| {
                registry
                    .version(**cvid)
                    .map(|cv| cv.kind == VersionKind::Mod)
                    .unwrap_or(false)
            })
            .map(|cvid| registry.display_name(*cvid))
            .collect();

        let symbols_hash = with_symbols_hash.then(|| {
            let mut keys: Vec<&str> = id_level.iter().map(|c| c.unit_key.as_str()).collect();
            keys.sort_unstable();
            keys.dedup();
            let mut hasher = Sha256::new();
            for key in keys {
                hasher.update(key.as_bytes());
                hasher.update([0u8]);
            }
            ContentHash::from_digest(hasher.finalize().into()).to_hex()
        });

        let summary = ReportSummary {
            file_conflicts: file_level.len(),
            id_conflicts: id_level.len(),
            by_risk,
            by_domain,
        };

        Self {
            schema: REPORT_SCHEMA,
            generated_at: chrono::Utc::now().to_rfc3339(),
            context: ReportContext {
                playset: playset.cvids().iter().map(|c| c.value()).collect(),
                playset_hash: playset.identity().to_hex(),
                vanilla_version,
                mod_names,
            },
            file_level,
            id_level,
            summary,
            symbols_hash,
        }
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).expect("report serializes")
    }

    /// The document with `generated_at` blanked, for determinism checks
    /// and diffing.
    pub fn normalized_json(&self) -> String {
        let mut value = serde_json::to_value(self).expect("report serializes");
        value["generated_at"] = serde_json::Value::String(String::new());
        serde_json::to_string_pretty(&value).expect("report serializes")
    }
}
