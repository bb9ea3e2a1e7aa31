//! Load-order-aware resolution: file-level and unit-level override
//! computation under the policy matrix.
//!
//! Everything here is a pure function of (playset, policy matrix, cache
//! contents). Missing or failed ASTs simply contribute nothing; queries
//! and reports are best-effort over what is indexed.

pub mod contributions;
pub mod policies;
pub mod report;

pub use contributions::{
    ConflictCandidate, ConflictUnit, ContributionUnit, RiskLevel, RiskSignals, make_unit_key,
    score_risk,
};
pub use policies::{DomainConfig, MergePolicy, PolicyMatrix, SubBlockPolicy};
pub use report::ConflictReport;

use crate::artifacts::ArtifactStore;
use crate::parsing::script::{AstNode, Operator};
use crate::registry::playset::Playset;
use crate::registry::{FileRecord, Registry};
use crate::types::{Cvid, FileKind};
use contributions::{looks_like_compat_patch, losers_define_missing_properties};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// One source contributing a file at a relpath.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileCandidate {
    pub cvid: u32,
    pub source_name: String,
    pub load_order: usize,
}

/// A file-level collision: one relpath, several sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileConflict {
    pub relpath: String,
    pub candidates: Vec<FileCandidate>,
    pub winner_by_load_order: u32,
    pub risk: RiskLevel,
}

/// The merged form of a CONTAINER_MERGE unit.
#[derive(Debug, Clone)]
pub struct MergedUnit {
    pub unit_key: String,
    pub winner: Cvid,
    pub block: AstNode,
    pub conflicts: Vec<ConflictUnit>,
}

/// Full resolution of a playset.
#[derive(Debug)]
pub struct Resolution {
    pub file_conflicts: Vec<FileConflict>,
    pub id_conflicts: Vec<ConflictUnit>,
    pub merged_units: BTreeMap<String, MergedUnit>,
}

/// The resolver: borrows the catalog, artifact cache, and policy matrix.
pub struct Resolver<'a> {
    registry: &'a Registry,
    artifacts: &'a ArtifactStore,
    policies: &'a PolicyMatrix,
    playset: &'a Playset,
}

impl<'a> Resolver<'a> {
    pub fn new(
        registry: &'a Registry,
        artifacts: &'a ArtifactStore,
        policies: &'a PolicyMatrix,
        playset: &'a Playset,
    ) -> Self {
        Self {
            registry,
            artifacts,
            policies,
            playset,
        }
    }

    pub fn playset(&self) -> &Playset {
        self.playset
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    /// All live file records per relpath, in load order.
    fn files_by_relpath(&self) -> BTreeMap<String, Vec<(usize, &'a FileRecord)>> {
        let mut map: BTreeMap<String, Vec<(usize, &FileRecord)>> = BTreeMap::new();
        for (rank, cvid) in self.playset.cvids().iter().enumerate() {
            for record in self.registry.files_of(*cvid) {
                map.entry(record.relpath.cmp_key())
                    .or_default()
                    .push((rank, record));
            }
        }
        map
    }

    /// Winning file record per relpath under the folder policy.
    pub fn file_winners(&self) -> BTreeMap<String, &'a FileRecord> {
        let mut winners = BTreeMap::new();
        for (key, candidates) in self.files_by_relpath() {
            let policy = self.policies.policy_for_folder(&candidates[0].1.relpath);
            let winner = match policy {
                MergePolicy::Fios => candidates.first(),
                _ => candidates.last(),
            };
            if let Some((_, record)) = winner {
                winners.insert(key, *record);
            }
        }
        winners
    }

    /// The winning record for one relpath, if any source provides it.
    pub fn resolve_file(&self, relpath: &crate::paths::VPath) -> Option<&'a FileRecord> {
        let mut hit: Option<(usize, &FileRecord)> = None;
        for (rank, cvid) in self.playset.cvids().iter().enumerate() {
            if let Some(record) = self.registry.lookup(*cvid, relpath) {
                if record.deleted {
                    continue;
                }
                match self.policies.policy_for_folder(relpath) {
                    MergePolicy::Fios => {
                        if hit.is_none() {
                            hit = Some((rank, record));
                        }
                    }
                    _ => hit = Some((rank, record)),
                }
            }
        }
        hit.map(|(_, record)| record)
    }

    /// File-level conflicts: relpaths provided by two or more sources.
    /// PER_KEY_OVERRIDE folders resolve per key, so they are excluded
    /// here.
    pub fn file_conflicts(&self) -> Vec<FileConflict> {
        let mut conflicts = Vec::new();
        for (_, candidates) in self.files_by_relpath() {
            if candidates.len() < 2 {
                continue;
            }
            let relpath = &candidates[0].1.relpath;
            let policy = self.policies.policy_for_folder(relpath);
            if policy == MergePolicy::PerKeyOverride {
                continue;
            }
            let names: Vec<String> = candidates
                .iter()
                .map(|(_, r)| self.registry.display_name(r.cvid))
                .collect();
            let winner = match policy {
                MergePolicy::Fios => candidates[0].1.cvid,
                _ => candidates[candidates.len() - 1].1.cvid,
            };
            let risk = score_risk(RiskSignals {
                candidate_count: candidates.len(),
                has_compat_patch: names.iter().any(|n| looks_like_compat_patch(n)),
                ..Default::default()
            });
            conflicts.push(FileConflict {
                relpath: relpath.as_str().to_string(),
                candidates: candidates
                    .iter()
                    .zip(&names)
                    .map(|((rank, record), name)| FileCandidate {
                        cvid: record.cvid.value(),
                        source_name: name.clone(),
                        load_order: *rank,
                    })
                    .collect(),
                winner_by_load_order: winner.value(),
                risk,
            });
        }
        conflicts.sort_by(|a, b| a.relpath.cmp(&b.relpath));
        conflicts
    }

    /// Gather contribution units from every script file whose domain the
    /// policy matrix knows. One unit per (unit_key, cvid): within one
    /// source, the last definition wins before cross-source resolution.
    pub fn contributions(&self) -> Vec<ContributionUnit> {
        let mut per_key: IndexMap<(String, Cvid), ContributionUnit> = IndexMap::new();
        for (rank, cvid) in self.playset.cvids().iter().enumerate() {
            let mut records: Vec<&FileRecord> = self
                .registry
                .files_of(*cvid)
                .filter(|r| r.kind == FileKind::Script)
                .collect();
            records.sort_by(|a, b| a.relpath.cmp_key().cmp(&b.relpath.cmp_key()));
            for record in records {
                let Some(cfg) = self.policies.domain_for_path(&record.relpath) else {
                    continue;
                };
                let Ok(Some(artifact)) = self.artifacts.load_ast(&record.content_hash) else {
                    continue;
                };
                if !artifact.parse_ok {
                    continue;
                }
                for child in artifact.root.children() {
                    let (name, line) = match child {
                        AstNode::Block { name, line, .. } => (name.as_str(), *line),
                        AstNode::Assignment { key, line, .. } => (key.as_str(), *line),
                        _ => continue,
                    };
                    if name.starts_with('@') || !cfg.accepts_key(name) {
                        continue;
                    }
                    if cfg.domain == "event" && name == "namespace" {
                        continue;
                    }
                    let unit_key = make_unit_key(&cfg.domain, name);
                    per_key.insert(
                        (unit_key.clone(), *cvid),
                        ContributionUnit {
                            unit_key,
                            domain: cfg.domain.clone(),
                            cvid: *cvid,
                            load_order: rank,
                            file_id: record.file_id,
                            line,
                            node: child.clone(),
                        },
                    );
                }
            }
        }
        per_key.into_values().collect()
    }

    /// Unit-level resolution across the playset.
    pub fn resolve_units(&self) -> (Vec<ConflictUnit>, BTreeMap<String, MergedUnit>) {
        let mut groups: IndexMap<String, Vec<ContributionUnit>> = IndexMap::new();
        for unit in self.contributions() {
            groups.entry(unit.unit_key.clone()).or_default().push(unit);
        }

        let mut conflicts = Vec::new();
        let mut merged = BTreeMap::new();
        for (unit_key, mut group) in groups {
            group.sort_by_key(|u| u.load_order);
            let Some(cfg) = self.policies.domain_named(&group[0].domain) else {
                continue;
            };
            match cfg.policy {
                MergePolicy::ContainerMerge => {
                    let unit = self.merge_container(cfg, &unit_key, &group);
                    conflicts.extend(unit.conflicts.iter().cloned());
                    merged.insert(unit_key, unit);
                }
                MergePolicy::Override | MergePolicy::PerKeyOverride | MergePolicy::Fios => {
                    if group.len() < 2 {
                        continue;
                    }
                    let winner = match cfg.policy {
                        MergePolicy::Fios => &group[0],
                        _ => &group[group.len() - 1],
                    };
                    let losers: Vec<&AstNode> = group
                        .iter()
                        .filter(|u| u.cvid != winner.cvid)
                        .map(|u| &u.node)
                        .collect();
                    let candidates = self.candidates_of(&group);
                    let risk = score_risk(RiskSignals {
                        candidate_count: group.len(),
                        loser_defines_missing_properties: losers_define_missing_properties(
                            &winner.node,
                            &losers,
                        ),
                        has_compat_patch: candidates
                            .iter()
                            .any(|c| looks_like_compat_patch(&c.source_name)),
                        single_slot: false,
                    });
                    conflicts.push(ConflictUnit {
                        unit_key,
                        domain: cfg.domain.clone(),
                        candidates,
                        winner: winner.cvid.value(),
                        risk,
                    });
                }
            }
        }
        (conflicts, merged)
    }

    fn candidates_of(&self, group: &[ContributionUnit]) -> Vec<ConflictCandidate> {
        group
            .iter()
            .map(|u| ConflictCandidate {
                cvid: u.cvid.value(),
                source_name: self.registry.display_name(u.cvid),
                load_order: u.load_order,
            })
            .collect()
    }

    /// CONTAINER_MERGE for one unit: sub-lists append in cv-order without
    /// duplicates, single slots take the last contributor, and single-slot
    /// collisions become conflicts of their own.
    fn merge_container(
        &self,
        cfg: &DomainConfig,
        unit_key: &str,
        group: &[ContributionUnit],
    ) -> MergedUnit {
        let name = unit_key
            .split_once(':')
            .map(|(_, n)| n)
            .unwrap_or(unit_key)
            .to_string();
        let first = &group[0];

        // Merged children in first-seen sub-key order.
        let mut slots: IndexMap<String, AstNode> = IndexMap::new();
        // Which sources touched each single-slot sub-key.
        let mut slot_sources: HashMap<String, Vec<&ContributionUnit>> = HashMap::new();

        for contribution in group {
            for child in contribution.node.children() {
                let key = match child {
                    AstNode::Block { name, .. } => name.clone(),
                    AstNode::Assignment { key, .. } => key.clone(),
                    _ => continue,
                };
                match cfg.sub_rule(&key) {
                    SubBlockPolicy::AppendList => {
                        let incoming = list_items(child);
                        match slots.get_mut(&key) {
                            Some(existing) => append_unique(existing, incoming),
                            None => {
                                let mut base = child.clone();
                                normalize_list(&mut base);
                                slots.insert(key, base);
                            }
                        }
                    }
                    SubBlockPolicy::SingleSlotConflict => {
                        slot_sources.entry(key.clone()).or_default().push(contribution);
                        slots.insert(key, child.clone());
                    }
                    SubBlockPolicy::SingleSlotOverride => {
                        slots.insert(key, child.clone());
                    }
                }
            }
        }

        let mut conflicts = Vec::new();
        for (sub_key, sources) in &slot_sources {
            let distinct: HashSet<Cvid> = sources.iter().map(|u| u.cvid).collect();
            if distinct.len() < 2 {
                continue;
            }
            let group_sorted: Vec<ContributionUnit> = sources.iter().map(|u| (*u).clone()).collect();
            let winner = sources.last().expect("non-empty sources").cvid;
            let candidates = self.candidates_of(&group_sorted);
            let risk = score_risk(RiskSignals {
                candidate_count: distinct.len(),
                single_slot: true,
                has_compat_patch: candidates
                    .iter()
                    .any(|c| looks_like_compat_patch(&c.source_name)),
                ..Default::default()
            });
            conflicts.push(ConflictUnit {
                unit_key: format!("{unit_key}.{sub_key}"),
                domain: cfg.domain.clone(),
                candidates,
                winner: winner.value(),
                risk,
            });
        }
        conflicts.sort_by(|a, b| a.unit_key.cmp(&b.unit_key));

        let winner = group.last().expect("non-empty group").cvid;
        let block = AstNode::Block {
            name,
            operator: Operator::Assign,
            line: first.line,
            column: 1,
            children: slots.into_values().collect(),
        };
        MergedUnit {
            unit_key: unit_key.to_string(),
            winner,
            block,
            conflicts,
        }
    }

    /// Localization conflicts: per (language, key), last definition wins.
    pub fn localization_conflicts(&self) -> Vec<ConflictUnit> {
        // (language, key) → contributors in load order.
        let mut groups: IndexMap<(String, String), Vec<(usize, Cvid)>> = IndexMap::new();
        for (rank, cvid) in self.playset.cvids().iter().enumerate() {
            let mut seen_this_cv: HashSet<(String, String)> = HashSet::new();
            let mut records: Vec<&FileRecord> = self
                .registry
                .files_of(*cvid)
                .filter(|r| r.kind == FileKind::Localization)
                .collect();
            records.sort_by(|a, b| a.relpath.cmp_key().cmp(&b.relpath.cmp_key()));
            for record in records {
                for row in self.artifacts.localization_of(&record.content_hash) {
                    let group_key = (row.language.clone(), row.key.clone());
                    if seen_this_cv.insert(group_key.clone()) {
                        groups.entry(group_key).or_default().push((rank, *cvid));
                    }
                }
            }
        }

        let mut conflicts = Vec::new();
        for ((_, key), contributors) in groups {
            if contributors.len() < 2 {
                continue;
            }
            let candidates: Vec<ConflictCandidate> = contributors
                .iter()
                .map(|(rank, cvid)| ConflictCandidate {
                    cvid: cvid.value(),
                    source_name: self.registry.display_name(*cvid),
                    load_order: *rank,
                })
                .collect();
            let winner = contributors[contributors.len() - 1].1;
            let risk = score_risk(RiskSignals {
                candidate_count: contributors.len(),
                has_compat_patch: candidates
                    .iter()
                    .any(|c| looks_like_compat_patch(&c.source_name)),
                ..Default::default()
            });
            conflicts.push(ConflictUnit {
                unit_key: make_unit_key("localization", &key),
                domain: "localization".to_string(),
                candidates,
                winner: winner.value(),
                risk,
            });
        }
        conflicts
    }

    /// Complete resolution: file level plus unit level plus localization.
    pub fn resolve(&self) -> Resolution {
        let file_conflicts = self.file_conflicts();
        let (mut id_conflicts, merged_units) = self.resolve_units();
        id_conflicts.extend(self.localization_conflicts());
        id_conflicts.sort_by(|a, b| a.unit_key.cmp(&b.unit_key));
        Resolution {
            file_conflicts,
            id_conflicts,
            merged_units,
        }
    }
}

/// Items contributed by an append-list sub-node, whatever shape it
/// parsed as.
fn list_items(node: &AstNode) -> Vec<AstNode> {
    match node {
        AstNode::Assignment { value, .. } => match &**value {
            AstNode::List { items, .. } => items.clone(),
            other => vec![(*other).clone()],
        },
        AstNode::Block { children, .. } => children.clone(),
        other => vec![other.clone()],
    }
}

/// Force an append-list slot into assignment-of-list shape so later
/// appends have somewhere to land.
fn normalize_list(node: &mut AstNode) {
    if let AstNode::Block {
        name,
        operator,
        line,
        column,
        children,
    } = node
    {
        *node = AstNode::Assignment {
            key: name.clone(),
            operator: *operator,
            line: *line,
            column: *column,
            value: Box::new(AstNode::List {
                line: *line,
                column: *column,
                items: children.clone(),
            }),
        };
    }
}

/// Append items not already present (by rendered form), preserving order.
fn append_unique(slot: &mut AstNode, incoming: Vec<AstNode>) {
    let AstNode::Assignment { value, .. } = slot else {
        return;
    };
    let AstNode::List { items, .. } = &mut **value else {
        return;
    };
    let mut seen: HashSet<String> = items.iter().map(AstNode::to_script).collect();
    for item in incoming {
        let rendered = item.to_script();
        if seen.insert(rendered) {
            items.push(item);
        }
    }
}
