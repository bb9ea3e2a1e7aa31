//! Contribution units, conflict units, and risk scoring.
//!
//! A contribution unit is the AST slice one source supplies for a
//! unit key (`trait:brave`, `on_action:on_yearly_pulse`). A conflict unit
//! groups two or more contributions for the same key across a playset and
//! names the winner under load order.

use crate::parsing::script::AstNode;
use crate::types::{Cvid, FileId};
use serde::{Deserialize, Serialize};

/// `<domain>:<name>` unit-key format.
pub fn make_unit_key(domain: &str, name: &str) -> String {
    format!("{domain}:{name}")
}

/// The AST slice one source contributes to a unit key.
#[derive(Debug, Clone)]
pub struct ContributionUnit {
    pub unit_key: String,
    pub domain: String,
    pub cvid: Cvid,
    pub load_order: usize,
    pub file_id: FileId,
    pub line: u32,
    pub node: AstNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// One competing source inside a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictCandidate {
    pub cvid: u32,
    pub source_name: String,
    pub load_order: usize,
}

/// A grouped conflict for one unit key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictUnit {
    pub unit_key: String,
    pub domain: String,
    pub candidates: Vec<ConflictCandidate>,
    /// Winning cvid under the domain's policy.
    pub winner: u32,
    pub risk: RiskLevel,
}

/// Inputs to risk scoring for one conflict.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskSignals {
    pub candidate_count: usize,
    /// A losing contributor defines properties the winner lacks.
    pub loser_defines_missing_properties: bool,
    /// A contributor looks like a dedicated compatibility patch.
    pub has_compat_patch: bool,
    /// The conflict came from a single-slot collision.
    pub single_slot: bool,
}

/// Bucket a conflict into low / medium / high.
pub fn score_risk(signals: RiskSignals) -> RiskLevel {
    let mut score: i32 = 0;
    if signals.candidate_count > 2 {
        score += 1;
    }
    if signals.candidate_count > 4 {
        score += 1;
    }
    if signals.loser_defines_missing_properties {
        score += 1;
    }
    if signals.single_slot {
        score += 1;
    }
    if signals.has_compat_patch {
        // A dedicated patch is an intentional, curated override.
        score -= 1;
    }
    match score {
        i32::MIN..=0 => RiskLevel::Low,
        1 => RiskLevel::Medium,
        _ => RiskLevel::High,
    }
}

/// Heuristic: does this source name look like a compatibility patch?
pub fn looks_like_compat_patch(name: &str) -> bool {
    let folded = name.to_lowercase();
    folded.contains("compat") || folded.contains("patch")
}

/// Top-level property keys a block defines, for the missing-property
/// signal.
pub fn property_keys(node: &AstNode) -> Vec<&str> {
    node.children()
        .iter()
        .filter_map(|child| match child {
            AstNode::Block { name, .. } => Some(name.as_str()),
            AstNode::Assignment { key, .. } => Some(key.as_str()),
            _ => None,
        })
        .collect()
}

/// True when any loser defines a top-level property absent from the
/// winner's slice.
pub fn losers_define_missing_properties(winner: &AstNode, losers: &[&AstNode]) -> bool {
    let winner_keys: std::collections::HashSet<&str> = property_keys(winner).into_iter().collect();
    losers.iter().any(|loser| {
        property_keys(loser)
            .iter()
            .any(|key| !winner_keys.contains(key))
    })
}
