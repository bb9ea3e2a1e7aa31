//! Playsets: ordered lists of content versions.
//!
//! A playset is a value supplied by the caller, not a stored row. Index 0
//! is the vanilla base; higher indices win under last-wins policies.
//! Launcher playset JSON can be converted to a playset against the
//! registry.

use super::Registry;
use crate::error::{RavenError, RavenResult};
use crate::types::{ContentHash, Cvid, VersionKind};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// An ordered list of cvids. Identity is the hash of the ordered list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playset {
    cvids: Vec<Cvid>,
}

impl Playset {
    /// Validate and build a playset: no duplicates, first entry vanilla.
    pub fn new(registry: &Registry, cvids: Vec<Cvid>) -> RavenResult<Self> {
        if cvids.is_empty() {
            return Err(RavenError::InvalidPlayset {
                reason: "playset is empty".into(),
            });
        }
        let mut seen = HashSet::new();
        for cvid in &cvids {
            if !seen.insert(*cvid) {
                return Err(RavenError::InvalidPlayset {
                    reason: format!("cv{} listed more than once", cvid.value()),
                });
            }
            registry.version(*cvid)?;
        }
        let base = registry.version(cvids[0])?;
        if base.kind != VersionKind::Vanilla {
            return Err(RavenError::InvalidPlayset {
                reason: "first entry must be a vanilla version".into(),
            });
        }
        Ok(Self { cvids })
    }

    pub fn cvids(&self) -> &[Cvid] {
        &self.cvids
    }

    pub fn len(&self) -> usize {
        self.cvids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cvids.is_empty()
    }

    /// Load-order rank of a cvid, 0 = vanilla.
    pub fn rank_of(&self, cvid: Cvid) -> Option<usize> {
        self.cvids.iter().position(|c| *c == cvid)
    }

    pub fn contains(&self, cvid: Cvid) -> bool {
        self.cvids.contains(&cvid)
    }

    /// Identity hash over the ordered cvid list.
    pub fn identity(&self) -> ContentHash {
        let mut hasher = Sha256::new();
        for cvid in &self.cvids {
            hasher.update(cvid.value().to_le_bytes());
        }
        ContentHash::from_digest(hasher.finalize().into())
    }
}

/// One mod row in the launcher's playset export. Only these fields are
/// used; everything else in the document is ignored.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LauncherMod {
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(rename = "steamId", default)]
    pub steam_id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub position: i64,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LauncherPlayset {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mods: Vec<LauncherMod>,
}

/// Result of converting a launcher playset against the registry.
#[derive(Debug)]
pub struct LauncherImport {
    pub playset: Playset,
    /// Enabled entries that could not be resolved to an ingested CV.
    pub unresolved: Vec<String>,
}

/// Convert launcher JSON to a playset: enabled mods, ordered by position,
/// resolved by workshop id first, then by display name, appended after
/// the given vanilla CV.
pub fn import_launcher_playset(
    registry: &Registry,
    vanilla_cv: Cvid,
    doc: &LauncherPlayset,
) -> RavenResult<LauncherImport> {
    let mut mods: Vec<&LauncherMod> = doc.mods.iter().filter(|m| m.enabled).collect();
    mods.sort_by_key(|m| m.position);

    let mut cvids = vec![vanilla_cv];
    let mut unresolved = Vec::new();
    for entry in mods {
        let resolved = entry
            .steam_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .and_then(|wid| registry.latest_mod_cv_by_workshop_id(wid))
            .or_else(|| registry.latest_mod_cv_by_name(&entry.display_name));
        match resolved {
            Some(cvid) if !cvids.contains(&cvid) => cvids.push(cvid),
            Some(_) => {}
            None => unresolved.push(entry.display_name.clone()),
        }
    }

    Ok(LauncherImport {
        playset: Playset::new(registry, cvids)?,
        unresolved,
    })
}
