//! The merge-policy matrix: how each content domain resolves competing
//! definitions across a load order.
//!
//! Four policies cover the engine's behavior. OVERRIDE is the default for
//! nearly everything; on-actions merge containers with per-sub-block
//! rules; localization and defines override per key; GUI types are
//! first-in-order. The matrix is data and extensible per domain.

use crate::paths::VPath;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Last definition wins completely.
    Override,
    /// Containers merge; sub-blocks follow [`SubBlockPolicy`] rules.
    ContainerMerge,
    /// Each key is independent; last definition per key wins.
    PerKeyOverride,
    /// First definition wins.
    Fios,
}

/// How sub-blocks within a CONTAINER_MERGE container combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubBlockPolicy {
    /// Entries from all sources are appended, in load order.
    AppendList,
    /// One slot per container; last wins and a conflict is reported.
    SingleSlotConflict,
    /// One slot; last wins silently.
    SingleSlotOverride,
}

/// Per-domain merge configuration.
#[derive(Debug, Clone)]
pub struct DomainConfig {
    pub domain: String,
    pub file_glob: glob::Pattern,
    /// Filter for container keys that belong to this domain.
    pub key_pattern: Option<Regex>,
    pub policy: MergePolicy,
    pub sub_rules: HashMap<String, SubBlockPolicy>,
    pub description: String,
}

impl DomainConfig {
    fn new(
        domain: &str,
        file_glob: &str,
        key_pattern: Option<&str>,
        policy: MergePolicy,
        description: &str,
    ) -> Self {
        Self {
            domain: domain.to_string(),
            file_glob: glob::Pattern::new(file_glob).expect("static glob"),
            key_pattern: key_pattern.map(|p| Regex::new(p).expect("static regex")),
            policy,
            sub_rules: HashMap::new(),
            description: description.to_string(),
        }
    }

    fn with_sub_rules(mut self, rules: &[(&str, SubBlockPolicy)]) -> Self {
        self.sub_rules = rules
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        self
    }

    /// Rule for one sub-key. Unlisted sub-keys override silently.
    pub fn sub_rule(&self, key: &str) -> SubBlockPolicy {
        self.sub_rules
            .get(key)
            .copied()
            .unwrap_or(SubBlockPolicy::SingleSlotOverride)
    }

    pub fn accepts_key(&self, key: &str) -> bool {
        match &self.key_pattern {
            Some(pattern) => pattern.is_match(key),
            None => true,
        }
    }
}

/// The full policy matrix.
#[derive(Debug, Clone)]
pub struct PolicyMatrix {
    domains: Vec<DomainConfig>,
}

impl Default for PolicyMatrix {
    fn default() -> Self {
        use SubBlockPolicy::*;
        let domains = vec![
            DomainConfig::new(
                "tradition",
                "common/culture/traditions/*.txt",
                Some("^tradition_"),
                MergePolicy::Override,
                "cultural traditions, last definition wins",
            ),
            DomainConfig::new(
                "culture",
                "common/culture/cultures/*.txt",
                None,
                MergePolicy::Override,
                "cultures, last definition wins",
            ),
            DomainConfig::new(
                "on_action",
                "common/on_action/*.txt",
                Some("^on_"),
                MergePolicy::ContainerMerge,
                "on-actions merge containers; events append, effect/trigger conflict",
            )
            .with_sub_rules(&[
                ("events", AppendList),
                ("on_actions", AppendList),
                ("random_events", AppendList),
                ("random_on_actions", AppendList),
                ("first_valid", AppendList),
                ("first_valid_on_action", AppendList),
                ("effect", SingleSlotConflict),
                ("trigger", SingleSlotConflict),
                ("weight_multiplier", SingleSlotOverride),
                ("fallback", SingleSlotOverride),
            ]),
            DomainConfig::new(
                "event",
                "events/**/*.txt",
                None,
                MergePolicy::Override,
                "events, last definition wins",
            ),
            DomainConfig::new(
                "event",
                "events/*.txt",
                None,
                MergePolicy::Override,
                "events, last definition wins",
            ),
            DomainConfig::new(
                "decision",
                "common/decisions/*.txt",
                None,
                MergePolicy::Override,
                "decisions, last definition wins",
            ),
            DomainConfig::new(
                "scripted_effect",
                "common/scripted_effects/*.txt",
                None,
                MergePolicy::Override,
                "scripted effects, last definition wins",
            ),
            DomainConfig::new(
                "scripted_trigger",
                "common/scripted_triggers/*.txt",
                None,
                MergePolicy::Override,
                "scripted triggers, last definition wins",
            ),
            DomainConfig::new(
                "trait",
                "common/traits/*.txt",
                None,
                MergePolicy::Override,
                "traits, last definition wins",
            ),
            DomainConfig::new(
                "localization",
                "localization/**/*.yml",
                None,
                MergePolicy::PerKeyOverride,
                "localization, per-key override",
            ),
            DomainConfig::new(
                "defines",
                "common/defines/*.txt",
                None,
                MergePolicy::PerKeyOverride,
                "defines, per-key override",
            ),
            DomainConfig::new(
                "gui_type",
                "gui/**/*.gui",
                None,
                MergePolicy::Fios,
                "GUI types, first definition wins",
            ),
        ];
        Self { domains }
    }
}

impl PolicyMatrix {
    pub fn with_domain(mut self, config: DomainConfig) -> Self {
        self.domains.push(config);
        self
    }

    /// The domain a file belongs to, by first matching glob.
    pub fn domain_for_path(&self, relpath: &VPath) -> Option<&DomainConfig> {
        let key = relpath.cmp_key();
        self.domains.iter().find(|d| d.file_glob.matches(&key))
    }

    pub fn domain_named(&self, name: &str) -> Option<&DomainConfig> {
        self.domains.iter().find(|d| d.domain == name)
    }

    /// Folder-level policy for file resolution, independent of symbol
    /// domains.
    pub fn policy_for_folder(&self, relpath: &VPath) -> MergePolicy {
        if relpath.starts_with("common/on_action") {
            return MergePolicy::ContainerMerge;
        }
        if relpath.starts_with("common/defines") || relpath.starts_with("localization") {
            return MergePolicy::PerKeyOverride;
        }
        if relpath.starts_with("gui") {
            return MergePolicy::Fios;
        }
        MergePolicy::Override
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domains_resolve_by_path() {
        let matrix = PolicyMatrix::default();
        let on_action = matrix
            .domain_for_path(&VPath::new("common/on_action/00_yearly.txt"))
            .unwrap();
        assert_eq!(on_action.domain, "on_action");
        assert_eq!(on_action.policy, MergePolicy::ContainerMerge);

        let traits = matrix
            .domain_for_path(&VPath::new("common/traits/00_traits.txt"))
            .unwrap();
        assert_eq!(traits.policy, MergePolicy::Override);

        assert!(matrix.domain_for_path(&VPath::new("history/x.txt")).is_none());
    }

    #[test]
    fn on_action_sub_rules_match_engine_behavior() {
        let matrix = PolicyMatrix::default();
        let cfg = matrix.domain_named("on_action").unwrap();
        assert_eq!(cfg.sub_rule("events"), SubBlockPolicy::AppendList);
        assert_eq!(cfg.sub_rule("effect"), SubBlockPolicy::SingleSlotConflict);
        assert_eq!(cfg.sub_rule("trigger"), SubBlockPolicy::SingleSlotConflict);
        assert_eq!(
            cfg.sub_rule("weight_multiplier"),
            SubBlockPolicy::SingleSlotOverride
        );
        // Unlisted sub-keys override silently.
        assert_eq!(cfg.sub_rule("anything_else"), SubBlockPolicy::SingleSlotOverride);
    }

    #[test]
    fn key_patterns_filter_containers() {
        let matrix = PolicyMatrix::default();
        let cfg = matrix.domain_named("on_action").unwrap();
        assert!(cfg.accepts_key("on_yearly_pulse"));
        assert!(!cfg.accepts_key("helper_block"));
    }

    #[test]
    fn folder_policy_special_cases() {
        let matrix = PolicyMatrix::default();
        assert_eq!(
            matrix.policy_for_folder(&VPath::new("common/on_action/a.txt")),
            MergePolicy::ContainerMerge
        );
        assert_eq!(
            matrix.policy_for_folder(&VPath::new("localization/english/a.yml")),
            MergePolicy::PerKeyOverride
        );
        assert_eq!(
            matrix.policy_for_folder(&VPath::new("gui/window.gui")),
            MergePolicy::Fios
        );
        assert_eq!(
            matrix.policy_for_folder(&VPath::new("common/traits/a.txt")),
            MergePolicy::Override
        );
    }

    #[test]
    fn matrix_is_extensible() {
        let matrix = PolicyMatrix::default().with_domain(DomainConfig::new(
            "doctrine",
            "common/religion/doctrines/*.txt",
            None,
            MergePolicy::Override,
            "doctrines",
        ));
        assert!(
            matrix
                .domain_for_path(&VPath::new("common/religion/doctrines/00.txt"))
                .is_some()
        );
    }
}
