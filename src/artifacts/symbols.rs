//! Symbol and reference extraction from script ASTs.
//!
//! Which AST shapes yield which symbol kinds is data, not code: the
//! extractor registry maps folder globs to domain kinds and can be
//! extended without touching the walker. Top-level statements in a routed
//! file define symbols of the file's domain; a configured key map yields
//! references.

use super::{RefRow, SymbolRow};
use crate::parsing::script::AstNode;
use crate::paths::VPath;
use crate::types::FileId;
use regex::Regex;
use std::collections::HashMap;

/// One extraction rule: files matching the glob define symbols of `kind`,
/// optionally filtered by a key pattern.
#[derive(Debug, Clone)]
pub struct ExtractorRule {
    pub kind: String,
    pub path_glob: glob::Pattern,
    pub key_pattern: Option<Regex>,
}

impl ExtractorRule {
    fn new(kind: &str, path_glob: &str, key_pattern: Option<&str>) -> Self {
        Self {
            kind: kind.to_string(),
            path_glob: glob::Pattern::new(path_glob).expect("static glob"),
            key_pattern: key_pattern.map(|p| Regex::new(p).expect("static regex")),
        }
    }
}

/// The registry of extraction rules plus the reference key map.
#[derive(Debug, Clone)]
pub struct ExtractorRegistry {
    rules: Vec<ExtractorRule>,
    /// assignment key → referenced symbol kind.
    ref_keys: HashMap<String, String>,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        let rules = vec![
            ExtractorRule::new("tradition", "common/culture/traditions/*.txt", Some("^tradition_")),
            ExtractorRule::new("culture", "common/culture/cultures/*.txt", None),
            ExtractorRule::new("on_action", "common/on_action/*.txt", Some("^on_")),
            ExtractorRule::new("trait", "common/traits/*.txt", None),
            ExtractorRule::new("decision", "common/decisions/*.txt", None),
            ExtractorRule::new("scripted_effect", "common/scripted_effects/*.txt", None),
            ExtractorRule::new("scripted_trigger", "common/scripted_triggers/*.txt", None),
            ExtractorRule::new("defines", "common/defines/*.txt", None),
            ExtractorRule::new("event", "events/**/*.txt", None),
            ExtractorRule::new("event", "events/*.txt", None),
        ];

        let ref_keys = [
            ("add_trait", "trait"),
            ("remove_trait", "trait"),
            ("has_trait", "trait"),
            ("trigger_event", "event"),
            ("culture", "culture"),
            ("has_culture", "culture"),
            ("has_tradition", "tradition"),
            ("decision", "decision"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self { rules, ref_keys }
    }
}

impl ExtractorRegistry {
    pub fn with_rule(mut self, rule: ExtractorRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_ref_key(mut self, key: &str, kind: &str) -> Self {
        self.ref_keys.insert(key.to_string(), kind.to_string());
        self
    }

    /// The domain kind a relpath's definitions belong to, if any rule
    /// matches.
    pub fn domain_of(&self, relpath: &VPath) -> Option<&ExtractorRule> {
        let key = relpath.cmp_key();
        self.rules.iter().find(|rule| rule.path_glob.matches(&key))
    }

    /// Extract symbol definitions from the top level of a parsed file.
    pub fn extract_symbols(
        &self,
        root: &AstNode,
        relpath: &VPath,
        file_id: FileId,
    ) -> Vec<SymbolRow> {
        let Some(rule) = self.domain_of(relpath) else {
            return Vec::new();
        };

        let mut rows = Vec::new();
        for child in root.children() {
            let (name, line) = match child {
                AstNode::Block { name, line, .. } => (name.as_str(), *line),
                AstNode::Assignment { key, line, .. } => (key.as_str(), *line),
                _ => continue,
            };
            // Top-level scripted values define their own kind regardless
            // of the file's domain.
            if let Some(stripped) = name.strip_prefix('@') {
                rows.push(SymbolRow {
                    name: stripped.to_string(),
                    kind: "scripted_value".to_string(),
                    defining_file_id: file_id,
                    line,
                    metadata: None,
                });
                continue;
            }
            if let Some(pattern) = &rule.key_pattern {
                if !pattern.is_match(name) {
                    continue;
                }
            }
            // Event files use `namespace = x` as a directive, not a
            // definition.
            if rule.kind == "event" && name == "namespace" {
                continue;
            }
            rows.push(SymbolRow {
                name: name.to_string(),
                kind: rule.kind.clone(),
                defining_file_id: file_id,
                line,
                metadata: None,
            });
        }
        rows
    }

    /// Extract references by walking every assignment whose key is in the
    /// reference map and whose value is a bare identifier.
    pub fn extract_refs(&self, root: &AstNode, file_id: FileId) -> Vec<RefRow> {
        let mut rows = Vec::new();
        self.walk_refs(root, file_id, &mut rows);
        rows
    }

    fn walk_refs(&self, node: &AstNode, file_id: FileId, out: &mut Vec<RefRow>) {
        match node {
            AstNode::Root { children, .. } | AstNode::Block { children, .. } => {
                for child in children {
                    self.walk_refs(child, file_id, out);
                }
            }
            AstNode::Assignment {
                key, value, line, ..
            } => {
                if let Some(kind) = self.ref_keys.get(key) {
                    if let AstNode::Value {
                        value,
                        value_type: crate::parsing::script::ValueType::Ident,
                        ..
                    } = &**value
                    {
                        out.push(RefRow {
                            name: value.clone(),
                            kind: kind.clone(),
                            using_file_id: file_id,
                            line: *line,
                            context: key.clone(),
                        });
                    }
                }
                self.walk_refs(value, file_id, out);
            }
            AstNode::List { items, .. } => {
                for item in items {
                    self.walk_refs(item, file_id, out);
                }
            }
            AstNode::Value { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::script::parse_source;

    fn fid() -> FileId {
        FileId::new(1).unwrap()
    }

    #[test]
    fn trait_file_defines_trait_symbols() {
        let outcome = parse_source(
            "trait_brave = { category = personality }\ntrait_craven = { category = personality }",
            "00_traits.txt",
        );
        let registry = ExtractorRegistry::default();
        let rows = registry.extract_symbols(
            &outcome.root,
            &VPath::new("common/traits/00_traits.txt"),
            fid(),
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "trait_brave");
        assert_eq!(rows[0].kind, "trait");
        assert_eq!(rows[0].line, 1);
    }

    #[test]
    fn key_pattern_filters_definitions() {
        let outcome = parse_source(
            "tradition_winter = { }\nhelper_block = { }",
            "00_traditions.txt",
        );
        let registry = ExtractorRegistry::default();
        let rows = registry.extract_symbols(
            &outcome.root,
            &VPath::new("common/culture/traditions/00_traditions.txt"),
            fid(),
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "tradition_winter");
    }

    #[test]
    fn unrouted_files_define_nothing() {
        let outcome = parse_source("whatever = {}", "x.txt");
        let registry = ExtractorRegistry::default();
        let rows = registry.extract_symbols(&outcome.root, &VPath::new("history/x.txt"), fid());
        assert!(rows.is_empty());
    }

    #[test]
    fn namespace_directive_is_not_an_event() {
        let outcome = parse_source(
            "namespace = my_events\nmy_events.0001 = { type = character_event }",
            "events.txt",
        );
        let registry = ExtractorRegistry::default();
        let rows =
            registry.extract_symbols(&outcome.root, &VPath::new("events/my_events.txt"), fid());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "my_events.0001");
        assert_eq!(rows[0].kind, "event");
    }

    #[test]
    fn scripted_values_keep_their_own_kind() {
        let outcome = parse_source("@cost = 50\ntrait_x = { }", "t.txt");
        let registry = ExtractorRegistry::default();
        let rows = registry.extract_symbols(
            &outcome.root,
            &VPath::new("common/traits/t.txt"),
            fid(),
        );
        assert_eq!(rows[0].name, "cost");
        assert_eq!(rows[0].kind, "scripted_value");
        assert_eq!(rows[1].kind, "trait");
    }

    #[test]
    fn refs_found_at_any_depth() {
        let outcome = parse_source(
            "my_events.1 = { immediate = { add_trait = brave trigger_event = other.2 } }",
            "e.txt",
        );
        let registry = ExtractorRegistry::default();
        let rows = registry.extract_refs(&outcome.root, fid());
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].name.as_str(), rows[0].kind.as_str()), ("brave", "trait"));
        assert_eq!((rows[1].name.as_str(), rows[1].kind.as_str()), ("other.2", "event"));
        assert_eq!(rows[0].context, "add_trait");
    }

    #[test]
    fn non_ident_values_are_not_refs() {
        let outcome = parse_source("add_trait = \"quoted\"\nculture = 5", "e.txt");
        let registry = ExtractorRegistry::default();
        assert!(registry.extract_refs(&outcome.root, fid()).is_empty());
    }

    #[test]
    fn registry_is_extensible() {
        let registry = ExtractorRegistry::default()
            .with_rule(ExtractorRule::new("doctrine", "common/religion/doctrines/*.txt", None))
            .with_ref_key("doctrine", "doctrine");
        let outcome = parse_source("doctrine_gender = { }", "d.txt");
        let rows = registry.extract_symbols(
            &outcome.root,
            &VPath::new("common/religion/doctrines/00_doctrines.txt"),
            fid(),
        );
        assert_eq!(rows[0].kind, "doctrine");
    }
}
