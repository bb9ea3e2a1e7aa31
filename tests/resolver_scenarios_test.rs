//! Resolver and report behavior across load orders: overrides, container
//! merges, single-slot conflicts, and report determinism.

mod common;

use common::{ContentRoot, TestStore, ingest_mod, ingest_vanilla};
use modraven::parsing::script::AstNode;
use modraven::resolve::RiskLevel;

/// Scenario: vanilla defines a trait, a mod redefines it. One id-level
/// conflict, mod wins, low risk.
#[test]
fn minimal_override_conflict() {
    let store = TestStore::new();
    let mut engine = store.engine();
    let vanilla = ContentRoot::new().with(
        "common/traits/00_traits.txt",
        "trait_brave = {\n\tcategory = personality\n}\n",
    );
    let modded = ContentRoot::new().with(
        "common/traits/00_traits.txt",
        "trait_brave = {\n\tcategory = martial\n}\n",
    );
    let cv0 = ingest_vanilla(&mut engine, vanilla.path(), "1.12.4");
    let cv1 = ingest_mod(&mut engine, modded.path(), "Martial Brave");

    let playset = engine.playset(&[cv0, cv1]).unwrap();
    let report = engine.report(&playset, false);

    assert_eq!(report.id_level.len(), 1);
    let conflict = &report.id_level[0];
    assert_eq!(conflict.unit_key, "trait:trait_brave");
    assert_eq!(conflict.candidates.len(), 2);
    assert_eq!(conflict.candidates[0].cvid, cv0);
    assert_eq!(conflict.candidates[1].cvid, cv1);
    assert_eq!(conflict.winner, cv1);
    assert_eq!(conflict.risk, RiskLevel::Low);

    // The same collision shows at file level too.
    assert_eq!(report.file_level.len(), 1);
    assert_eq!(report.file_level[0].relpath, "common/traits/00_traits.txt");
    assert_eq!(report.file_level[0].winner_by_load_order, cv1);
}

/// Scenario: on-action container merge. Events append across sources;
/// a trigger contributed by only one source is kept and uncontested.
#[test]
fn container_merge_appends_events() {
    let store = TestStore::new();
    let mut engine = store.engine();
    let vanilla = ContentRoot::new().with(
        "common/on_action/00_yearly.txt",
        "on_yearly_pulse = {\n\tevents = { a b }\n\ttrigger = { X = yes }\n}\n",
    );
    let modded = ContentRoot::new().with(
        "common/on_action/00_yearly.txt",
        "on_yearly_pulse = {\n\tevents = { c }\n}\n",
    );
    let cv0 = ingest_vanilla(&mut engine, vanilla.path(), "1.12.4");
    let cv1 = ingest_mod(&mut engine, modded.path(), "More Events");

    let playset = engine.playset(&[cv0, cv1]).unwrap();
    let resolver = engine.resolver(&playset);
    let (conflicts, merged) = resolver.resolve_units();

    // Appends and single-source triggers are not conflicts.
    assert!(conflicts.is_empty(), "unexpected: {conflicts:?}");

    let unit = merged.get("on_action:on_yearly_pulse").unwrap();
    let events = unit.block.child_named("events").unwrap();
    let items: Vec<String> = match events {
        AstNode::Assignment { value, .. } => match &**value {
            AstNode::List { items, .. } => items
                .iter()
                .map(|i| match i {
                    AstNode::Value { value, .. } => value.clone(),
                    other => panic!("unexpected item {other:?}"),
                })
                .collect(),
            other => panic!("expected list, got {other:?}"),
        },
        other => panic!("expected assignment, got {other:?}"),
    };
    assert_eq!(items, vec!["a", "b", "c"]);

    // The single-source trigger survives untouched.
    let trigger = unit.block.child_named("trigger").unwrap();
    assert!(trigger.child_named("X").is_some());
}

/// Scenario: both sources fill the same single slot. One conflict on the
/// sub-key, last contributor wins, medium risk.
#[test]
fn single_slot_collision_is_reported() {
    let store = TestStore::new();
    let mut engine = store.engine();
    let vanilla = ContentRoot::new().with(
        "common/on_action/00_yearly.txt",
        "on_yearly_pulse = {\n\teffect = { e_one = yes }\n}\n",
    );
    let modded = ContentRoot::new().with(
        "common/on_action/00_yearly.txt",
        "on_yearly_pulse = {\n\teffect = { e_two = yes }\n}\n",
    );
    let cv0 = ingest_vanilla(&mut engine, vanilla.path(), "1.12.4");
    let cv1 = ingest_mod(&mut engine, modded.path(), "Replacer");

    let playset = engine.playset(&[cv0, cv1]).unwrap();
    let report = engine.report(&playset, false);

    let slot: Vec<_> = report
        .id_level
        .iter()
        .filter(|c| c.unit_key == "on_action:on_yearly_pulse.effect")
        .collect();
    assert_eq!(slot.len(), 1);
    assert_eq!(slot[0].winner, cv1);
    assert_eq!(slot[0].risk, RiskLevel::Medium);

    // The merged container carries the winner's effect.
    let resolver = engine.resolver(&playset);
    let (_, merged) = resolver.resolve_units();
    let unit = merged.get("on_action:on_yearly_pulse").unwrap();
    let effect = unit.block.child_named("effect").unwrap();
    assert!(effect.child_named("e_two").is_some());
    assert!(effect.child_named("e_one").is_none());
}

/// Override monotonicity: with three sources defining the same relpath,
/// the highest load-order index wins.
#[test]
fn later_sources_win_file_overrides() {
    let store = TestStore::new();
    let mut engine = store.engine();
    let vanilla = ContentRoot::new().with("common/traits/t.txt", "trait_a = { v = 0 }");
    let mod_one = ContentRoot::new().with("common/traits/t.txt", "trait_a = { v = 1 }");
    let mod_two = ContentRoot::new().with("common/traits/t.txt", "trait_a = { v = 2 }");

    let cv0 = ingest_vanilla(&mut engine, vanilla.path(), "1.12.4");
    let cv1 = ingest_mod(&mut engine, mod_one.path(), "One");
    let cv2 = ingest_mod(&mut engine, mod_two.path(), "Two");

    let playset = engine.playset(&[cv0, cv1, cv2]).unwrap();
    let contents = engine
        .get_file(&playset, "common/traits/t.txt")
        .unwrap()
        .unwrap();
    assert_eq!(contents.cvid, cv2);
    assert!(contents.text.unwrap().contains("v = 2"));

    // Reordering the mods flips the winner.
    let flipped = engine.playset(&[cv0, cv2, cv1]).unwrap();
    let contents = engine
        .get_file(&flipped, "common/traits/t.txt")
        .unwrap()
        .unwrap();
    assert_eq!(contents.cvid, cv1);
}

/// Report determinism: two generations differ only in generated_at.
#[test]
fn report_is_deterministic() {
    let store = TestStore::new();
    let mut engine = store.engine();
    let vanilla = ContentRoot::new()
        .with("common/traits/t.txt", "trait_a = { x = 1 }\ntrait_b = { y = 2 }")
        .with(
            "localization/english/l_english.yml",
            "l_english:\n key_a:0 \"A\"\n",
        );
    let modded = ContentRoot::new()
        .with("common/traits/t.txt", "trait_a = { x = 9 }")
        .with(
            "localization/english/l_english.yml",
            "l_english:\n key_a:1 \"A-modded\"\n",
        );
    let cv0 = ingest_vanilla(&mut engine, vanilla.path(), "1.12.4");
    let cv1 = ingest_mod(&mut engine, modded.path(), "Overhaul");

    let playset = engine.playset(&[cv0, cv1]).unwrap();
    let first = engine.report(&playset, true);
    let second = engine.report(&playset, true);
    assert_eq!(first.normalized_json(), second.normalized_json());
    assert_eq!(first.symbols_hash, second.symbols_hash);
    assert!(first.symbols_hash.is_some());

    // Context carries names, never host paths.
    assert_eq!(first.context.vanilla_version.as_deref(), Some("1.12.4"));
    assert_eq!(first.context.mod_names, vec!["Overhaul"]);
    assert!(!first.normalized_json().contains("/tmp"));

    // Localization conflicts resolve per key.
    let loc: Vec<_> = first
        .id_level
        .iter()
        .filter(|c| c.unit_key == "localization:key_a")
        .collect();
    assert_eq!(loc.len(), 1);
    assert_eq!(loc[0].winner, cv1);

    // Per-key folders do not produce file-level conflicts.
    assert!(
        first
            .file_level
            .iter()
            .all(|f| !f.relpath.starts_with("localization/"))
    );
}

/// Compatibility patches soften the risk bucket.
#[test]
fn compat_patch_lowers_risk() {
    let store = TestStore::new();
    let mut engine = store.engine();
    let vanilla = ContentRoot::new().with("common/traits/t.txt", "trait_a = { v = 0 }");
    let mod_one = ContentRoot::new().with("common/traits/t.txt", "trait_a = { v = 1 }");
    let mod_two = ContentRoot::new().with("common/traits/t.txt", "trait_a = { v = 2 }");
    let patch = ContentRoot::new().with("common/traits/t.txt", "trait_a = { v = 3 }");

    let cv0 = ingest_vanilla(&mut engine, vanilla.path(), "1.12.4");
    let cv1 = ingest_mod(&mut engine, mod_one.path(), "One");
    let cv2 = ingest_mod(&mut engine, mod_two.path(), "Two");
    let cv3 = ingest_mod(&mut engine, patch.path(), "One+Two Compatibility Patch");

    let playset = engine.playset(&[cv0, cv1, cv2, cv3]).unwrap();
    let report = engine.report(&playset, false);
    let conflict = report
        .id_level
        .iter()
        .find(|c| c.unit_key == "trait:trait_a")
        .unwrap();
    // Four candidates would be medium, but a patch is in the mix.
    assert_eq!(conflict.candidates.len(), 4);
    assert_eq!(conflict.winner, cv3);
    assert_eq!(conflict.risk, RiskLevel::Low);
}
