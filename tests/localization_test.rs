//! Localization pipeline: parse, reference extraction, per-key override.

mod common;

use common::{ContentRoot, TestStore, ingest_mod, ingest_vanilla};
use modraven::VPath;

#[test]
fn entries_round_trip_with_extracted_refs() {
    let store = TestStore::new();
    let mut engine = store.engine();
    let root = ContentRoot::new().with(
        "localization/english/traits_l_english.yml",
        "l_english:\n trait_brave:0 \"Brave\"\n desc:2 \"[ROOT.Char.GetName] is $bonus$.\"\n",
    );
    let cvid = ingest_vanilla(&mut engine, root.path(), "1.12.4");

    let cv = modraven::Cvid::new(cvid).unwrap();
    let record = engine
        .registry()
        .lookup(cv, &VPath::new("localization/english/traits_l_english.yml"))
        .unwrap();
    let rows = engine.artifacts().localization_of(&record.content_hash);
    assert_eq!(rows.len(), 2);

    assert_eq!(rows[0].key, "trait_brave");
    assert_eq!(rows[0].version, 0);
    assert_eq!(rows[0].raw_value, "Brave");
    assert_eq!(rows[0].plain_text, "Brave");

    let desc = &rows[1];
    assert_eq!(desc.key, "desc");
    assert_eq!(desc.version, 2);
    assert_eq!(desc.scripted_refs, vec!["ROOT.Char.GetName"]);
    assert_eq!(desc.variable_refs, vec!["bonus"]);
    assert_eq!(desc.plain_text, "is .");
}

#[test]
fn per_key_override_reports_the_last_definition() {
    let store = TestStore::new();
    let mut engine = store.engine();
    let vanilla = ContentRoot::new().with(
        "localization/english/a_l_english.yml",
        "l_english:\n shared_key:0 \"Vanilla\"\n vanilla_only:0 \"V\"\n",
    );
    let modded = ContentRoot::new().with(
        "localization/english/b_l_english.yml",
        "l_english:\n shared_key:1 \"Modded\"\n mod_only:0 \"M\"\n",
    );
    let cv0 = ingest_vanilla(&mut engine, vanilla.path(), "1.12.4");
    let cv1 = ingest_mod(&mut engine, modded.path(), "Loc Mod");

    let playset = engine.playset(&[cv0, cv1]).unwrap();
    let resolver = engine.resolver(&playset);
    let conflicts = resolver.localization_conflicts();

    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].unit_key, "localization:shared_key");
    assert_eq!(conflicts[0].winner, cv1);

    // Different filenames, so there is no file-level collision either.
    assert!(resolver.file_conflicts().is_empty());
}

#[test]
fn same_key_in_different_languages_is_not_a_conflict() {
    let store = TestStore::new();
    let mut engine = store.engine();
    let vanilla = ContentRoot::new()
        .with(
            "localization/english/a_l_english.yml",
            "l_english:\n greeting:0 \"Hello\"\n",
        )
        .with(
            "localization/french/a_l_french.yml",
            "l_french:\n greeting:0 \"Bonjour\"\n",
        );
    let modded = ContentRoot::new().with(
        "localization/english/b_l_english.yml",
        "l_english:\n farewell:0 \"Bye\"\n",
    );
    let cv0 = ingest_vanilla(&mut engine, vanilla.path(), "1.12.4");
    let cv1 = ingest_mod(&mut engine, modded.path(), "Loc Mod");

    let playset = engine.playset(&[cv0, cv1]).unwrap();
    let conflicts = engine.resolver(&playset).localization_conflicts();
    assert!(conflicts.is_empty(), "unexpected: {conflicts:?}");
}

#[test]
fn malformed_lines_do_not_block_the_rest() {
    let store = TestStore::new();
    let mut engine = store.engine();
    let root = ContentRoot::new().with(
        "localization/english/broken_l_english.yml",
        "l_english:\n broken: \"no close quote\n good:0 \"fine\"\n",
    );
    let cvid = ingest_vanilla(&mut engine, root.path(), "1.12.4");

    let cv = modraven::Cvid::new(cvid).unwrap();
    let record = engine
        .registry()
        .lookup(cv, &VPath::new("localization/english/broken_l_english.yml"))
        .unwrap();
    let rows = engine.artifacts().localization_of(&record.content_hash);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, "good");
}
