//! Playset-scoped query surface: symbols, files, content, negatives.

mod common;

use common::{ContentRoot, TestStore, ingest_mod, ingest_vanilla};

fn two_source_store() -> (TestStore, modraven::Engine, u32, u32) {
    let store = TestStore::new();
    let mut engine = store.engine();
    let vanilla = ContentRoot::new()
        .with(
            "common/traits/00_traits.txt",
            "trait_brave = {\n\tcategory = personality\n}\ntrait_craven = {\n\tcategory = personality\n}\n",
        )
        .with("events/base_events.txt", "namespace = base\nbase.1 = {\n\tadd_trait = brave\n}\n");
    let modded = ContentRoot::new().with(
        "common/traits/00_traits.txt",
        "trait_brave = {\n\tcategory = martial\n}\n",
    );
    let cv0 = ingest_vanilla(&mut engine, vanilla.path(), "1.12.4");
    let cv1 = ingest_mod(&mut engine, modded.path(), "Martial");
    (store, engine, cv0, cv1)
}

#[test]
fn symbol_search_is_exact_then_prefix() {
    let (_store, engine, cv0, cv1) = two_source_store();
    let playset = engine.playset(&[cv0, cv1]).unwrap();

    let hits = engine.search_symbols(&playset, "trait_brave", 10);
    // Both definitions are visible, each citing its source.
    assert_eq!(hits.iter().filter(|h| h.exact).count(), 2);
    let cvids: Vec<u32> = hits.iter().map(|h| h.cvid).collect();
    assert!(cvids.contains(&cv0) && cvids.contains(&cv1));

    let prefixed = engine.search_symbols(&playset, "trait_", 10);
    assert!(prefixed.iter().any(|h| h.name == "trait_craven"));
    assert!(prefixed.iter().all(|h| h.name.starts_with("trait_")));
}

#[test]
fn symbol_search_respects_playset_scope() {
    let (_store, engine, cv0, cv1) = two_source_store();
    let vanilla_only = engine.playset(&[cv0]).unwrap();
    let hits = engine.search_symbols(&vanilla_only, "trait_brave", 10);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].cvid, cv0);
    let _ = cv1;
}

#[test]
fn file_search_marks_winners() {
    let (_store, engine, cv0, cv1) = two_source_store();
    let playset = engine.playset(&[cv0, cv1]).unwrap();
    let hits = engine
        .search_files(&playset, "common/traits/*.txt", 10)
        .unwrap();
    assert_eq!(hits.len(), 2);
    let winner = hits.iter().find(|h| h.winner).unwrap();
    assert_eq!(winner.cvid, cv1);
    let loser = hits.iter().find(|h| !h.winner).unwrap();
    assert_eq!(loser.cvid, cv0);
}

#[test]
fn content_search_hits_winning_text() {
    let (_store, engine, cv0, cv1) = two_source_store();
    let playset = engine.playset(&[cv0, cv1]).unwrap();

    // "martial" only exists in the winning mod copy.
    let hits = engine.search_content(&playset, "martial", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].cvid, cv1);
    assert!(hits[0].excerpt.contains("martial"));

    // "personality" still exists in vanilla's uncontested file content?
    // The winning copy of 00_traits.txt is the mod's, which lacks it, but
    // events and craven live in vanilla-only files.
    let hits = engine.search_content(&playset, "add_trait", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].cvid, cv0);
    assert_eq!(hits[0].relpath, "events/base_events.txt");
}

#[test]
fn full_text_search_is_ranked_and_scoped() {
    let (_store, engine, cv0, cv1) = two_source_store();

    let both = engine.playset(&[cv0, cv1]).unwrap();
    let hits = engine.search_text(&both, "category", 10).unwrap();
    // Both trait files mention "category"; each hit cites its source.
    assert!(hits.len() >= 2);
    let cvids: Vec<u32> = hits.iter().map(|h| h.cvid).collect();
    assert!(cvids.contains(&cv0) && cvids.contains(&cv1));
    assert!(hits.iter().all(|h| h.score > 0.0));

    let vanilla_only = engine.playset(&[cv0]).unwrap();
    let hits = engine.search_text(&vanilla_only, "category", 10).unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.cvid == cv0));
}

#[test]
fn get_file_returns_none_for_absent_paths() {
    let (_store, engine, cv0, _) = two_source_store();
    let playset = engine.playset(&[cv0]).unwrap();
    assert!(
        engine
            .get_file(&playset, "common/nowhere/nothing.txt")
            .unwrap()
            .is_none()
    );
}

#[test]
fn confirm_not_exists_checks_symbols_and_refs() {
    let (_store, engine, cv0, cv1) = two_source_store();
    let playset = engine.playset(&[cv0, cv1]).unwrap();

    // Defined: present as a symbol and referenced by an event.
    let brave = engine.confirm_not_exists(&playset, "trait_brave");
    assert!(!brave.confirmed_absent);
    assert!(brave.symbol_matches >= 1);

    // Referenced but never defined (add_trait = brave).
    let referenced = engine.confirm_not_exists(&playset, "brave");
    assert!(!referenced.confirmed_absent);
    assert_eq!(referenced.symbol_matches, 0);
    assert!(referenced.reference_matches >= 1);

    // Truly absent.
    let ghost = engine.confirm_not_exists(&playset, "trait_ghost");
    assert!(ghost.confirmed_absent);
}
