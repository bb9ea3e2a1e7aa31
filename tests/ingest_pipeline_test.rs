//! End-to-end ingest pipeline: scan, store, route, queue, derive.

mod common;

use common::{ContentRoot, TestStore, blob_count, ingest_mod, ingest_vanilla, write_file};
use modraven::engine::ParseBackend;
use modraven::queue::TaskStatus;
use modraven::types::FileKind;
use modraven::{ErrorClass, VPath};

fn vanilla_root() -> ContentRoot {
    ContentRoot::new()
        .with(
            "common/traits/00_traits.txt",
            "trait_brave = {\n\tcategory = personality\n}\n",
        )
        .with(
            "localization/english/traits_l_english.yml",
            "l_english:\n trait_brave:0 \"Brave\"\n",
        )
        .with("gfx/icon.dds", "not really dds")
        .with("history/characters/1.txt", "1 = { name = x }")
}

#[test]
fn ingest_builds_symbols_and_localization() {
    let store = TestStore::new();
    let mut engine = store.engine();
    let root = vanilla_root();
    let cvid = ingest_vanilla(&mut engine, root.path(), "1.12.4");

    let registry = engine.registry();
    let cv = modraven::Cvid::new(cvid).unwrap();
    assert_eq!(registry.files_of(cv).count(), 4);

    // Script route produced a trait symbol.
    let record = registry
        .lookup(cv, &VPath::new("common/traits/00_traits.txt"))
        .unwrap();
    let symbols = engine.artifacts().symbols_of(record.file_id);
    assert_eq!(symbols.len(), 1);
    assert_eq!(symbols[0].name, "trait_brave");
    assert_eq!(symbols[0].kind, "trait");
    assert_eq!(record.kind, FileKind::Script);

    // Localization route produced a loc row.
    let loc_record = registry
        .lookup(cv, &VPath::new("localization/english/traits_l_english.yml"))
        .unwrap();
    let rows = engine.artifacts().localization_of(&loc_record.content_hash);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, "trait_brave");
    assert_eq!(rows[0].language, "english");

    // Binary route stored the blob without derived work.
    let gfx = registry.lookup(cv, &VPath::new("gfx/icon.dds")).unwrap();
    assert_eq!(gfx.kind, FileKind::Binary);
    assert!(engine.store().exists(&gfx.content_hash));
}

#[test]
fn reingest_is_idempotent() {
    let store = TestStore::new();
    let mut engine = store.engine();
    let root = vanilla_root();

    let first = engine.ingest_vanilla(root.path(), "1.12.4").unwrap();
    engine.process_queue(ParseBackend::InProcess, None).unwrap();
    let blobs_after_first = blob_count(&store.settings);

    let second = engine.ingest_vanilla(root.path(), "1.12.4").unwrap();
    assert_eq!(first.cvid, second.cvid);
    assert!(second.reused_version);
    assert_eq!(second.files_changed, 0);
    assert_eq!(second.tasks_enqueued, 0);
    assert_eq!(blob_count(&store.settings), blobs_after_first);
}

#[test]
fn identical_files_share_one_blob_across_sources() {
    let store = TestStore::new();
    let mut engine = store.engine();
    let shared = "trait_shared = {\n\tcategory = personality\n}\n";
    let vanilla = ContentRoot::new().with("common/traits/00_traits.txt", shared);
    let modded = ContentRoot::new().with("common/traits/00_traits.txt", shared);

    let v = ingest_vanilla(&mut engine, vanilla.path(), "1.12.4");
    let m = ingest_mod(&mut engine, modded.path(), "Copy Mod");

    let cv_v = modraven::Cvid::new(v).unwrap();
    let cv_m = modraven::Cvid::new(m).unwrap();
    let rel = VPath::new("common/traits/00_traits.txt");
    let hash_v = engine.registry().lookup(cv_v, &rel).unwrap().content_hash;
    let hash_m = engine.registry().lookup(cv_m, &rel).unwrap().content_hash;
    assert_eq!(hash_v, hash_m);
    assert_eq!(blob_count(&store.settings), 1);
}

#[test]
fn parse_failures_mark_the_task_failed_but_keep_the_blob() {
    let store = TestStore::new();
    let mut engine = store.engine();
    let root = ContentRoot::new().with("common/traits/broken.txt", "trait_x = { unclosed");
    let cvid = ingest_vanilla(&mut engine, root.path(), "1.12.4");

    let cv = modraven::Cvid::new(cvid).unwrap();
    let record = engine
        .registry()
        .lookup(cv, &VPath::new("common/traits/broken.txt"))
        .unwrap();

    // No symbols from a failed parse.
    assert!(engine.artifacts().symbols_of(record.file_id).is_empty());
    // The partial AST is cached with parse_ok = false.
    let artifact = engine
        .artifacts()
        .load_ast(&record.content_hash)
        .unwrap()
        .unwrap();
    assert!(!artifact.parse_ok);
    assert!(!artifact.diagnostics.is_empty());
    // The blob is still stored and text-searchable.
    assert!(engine.store().exists(&record.content_hash));

    let failed: Vec<_> = engine
        .queue()
        .tasks()
        .filter(|t| t.status == TaskStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error_class, Some(ErrorClass::ParseError));
}

#[test]
fn oversized_files_are_stored_but_skipped() {
    let store = TestStore::new();
    let mut settings = (*store.settings).clone();
    settings.build.max_parse_bytes = 64;
    let mut engine = modraven::Engine::open(std::sync::Arc::new(settings)).unwrap();

    let big = format!("big_block = {{\n{}}}\n", "\tx = 1\n".repeat(50));
    assert!(big.len() > 64);
    let root = ContentRoot::new().with("common/traits/big.txt", &big);
    let cvid = ingest_vanilla(&mut engine, root.path(), "1.12.4");

    let cv = modraven::Cvid::new(cvid).unwrap();
    let record = engine
        .registry()
        .lookup(cv, &VPath::new("common/traits/big.txt"))
        .unwrap();
    assert!(engine.store().exists(&record.content_hash));
    assert!(engine.artifacts().symbols_of(record.file_id).is_empty());

    let skipped: Vec<_> = engine
        .queue()
        .tasks()
        .filter(|t| t.status == TaskStatus::Skipped)
        .collect();
    assert_eq!(skipped.len(), 1);
}

#[test]
fn changed_files_requeue_and_reindex() {
    let store = TestStore::new();
    let mut engine = store.engine();
    let root = ContentRoot::new().with("common/traits/t.txt", "trait_old = { }");
    let cvid = ingest_vanilla(&mut engine, root.path(), "1.12.4");
    let cv = modraven::Cvid::new(cvid).unwrap();

    write_file(root.path(), "common/traits/t.txt", "trait_new = { }");
    // Same version string, new content: a new CV for the new root hash.
    let second = engine.ingest_vanilla(root.path(), "1.12.4").unwrap();
    engine.process_queue(ParseBackend::InProcess, None).unwrap();
    assert_ne!(second.cvid, cvid);

    let cv2 = modraven::Cvid::new(second.cvid).unwrap();
    let rel = VPath::new("common/traits/t.txt");
    let new_record = engine.registry().lookup(cv2, &rel).unwrap();
    let names: Vec<_> = engine
        .artifacts()
        .symbols_of(new_record.file_id)
        .iter()
        .map(|s| s.name.clone())
        .collect();
    assert_eq!(names, vec!["trait_new"]);

    // The original CV still resolves to the old content.
    let old_record = engine.registry().lookup(cv, &rel).unwrap();
    assert_ne!(old_record.content_hash, new_record.content_hash);
}
