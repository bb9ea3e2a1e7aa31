//! Single-writer enforcement and the pending-refresh handoff.

mod common;

use common::{ContentRoot, TestStore, ingest_mod, ingest_vanilla, write_file};
use modraven::engine::ParseBackend;
use modraven::queue::{PendingRefreshLog, RefreshOp};
use modraven::{Daemon, RavenError, VPath, WriterLock};

#[test]
fn second_writer_is_refused_with_holder_info() {
    let store = TestStore::new();
    let mut holder = WriterLock::new(
        &store.settings.writer_lock_path(),
        &store.settings.data_dir,
    );
    assert!(holder.acquire().unwrap());

    // A second daemon observes the live holder and refuses to start.
    let err = Daemon::start(store.settings.clone()).unwrap_err();
    match err {
        RavenError::WriterLock {
            holder_pid,
            acquired_at,
        } => {
            assert_eq!(holder_pid, std::process::id());
            assert!(acquired_at > 0);
        }
        other => panic!("expected writer-lock error, got {other}"),
    }

    // Release: the store becomes acquirable again.
    holder.release();
    let mut second = WriterLock::new(
        &store.settings.writer_lock_path(),
        &store.settings.data_dir,
    );
    assert!(second.acquire().unwrap());
}

#[test]
fn pending_refresh_write_reindexes_a_live_file() {
    let store = TestStore::new();
    let mut engine = store.engine();
    let vanilla = ContentRoot::new().with("common/traits/v.txt", "trait_v = { }");
    let modded = ContentRoot::new().with("common/traits/m.txt", "trait_old = { }");
    let cv0 = ingest_vanilla(&mut engine, vanilla.path(), "1.12.4");
    let cv1 = ingest_mod(&mut engine, modded.path(), "Live Mod");

    // An out-of-daemon writer edits the mod file and appends to the log.
    write_file(modded.path(), "common/traits/m.txt", "trait_new = { }");
    let log = PendingRefreshLog::new(&store.settings.pending_refresh_path());
    log.append(RefreshOp::Write, "Live Mod", "common/traits/m.txt")
        .unwrap();

    // The writer drains the log and requeues the file.
    for entry in log.drain().unwrap() {
        assert_eq!(entry.op, RefreshOp::Write);
        assert!(engine.refresh_file(&entry.mod_name, &entry.relpath).unwrap());
    }
    engine.process_queue(ParseBackend::InProcess, None).unwrap();

    let playset = engine.playset(&[cv0, cv1]).unwrap();
    let hits = engine.search_symbols(&playset, "trait_new", 10);
    assert_eq!(hits.len(), 1);
    assert!(engine.search_symbols(&playset, "trait_old", 10).is_empty());
}

#[test]
fn pending_refresh_delete_hides_the_file() {
    let store = TestStore::new();
    let mut engine = store.engine();
    let vanilla = ContentRoot::new().with("common/traits/v.txt", "trait_v = { }");
    let modded = ContentRoot::new().with("common/traits/gone.txt", "trait_gone = { }");
    let cv0 = ingest_vanilla(&mut engine, vanilla.path(), "1.12.4");
    let cv1 = ingest_mod(&mut engine, modded.path(), "Live Mod");

    assert!(
        engine
            .refresh_delete("Live Mod", "common/traits/gone.txt")
            .unwrap()
    );
    engine.commit_all().unwrap();

    let cv = modraven::Cvid::new(cv1).unwrap();
    let record = engine
        .registry()
        .lookup(cv, &VPath::new("common/traits/gone.txt"))
        .unwrap();
    assert!(record.deleted);

    let playset = engine.playset(&[cv0, cv1]).unwrap();
    assert!(engine.search_symbols(&playset, "trait_gone", 10).is_empty());
    assert!(
        engine
            .get_file(&playset, "common/traits/gone.txt")
            .unwrap()
            .is_none()
    );
}

#[test]
fn unknown_mod_refreshes_are_ignored() {
    let store = TestStore::new();
    let mut engine = store.engine();
    let vanilla = ContentRoot::new().with("common/traits/v.txt", "trait_v = { }");
    ingest_vanilla(&mut engine, vanilla.path(), "1.12.4");

    assert!(!engine.refresh_file("Never Heard Of It", "common/x.txt").unwrap());
    assert!(!engine.refresh_delete("Never Heard Of It", "common/x.txt").unwrap());
}
