use notes_sync::metadata::{load_index, save_index};
use notes_sync::{
    Attachment, EngineConfig, MemoryStore, MetadataIndex, NoteDraft, NoteEngine, RemoteStore,
    Session, SkipReason, StaticSession, SyncError, WriteStrategy,
};

fn setup() -> (MemoryStore, NoteEngine<MemoryStore>, StaticSession) {
    let store = MemoryStore::new();
    let engine = NoteEngine::new(store.clone(), EngineConfig::default());
    (store, engine, StaticSession::new("token"))
}

async fn stored_index(
    store: &MemoryStore,
    engine: &NoteEngine<MemoryStore>,
    session: &dyn Session,
) -> MetadataIndex {
    let area = engine.check(session).await.unwrap();
    MetadataIndex::parse(&store.content_of(&area.metadata_id).unwrap()).unwrap()
}

#[tokio::test]
async fn create_plain_note_assigns_first_sequence() {
    let (store, engine, session) = setup();

    let created = engine
        .create_note(&session, &NoteDraft::new("Groceries", "milk, eggs"))
        .await
        .unwrap();

    assert_eq!(created.file.name, "0001 - Groceries.txt");
    assert_eq!(created.file.mime_type.as_deref(), Some("text/plain"));
    assert_eq!(created.notes.len(), 1);

    let note = &created.notes[0];
    assert_eq!(note.id, created.file_id);
    assert_eq!(note.name, "Groceries");
    assert_eq!(note.content, "milk, eggs");
    assert_eq!(note.seq, Some(1));
    assert_eq!(note.color.as_deref(), Some("#fff9a8"));
    assert!(note.created_at.is_some());

    let index = stored_index(&store, &engine, &session).await;
    assert_eq!(index.last_sequence, 1);
    assert_eq!(index.items.len(), 1);
    assert_eq!(index.items[0].file_id, created.file_id);
}

#[tokio::test]
async fn attachments_switch_representation_both_ways() {
    let (store, engine, session) = setup();

    let draft = NoteDraft::new("Trip", "see photo")
        .with_attachments(vec![Attachment::new("photo.png", vec![0x89, 0x50, 0x4e, 0x47])]);
    let created = engine.create_note(&session, &draft).await.unwrap();
    assert_eq!(created.file.name, "0001 - Trip.knote");
    assert_eq!(created.file.mime_type.as_deref(), Some("application/zip"));
    assert_eq!(created.notes[0].attachments, draft.attachments);

    let updated = engine
        .update_note(&session, &created.file_id, &NoteDraft::new("Trip", "no photo after all"))
        .await
        .unwrap();
    assert_eq!(updated.file_id, created.file_id);
    assert_eq!(updated.file.name, "0001 - Trip.txt");
    assert_eq!(updated.file.mime_type.as_deref(), Some("text/plain"));

    let note = &updated.notes[0];
    assert_eq!(note.content, "no photo after all");
    assert!(note.attachments.is_empty());
    assert_eq!(note.seq, Some(1));
    assert_eq!(store.content_of(&created.file_id).unwrap(), b"no photo after all".to_vec());
}

#[tokio::test]
async fn update_renames_and_recolors() {
    let (store, engine, session) = setup();
    let created = engine
        .create_note(&session, &NoteDraft::new("Draft", "v1"))
        .await
        .unwrap();

    let updated = engine
        .update_note(
            &session,
            &created.file_id,
            &NoteDraft::new("Final: v2", "v2").with_color("#ccf"),
        )
        .await
        .unwrap();
    assert_eq!(updated.file.name, "0001 - Final_ v2.txt");
    assert_eq!(updated.notes[0].color.as_deref(), Some("#ccf"));

    let index = stored_index(&store, &engine, &session).await;
    assert_eq!(index.items[0].name, "0001 - Final_ v2.txt");
    assert_eq!(index.last_sequence, 1);
}

#[tokio::test]
async fn repeated_fetch_is_stable() {
    let (_store, engine, session) = setup();
    for title in ["a", "b", "c"] {
        engine
            .create_note(&session, &NoteDraft::new(title, format!("body {}", title)))
            .await
            .unwrap();
    }

    let mut first = engine.fetch_all(&session).await.unwrap();
    let mut second = engine.fetch_all(&session).await.unwrap();
    first.notes.sort_by(|a, b| a.id.cmp(&b.id));
    second.notes.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(first, second);
    assert_eq!(first.notes.len(), 3);
    assert!(first.skipped.is_empty());
}

#[tokio::test]
async fn sequences_are_never_reused() {
    let (store, engine, session) = setup();
    let mut ids = Vec::new();
    for title in ["one", "two", "three"] {
        let created = engine
            .create_note(&session, &NoteDraft::new(title, ""))
            .await
            .unwrap();
        ids.push(created.file_id);
    }

    engine.delete_note(&session, &ids[2]).await.unwrap();
    let created = engine
        .create_note(&session, &NoteDraft::new("four", ""))
        .await
        .unwrap();
    assert_eq!(created.file.name, "0004 - four.txt");

    let index = stored_index(&store, &engine, &session).await;
    assert_eq!(index.last_sequence, 4);
    let mut seqs: Vec<u64> = index.items.iter().filter_map(|e| e.seq).collect();
    seqs.sort_unstable();
    assert_eq!(seqs, vec![1, 2, 4]);
}

#[tokio::test]
async fn delete_removes_note_and_entry() {
    let (store, engine, session) = setup();
    let keep = engine
        .create_note(&session, &NoteDraft::new("keep", "k"))
        .await
        .unwrap();
    let gone = engine
        .create_note(&session, &NoteDraft::new("gone", "g"))
        .await
        .unwrap();

    let notes = engine.delete_note(&session, &gone.file_id).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].id, keep.file_id);
    assert!(store.file(&gone.file_id).is_none());

    let listed = engine.list_notes(&session).await.unwrap();
    assert!(listed.iter().all(|n| n.id != gone.file_id));
    let index = stored_index(&store, &engine, &session).await;
    assert!(index.entry(&gone.file_id).is_none());
}

#[tokio::test]
async fn deleting_an_orphaned_entry_prunes_it() {
    let (store, engine, session) = setup();
    let orphan = engine
        .create_note(&session, &NoteDraft::new("orphan", "x"))
        .await
        .unwrap();
    store.delete_file(&session, &orphan.file_id).await.unwrap();

    let notes = engine.delete_note(&session, &orphan.file_id).await.unwrap();
    assert!(notes.is_empty());
    let index = stored_index(&store, &engine, &session).await;
    assert!(index.entry(&orphan.file_id).is_none());
    assert_eq!(index.last_sequence, 1);
}

#[tokio::test]
async fn orphans_on_either_side_are_tolerated() {
    let (store, engine, session) = setup();
    let indexed = engine
        .create_note(&session, &NoteDraft::new("indexed", "x"))
        .await
        .unwrap();

    // Entry without file.
    store.delete_file(&session, &indexed.file_id).await.unwrap();

    // File without entry.
    let folder = engine.notes_area(&session).await.unwrap();
    let legacy = store
        .create_file(&session, &folder.id, "legacy.txt", "text/plain", b"old".to_vec())
        .await
        .unwrap();

    let listing = engine.fetch_all(&session).await.unwrap();
    assert_eq!(listing.notes.len(), 1);
    let note = listing.note(&legacy.id).unwrap();
    assert_eq!(note.name, "legacy");
    assert_eq!(note.content, "old");
    assert_eq!(note.seq, None);
    assert_eq!(note.color, None);
    assert_eq!(note.created_at, None);

    let index = stored_index(&store, &engine, &session).await;
    assert!(index.entry(&indexed.file_id).is_some());
}

#[tokio::test]
async fn legacy_note_is_indexed_on_update() {
    let (store, engine, session) = setup();
    engine
        .create_note(&session, &NoteDraft::new("first", ""))
        .await
        .unwrap();
    let folder = engine.notes_area(&session).await.unwrap();
    let legacy = store
        .create_file(&session, &folder.id, "Old.txt", "text/plain", b"old".to_vec())
        .await
        .unwrap();

    let updated = engine
        .update_note(&session, &legacy.id, &NoteDraft::new("Old", "renewed"))
        .await
        .unwrap();
    assert_eq!(updated.file.name, "Old.txt");

    let note = updated.notes.iter().find(|n| n.id == legacy.id).unwrap();
    assert_eq!(note.seq, None);
    assert_eq!(note.color.as_deref(), Some("#fff9a8"));

    let index = stored_index(&store, &engine, &session).await;
    assert_eq!(index.last_sequence, 1);
    assert_eq!(index.items.len(), 2);
}

#[tokio::test]
async fn corrupted_index_is_reset_and_listing_survives() {
    let (store, engine, session) = setup();
    let created = engine
        .create_note(&session, &NoteDraft::new("survivor", "still here"))
        .await
        .unwrap();

    let area = engine.check(&session).await.unwrap();
    assert!(store.put_content(&area.metadata_id, b"{ this is not json".to_vec()));

    let listing = engine.fetch_all(&session).await.unwrap();
    assert!(listing.index_repaired.is_some());
    let note = listing.note(&created.file_id).unwrap();
    assert_eq!(note.content, "still here");
    assert_eq!(note.seq, None);

    let index = MetadataIndex::parse(&store.content_of(&area.metadata_id).unwrap()).unwrap();
    assert_eq!(index, MetadataIndex::default());

    let next = engine
        .create_note(&session, &NoteDraft::new("after", ""))
        .await
        .unwrap();
    assert_eq!(next.file.name, "0001 - after.txt");
}

#[tokio::test]
async fn unreadable_files_are_skipped() {
    let (store, engine, session) = setup();
    let good = engine
        .create_note(&session, &NoteDraft::new("good", "fine"))
        .await
        .unwrap();
    let flaky = engine
        .create_note(&session, &NoteDraft::new("flaky", "unreachable"))
        .await
        .unwrap();
    store.fail_content_of(&flaky.file_id);

    let folder = engine.notes_area(&session).await.unwrap();
    let broken = store
        .create_file(&session, &folder.id, "0099 - broken.knote", "application/zip", b"not a zip".to_vec())
        .await
        .unwrap();

    let listing = engine.fetch_all(&session).await.unwrap();
    assert_eq!(listing.notes.len(), 1);
    assert_eq!(listing.notes[0].id, good.file_id);
    assert_eq!(listing.skipped.len(), 2);

    let reason_of = |id: &str| {
        listing
            .skipped
            .iter()
            .find(|s| s.file_id == id)
            .map(|s| s.reason.clone())
            .unwrap()
    };
    assert!(matches!(reason_of(&flaky.file_id), SkipReason::Fetch(_)));
    assert!(matches!(reason_of(&broken.id), SkipReason::CorruptedContainer(_)));
}

#[tokio::test]
async fn rejected_requests_issue_no_remote_calls() {
    let (store, engine, session) = setup();

    let err = engine
        .update_note(&session, "", &NoteDraft::new("x", "y"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::MissingIdentifier(_)));

    let err = engine.delete_note(&session, "  ").await.unwrap_err();
    assert!(matches!(err, SyncError::MissingIdentifier(_)));

    let err = engine
        .create_note(&session, &NoteDraft::new("x", "y").with_encoding("no-such-charset"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidEncoding(_)));

    session.invalidate();
    let err = engine.list_notes(&session).await.unwrap_err();
    assert!(matches!(err, SyncError::NotAuthorized(_)));

    assert_eq!(store.file_count(), 0);
    assert_eq!(store.folder_count("notes"), 0);
}

#[tokio::test]
async fn offline_store_fails_whole_listing() {
    let (store, engine, session) = setup();
    engine
        .create_note(&session, &NoteDraft::new("a", ""))
        .await
        .unwrap();

    store.set_offline(true);
    let err = engine.list_notes(&session).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn conditional_save_detects_concurrent_writer() {
    let (store, engine, session) = setup();
    let folder = engine.notes_area(&session).await.unwrap();

    let mut mine = load_index(&store, &session, &folder.id).await.unwrap();
    let mut theirs = load_index(&store, &session, &folder.id).await.unwrap();

    theirs.index.last_sequence = 7;
    save_index(&store, &session, &theirs, WriteStrategy::Conditional)
        .await
        .unwrap();

    mine.index.last_sequence = 3;
    let err = save_index(&store, &session, &mine, WriteStrategy::Conditional)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::VersionConflict(_)));

    let stored = MetadataIndex::parse(&store.content_of(&mine.file_id).unwrap()).unwrap();
    assert_eq!(stored.last_sequence, 7);
}

#[tokio::test]
async fn conditional_engine_writes_normally_without_contention() {
    let store = MemoryStore::new();
    let engine = NoteEngine::new(
        store.clone(),
        EngineConfig {
            write_strategy: WriteStrategy::Conditional,
            ..EngineConfig::default()
        },
    );
    let session = StaticSession::new("token");

    let a = engine.create_note(&session, &NoteDraft::new("a", "")).await.unwrap();
    let b = engine.create_note(&session, &NoteDraft::new("b", "")).await.unwrap();
    engine.delete_note(&session, &a.file_id).await.unwrap();

    let notes = engine.list_notes(&session).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].id, b.file_id);
    assert_eq!(notes[0].seq, Some(2));
}
