use dm_sync::{
    Document, DocumentSnapshot, DocumentStore, Error, FieldUpdate, InMemoryStore, MessageLedger,
    MessageStatus, Mutation, Predicate, ReadSweep, Result, SessionResolver, SnapshotCallback,
    Unsubscribe, WatchTarget, SESSIONS_COLLECTION, TOMBSTONE_TEXT,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

struct Fixture {
    ledger: MessageLedger,
    sweep: ReadSweep,
    session_id: String,
}

fn fixture() -> Result<Fixture> {
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
    let session_id = SessionResolver::new(store.clone()).resolve("alice", "bob")?;
    Ok(Fixture {
        ledger: MessageLedger::new(store.clone()),
        sweep: ReadSweep::new(store),
        session_id,
    })
}

#[test]
fn test_send_read_edit_delete_scenario() -> Result<()> {
    let f = fixture()?;
    let sid = &f.session_id;

    let sent = f.ledger.send(sid, "alice", "hi")?.expect("non-empty text is sent");
    let session = f.ledger.session(sid)?;
    assert_eq!(session.unread_for("bob"), 1);
    assert_eq!(session.last_message.as_ref().map(|m| m.text.as_str()), Some("hi"));

    assert_eq!(f.sweep.mark_read(sid, "bob")?, 1);
    let session = f.ledger.session(sid)?;
    assert_eq!(session.unread_for("bob"), 0);
    let message = f.ledger.message(sid, &sent.message_id)?;
    assert_eq!(message.status, MessageStatus::Read);
    assert_eq!(
        session.last_message.as_ref().map(|m| m.status),
        Some(MessageStatus::Read)
    );

    f.ledger.edit(sid, &sent.message_id, "hello")?;
    let edited = f.ledger.message(sid, &sent.message_id)?;
    assert_eq!(edited.text, "hello");
    assert!(edited.edited);
    assert!(edited.edited_at.is_some());
    assert_eq!(edited.created_at, sent.created_at);
    assert_eq!(edited.sender_id, "alice");
    let summary = f.ledger.session(sid)?.last_message.expect("summary");
    assert_eq!(summary.text, "hello");
    assert!(summary.edited);

    f.ledger.delete(sid, &sent.message_id)?;
    let deleted = f.ledger.message(sid, &sent.message_id)?;
    assert!(deleted.deleted);
    assert!(deleted.deleted_at.is_some());
    assert_eq!(deleted.text, TOMBSTONE_TEXT);
    let summary = f.ledger.session(sid)?.last_message.expect("summary");
    assert_eq!(summary.text, TOMBSTONE_TEXT);
    assert!(summary.deleted);

    // Soft delete keeps the record.
    assert_eq!(f.ledger.messages(sid)?.len(), 1);
    Ok(())
}

#[test]
fn test_edit_after_delete_is_not_found_and_keeps_tombstone() -> Result<()> {
    let f = fixture()?;
    let sid = &f.session_id;
    let sent = f.ledger.send(sid, "alice", "secret")?.expect("sent");

    f.ledger.delete(sid, &sent.message_id)?;
    let err = f.ledger.edit(sid, &sent.message_id, "undo").unwrap_err();
    assert!(err.is_not_found());

    // Deleting twice is harmless and does not move deletedAt.
    let first_deleted_at = f.ledger.message(sid, &sent.message_id)?.deleted_at;
    f.ledger.delete(sid, &sent.message_id)?;
    let message = f.ledger.message(sid, &sent.message_id)?;
    assert_eq!(message.text, TOMBSTONE_TEXT);
    assert_eq!(message.deleted_at, first_deleted_at);
    Ok(())
}

#[test]
fn test_unknown_message_is_not_found() -> Result<()> {
    let f = fixture()?;
    assert!(f.ledger.edit(&f.session_id, "nope", "x").unwrap_err().is_not_found());
    assert!(f.ledger.delete(&f.session_id, "nope").unwrap_err().is_not_found());
    Ok(())
}

#[test]
fn test_concurrent_sends_keep_latest_summary() -> Result<()> {
    let f = Arc::new(fixture()?);
    let threads = 8;
    let per_thread = 10;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let f = f.clone();
            let barrier = barrier.clone();
            thread::spawn(move || -> Result<()> {
                let sender = if t % 2 == 0 { "alice" } else { "bob" };
                barrier.wait();
                for i in 0..per_thread {
                    f.ledger.send(&f.session_id, sender, &format!("{}-{}", t, i))?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("sender thread panicked")?;
    }

    let messages = f.ledger.messages(&f.session_id)?;
    assert_eq!(messages.len(), threads * per_thread);
    let newest = messages.last().expect("messages");

    let session = f.ledger.session(&f.session_id)?;
    let summary = session.last_message.as_ref().expect("summary");
    assert_eq!(summary.message_id, newest.id);
    assert_eq!(summary.created_at, newest.created_at);

    // Creation times are unique and strictly ordered.
    assert!(messages.windows(2).all(|w| w[0].created_at < w[1].created_at));

    let from_alice = messages.iter().filter(|m| m.sender_id == "alice").count() as u64;
    let from_bob = messages.len() as u64 - from_alice;
    assert_eq!(session.unread_for("bob"), from_alice);
    assert_eq!(session.unread_for("alice"), from_bob);
    Ok(())
}

/// Once armed, parks the next session transaction until `release` is
/// reached from the test thread.
struct GatedStore {
    inner: InMemoryStore,
    armed: AtomicBool,
    entered: crossbeam_channel::Sender<()>,
    release: Barrier,
}

impl DocumentStore for GatedStore {
    fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.inner.get_document(collection, id)
    }

    fn put_document(&self, collection: &str, id: &str, fields: Vec<FieldUpdate>) -> Result<Document> {
        self.inner.put_document(collection, id, fields)
    }

    fn create_document(
        &self,
        collection: &str,
        id: &str,
        fields: Vec<FieldUpdate>,
    ) -> Result<Option<Document>> {
        self.inner.create_document(collection, id, fields)
    }

    fn update_fields(&self, collection: &str, id: &str, fields: Vec<FieldUpdate>) -> Result<Document> {
        self.inner.update_fields(collection, id, fields)
    }

    fn transact(&self, collection: &str, id: &str, mutation: Mutation<'_>) -> Result<Document> {
        if collection == SESSIONS_COLLECTION && self.armed.swap(false, Ordering::SeqCst) {
            let _ = self.entered.send(());
            self.release.wait();
        }
        self.inner.transact(collection, id, mutation)
    }

    fn query_where(&self, collection: &str, predicates: &[Predicate]) -> Result<Vec<DocumentSnapshot>> {
        self.inner.query_where(collection, predicates)
    }

    fn subscribe(&self, target: WatchTarget, callback: SnapshotCallback) -> Result<Unsubscribe> {
        self.inner.subscribe(target, callback)
    }
}

#[test]
fn test_late_summary_write_does_not_replace_newer() -> Result<()> {
    let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
    let gated = Arc::new(GatedStore {
        inner: InMemoryStore::new(),
        armed: AtomicBool::new(false),
        entered: entered_tx,
        release: Barrier::new(2),
    });
    let store: Arc<dyn DocumentStore> = gated.clone();
    let sid = SessionResolver::new(store.clone()).resolve("alice", "bob")?;
    let ledger = Arc::new(MessageLedger::new(store));

    gated.armed.store(true, Ordering::SeqCst);
    let early = {
        let ledger = ledger.clone();
        let sid = sid.clone();
        thread::spawn(move || ledger.send(&sid, "alice", "early"))
    };
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("first send reached the session update");

    // The early message is stored but its session update is parked.
    let late = ledger.send(&sid, "bob", "late")?.expect("sent");
    gated.release.wait();
    let early = early.join().expect("sender thread panicked")?.expect("sent");
    assert!(early.created_at < late.created_at);

    let session = ledger.session(&sid)?;
    let summary = session.last_message.as_ref().expect("summary");
    assert_eq!(summary.message_id, late.message_id);
    assert_eq!(summary.text, "late");
    assert_eq!(summary.sender_id, "bob");
    assert_eq!(session.unread_for("bob"), 1);
    assert_eq!(session.unread_for("alice"), 1);
    Ok(())
}

#[test]
fn test_mark_read_invariants() -> Result<()> {
    let f = fixture()?;
    let sid = &f.session_id;
    for text in ["one", "two", "three"] {
        f.ledger.send(sid, "alice", text)?;
    }
    f.ledger.send(sid, "bob", "mine")?;

    f.sweep.mark_read(sid, "bob")?;
    let session = f.ledger.session(sid)?;
    assert_eq!(session.unread_for("bob"), 0);
    for message in f.ledger.messages(sid)? {
        if message.sender_id == "bob" {
            assert!(message.read_by.is_empty());
            assert_eq!(message.status, MessageStatus::Sent);
        } else {
            assert!(message.is_read_by("bob"));
            assert_eq!(message.status, MessageStatus::Read);
        }
    }

    // Redundant sweeps change nothing.
    assert_eq!(f.sweep.mark_read(sid, "bob")?, 0);
    assert_eq!(f.ledger.session(sid)?.unread_for("bob"), 0);
    Ok(())
}

#[test]
fn test_outsider_cannot_sweep() -> Result<()> {
    let f = fixture()?;
    assert!(matches!(
        f.sweep.mark_read(&f.session_id, "mallory"),
        Err(Error::NotParticipant { .. })
    ));
    assert!(f.sweep.mark_read("missing", "bob").unwrap_err().is_not_found());
    Ok(())
}

#[test]
fn test_delivery_sweep_leaves_read_state_alone() -> Result<()> {
    let f = fixture()?;
    let sid = &f.session_id;
    let sent = f.ledger.send(sid, "alice", "ping")?.expect("sent");

    assert_eq!(f.sweep.mark_delivered(sid, "bob")?, 1);
    let message = f.ledger.message(sid, &sent.message_id)?;
    assert_eq!(message.status, MessageStatus::Delivered);
    assert!(message.read_by.is_empty());
    let session = f.ledger.session(sid)?;
    assert_eq!(session.unread_for("bob"), 1);
    assert_eq!(
        session.last_message.map(|m| m.status),
        Some(MessageStatus::Delivered)
    );

    f.sweep.mark_read(sid, "bob")?;
    assert_eq!(f.sweep.mark_delivered(sid, "bob")?, 0);
    assert_eq!(
        f.ledger.message(sid, &sent.message_id)?.status,
        MessageStatus::Read
    );
    Ok(())
}

#[test]
fn test_status_never_regresses_under_interleaved_sweeps() -> Result<()> {
    let f = Arc::new(fixture()?);
    let mut ids = Vec::new();
    for i in 0..20 {
        ids.push(
            f.ledger
                .send(&f.session_id, "alice", &format!("m{}", i))?
                .expect("sent")
                .message_id,
        );
    }

    let done = Arc::new(AtomicBool::new(false));
    let observer = {
        let f = f.clone();
        let done = done.clone();
        let ids = ids.clone();
        thread::spawn(move || -> Result<()> {
            let mut seen = vec![MessageStatus::Sent; ids.len()];
            while !done.load(Ordering::SeqCst) {
                for (slot, id) in seen.iter_mut().zip(&ids) {
                    let status = f.ledger.message(&f.session_id, id)?.status;
                    assert!(status >= *slot, "status went from {:?} to {:?}", slot, status);
                    *slot = status;
                }
            }
            Ok(())
        })
    };

    let sweepers: Vec<_> = (0..4)
        .map(|i| {
            let f = f.clone();
            thread::spawn(move || -> Result<()> {
                for _ in 0..5 {
                    if i % 2 == 0 {
                        f.sweep.mark_delivered(&f.session_id, "bob")?;
                    } else {
                        f.sweep.mark_read(&f.session_id, "bob")?;
                    }
                }
                Ok(())
            })
        })
        .collect();
    for sweeper in sweepers {
        sweeper.join().expect("sweeper panicked")?;
    }
    done.store(true, Ordering::SeqCst);
    observer.join().expect("observer panicked")?;

    for id in &ids {
        assert_eq!(f.ledger.message(&f.session_id, id)?.status, MessageStatus::Read);
    }
    Ok(())
}

#[test]
fn test_edit_and_read_do_not_clobber_each_other() -> Result<()> {
    let f = Arc::new(fixture()?);
    let sent = f.ledger.send(&f.session_id, "alice", "draft")?.expect("sent");

    let editor = {
        let f = f.clone();
        let id = sent.message_id.clone();
        thread::spawn(move || f.ledger.edit(&f.session_id, &id, "final"))
    };
    let reader = {
        let f = f.clone();
        thread::spawn(move || f.sweep.mark_read(&f.session_id, "bob"))
    };
    editor.join().expect("editor panicked")?;
    reader.join().expect("reader panicked")?;

    let message = f.ledger.message(&f.session_id, &sent.message_id)?;
    assert_eq!(message.text, "final");
    assert!(message.edited);
    assert!(message.is_read_by("bob"));
    assert_eq!(message.status, MessageStatus::Read);
    Ok(())
}
