use crossbeam_channel::{Receiver, Sender};
use dm_sync::{
    ChatSync, DocumentStore, Error, FileDocumentStore, Identity, InMemoryStore, MessageStatus,
    PushGateway, PushRequest, Result, SyncConfig, Timestamp,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(2);

struct RecordingGateway(Sender<PushRequest>);

impl PushGateway for RecordingGateway {
    fn send(&self, request: &PushRequest) -> Result<()> {
        let _ = self.0.send(request.clone());
        Ok(())
    }
}

struct FailingGateway(Sender<()>);

impl PushGateway for FailingGateway {
    fn send(&self, _request: &PushRequest) -> Result<()> {
        let _ = self.0.send(());
        Err(Error::NotificationFailure("provider down".to_string()))
    }
}

fn recording_chat(store: Arc<dyn DocumentStore>) -> Result<(ChatSync, Receiver<PushRequest>)> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let chat = ChatSync::new(store, SyncConfig::default(), Arc::new(RecordingGateway(tx)))?;
    Ok((chat, rx))
}

fn sign_in_pair(chat: &ChatSync) -> Result<()> {
    chat.sign_in(&Identity::new("alice", "alice@example.com"), Some("tok-alice"))?;
    chat.sign_in(&Identity::new("bob", "bob@example.com"), Some("tok-bob"))?;
    Ok(())
}

#[test]
fn test_send_notifies_recipient() -> Result<()> {
    let (chat, pushes) = recording_chat(Arc::new(InMemoryStore::new()))?;
    sign_in_pair(&chat)?;

    let sid = chat.resolve_session("alice", "bob")?;
    chat.send(&sid, "alice", "hi bob")?;

    let push = pushes.recv_timeout(WAIT).expect("push for bob");
    assert_eq!(push.to, "tok-bob");
    assert_eq!(push.title, "New Message");
    assert_eq!(push.body, "hi bob");
    chat.shutdown();
    Ok(())
}

#[test]
fn test_signed_out_user_gets_no_push() -> Result<()> {
    let (chat, pushes) = recording_chat(Arc::new(InMemoryStore::new()))?;
    sign_in_pair(&chat)?;
    chat.sign_out("bob")?;

    let bob = chat.user("bob")?.expect("bob exists");
    assert!(!bob.online);
    assert!(bob.push_token.is_none());

    let sid = chat.resolve_session("alice", "bob")?;
    chat.send(&sid, "alice", "are you there?")?;
    chat.shutdown();
    assert!(pushes.try_recv().is_err());
    Ok(())
}

#[test]
fn test_failing_gateway_does_not_fail_send() -> Result<()> {
    let (attempts_tx, attempts) = crossbeam_channel::unbounded();
    let chat = ChatSync::new(
        Arc::new(InMemoryStore::new()),
        SyncConfig::default(),
        Arc::new(FailingGateway(attempts_tx)),
    )?;
    sign_in_pair(&chat)?;

    let sid = chat.resolve_session("alice", "bob")?;
    let sent = chat.send(&sid, "alice", "hello")?.expect("sent");
    attempts.recv_timeout(WAIT).expect("gateway was tried");

    let message = chat.messages(&sid)?.pop().expect("stored");
    assert_eq!(message.id, sent.message_id);
    assert_eq!(message.status, MessageStatus::Sent);
    assert_eq!(chat.session(&sid)?.unread_for("bob"), 1);
    Ok(())
}

#[test]
fn test_sign_in_keeps_existing_profile() -> Result<()> {
    let (chat, _pushes) = recording_chat(Arc::new(InMemoryStore::new()))?;
    let identity = Identity {
        display_name: Some("Ada L".to_string()),
        ..Identity::new("ada", "ada@example.com")
    };
    let first = chat.sign_in(&identity, Some("tok-1"))?;
    assert_eq!(first.display_name.as_deref(), Some("Ada L"));
    assert_eq!(first.push_token.as_deref(), Some("tok-1"));
    let created_at = first.created_at;
    assert!(created_at.is_some());

    chat.sign_out("ada")?;
    let again = chat.sign_in(&Identity::new("ada", "ada@example.com"), None)?;
    assert!(again.online);
    assert_eq!(again.display_name.as_deref(), Some("Ada L"));
    assert_eq!(again.created_at, created_at);
    assert!(again.push_token.is_none());

    chat.update_push_token("ada", Some("tok-2"))?;
    assert_eq!(
        chat.user("ada")?.and_then(|u| u.push_token).as_deref(),
        Some("tok-2")
    );
    Ok(())
}

#[test]
fn test_heartbeat_refreshes_last_seen() -> Result<()> {
    let config = SyncConfig {
        heartbeat_interval_secs: 1,
        stale_after_secs: 3,
        ..SyncConfig::default()
    };
    let (tx, _rx) = crossbeam_channel::unbounded();
    let chat = ChatSync::new(
        Arc::new(InMemoryStore::new()),
        config,
        Arc::new(RecordingGateway(tx)),
    )?;

    let user = chat.sign_in(&Identity::new("alice", "alice@example.com"), None)?;
    let signed_in_at = user.last_seen.expect("lastSeen set");
    assert!(chat.is_online("alice")?);

    let presence = chat.subscribe_presence("alice")?;
    presence.recv_timeout(WAIT);
    let beat = presence
        .recv_timeout(Duration::from_secs(3))
        .expect("heartbeat write");
    assert!(beat.online);
    assert!(beat.last_seen.expect("lastSeen") > signed_in_at);

    chat.sign_out("alice")?;
    // No beat may revive the user after sign-out.
    thread::sleep(Duration::from_millis(1200));
    let user = chat.user("alice")?.expect("alice exists");
    assert!(!user.online);
    assert!(!chat.is_online("alice")?);
    Ok(())
}

#[test]
fn test_stale_presence_reads_offline() {
    let presence = dm_sync::Presence {
        online: true,
        last_seen: Some(Timestamp(1_000)),
    };
    assert!(presence.is_online_at(Timestamp(50_000), Duration::from_secs(90)));
    assert!(!presence.is_online_at(Timestamp(200_000), Duration::from_secs(90)));
}

#[test]
fn test_search_users_excludes_self() -> Result<()> {
    let (chat, _pushes) = recording_chat(Arc::new(InMemoryStore::new()))?;
    sign_in_pair(&chat)?;
    chat.sign_in(&Identity::new("albert", "Albert@example.com"), None)?;

    let found = chat.search_users("al", "alice")?;
    let ids: Vec<&str> = found.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["albert"]);
    Ok(())
}

#[test]
fn test_file_store_survives_restart() -> Result<()> {
    let dir = TempDir::new().expect("temp dir");
    let sid;
    {
        let store = Arc::new(FileDocumentStore::open(dir.path())?);
        let (chat, _pushes) = recording_chat(store)?;
        sign_in_pair(&chat)?;
        sid = chat.resolve_session("alice", "bob")?;
        chat.send(&sid, "alice", "persisted")?;
        chat.shutdown();
    }

    let store = Arc::new(FileDocumentStore::open(dir.path())?);
    let (chat, _pushes) = recording_chat(store)?;
    assert_eq!(chat.resolve_session("bob", "alice")?, sid);
    let messages = chat.messages(&sid)?;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "persisted");
    assert_eq!(chat.session(&sid)?.unread_for("bob"), 1);
    assert_eq!(chat.open_session(&sid, "bob")?, 1);
    assert_eq!(chat.messages(&sid)?[0].status, MessageStatus::Read);
    Ok(())
}
