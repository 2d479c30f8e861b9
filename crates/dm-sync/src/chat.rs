use crate::{
    DocumentStore, Error, HeartbeatHandle, Identity, LiveViews, Message, MessageLedger,
    NotificationDispatcher, Presence, PresenceTracker, PushGateway, ReadSweep, Result,
    SentMessage, Session, SessionResolver, Subscription, SyncConfig, Timestamp, User,
    UserDirectory,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One entry point over a store: sessions, messages, read state, presence,
/// live views and push notifications.
pub struct ChatSync {
    config: SyncConfig,
    resolver: SessionResolver,
    ledger: MessageLedger,
    sweep: ReadSweep,
    presence: PresenceTracker,
    views: LiveViews,
    directory: UserDirectory,
    dispatcher: NotificationDispatcher,
    heartbeats: Mutex<HashMap<String, HeartbeatHandle>>,
}

impl ChatSync {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: SyncConfig,
        gateway: Arc<dyn PushGateway>,
    ) -> Result<Self> {
        config.validate()?;
        let dispatcher =
            NotificationDispatcher::new(store.clone(), gateway, config.notification_title.clone())?;
        Ok(Self {
            resolver: SessionResolver::new(store.clone()),
            ledger: MessageLedger::new(store.clone()),
            sweep: ReadSweep::new(store.clone()),
            presence: PresenceTracker::new(store.clone()),
            views: LiveViews::new(store.clone()),
            directory: UserDirectory::new(store, config.directory_limit),
            dispatcher,
            heartbeats: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn resolve_session(&self, user_a: &str, user_b: &str) -> Result<String> {
        self.resolver.resolve(user_a, user_b)
    }

    /// Append a message and queue a push for the other participant.
    pub fn send(&self, session_id: &str, sender_id: &str, text: &str) -> Result<Option<SentMessage>> {
        let sent = self.ledger.send(session_id, sender_id, text)?;
        if let Some(sent) = &sent {
            if let Some(recipient_id) = &sent.recipient_id {
                self.dispatcher.notify(recipient_id, &sent.text);
            }
        }
        Ok(sent)
    }

    pub fn edit(&self, session_id: &str, message_id: &str, new_text: &str) -> Result<()> {
        self.ledger.edit(session_id, message_id, new_text)
    }

    pub fn delete(&self, session_id: &str, message_id: &str) -> Result<()> {
        self.ledger.delete(session_id, message_id)
    }

    /// The reader starts viewing the session; everything from the peer is
    /// now read.
    pub fn open_session(&self, session_id: &str, reader_id: &str) -> Result<usize> {
        self.sweep.mark_read(session_id, reader_id)
    }

    pub fn mark_delivered(&self, session_id: &str, recipient_id: &str) -> Result<usize> {
        self.sweep.mark_delivered(session_id, recipient_id)
    }

    pub fn session(&self, session_id: &str) -> Result<Session> {
        self.ledger.session(session_id)
    }

    pub fn messages(&self, session_id: &str) -> Result<Vec<Message>> {
        self.ledger.messages(session_id)
    }

    /// Sign in and keep the user's presence fresh until `sign_out`.
    pub fn sign_in(&self, identity: &Identity, push_token: Option<&str>) -> Result<User> {
        let user = self.presence.sign_in(identity, push_token)?;
        let handle = self
            .presence
            .start_heartbeat(&identity.user_id, self.config.heartbeat_interval())?;
        let previous = self
            .heartbeats()?
            .insert(identity.user_id.clone(), handle);
        if let Some(previous) = previous {
            previous.stop();
        }
        Ok(user)
    }

    pub fn sign_out(&self, user_id: &str) -> Result<()> {
        // A beat landing after the offline write would bring the user back.
        let handle = self.heartbeats()?.remove(user_id);
        if let Some(handle) = handle {
            handle.stop();
        }
        self.presence.sign_out(user_id)
    }

    pub fn update_push_token(&self, user_id: &str, token: Option<&str>) -> Result<()> {
        self.presence.update_push_token(user_id, token)
    }

    /// Presence with missed heartbeats taken into account.
    pub fn is_online(&self, user_id: &str) -> Result<bool> {
        Ok(self
            .presence
            .presence(user_id)?
            .map(|p| p.is_online_at(Timestamp::now(), self.config.stale_after()))
            .unwrap_or(false))
    }

    pub fn user(&self, user_id: &str) -> Result<Option<User>> {
        self.directory.user(user_id)
    }

    pub fn search_users(&self, query: &str, searching_user: &str) -> Result<Vec<User>> {
        self.directory.search(query, searching_user)
    }

    pub fn subscribe_messages(&self, session_id: &str) -> Result<Subscription<Vec<Message>>> {
        self.views.session_messages(session_id)
    }

    pub fn subscribe_sessions(&self, user_id: &str) -> Result<Subscription<Vec<Session>>> {
        self.views.user_sessions(user_id)
    }

    pub fn subscribe_presence(&self, user_id: &str) -> Result<Subscription<Presence>> {
        self.views.user_presence(user_id)
    }

    /// Stop heartbeats and flush queued notifications.
    pub fn shutdown(self) {
        let Self {
            dispatcher,
            heartbeats,
            ..
        } = self;
        if let Ok(heartbeats) = heartbeats.into_inner() {
            for (_, handle) in heartbeats {
                handle.stop();
            }
        }
        dispatcher.shutdown();
    }

    fn heartbeats(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, HeartbeatHandle>>> {
        self.heartbeats
            .lock()
            .map_err(|_| Error::StoreUnavailable("heartbeat registry poisoned".to_string()))
    }
}
