use crate::{
    messages_collection, DocumentSnapshot, DocumentStore, Error, FieldPath, FieldUpdate,
    LastMessageSummary, Message, MessageStatus, Result, Session, Timestamp, SESSIONS_COLLECTION,
    TOMBSTONE_TEXT,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Outcome of a durable append.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub message_id: String,
    pub session_id: String,
    pub sender_id: String,
    pub recipient_id: Option<String>,
    pub text: String,
    pub created_at: Timestamp,
}

pub(crate) fn load_session(store: &dyn DocumentStore, session_id: &str) -> Result<Session> {
    let fields = store
        .get_document(SESSIONS_COLLECTION, session_id)?
        .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))?;
    Session::from_snapshot(&DocumentSnapshot {
        id: session_id.to_string(),
        fields,
    })
}

/// Appends messages and keeps the session's last-message summary and
/// unread counters in step with them.
#[derive(Clone)]
pub struct MessageLedger {
    store: Arc<dyn DocumentStore>,
}

impl MessageLedger {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn session(&self, session_id: &str) -> Result<Session> {
        load_session(self.store.as_ref(), session_id)
    }

    /// Append a message. Whitespace-only text is ignored and yields `None`.
    pub fn send(
        &self,
        session_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<Option<SentMessage>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let session = self.session(session_id)?;
        if !session.has_participant(sender_id) {
            return Err(Error::NotParticipant {
                session_id: session_id.to_string(),
                user_id: sender_id.to_string(),
            });
        }
        let recipient_id = session.peer_of(sender_id).map(str::to_string);

        let message_id = uuid::Uuid::new_v4().to_string();
        let fields = self.store.put_document(
            &messages_collection(session_id),
            &message_id,
            vec![
                FieldUpdate::set("text", text),
                FieldUpdate::set("senderId", sender_id),
                FieldUpdate::server_timestamp("createdAt"),
                FieldUpdate::set("status", MessageStatus::Sent.as_str()),
                FieldUpdate::set("readBy", json!([])),
                FieldUpdate::set("edited", false),
                FieldUpdate::set("editedAt", Value::Null),
                FieldUpdate::set("deleted", false),
                FieldUpdate::set("deletedAt", Value::Null),
            ],
        )?;
        let message = Message::from_snapshot(
            session_id,
            &DocumentSnapshot {
                id: message_id.clone(),
                fields,
            },
        )?;

        let summary = serde_json::to_value(LastMessageSummary::from_message(&message))?;
        let created_at = message.created_at;
        self.store
            .transact(SESSIONS_COLLECTION, session_id, &mut |doc| {
                let mut updates = Vec::new();
                if let Some(recipient) = recipient_id.as_deref() {
                    updates.push(FieldUpdate::increment(
                        FieldPath::new(["unreadCount", recipient]),
                        1,
                    ));
                }
                // A summary written for a later message must survive a late
                // arrival of this one.
                let current = FieldPath::from("lastMessage.createdAt")
                    .lookup(doc)
                    .and_then(Value::as_u64);
                if current.map_or(true, |at| at <= created_at.as_millis()) {
                    updates.push(FieldUpdate::set("lastMessage", summary.clone()));
                }
                Ok(updates)
            })?;

        tracing::debug!(
            session_id = %session_id,
            message_id = %message_id,
            created_at = %created_at,
            "message appended"
        );

        Ok(Some(SentMessage {
            message_id,
            session_id: session_id.to_string(),
            sender_id: sender_id.to_string(),
            recipient_id,
            text: message.text,
            created_at,
        }))
    }

    /// Replace a message's text. Empty replacements are ignored; deleted
    /// messages cannot be edited and report `NotFound`.
    pub fn edit(&self, session_id: &str, message_id: &str, new_text: &str) -> Result<()> {
        if new_text.trim().is_empty() {
            return Ok(());
        }

        self.store
            .transact(&messages_collection(session_id), message_id, &mut |doc| {
                if doc.get("deleted").and_then(Value::as_bool).unwrap_or(false) {
                    return Err(Error::NotFound(format!(
                        "message {} was deleted",
                        message_id
                    )));
                }
                Ok(vec![
                    FieldUpdate::set("text", new_text),
                    FieldUpdate::set("edited", true),
                    FieldUpdate::server_timestamp("editedAt"),
                ])
            })?;

        self.refresh_summary(
            session_id,
            message_id,
            vec![
                FieldUpdate::set("lastMessage.text", new_text),
                FieldUpdate::set("lastMessage.edited", true),
            ],
        )
    }

    /// Soft-delete: the record stays, its text becomes the tombstone.
    pub fn delete(&self, session_id: &str, message_id: &str) -> Result<()> {
        self.store
            .transact(&messages_collection(session_id), message_id, &mut |doc| {
                if doc.get("deleted").and_then(Value::as_bool).unwrap_or(false) {
                    return Ok(Vec::new());
                }
                Ok(vec![
                    FieldUpdate::set("text", TOMBSTONE_TEXT),
                    FieldUpdate::set("deleted", true),
                    FieldUpdate::server_timestamp("deletedAt"),
                ])
            })?;

        self.refresh_summary(
            session_id,
            message_id,
            vec![
                FieldUpdate::set("lastMessage.text", TOMBSTONE_TEXT),
                FieldUpdate::set("lastMessage.deleted", true),
            ],
        )
    }

    /// Apply `updates` to the session only while its summary still points
    /// at `message_id`.
    fn refresh_summary(
        &self,
        session_id: &str,
        message_id: &str,
        updates: Vec<FieldUpdate>,
    ) -> Result<()> {
        self.store
            .transact(SESSIONS_COLLECTION, session_id, &mut |doc| {
                let referenced = FieldPath::from("lastMessage.messageId")
                    .lookup(doc)
                    .and_then(Value::as_str);
                if referenced == Some(message_id) {
                    Ok(updates.clone())
                } else {
                    Ok(Vec::new())
                }
            })?;
        Ok(())
    }

    pub fn message(&self, session_id: &str, message_id: &str) -> Result<Message> {
        let fields = self
            .store
            .get_document(&messages_collection(session_id), message_id)?
            .ok_or_else(|| Error::NotFound(format!("message {}", message_id)))?;
        Message::from_snapshot(
            session_id,
            &DocumentSnapshot {
                id: message_id.to_string(),
                fields,
            },
        )
    }

    /// Every message of the session, oldest first.
    pub fn messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let snapshots = self
            .store
            .query_where(&messages_collection(session_id), &[])?;
        let mut messages = snapshots
            .iter()
            .map(|snapshot| Message::from_snapshot(session_id, snapshot))
            .collect::<Result<Vec<_>>>()?;
        sort_messages(&mut messages);
        Ok(messages)
    }
}

pub(crate) fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
