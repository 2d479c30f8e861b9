use crate::ledger::load_session;
use crate::{
    messages_collection, Document, DocumentStore, Error, FieldPath, FieldUpdate, Message,
    MessageStatus, Result, Session, SESSIONS_COLLECTION,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

fn stored_status(doc: &Document, path: &str) -> MessageStatus {
    FieldPath::from(path)
        .lookup(doc)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or(MessageStatus::Sent)
}

/// `Read` once every participant has seen the message (its sender counts
/// as having seen it), `Delivered` before that.
pub fn status_after_read(participants: &[String], sender_id: &str, read_by: &[String]) -> MessageStatus {
    let everyone = participants
        .iter()
        .all(|p| p == sender_id || read_by.contains(p));
    if everyone {
        MessageStatus::Read
    } else {
        MessageStatus::Delivered
    }
}

/// Promotes peer messages when a participant receives or views a session.
#[derive(Clone)]
pub struct ReadSweep {
    store: Arc<dyn DocumentStore>,
}

impl ReadSweep {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn member_session(&self, session_id: &str, user_id: &str) -> Result<Session> {
        let session = load_session(self.store.as_ref(), session_id)?;
        if !session.has_participant(user_id) {
            return Err(Error::NotParticipant {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
            });
        }
        Ok(session)
    }

    fn peer_messages(&self, session_id: &str, user_id: &str) -> Result<Vec<Message>> {
        let snapshots = self
            .store
            .query_where(&messages_collection(session_id), &[])?;
        let mut messages = Vec::new();
        for snapshot in &snapshots {
            match Message::from_snapshot(session_id, snapshot) {
                Ok(message) if message.sender_id != user_id => messages.push(message),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(message_id = %snapshot.id, error = %e, "skipping undecodable message");
                }
            }
        }
        Ok(messages)
    }

    /// Mark every peer message as read by `reader` and zero their unread
    /// counter. Returns how many messages gained `reader` in their read-set.
    pub fn mark_read(&self, session_id: &str, reader_id: &str) -> Result<usize> {
        let session = self.member_session(session_id, reader_id)?;
        let collection = messages_collection(session_id);
        let mut promoted = HashMap::new();

        for message in self.peer_messages(session_id, reader_id)? {
            if message.is_read_by(reader_id) {
                continue;
            }
            let mut added = false;
            let doc = self.store.transact(&collection, &message.id, &mut |doc| {
                let mut read_by: Vec<String> = doc
                    .get("readBy")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                if read_by.iter().any(|r| r == reader_id) {
                    added = false;
                    return Ok(Vec::new());
                }
                read_by.push(reader_id.to_string());
                added = true;

                let sender_id = doc.get("senderId").and_then(Value::as_str).unwrap_or_default();
                let next = status_after_read(&session.participants, sender_id, &read_by);
                let mut updates = vec![FieldUpdate::array_union(
                    "readBy",
                    vec![Value::from(reader_id)],
                )];
                if next > stored_status(doc, "status") {
                    updates.push(FieldUpdate::set("status", next.as_str()));
                }
                Ok(updates)
            })?;
            if added {
                promoted.insert(message.id.clone(), stored_status(&doc, "status"));
            }
        }

        let swept = promoted.len();
        self.store
            .transact(SESSIONS_COLLECTION, session_id, &mut |doc| {
                let mut updates = vec![FieldUpdate::set(
                    FieldPath::new(["unreadCount", reader_id]),
                    0,
                )];
                updates.extend(summary_status_update(doc, &promoted));
                Ok(updates)
            })?;

        tracing::debug!(session_id = %session_id, reader_id = %reader_id, swept, "read sweep");
        Ok(swept)
    }

    /// Advance peer messages still `sent` to `delivered`. The read-set and
    /// unread counter are left alone.
    pub fn mark_delivered(&self, session_id: &str, recipient_id: &str) -> Result<usize> {
        self.member_session(session_id, recipient_id)?;
        let collection = messages_collection(session_id);
        let mut promoted = HashMap::new();

        for message in self.peer_messages(session_id, recipient_id)? {
            if message.status != MessageStatus::Sent {
                continue;
            }
            let mut advanced = false;
            self.store.transact(&collection, &message.id, &mut |doc| {
                advanced = stored_status(doc, "status") == MessageStatus::Sent;
                if advanced {
                    Ok(vec![FieldUpdate::set(
                        "status",
                        MessageStatus::Delivered.as_str(),
                    )])
                } else {
                    Ok(Vec::new())
                }
            })?;
            if advanced {
                promoted.insert(message.id.clone(), MessageStatus::Delivered);
            }
        }

        let delivered = promoted.len();
        if delivered > 0 {
            self.store
                .transact(SESSIONS_COLLECTION, session_id, &mut |doc| {
                    Ok(summary_status_update(doc, &promoted).into_iter().collect())
                })?;
        }
        tracing::debug!(session_id = %session_id, recipient_id = %recipient_id, delivered, "delivery sweep");
        Ok(delivered)
    }
}

/// Mirror a promoted status onto the summary if it references that message.
fn summary_status_update(
    session: &Document,
    promoted: &HashMap<String, MessageStatus>,
) -> Option<FieldUpdate> {
    let referenced = FieldPath::from("lastMessage.messageId")
        .lookup(session)
        .and_then(Value::as_str)?;
    let status = *promoted.get(referenced)?;
    if status > stored_status(session, "lastMessage.status") {
        Some(FieldUpdate::set("lastMessage.status", status.as_str()))
    } else {
        None
    }
}
