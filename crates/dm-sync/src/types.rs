use crate::{Document, DocumentSnapshot, Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const USERS_COLLECTION: &str = "users";
pub const SESSIONS_COLLECTION: &str = "sessions";
pub const MESSAGES_SUBCOLLECTION: &str = "messages";

/// Text stored in place of a soft-deleted message.
pub const TOMBSTONE_TEXT: &str = "This message was deleted";

/// Participants per session. Only 1:1 chats are modeled.
pub const PARTICIPANT_COUNT: usize = 2;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_NOTIFICATION_TITLE: &str = "New Message";

pub fn messages_collection(session_id: &str) -> String {
    format!("{}/{}/{}", SESSIONS_COLLECTION, session_id, MESSAGES_SUBCOLLECTION)
}

pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Timestamp(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery state of a message. Ordering follows the lifecycle, so `max`
/// never moves a message backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(skip)]
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "photoURL")]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub last_seen: Option<Timestamp>,
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

/// Denormalized copy of a session's most recent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessageSummary {
    pub text: String,
    pub sender_id: String,
    pub created_at: Timestamp,
    pub message_id: String,
    pub status: MessageStatus,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl LastMessageSummary {
    pub fn from_message(message: &Message) -> Self {
        Self {
            text: message.text.clone(),
            sender_id: message.sender_id.clone(),
            created_at: message.created_at,
            message_id: message.id.clone(),
            status: message.status,
            edited: message.edited,
            deleted: message.deleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(skip)]
    pub id: String,
    pub participants: Vec<String>,
    #[serde(default)]
    pub last_message: Option<LastMessageSummary>,
    #[serde(default)]
    pub unread_count: HashMap<String, u64>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

impl Session {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// The participant that is not `user_id`.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        self.participants
            .iter()
            .find(|p| p.as_str() != user_id)
            .map(String::as_str)
    }

    pub fn unread_for(&self, user_id: &str) -> u64 {
        self.unread_count.get(user_id).copied().unwrap_or(0)
    }

    /// Timestamp used to order a user's session list.
    pub fn activity_at(&self) -> Timestamp {
        self.last_message
            .as_ref()
            .map(|m| m.created_at)
            .or(self.created_at)
            .unwrap_or(Timestamp(0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(skip)]
    pub id: String,
    #[serde(skip)]
    pub session_id: String,
    pub text: String,
    pub sender_id: String,
    pub created_at: Timestamp,
    pub status: MessageStatus,
    #[serde(default)]
    pub read_by: Vec<String>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub edited_at: Option<Timestamp>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
}

impl Message {
    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.read_by.iter().any(|r| r == user_id)
    }
}

/// Presence as observed from a user document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presence {
    pub online: bool,
    pub last_seen: Option<Timestamp>,
}

impl Presence {
    pub fn from_user(user: &User) -> Self {
        Self {
            online: user.online,
            last_seen: user.last_seen,
        }
    }

    /// Online flag corrected for missed heartbeats.
    pub fn is_online_at(&self, now: Timestamp, stale_after: Duration) -> bool {
        match self.last_seen {
            Some(last_seen) => self.online && now.since(last_seen) <= stale_after,
            None => false,
        }
    }
}

pub(crate) fn decode<T: DeserializeOwned>(fields: &Document) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(fields.clone()))
        .map_err(|e| Error::Corrupt(e.to_string()))
}

impl User {
    pub fn from_snapshot(snapshot: &DocumentSnapshot) -> Result<Self> {
        let mut user: User = decode(&snapshot.fields)?;
        user.id = snapshot.id.clone();
        Ok(user)
    }
}

impl Session {
    pub fn from_snapshot(snapshot: &DocumentSnapshot) -> Result<Self> {
        let mut session: Session = decode(&snapshot.fields)?;
        session.id = snapshot.id.clone();
        Ok(session)
    }
}

impl Message {
    pub fn from_snapshot(session_id: &str, snapshot: &DocumentSnapshot) -> Result<Self> {
        let mut message: Message = decode(&snapshot.fields)?;
        message.id = snapshot.id.clone();
        message.session_id = session_id.to_string();
        Ok(message)
    }
}
