use crate::{
    DocumentStore, Error, FieldUpdate, Predicate, Result, Session, SESSIONS_COLLECTION,
};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Deterministic id for the unordered pair `{a, b}`.
pub fn pair_session_id(a: &str, b: &str) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update(low.as_bytes());
    hasher.update([0u8]);
    hasher.update(high.as_bytes());
    hex::encode(hasher.finalize())
}

/// Finds or creates the single session shared by two users.
#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn DocumentStore>,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn resolve(&self, user_a: &str, user_b: &str) -> Result<String> {
        if user_a.is_empty() || user_b.is_empty() {
            return Err(Error::InvalidInput("user id must not be empty".to_string()));
        }
        if user_a == user_b {
            return Err(Error::InvalidInput(
                "a session needs two distinct participants".to_string(),
            ));
        }

        if let Some(existing) = self.canonical_session(user_a, user_b)? {
            return Ok(existing);
        }

        let session_id = pair_session_id(user_a, user_b);
        let created = self.store.create_document(
            SESSIONS_COLLECTION,
            &session_id,
            vec![
                FieldUpdate::set("participants", json!([user_a, user_b])),
                FieldUpdate::set("unreadCount", json!({})),
                FieldUpdate::server_timestamp("createdAt"),
            ],
        )?;
        if created.is_some() {
            tracing::debug!(session_id = %session_id, "created session");
        } else {
            tracing::debug!(session_id = %session_id, "session created concurrently");
        }

        // Another writer may have produced a differently keyed duplicate in
        // the meantime; everyone converges on the smallest id.
        Ok(self
            .canonical_session(user_a, user_b)?
            .unwrap_or(session_id))
    }

    /// All sessions whose participants are exactly `{user_a, user_b}`,
    /// sorted by id.
    pub fn sessions_for_pair(&self, user_a: &str, user_b: &str) -> Result<Vec<Session>> {
        let snapshots = self.store.query_where(
            SESSIONS_COLLECTION,
            &[Predicate::ArrayContains(
                "participants".into(),
                Value::from(user_a),
            )],
        )?;

        let mut sessions = Vec::new();
        for snapshot in &snapshots {
            match Session::from_snapshot(snapshot) {
                Ok(session)
                    if session.participants.len() == 2 && session.has_participant(user_b) =>
                {
                    sessions.push(session)
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(session_id = %snapshot.id, error = %e, "skipping undecodable session");
                }
            }
        }
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sessions)
    }

    fn canonical_session(&self, user_a: &str, user_b: &str) -> Result<Option<String>> {
        let sessions = self.sessions_for_pair(user_a, user_b)?;
        if sessions.len() > 1 {
            tracing::warn!(
                count = sessions.len(),
                keep = %sessions[0].id,
                "duplicate sessions for one pair"
            );
        }
        Ok(sessions.into_iter().next().map(|s| s.id))
    }
}
