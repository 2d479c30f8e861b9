use crate::{DocumentSnapshot, DocumentStore, Result, User, USERS_COLLECTION};
use std::sync::Arc;

/// Profile lookup and people search for starting new conversations.
#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn DocumentStore>,
    limit: usize,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn DocumentStore>, limit: usize) -> Self {
        Self { store, limit }
    }

    pub fn user(&self, user_id: &str) -> Result<Option<User>> {
        let Some(fields) = self.store.get_document(USERS_COLLECTION, user_id)? else {
            return Ok(None);
        };
        User::from_snapshot(&DocumentSnapshot {
            id: user_id.to_string(),
            fields,
        })
        .map(Some)
    }

    /// Users whose email starts with `query`, ignoring case. The searching
    /// user is never listed. An empty query lists everyone up to the limit.
    pub fn search(&self, query: &str, exclude_user: &str) -> Result<Vec<User>> {
        let prefix = query.trim().to_lowercase();
        let snapshots = self.store.query_where(USERS_COLLECTION, &[])?;

        let mut users: Vec<User> = snapshots
            .iter()
            .filter(|snapshot| snapshot.id != exclude_user)
            .filter_map(|snapshot| match User::from_snapshot(snapshot) {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::warn!(user_id = %snapshot.id, error = %e, "skipping undecodable user");
                    None
                }
            })
            .filter(|user| user.email.to_lowercase().starts_with(&prefix))
            .collect();

        users.sort_by(|a, b| {
            a.email
                .to_lowercase()
                .cmp(&b.email.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        users.truncate(self.limit);
        Ok(users)
    }
}
