use crate::{
    DocumentSnapshot, DocumentStore, Error, FieldUpdate, Presence, Result, User, USERS_COLLECTION,
};
use crossbeam_channel::{RecvTimeoutError, Sender};
use serde_json::Value;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// What the identity provider tells us about a user at sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            display_name: None,
            photo_url: None,
        }
    }

    /// Provided display name, else the local part of the email.
    pub fn effective_display_name(&self) -> String {
        self.display_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| {
                self.email
                    .split('@')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            })
    }
}

fn token_value(token: Option<&str>) -> Value {
    match token {
        Some(token) if !token.trim().is_empty() => Value::from(token),
        _ => Value::Null,
    }
}

/// Online flag and last-seen bookkeeping for user documents.
#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn DocumentStore>,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Mark the user online, creating their profile on first sign-in.
    pub fn sign_in(&self, identity: &Identity, push_token: Option<&str>) -> Result<User> {
        if identity.user_id.is_empty() {
            return Err(Error::InvalidInput("user id must not be empty".to_string()));
        }

        let created = self.store.create_document(
            USERS_COLLECTION,
            &identity.user_id,
            vec![
                FieldUpdate::set("email", identity.email.as_str()),
                FieldUpdate::set("displayName", identity.effective_display_name()),
                FieldUpdate::set(
                    "photoURL",
                    identity.photo_url.as_deref().map(Value::from).unwrap_or(Value::Null),
                ),
                FieldUpdate::set("pushToken", token_value(push_token)),
                FieldUpdate::set("online", true),
                FieldUpdate::server_timestamp("lastSeen"),
                FieldUpdate::server_timestamp("createdAt"),
            ],
        )?;

        let fields = match created {
            Some(fields) => {
                tracing::info!(user_id = %identity.user_id, "created user profile");
                fields
            }
            None => {
                let mut updates = vec![
                    FieldUpdate::set("online", true),
                    FieldUpdate::server_timestamp("lastSeen"),
                ];
                // An absent token keeps whatever the profile already holds.
                if let token @ Value::String(_) = token_value(push_token) {
                    updates.push(FieldUpdate::set("pushToken", token));
                }
                self.store
                    .update_fields(USERS_COLLECTION, &identity.user_id, updates)?
            }
        };
        tracing::info!(user_id = %identity.user_id, "signed in");

        User::from_snapshot(&DocumentSnapshot {
            id: identity.user_id.clone(),
            fields,
        })
    }

    /// Mark offline and stop notifications to this user.
    pub fn sign_out(&self, user_id: &str) -> Result<()> {
        self.store.update_fields(
            USERS_COLLECTION,
            user_id,
            vec![
                FieldUpdate::set("online", false),
                FieldUpdate::server_timestamp("lastSeen"),
                FieldUpdate::set("pushToken", Value::Null),
            ],
        )?;
        tracing::info!(user_id = %user_id, "signed out");
        Ok(())
    }

    pub fn heartbeat(&self, user_id: &str) -> Result<()> {
        self.store.update_fields(
            USERS_COLLECTION,
            user_id,
            vec![
                FieldUpdate::set("online", true),
                FieldUpdate::server_timestamp("lastSeen"),
            ],
        )?;
        Ok(())
    }

    pub fn update_push_token(&self, user_id: &str, token: Option<&str>) -> Result<()> {
        self.store.update_fields(
            USERS_COLLECTION,
            user_id,
            vec![FieldUpdate::set("pushToken", token_value(token))],
        )?;
        Ok(())
    }

    pub fn presence(&self, user_id: &str) -> Result<Option<Presence>> {
        let Some(fields) = self.store.get_document(USERS_COLLECTION, user_id)? else {
            return Ok(None);
        };
        let user = User::from_snapshot(&DocumentSnapshot {
            id: user_id.to_string(),
            fields,
        })?;
        Ok(Some(Presence::from_user(&user)))
    }

    /// Refresh presence every `interval` on a background thread until the
    /// handle is stopped or dropped.
    pub fn start_heartbeat(&self, user_id: &str, interval: Duration) -> Result<HeartbeatHandle> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let tracker = self.clone();
        let user_id = user_id.to_string();
        let worker = std::thread::Builder::new()
            .name(format!("heartbeat-{}", user_id))
            .spawn(move || {
                while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(interval) {
                    if let Err(e) = tracker.heartbeat(&user_id) {
                        tracing::warn!(user_id = %user_id, error = %e, "heartbeat failed");
                    }
                }
            })
            .map_err(|e| Error::StoreUnavailable(format!("failed to start heartbeat: {}", e)))?;

        Ok(HeartbeatHandle {
            stop: Some(stop_tx),
            worker: Some(worker),
        })
    }
}

pub struct HeartbeatHandle {
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl HeartbeatHandle {
    /// Stop the heartbeat and wait for an in-flight beat to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.stop.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
