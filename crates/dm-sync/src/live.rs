use crate::ledger::sort_messages;
use crate::{
    messages_collection, DocumentSnapshot, DocumentStore, Message, Predicate, Presence, Result,
    Session, Unsubscribe, User, WatchTarget, SESSIONS_COLLECTION, USERS_COLLECTION,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Single-slot channel: a new value replaces one the consumer has not
/// taken yet.
struct LatestSender<T> {
    tx: Sender<T>,
    evict: Receiver<T>,
}

fn latest_channel<T>() -> (LatestSender<T>, Receiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (
        LatestSender {
            tx,
            evict: rx.clone(),
        },
        rx,
    )
}

impl<T> LatestSender<T> {
    fn publish(&self, mut value: T) {
        loop {
            match self.tx.try_send(value) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(rejected)) => {
                    let _ = self.evict.try_recv();
                    value = rejected;
                }
            }
        }
    }
}

/// A live sequence of snapshots. Dropping it cancels.
pub struct Subscription<T> {
    rx: Receiver<T>,
    unsubscribe: Mutex<Option<Unsubscribe>>,
}

impl<T> Subscription<T> {
    fn new(rx: Receiver<T>, unsubscribe: Unsubscribe) -> Self {
        Self {
            rx,
            unsubscribe: Mutex::new(Some(unsubscribe)),
        }
    }

    /// Block for the next snapshot. `None` once cancelled.
    pub fn recv(&self) -> Option<T> {
        if self.is_cancelled() {
            return None;
        }
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        if self.is_cancelled() {
            return None;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Some(value),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<T> {
        if self.is_cancelled() {
            return None;
        }
        match self.rx.try_recv() {
            Ok(value) => Some(value),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.unsubscribe
            .lock()
            .map(|slot| slot.is_none())
            .unwrap_or(true)
    }

    /// Stop emissions. Safe to call more than once.
    pub fn cancel(&self) {
        let unsubscribe = match self.unsubscribe.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe();
        }
        while self.rx.try_recv().is_ok() {}
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Continuously updating views over sessions, messages and presence.
#[derive(Clone)]
pub struct LiveViews {
    store: Arc<dyn DocumentStore>,
}

impl LiveViews {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn watch<T, F>(&self, target: WatchTarget, project: F) -> Result<Subscription<T>>
    where
        T: Send + 'static,
        F: Fn(Vec<DocumentSnapshot>) -> Option<T> + Send + 'static,
    {
        let (sender, rx) = latest_channel();
        let unsubscribe = self.store.subscribe(
            target,
            Box::new(move |snapshots| {
                if let Some(value) = project(snapshots) {
                    sender.publish(value);
                }
            }),
        )?;
        Ok(Subscription::new(rx, unsubscribe))
    }

    /// Messages of a session, oldest first.
    pub fn session_messages(&self, session_id: &str) -> Result<Subscription<Vec<Message>>> {
        let owned_id = session_id.to_string();
        self.watch(
            WatchTarget::query(messages_collection(session_id), Vec::new()),
            move |snapshots| {
                let mut messages: Vec<Message> = snapshots
                    .iter()
                    .filter_map(|snapshot| match Message::from_snapshot(&owned_id, snapshot) {
                        Ok(message) => Some(message),
                        Err(e) => {
                            tracing::warn!(message_id = %snapshot.id, error = %e, "dropping undecodable message from view");
                            None
                        }
                    })
                    .collect();
                sort_messages(&mut messages);
                Some(messages)
            },
        )
    }

    /// Sessions the user takes part in, most recently active first.
    pub fn user_sessions(&self, user_id: &str) -> Result<Subscription<Vec<Session>>> {
        self.watch(
            WatchTarget::query(
                SESSIONS_COLLECTION,
                vec![Predicate::ArrayContains(
                    "participants".into(),
                    Value::from(user_id),
                )],
            ),
            |snapshots| {
                let mut sessions: Vec<Session> = snapshots
                    .iter()
                    .filter_map(|snapshot| match Session::from_snapshot(snapshot) {
                        Ok(session) => Some(session),
                        Err(e) => {
                            tracing::warn!(session_id = %snapshot.id, error = %e, "dropping undecodable session from view");
                            None
                        }
                    })
                    .collect();
                sort_sessions(&mut sessions);
                Some(sessions)
            },
        )
    }

    /// Presence of one user. Nothing is emitted until the user exists.
    pub fn user_presence(&self, user_id: &str) -> Result<Subscription<Presence>> {
        self.watch(
            WatchTarget::document(USERS_COLLECTION, user_id),
            |snapshots| {
                let snapshot = snapshots.first()?;
                match User::from_snapshot(snapshot) {
                    Ok(user) => Some(Presence::from_user(&user)),
                    Err(e) => {
                        tracing::warn!(user_id = %snapshot.id, error = %e, "undecodable user document");
                        None
                    }
                }
            },
        )
    }
}

pub(crate) fn sort_sessions(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| {
        b.activity_at()
            .cmp(&a.activity_at())
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_sender_keeps_only_newest() {
        let (sender, rx) = latest_channel();
        sender.publish(1);
        sender.publish(2);
        sender.publish(3);
        assert_eq!(rx.try_recv().unwrap(), 3);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cancel_runs_unsubscribe_once_and_drains() {
        let (sender, rx) = latest_channel();
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        let subscription = Subscription::new(
            rx,
            Box::new(move || {
                let _ = done_tx.send(());
            }),
        );
        sender.publish("pending");

        subscription.cancel();
        subscription.cancel();
        drop(subscription);

        assert_eq!(done_rx.try_iter().count(), 1);
    }

    #[test]
    fn test_cancelled_subscription_yields_nothing() {
        let (sender, rx) = latest_channel();
        let subscription = Subscription::new(rx, Box::new(|| {}));
        subscription.cancel();
        sender.publish(7);
        assert!(subscription.try_recv().is_none());
        assert!(subscription.recv().is_none());
    }
}
