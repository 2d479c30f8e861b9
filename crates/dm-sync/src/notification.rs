use crate::{DocumentStore, Error, Result, USERS_COLLECTION};
use crossbeam_channel::Sender;
use serde_json::Value;
use std::sync::Arc;
use std::thread::JoinHandle;

/// A single push to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    pub to: String,
    pub title: String,
    pub body: String,
}

/// Delivers push requests to a device-messaging provider.
pub trait PushGateway: Send + Sync {
    fn send(&self, request: &PushRequest) -> Result<()>;
}

struct Notice {
    recipient_id: String,
    text: String,
}

/// Fire-and-forget push notifications for new messages.
///
/// Lookups and gateway calls happen on a worker thread so a slow provider
/// never holds up the send that triggered it.
pub struct NotificationDispatcher {
    tx: Option<Sender<Notice>>,
    worker: Option<JoinHandle<()>>,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        gateway: Arc<dyn PushGateway>,
        title: impl Into<String>,
    ) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<Notice>();
        let title = title.into();
        let worker = std::thread::Builder::new()
            .name("push-dispatch".to_string())
            .spawn(move || {
                for notice in rx {
                    deliver(store.as_ref(), gateway.as_ref(), &title, &notice);
                }
            })
            .map_err(|e| {
                Error::NotificationFailure(format!("failed to start dispatcher: {}", e))
            })?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Queue a notification. Never blocks and never fails the caller.
    pub fn notify(&self, recipient_id: &str, text: &str) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        let notice = Notice {
            recipient_id: recipient_id.to_string(),
            text: text.to_string(),
        };
        if tx.send(notice).is_err() {
            tracing::warn!(recipient_id = %recipient_id, "push dispatcher has stopped");
        }
    }

    /// Deliver everything already queued, then stop the worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn push_token(store: &dyn DocumentStore, user_id: &str) -> Result<Option<String>> {
    let token = store
        .get_document(USERS_COLLECTION, user_id)?
        .and_then(|doc| doc.get("pushToken").and_then(Value::as_str).map(str::to_string))
        .filter(|token| !token.is_empty());
    Ok(token)
}

fn deliver(store: &dyn DocumentStore, gateway: &dyn PushGateway, title: &str, notice: &Notice) {
    let token = match push_token(store, &notice.recipient_id) {
        Ok(Some(token)) => token,
        Ok(None) => {
            tracing::debug!(recipient_id = %notice.recipient_id, "no push token, skipping");
            return;
        }
        Err(e) => {
            tracing::warn!(recipient_id = %notice.recipient_id, error = %e, "push token lookup failed");
            return;
        }
    };

    let request = PushRequest {
        to: token,
        title: title.to_string(),
        body: notice.text.clone(),
    };
    match gateway.send(&request) {
        Ok(()) => tracing::debug!(recipient_id = %notice.recipient_id, "push sent"),
        Err(e) => {
            tracing::warn!(recipient_id = %notice.recipient_id, error = %e, "push delivery failed")
        }
    }
}

#[cfg(feature = "http-push")]
pub use http::ExpoPushGateway;

#[cfg(feature = "http-push")]
mod http {
    use super::{PushGateway, PushRequest};
    use crate::{Error, Result};
    use serde::Serialize;
    use std::time::Duration;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct ExpoMessage<'a> {
        to: &'a str,
        sound: &'static str,
        title: &'a str,
        body: &'a str,
        data: ExpoData,
        priority: &'static str,
        channel_id: &'static str,
    }

    #[derive(Serialize)]
    struct ExpoData {
        #[serde(rename = "type")]
        kind: &'static str,
    }

    impl<'a> From<&'a PushRequest> for ExpoMessage<'a> {
        fn from(request: &'a PushRequest) -> Self {
            Self {
                to: &request.to,
                sound: "default",
                title: &request.title,
                body: &request.body,
                data: ExpoData { kind: "message" },
                priority: "high",
                channel_id: "default",
            }
        }
    }

    /// Posts to the Expo push service.
    pub struct ExpoPushGateway {
        endpoint: String,
        client: reqwest::blocking::Client,
    }

    impl ExpoPushGateway {
        pub fn new(endpoint: impl Into<String>) -> Result<Self> {
            let client = reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .map_err(|e| Error::NotificationFailure(e.to_string()))?;
            Ok(Self {
                endpoint: endpoint.into(),
                client,
            })
        }
    }

    impl PushGateway for ExpoPushGateway {
        fn send(&self, request: &PushRequest) -> Result<()> {
            let response = self
                .client
                .post(&self.endpoint)
                .header("Accept", "application/json")
                .json(&ExpoMessage::from(request))
                .send()
                .map_err(|e| Error::NotificationFailure(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                return Err(Error::NotificationFailure(format!(
                    "push endpoint returned {}: {}",
                    status, body
                )));
            }
            Ok(())
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldUpdate, InMemoryStore};
    use crossbeam_channel::Receiver;
    use std::time::Duration;

    struct Recording(Sender<PushRequest>);

    impl PushGateway for Recording {
        fn send(&self, request: &PushRequest) -> Result<()> {
            let _ = self.0.send(request.clone());
            Ok(())
        }
    }

    fn setup() -> (Arc<dyn DocumentStore>, NotificationDispatcher, Receiver<PushRequest>) {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
        let (tx, rx) = crossbeam_channel::unbounded();
        let dispatcher =
            NotificationDispatcher::new(store.clone(), Arc::new(Recording(tx)), "New Message")
                .unwrap();
        (store, dispatcher, rx)
    }

    #[test]
    fn test_pushes_to_stored_token() {
        let (store, dispatcher, rx) = setup();
        store
            .put_document(
                USERS_COLLECTION,
                "bob",
                vec![FieldUpdate::set("pushToken", "tok-bob")],
            )
            .unwrap();

        dispatcher.notify("bob", "hello");
        let request = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(request.to, "tok-bob");
        assert_eq!(request.title, "New Message");
        assert_eq!(request.body, "hello");
    }

    #[test]
    fn test_missing_or_null_token_sends_nothing() {
        let (store, dispatcher, rx) = setup();
        store
            .put_document(
                USERS_COLLECTION,
                "bob",
                vec![FieldUpdate::set("pushToken", Value::Null)],
            )
            .unwrap();

        dispatcher.notify("bob", "hello");
        dispatcher.notify("nobody", "hello");
        dispatcher.shutdown();
        assert!(rx.try_recv().is_err());
    }
}
