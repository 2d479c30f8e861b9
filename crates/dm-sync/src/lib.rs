//! Synchronization core for one-to-one direct messaging.
//!
//! All authoritative state lives behind a [`DocumentStore`]; the types here
//! are stateless operations over it plus live-view subscriptions.

pub mod chat;
pub mod config;
pub mod directory;
pub mod error;
pub mod file_storage;
pub mod ledger;
pub mod live;
pub mod notification;
pub mod presence;
pub mod read_sweep;
pub mod session_resolver;
pub mod storage;
pub mod types;

pub use chat::ChatSync;
pub use config::{SyncConfig, DEFAULT_PUSH_ENDPOINT};
pub use directory::UserDirectory;
pub use error::{Error, Result};
pub use file_storage::FileDocumentStore;
pub use ledger::{MessageLedger, SentMessage};
pub use live::{LiveViews, Subscription};
#[cfg(feature = "http-push")]
pub use notification::ExpoPushGateway;
pub use notification::{NotificationDispatcher, PushGateway, PushRequest};
pub use presence::{HeartbeatHandle, Identity, PresenceTracker};
pub use read_sweep::{status_after_read, ReadSweep};
pub use session_resolver::{pair_session_id, SessionResolver};
pub use storage::{
    Document, DocumentSnapshot, DocumentStore, FieldPath, FieldUpdate, FieldValue, InMemoryStore,
    Mutation, Predicate, SnapshotCallback, WatchTarget,
};
pub use types::*;
