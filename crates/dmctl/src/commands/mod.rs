pub mod account;
pub mod chat;
pub mod message;

use dm_sync::{ChatSync, FileDocumentStore};
use std::sync::Arc;

use crate::account::Account;

/// Everything a command needs: the sync core over the data directory's
/// store, plus who is signed in.
pub struct Context {
    pub chat: ChatSync,
    pub store: Arc<FileDocumentStore>,
    pub account: Account,
}
