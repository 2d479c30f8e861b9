use anyhow::{Context as _, Result};
use dm_sync::Session;
use serde::Serialize;

use super::account::UserInfo;
use super::Context;
use crate::output::Output;

#[derive(Serialize)]
struct UserList {
    users: Vec<UserInfo>,
}

#[derive(Serialize)]
struct SessionOpened {
    session_id: String,
    peer: String,
}

#[derive(Serialize)]
struct ChatList {
    chats: Vec<ChatInfo>,
}

#[derive(Serialize)]
struct ChatInfo {
    id: String,
    peer: Option<String>,
    last_message: Option<String>,
    last_message_at: Option<u64>,
    unread: u64,
}

impl ChatInfo {
    fn new(session: &Session, user_id: &str) -> Self {
        Self {
            id: session.id.clone(),
            peer: session.peer_of(user_id).map(str::to_string),
            last_message: session.last_message.as_ref().map(|m| m.text.clone()),
            last_message_at: session.last_message.as_ref().map(|m| m.created_at.as_millis()),
            unread: session.unread_for(user_id),
        }
    }
}

/// Search the directory by email prefix
pub fn users(ctx: &Context, query: &str, output: &Output) -> Result<()> {
    let user_id = ctx.account.require_user()?;
    let users = ctx
        .chat
        .search_users(query, user_id)?
        .into_iter()
        .map(UserInfo::from)
        .collect();

    output.success("users", UserList { users });
    Ok(())
}

/// Find or create the session with `peer`
pub fn open(ctx: &Context, peer: &str, output: &Output) -> Result<()> {
    let user_id = ctx.account.require_user()?;
    let session_id = ctx.chat.resolve_session(user_id, peer)?;

    output.success(
        "open",
        SessionOpened {
            session_id,
            peer: peer.to_string(),
        },
    );
    Ok(())
}

/// List the signed-in user's sessions, most recently active first
pub fn list(ctx: &Context, output: &Output) -> Result<()> {
    let user_id = ctx.account.require_user()?;
    let subscription = ctx.chat.subscribe_sessions(user_id)?;
    let sessions = subscription
        .try_recv()
        .context("Session list was not available")?;
    subscription.cancel();

    let chats = sessions
        .iter()
        .map(|session| ChatInfo::new(session, user_id))
        .collect();
    output.success("chats", ChatList { chats });
    Ok(())
}
