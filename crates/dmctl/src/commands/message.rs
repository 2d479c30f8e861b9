use anyhow::Result;
use dm_sync::Message;
use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use serde::Serialize;
use std::time::Duration;

use super::Context;
use crate::output::Output;

#[derive(Serialize)]
struct MessageInfo {
    id: String,
    sender_id: String,
    text: String,
    created_at: u64,
    status: &'static str,
    edited: bool,
    deleted: bool,
}

impl From<&Message> for MessageInfo {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            text: message.text.clone(),
            created_at: message.created_at.as_millis(),
            status: message.status.as_str(),
            edited: message.edited,
            deleted: message.deleted,
        }
    }
}

#[derive(Serialize)]
struct MessageSent {
    message_id: String,
    session_id: String,
    created_at: u64,
}

#[derive(Serialize)]
struct MessageList {
    session_id: String,
    swept: usize,
    messages: Vec<MessageInfo>,
}

#[derive(Serialize)]
struct Snapshot {
    session_id: String,
    messages: Vec<MessageInfo>,
}

pub fn send(ctx: &Context, session_id: &str, text: &str, output: &Output) -> Result<()> {
    let user_id = ctx.account.require_user()?;
    match ctx.chat.send(session_id, user_id, text)? {
        Some(sent) => output.success(
            "send",
            MessageSent {
                message_id: sent.message_id,
                session_id: sent.session_id,
                created_at: sent.created_at.as_millis(),
            },
        ),
        None => output.success_message("send", "Nothing to send"),
    }
    Ok(())
}

pub fn edit(
    ctx: &Context,
    session_id: &str,
    message_id: &str,
    text: &str,
    output: &Output,
) -> Result<()> {
    ctx.account.require_user()?;
    ctx.chat.edit(session_id, message_id, text)?;
    output.success_message("edit", &format!("Edited {}", message_id));
    Ok(())
}

pub fn delete(ctx: &Context, session_id: &str, message_id: &str, output: &Output) -> Result<()> {
    ctx.account.require_user()?;
    ctx.chat.delete(session_id, message_id)?;
    output.success_message("delete", &format!("Deleted {}", message_id));
    Ok(())
}

/// Mark the session read for the signed-in user and print its newest
/// `limit` messages, oldest first
pub fn read(ctx: &Context, session_id: &str, limit: usize, output: &Output) -> Result<()> {
    let user_id = ctx.account.require_user()?;
    let swept = ctx.chat.open_session(session_id, user_id)?;
    let messages = ctx.chat.messages(session_id)?;
    let skip = messages.len().saturating_sub(limit);

    output.success(
        "read",
        MessageList {
            session_id: session_id.to_string(),
            swept,
            messages: messages.iter().skip(skip).map(MessageInfo::from).collect(),
        },
    );
    Ok(())
}

/// Print the session's message list every time it changes, including
/// changes written by other processes sharing the data directory
pub fn watch(ctx: &Context, session_id: &str, count: Option<usize>, output: &Output) -> Result<()> {
    let (fs_tx, fs_rx) = crossbeam_channel::unbounded();
    let mut watcher =
        notify::recommended_watcher(move |res: std::result::Result<NotifyEvent, notify::Error>| {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    let _ = fs_tx.send(());
                }
            }
        })?;
    watcher.watch(ctx.store.base_path(), RecursiveMode::NonRecursive)?;

    // Mark delivered so the sender sees the messages reached a device.
    if let Some(user_id) = ctx.account.user_id.as_deref() {
        if let Err(e) = ctx.chat.mark_delivered(session_id, user_id) {
            tracing::debug!(error = %e, "not marking messages delivered");
        }
    }

    let subscription = ctx.chat.subscribe_messages(session_id)?;
    let mut emitted = 0usize;
    loop {
        if let Some(messages) = subscription.recv_timeout(Duration::from_millis(250)) {
            output.event(
                "messages",
                Snapshot {
                    session_id: session_id.to_string(),
                    messages: messages.iter().map(MessageInfo::from).collect(),
                },
            );
            emitted += 1;
            if count.is_some_and(|count| emitted >= count) {
                return Ok(());
            }
        }

        if fs_rx.try_recv().is_ok() {
            while fs_rx.try_recv().is_ok() {}
            let changed = ctx.store.refresh()?;
            tracing::debug!(changed, "store directory changed");
        }
    }
}
