use anyhow::Result;
use dm_sync::{Identity, User};
use serde::Serialize;

use super::Context;
use crate::output::Output;

#[derive(Serialize)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub online: bool,
    pub last_seen: Option<u64>,
    pub has_push_token: bool,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            online: user.online,
            last_seen: user.last_seen.map(|t| t.as_millis()),
            has_push_token: user.push_token.is_some(),
        }
    }
}

#[derive(Serialize)]
struct WhoamiResult {
    user_id: Option<String>,
    signed_in: bool,
    online: bool,
}

/// Sign in, creating the profile on first use
pub fn sign_in(
    ctx: &mut Context,
    user_id: &str,
    email: &str,
    display_name: Option<String>,
    push_token: Option<&str>,
    output: &Output,
) -> Result<()> {
    let identity = Identity {
        display_name,
        ..Identity::new(user_id, email)
    };
    let user = ctx.chat.sign_in(&identity, push_token)?;
    ctx.account.set(user_id, email)?;

    output.success("sign-in", UserInfo::from(user));
    Ok(())
}

/// Mark the signed-in user offline and forget their push token
pub fn sign_out(ctx: &mut Context, output: &Output) -> Result<()> {
    let user_id = ctx.account.require_user()?.to_string();
    ctx.chat.sign_out(&user_id)?;
    ctx.account.clear()?;

    output.success_message("sign-out", &format!("Signed out {}", user_id));
    Ok(())
}

pub fn whoami(ctx: &Context, output: &Output) -> Result<()> {
    let online = match ctx.account.user_id.as_deref() {
        Some(user_id) => ctx.chat.is_online(user_id)?,
        None => false,
    };
    output.success(
        "whoami",
        WhoamiResult {
            user_id: ctx.account.user_id.clone(),
            signed_in: ctx.account.is_signed_in(),
            online,
        },
    );
    Ok(())
}

/// Register or clear the push token of the signed-in user
pub fn push_token(ctx: &Context, token: Option<&str>, output: &Output) -> Result<()> {
    let user_id = ctx.account.require_user()?;
    ctx.chat.update_push_token(user_id, token)?;
    let message = if token.is_some() {
        "Push token registered"
    } else {
        "Push token cleared"
    };
    output.success_message("push-token", message);
    Ok(())
}
