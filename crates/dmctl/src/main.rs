use clap::{Parser, Subcommand};
use dm_sync::{ChatSync, ExpoPushGateway, FileDocumentStore, PushGateway, PushRequest, SyncConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod account;
mod commands;
mod output;

use output::Output;

#[derive(Parser)]
#[command(name = "dmctl")]
#[command(version)]
#[command(about = "Drive and inspect direct-message sessions stored in a local data directory")]
struct Cli {
    /// Output in JSON format (for agents/scripts)
    #[arg(short, long, global = true)]
    json: bool,

    /// Data directory (default: platform data dir/dmctl)
    #[arg(long, global = true, env = "DMCTL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log notifications instead of posting them to the push endpoint
    #[arg(long, global = true)]
    no_push: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in as a user, creating the profile on first use
    SignIn {
        /// Stable user id from the identity provider
        user_id: String,
        /// Email address
        email: String,
        /// Display name (default: the part of the email before '@')
        #[arg(short, long)]
        name: Option<String>,
        /// Push token of this device
        #[arg(short, long)]
        push_token: Option<String>,
    },

    /// Sign out: go offline and stop push notifications
    SignOut,

    /// Show the signed-in user
    Whoami,

    /// Register a push token, or clear it when omitted
    PushToken {
        token: Option<String>,
    },

    /// Search users by email prefix
    Users {
        /// Email prefix (case-insensitive)
        #[arg(default_value = "")]
        query: String,
    },

    /// Find or create the session with another user
    Open {
        /// Peer user id
        peer: String,
    },

    /// Send a message
    Send {
        /// Session ID
        session_id: String,
        /// Message text
        text: String,
    },

    /// Replace the text of a message
    Edit {
        session_id: String,
        message_id: String,
        text: String,
    },

    /// Delete a message (its text becomes a tombstone)
    Delete {
        session_id: String,
        message_id: String,
    },

    /// Mark a session read and print its messages
    Read {
        /// Session ID
        session_id: String,
        /// Maximum number of messages to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// List sessions, most recently active first
    Chats,

    /// Print the message list of a session whenever it changes
    Watch {
        /// Session ID
        session_id: String,
        /// Stop after this many snapshots
        #[arg(short, long)]
        count: Option<usize>,
    },
}

/// Stands in for the push service when pushes are disabled
struct LoggingGateway;

impl PushGateway for LoggingGateway {
    fn send(&self, request: &PushRequest) -> dm_sync::Result<()> {
        tracing::info!(to = %request.to, body = %request.body, "push disabled, not sending");
        Ok(())
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output = Output::new(cli.json);

    if let Err(e) = run(cli, &output) {
        output.error(&e.to_string());
        std::process::exit(1);
    }
}

fn run(cli: Cli, output: &Output) -> anyhow::Result<()> {
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?
            .join("dmctl"),
    };
    std::fs::create_dir_all(&data_dir)?;

    let config = SyncConfig::load(&data_dir.join("config.json"))?;
    let account = account::Account::load(&data_dir)?;
    let store = Arc::new(FileDocumentStore::open(data_dir.join("store"))?);
    let gateway: Arc<dyn PushGateway> = if cli.no_push {
        Arc::new(LoggingGateway)
    } else {
        Arc::new(ExpoPushGateway::new(config.push_endpoint.clone())?)
    };
    let chat = ChatSync::new(store.clone(), config, gateway)?;

    let mut ctx = commands::Context {
        chat,
        store,
        account,
    };
    let result = dispatch(cli.command, &mut ctx, output);

    // Flush queued pushes before exiting.
    ctx.chat.shutdown();
    result
}

fn dispatch(command: Commands, ctx: &mut commands::Context, output: &Output) -> anyhow::Result<()> {
    match command {
        Commands::SignIn {
            user_id,
            email,
            name,
            push_token,
        } => commands::account::sign_in(
            ctx,
            &user_id,
            &email,
            name,
            push_token.as_deref(),
            output,
        ),
        Commands::SignOut => commands::account::sign_out(ctx, output),
        Commands::Whoami => commands::account::whoami(ctx, output),
        Commands::PushToken { token } => {
            commands::account::push_token(ctx, token.as_deref(), output)
        }
        Commands::Users { query } => commands::chat::users(ctx, &query, output),
        Commands::Open { peer } => commands::chat::open(ctx, &peer, output),
        Commands::Chats => commands::chat::list(ctx, output),
        Commands::Send { session_id, text } => {
            commands::message::send(ctx, &session_id, &text, output)
        }
        Commands::Edit {
            session_id,
            message_id,
            text,
        } => commands::message::edit(ctx, &session_id, &message_id, &text, output),
        Commands::Delete {
            session_id,
            message_id,
        } => commands::message::delete(ctx, &session_id, &message_id, output),
        Commands::Read { session_id, limit } => {
            commands::message::read(ctx, &session_id, limit, output)
        }
        Commands::Watch { session_id, count } => {
            commands::message::watch(ctx, &session_id, count, output)
        }
    }
}
