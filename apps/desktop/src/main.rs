use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{load_settings, load_settings_from, StaticTokenProvider, StoreEvent, SyncClient};
use shared::{
    domain::{Availability, ConversationRef, MessageId},
    protocol::ChatMessage,
};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    /// Pre-acquired access token.
    #[arg(long, env = "GRAPH_ACCESS_TOKEN", hide_env_values = true)]
    token: String,
    /// Settings file; defaults to `client.toml` in the working directory.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_filter: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Joined teams and their channels.
    Teams,
    /// Chats, most recently updated first.
    Chats,
    /// Follows one conversation until interrupted.
    Watch {
        #[command(flatten)]
        target: Target,
    },
    Send {
        #[command(flatten)]
        target: Target,
        content: String,
    },
    /// Replies in a channel message's thread.
    Reply {
        team_id: String,
        channel_id: String,
        message_id: String,
        content: String,
    },
    Search {
        query: String,
    },
    /// Publishes your availability, e.g. `Busy` or `DoNotDisturb`.
    Presence {
        availability: Availability,
        #[arg(long)]
        activity: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct Target {
    #[arg(long, requires = "channel", conflicts_with = "chat")]
    team: Option<String>,
    #[arg(long)]
    channel: Option<String>,
    #[arg(long)]
    chat: Option<String>,
}

impl Target {
    fn conversation(&self) -> Result<ConversationRef> {
        match (&self.team, &self.channel, &self.chat) {
            (Some(team), Some(channel), None) => {
                Ok(ConversationRef::channel(team.as_str(), channel.as_str(), channel.as_str()))
            }
            (None, None, Some(chat)) => Ok(ConversationRef::chat(chat.as_str(), chat.as_str())),
            _ => bail!("pass either --team and --channel, or --chat"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log_filter))
        .init();

    let settings = match &cli.config {
        Some(path) => load_settings_from(path),
        None => load_settings(),
    };
    let auth = Arc::new(StaticTokenProvider::new(cli.token.clone()));
    let client = SyncClient::new(settings, auth);
    let user = client
        .restore_session()
        .await?
        .context("access token was rejected")?;
    println!("signed in as {}", user.display_name);

    let outcome = run(&client, cli.command).await;
    client.shutdown();
    outcome
}

async fn run(client: &SyncClient, command: Command) -> Result<()> {
    match command {
        Command::Teams => {
            for team in client.state().teams {
                println!("{} ({})", team.team.display_name, team.team.id);
                for channel in &team.channels {
                    println!("  #{} ({})", channel.display_name, channel.id);
                }
            }
        }
        Command::Chats => {
            for chat in client.state().chats {
                println!("{} ({})", chat.display_name(), chat.id);
            }
        }
        Command::Watch { target } => watch(client, target.conversation()?).await?,
        Command::Send { target, content } => {
            client.select_conversation(target.conversation()?).await?;
            match client.send_message(&content).await? {
                Some(message) => println!("sent {}", message.id),
                None => bail!("no conversation selected"),
            }
        }
        Command::Reply {
            team_id,
            channel_id,
            message_id,
            content,
        } => {
            let conversation =
                ConversationRef::channel(team_id.as_str(), channel_id.as_str(), channel_id.as_str());
            client.select_conversation(conversation).await?;
            if !client.open_thread(&MessageId::new(message_id.as_str())).await? {
                bail!("message {message_id} is not in the latest page of the channel");
            }
            match client.send_reply(&content).await? {
                Some(reply) => println!("replied {}", reply.id),
                None => bail!("thread closed before the reply was sent"),
            }
        }
        Command::Search { query } => {
            for message in client.search_messages(&query).await? {
                print_message(&message);
            }
        }
        Command::Presence {
            availability,
            activity,
        } => {
            let activity = activity.unwrap_or_else(|| availability.as_str().to_string());
            client.set_presence_status(availability, &activity).await?;
            let state = client.state();
            if let Some(me) = &state.current_user {
                println!("presence: {}", client.presence_for(&me.id).availability.as_str());
            }
        }
    }
    Ok(())
}

async fn watch(client: &SyncClient, conversation: ConversationRef) -> Result<()> {
    let mut events = client.subscribe();
    client.select_conversation(conversation).await?;
    let mut printed = print_new(client, 0);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(StoreEvent::Messages) => printed = print_new(client, printed),
                Ok(StoreEvent::Session) if !client.state().is_authenticated => {
                    bail!("session ended");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => printed = print_new(client, printed),
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

/// Prints messages past `printed`, or the whole list when a poll replaced it
/// with a shorter one.
fn print_new(client: &SyncClient, printed: usize) -> usize {
    let messages = client.state().messages;
    let start = if messages.len() < printed { 0 } else { printed };
    for message in &messages[start..] {
        print_message(message);
    }
    messages.len()
}

fn print_message(message: &ChatMessage) {
    println!(
        "[{}] {}: {}",
        message.created_at().format("%Y-%m-%d %H:%M"),
        message.author_name().unwrap_or("unknown"),
        message.body.content
    );
}
