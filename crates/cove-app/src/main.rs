use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;

use cove_feed::FeedHub;
use cove_store::SqliteStore;
use cove_sync::{
    ChannelDirectory, Composer, LiveView, LiveViewState, Reactions, SyncError,
};
use cove_types::{ReactionToggle, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cove=info".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("COVE_DB_PATH").unwrap_or_else(|_| "cove.db".into());
    let display_name = std::env::var("COVE_USER").unwrap_or_else(|_| "guest".into());
    let channel_name = std::env::var("COVE_CHANNEL").unwrap_or_else(|_| "general".into());

    let feed = FeedHub::new();
    let store: Arc<SqliteStore> = Arc::new(SqliteStore::open(&PathBuf::from(&db_path), feed.clone())?);

    // Stable identity per display name, so reopening the same db keeps
    // authorship intact.
    let user_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, display_name.as_bytes());
    let user = store.ensure_profile(user_id, &display_name, None).await?;

    let directory = ChannelDirectory::new(store.clone(), feed.clone());
    let channel = match directory
        .list()
        .await?
        .into_iter()
        .find(|c| c.name == channel_name)
    {
        Some(channel) => channel,
        None => directory.create(&channel_name, None, user.id).await?,
    };
    directory.ensure_member(channel.id, user.id).await?;

    info!("joined #{} as {}", channel.name, user.display_name);

    let view = LiveView::open(store.clone(), feed, channel.id);
    if let Err(err) = view.ready().await {
        warn!("initial load failed: {err}");
        println!("could not load #{} ({err}); use /retry", channel.name);
    }

    let composer = Composer::new(store.clone());
    let reactions = Reactions::new(store);

    println!(
        "#{} — type a message; /react <n> <emoji>, /channels, /retry, /quit",
        channel.name
    );

    let mut printed: HashSet<Uuid> = HashSet::new();
    let mut state = view.watch();
    render_new(&state.borrow(), &mut printed);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                render_new(&state.borrow(), &mut printed);
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let input = line.trim();
                match input {
                    "" => {}
                    "/quit" => break,
                    "/retry" => view.retry(),
                    "/channels" => match directory.list().await {
                        Ok(channels) => {
                            for channel in channels {
                                println!("  #{}", channel.name);
                            }
                        }
                        Err(err) => println!("could not list channels: {err}"),
                    },
                    _ if input.starts_with("/react") => {
                        react(&reactions, &view, user.id, input).await;
                    }
                    _ => match composer.send(channel.id, user.id, input).await {
                        Ok(_) => {} // echoed back through the feed
                        Err(SyncError::Validation(reason)) => println!("not sent: {reason}"),
                        Err(err) => println!("send failed, input kept — try again: {err}"),
                    },
                }
            }
        }
    }

    view.close();
    Ok(())
}

/// Print messages that have not been shown yet, in view order.
fn render_new(state: &LiveViewState, printed: &mut HashSet<Uuid>) {
    for view in &state.messages {
        if printed.insert(view.message.id) {
            println!(
                "[{}] {}: {}",
                view.message.created_at.format("%H:%M"),
                view.author.name,
                view.message.body
            );
        }
    }
}

/// `/react <n> <emoji>` — toggle an emoji on the n-th newest message.
async fn react(reactions: &Reactions, view: &LiveView, user_id: Uuid, input: &str) {
    let mut parts = input.split_whitespace();
    let _command = parts.next();
    let (Some(index), Some(emoji)) = (parts.next(), parts.next()) else {
        println!("usage: /react <n> <emoji>");
        return;
    };
    let Ok(index) = index.parse::<usize>() else {
        println!("usage: /react <n> <emoji>");
        return;
    };

    let messages = view.current_messages();
    let Some(target) = index
        .checked_sub(1)
        .and_then(|back| messages.len().checked_sub(back + 1))
        .map(|at| messages[at].message.clone())
    else {
        println!("no message #{index}");
        return;
    };

    match reactions.toggle(target.id, user_id, emoji).await {
        Ok(ReactionToggle::Added(row)) => println!("reacted {} to \"{}\"", row.emoji, target.body),
        Ok(ReactionToggle::Removed(row)) => {
            println!("removed {} from \"{}\"", row.emoji, target.body)
        }
        Err(err) => println!("reaction failed: {err}"),
    }
}
