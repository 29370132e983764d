pub mod migrations;
pub mod models;
pub mod queries;

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use tokio::task;
use tracing::info;
use uuid::Uuid;

use cove_feed::FeedHub;
use cove_types::{
    Channel, FeedEvent, Membership, Message, MessageRecord, Profile, Reaction, ReactionToggle,
    RowChange, Store,
};

/// SQLite-backed implementation of the data-access contract. Every
/// committed write is followed by the matching change-feed event, so a
/// subscriber sees exactly the rows a fresh read would return.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    conn: Mutex<Connection>,
    feed: FeedHub,
}

impl StoreInner {
    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {e}"))?;
        f(&mut conn)
    }
}

impl SqliteStore {
    pub fn open(path: &Path, feed: FeedHub) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let store = Self::init(conn, feed)?;
        info!("Database opened at {}", path.display());
        Ok(store)
    }

    /// Private in-memory database, used by tests and throwaway sessions.
    pub fn open_in_memory(feed: FeedHub) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, feed)
    }

    fn init(conn: Connection, feed: FeedHub) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(conn),
                feed,
            }),
        })
    }

    /// The change feed this store publishes into.
    pub fn feed(&self) -> FeedHub {
        self.inner.feed.clone()
    }

    /// Run a query closure off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        task::spawn_blocking(move || inner.with_conn(f)).await?
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn ensure_profile(
        &self,
        id: Uuid,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> Result<Profile> {
        let candidate = Profile {
            id,
            display_name: display_name.to_string(),
            avatar_url: avatar_url.map(str::to_string),
            created_at: Utc::now(),
        };
        self.blocking(move |conn| queries::ensure_profile(conn, &candidate))
            .await
    }

    async fn profile(&self, id: Uuid) -> Result<Option<Profile>> {
        self.blocking(move |conn| queries::profile_by_id(conn, &id.to_string()))
            .await
    }

    async fn list_channels(&self) -> Result<Vec<Channel>> {
        self.blocking(|conn| queries::list_channels(conn)).await
    }

    async fn create_channel(
        &self,
        name: &str,
        description: Option<&str>,
        created_by: Uuid,
    ) -> Result<Channel> {
        let channel = Channel {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.map(str::to_string),
            created_by,
            created_at: Utc::now(),
        };

        let row = channel.clone();
        self.blocking(move |conn| queries::create_channel(conn, &row))
            .await?;

        self.inner
            .feed
            .publish(FeedEvent::Channel(RowChange::insert(channel.clone())));
        Ok(channel)
    }

    async fn is_member(&self, channel_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.blocking(move |conn| {
            queries::is_member(conn, &channel_id.to_string(), &user_id.to_string())
        })
        .await
    }

    async fn add_member(&self, channel_id: Uuid, user_id: Uuid) -> Result<bool> {
        let membership = Membership {
            channel_id,
            user_id,
            joined_at: Utc::now(),
        };
        self.blocking(move |conn| queries::add_member(conn, &membership))
            .await
    }

    async fn channel_messages(&self, channel_id: Uuid) -> Result<Vec<MessageRecord>> {
        self.blocking(move |conn| queries::channel_messages(conn, &channel_id.to_string()))
            .await
    }

    async fn insert_message(
        &self,
        channel_id: Uuid,
        author_id: Uuid,
        body: &str,
    ) -> Result<Message> {
        let message = Message {
            id: Uuid::now_v7(),
            channel_id,
            author_id,
            body: body.to_string(),
            created_at: Utc::now(),
        };

        let row = message.clone();
        self.blocking(move |conn| queries::insert_message(conn, &row))
            .await?;

        self.inner
            .feed
            .publish(FeedEvent::Message(RowChange::insert(message.clone())));
        Ok(message)
    }

    async fn reactions_for_messages(&self, message_ids: &[Uuid]) -> Result<Vec<Reaction>> {
        let ids: Vec<String> = message_ids.iter().map(Uuid::to_string).collect();
        self.blocking(move |conn| queries::reactions_for_messages(conn, &ids))
            .await
    }

    async fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<ReactionToggle> {
        let candidate = Reaction {
            id: Uuid::new_v4(),
            message_id,
            user_id,
            emoji: emoji.to_string(),
            created_at: Utc::now(),
        };

        let outcome = self
            .blocking(move |conn| queries::toggle_reaction(conn, &candidate))
            .await?;

        let event = match &outcome {
            ReactionToggle::Added(row) => FeedEvent::Reaction(RowChange::insert(row.clone())),
            ReactionToggle::Removed(row) => FeedEvent::Reaction(RowChange::delete(row.clone())),
        };
        self.inner.feed.publish(event);

        Ok(outcome)
    }
}
