use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user profile. Display attributes are joined onto messages at read
/// time; messages themselves only carry the author id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One (channel, user) pair. Unique per pair; created lazily the first time
/// a user opens a channel, never by explicit invitation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
}

/// A channel message. Append-only; the id is a UUIDv7 so id order breaks
/// creation-time ties consistently everywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A single emoji reaction. At most one row may exist per
/// (message, user, emoji) — the store enforces the triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// Author display attributes as joined at read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorProfile {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Snapshot read model: a message with its author's display attributes.
/// `author` is `None` when the profile row is missing (the join is LEFT).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message: Message,
    pub author: Option<AuthorProfile>,
}
