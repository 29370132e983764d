//! Database row types — these map directly to SQLite rows. Kept distinct
//! from the cove-types entities so the DB layer owns its own parsing:
//! TEXT ids and timestamps are validated into typed values at this
//! boundary, and a corrupt row is an error rather than a default.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use cove_types::{AuthorProfile, Channel, Message, MessageRecord, Profile, Reaction};

/// Timestamps are stored as fixed-precision RFC 3339 UTC text so that
/// `ORDER BY created_at` on the TEXT column is chronological.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp in row: {raw:?}"))?;
    Ok(parsed.with_timezone(&Utc))
}

pub fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse()
        .with_context(|| format!("invalid uuid in row: {raw:?}"))
}

pub struct ProfileRow {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

impl ProfileRow {
    pub fn into_profile(self) -> Result<Profile> {
        Ok(Profile {
            id: parse_id(&self.id)?,
            display_name: self.display_name,
            avatar_url: self.avatar_url,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub struct ChannelRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_by: String,
    pub created_at: String,
}

impl ChannelRow {
    pub fn into_channel(self) -> Result<Channel> {
        Ok(Channel {
            id: parse_id(&self.id)?,
            name: self.name,
            description: self.description,
            created_by: parse_id(&self.created_by)?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

/// A message row joined with the author's display attributes. The join is
/// LEFT, so both author columns are absent when the profile row is gone.
pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub author_id: String,
    pub body: String,
    pub created_at: String,
    pub author_name: Option<String>,
    pub author_avatar: Option<String>,
}

impl MessageRow {
    pub fn into_record(self) -> Result<MessageRecord> {
        let author = self.author_name.map(|display_name| AuthorProfile {
            display_name,
            avatar_url: self.author_avatar,
        });
        Ok(MessageRecord {
            message: Message {
                id: parse_id(&self.id)?,
                channel_id: parse_id(&self.channel_id)?,
                author_id: parse_id(&self.author_id)?,
                body: self.body,
                created_at: parse_ts(&self.created_at)?,
            },
            author,
        })
    }
}

pub struct ReactionRow {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
}

impl ReactionRow {
    pub fn into_reaction(self) -> Result<Reaction> {
        Ok(Reaction {
            id: parse_id(&self.id)?,
            message_id: parse_id(&self.message_id)?,
            user_id: parse_id(&self.user_id)?,
            emoji: self.emoji,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}
