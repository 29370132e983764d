use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

use cove_types::{Channel, Membership, Message, MessageRecord, Profile, Reaction, ReactionToggle};

use crate::models::{ChannelRow, MessageRow, ProfileRow, ReactionRow, format_ts};

// -- Profiles --

pub fn ensure_profile(conn: &Connection, profile: &Profile) -> Result<Profile> {
    conn.execute(
        "INSERT OR IGNORE INTO profiles (id, display_name, avatar_url, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            profile.id.to_string(),
            profile.display_name,
            profile.avatar_url,
            format_ts(profile.created_at),
        ],
    )?;

    // Re-read so a pre-existing row wins over the candidate attributes.
    profile_by_id(conn, &profile.id.to_string())?
        .ok_or_else(|| anyhow::anyhow!("profile vanished after upsert: {}", profile.id))
}

pub fn profile_by_id(conn: &Connection, id: &str) -> Result<Option<Profile>> {
    let row = conn
        .query_row(
            "SELECT id, display_name, avatar_url, created_at FROM profiles WHERE id = ?1",
            [id],
            |row| {
                Ok(ProfileRow {
                    id: row.get(0)?,
                    display_name: row.get(1)?,
                    avatar_url: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?;

    row.map(ProfileRow::into_profile).transpose()
}

// -- Channels --

pub fn list_channels(conn: &Connection) -> Result<Vec<Channel>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description, created_by, created_at
         FROM channels
         ORDER BY created_at DESC, id DESC",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(ChannelRow {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                created_by: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(ChannelRow::into_channel).collect()
}

/// Insert the channel and the creator's membership in one transaction, so
/// no reader ever sees the channel without its creator already a member.
pub fn create_channel(conn: &mut Connection, channel: &Channel) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO channels (id, name, description, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            channel.id.to_string(),
            channel.name,
            channel.description,
            channel.created_by.to_string(),
            format_ts(channel.created_at),
        ],
    )?;

    tx.execute(
        "INSERT INTO channel_members (channel_id, user_id, joined_at)
         VALUES (?1, ?2, ?3)",
        params![
            channel.id.to_string(),
            channel.created_by.to_string(),
            format_ts(channel.created_at),
        ],
    )?;

    tx.commit()?;
    Ok(())
}

// -- Memberships --

pub fn is_member(conn: &Connection, channel_id: &str, user_id: &str) -> Result<bool> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
            params![channel_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

/// Returns true when a row was actually inserted. The primary key on
/// (channel_id, user_id) absorbs duplicate and concurrent joins.
pub fn add_member(conn: &Connection, membership: &Membership) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO channel_members (channel_id, user_id, joined_at)
         VALUES (?1, ?2, ?3)",
        params![
            membership.channel_id.to_string(),
            membership.user_id.to_string(),
            format_ts(membership.joined_at),
        ],
    )?;
    Ok(changed > 0)
}

// -- Messages --

pub fn channel_messages(conn: &Connection, channel_id: &str) -> Result<Vec<MessageRecord>> {
    // JOIN profiles to fetch author attributes in a single query
    let mut stmt = conn.prepare(
        "SELECT m.id, m.channel_id, m.author_id, m.body, m.created_at,
                p.display_name, p.avatar_url
         FROM messages m
         LEFT JOIN profiles p ON m.author_id = p.id
         WHERE m.channel_id = ?1
         ORDER BY m.created_at ASC, m.id ASC",
    )?;

    let rows = stmt
        .query_map([channel_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                channel_id: row.get(1)?,
                author_id: row.get(2)?,
                body: row.get(3)?,
                created_at: row.get(4)?,
                author_name: row.get(5)?,
                author_avatar: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(MessageRow::into_record).collect()
}

pub fn insert_message(conn: &Connection, message: &Message) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, channel_id, author_id, body, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            message.id.to_string(),
            message.channel_id.to_string(),
            message.author_id.to_string(),
            message.body,
            format_ts(message.created_at),
        ],
    )?;
    Ok(())
}

// -- Reactions --

/// Batch-fetch reactions for a set of message ids.
pub fn reactions_for_messages(conn: &Connection, message_ids: &[String]) -> Result<Vec<Reaction>> {
    if message_ids.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT id, message_id, user_id, emoji, created_at
         FROM reactions WHERE message_id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let bind: Vec<&dyn rusqlite::types::ToSql> = message_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let rows = stmt
        .query_map(bind.as_slice(), |row| {
            Ok(ReactionRow {
                id: row.get(0)?,
                message_id: row.get(1)?,
                user_id: row.get(2)?,
                emoji: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(ReactionRow::into_reaction).collect()
}

/// Toggle a reaction: removes the row if the (message, user, emoji) triple
/// exists, inserts `candidate` otherwise. Check and write share one
/// transaction, so concurrent toggles settle to at most one row.
pub fn toggle_reaction(conn: &mut Connection, candidate: &Reaction) -> Result<ReactionToggle> {
    let tx = conn.transaction()?;

    let existing = tx
        .query_row(
            "SELECT id, message_id, user_id, emoji, created_at
             FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
            params![
                candidate.message_id.to_string(),
                candidate.user_id.to_string(),
                candidate.emoji,
            ],
            |row| {
                Ok(ReactionRow {
                    id: row.get(0)?,
                    message_id: row.get(1)?,
                    user_id: row.get(2)?,
                    emoji: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )
        .optional()?;

    let outcome = if let Some(existing) = existing {
        tx.execute("DELETE FROM reactions WHERE id = ?1", [&existing.id])?;
        ReactionToggle::Removed(existing.into_reaction()?)
    } else {
        tx.execute(
            "INSERT INTO reactions (id, message_id, user_id, emoji, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                candidate.id.to_string(),
                candidate.message_id.to_string(),
                candidate.user_id.to_string(),
                candidate.emoji,
                format_ts(candidate.created_at),
            ],
        )?;
        ReactionToggle::Added(candidate.clone())
    };

    tx.commit()?;
    Ok(outcome)
}
