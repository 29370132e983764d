use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Channel, Message, MessageRecord, Profile, Reaction};

/// Outcome of a reaction toggle. The row is the one inserted or removed.
#[derive(Debug, Clone)]
pub enum ReactionToggle {
    Added(Reaction),
    Removed(Reaction),
}

/// The data-access contract the client core consumes. Implementations own
/// persistence and publish a change-feed event after every committed write.
///
/// Handed to each synchronizer explicitly (no process-wide singleton), so
/// independent views and tests never share state they didn't ask for.
#[async_trait]
pub trait Store: Send + Sync {
    /// Idempotent profile upsert. Existing rows keep their attributes.
    async fn ensure_profile(
        &self,
        id: Uuid,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> Result<Profile>;

    /// Author-attribute lookup by id.
    async fn profile(&self, id: Uuid) -> Result<Option<Profile>>;

    /// All channels, most recently created first.
    async fn list_channels(&self) -> Result<Vec<Channel>>;

    /// Create a channel and its creator membership as one atomic unit.
    /// A listing never observes the channel without the creator as member.
    async fn create_channel(
        &self,
        name: &str,
        description: Option<&str>,
        created_by: Uuid,
    ) -> Result<Channel>;

    async fn is_member(&self, channel_id: Uuid, user_id: Uuid) -> Result<bool>;

    /// Insert a membership row if absent. Returns whether a row was added;
    /// duplicate calls (including concurrent ones) are absorbed by the
    /// store's uniqueness constraint.
    async fn add_member(&self, channel_id: Uuid, user_id: Uuid) -> Result<bool>;

    /// All messages in a channel, ascending by (created_at, id), each joined
    /// with the author's display attributes where the profile still exists.
    async fn channel_messages(&self, channel_id: Uuid) -> Result<Vec<MessageRecord>>;

    /// Append a message. The caller has already validated the body.
    async fn insert_message(
        &self,
        channel_id: Uuid,
        author_id: Uuid,
        body: &str,
    ) -> Result<Message>;

    /// Batch-fetch reactions for a set of message ids.
    async fn reactions_for_messages(&self, message_ids: &[Uuid]) -> Result<Vec<Reaction>>;

    /// Toggle a reaction: removes the (message, user, emoji) row if present,
    /// inserts one otherwise. Check and write happen in one transaction, so
    /// the store, not the caller, arbitrates the uniqueness invariant under
    /// concurrent toggles.
    async fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<ReactionToggle>;
}
