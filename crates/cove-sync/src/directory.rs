use std::sync::Arc;

use uuid::Uuid;

use cove_feed::{FeedHub, FeedScope, FeedSubscription};
use cove_types::{Channel, Store};

use crate::error::SyncError;

/// The set of channels a user can see, with join-on-first-visit semantics.
pub struct ChannelDirectory {
    store: Arc<dyn Store>,
    feed: FeedHub,
}

impl ChannelDirectory {
    pub fn new(store: Arc<dyn Store>, feed: FeedHub) -> Self {
        Self { store, feed }
    }

    /// All channels, most recently created first.
    pub async fn list(&self) -> Result<Vec<Channel>, SyncError> {
        self.store
            .list_channels()
            .await
            .map_err(SyncError::TransientFetch)
    }

    /// Make `user_id` a member of the channel if not already. Check first,
    /// insert only if absent; the store's uniqueness constraint absorbs the
    /// race when two sessions join the same channel at once, so calling
    /// this concurrently still yields exactly one membership row.
    pub async fn ensure_member(&self, channel_id: Uuid, user_id: Uuid) -> Result<(), SyncError> {
        let already = self
            .store
            .is_member(channel_id, user_id)
            .await
            .map_err(SyncError::TransientFetch)?;

        if !already {
            self.store
                .add_member(channel_id, user_id)
                .await
                .map_err(SyncError::TransientFetch)?;
        }
        Ok(())
    }

    /// Create a channel. The creator's membership is part of the same
    /// atomic store operation, so a listing never shows the channel
    /// without its creator already a member.
    pub async fn create(
        &self,
        name: &str,
        description: Option<&str>,
        created_by: Uuid,
    ) -> Result<Channel, SyncError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::Validation("channel name is empty"));
        }
        let description = description.map(str::trim).filter(|d| !d.is_empty());

        self.store
            .create_channel(name, description, created_by)
            .await
            .map_err(SyncError::TransientFetch)
    }

    /// Live channel-row changes, for keeping a rendered listing current.
    pub fn updates(&self) -> FeedSubscription {
        self.feed.subscribe(FeedScope::Channels)
    }
}
