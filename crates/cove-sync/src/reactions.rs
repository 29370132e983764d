use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use uuid::Uuid;

use cove_types::{Reaction, ReactionToggle, Store};

use crate::error::SyncError;

/// Group a message's reaction rows by emoji into the set of reacting users.
/// Always derived in full from the current row set; groups are never patched
/// incrementally, so they can be rebuilt from the rows at any time.
pub fn group_by_emoji(rows: &[Reaction]) -> BTreeMap<String, BTreeSet<Uuid>> {
    let mut groups: BTreeMap<String, BTreeSet<Uuid>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.emoji.clone()).or_default().insert(row.user_id);
    }
    groups
}

/// Toggles reactions against the authoritative store. An open view only
/// reflects the toggle once the resulting change-feed event round-trips;
/// there is no optimistic local flip to diverge from the store.
pub struct Reactions {
    store: Arc<dyn Store>,
}

impl Reactions {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Add the (message, user, emoji) reaction if absent, remove it if
    /// present. The store decides which, inside one transaction, so
    /// concurrent toggles on the same triple settle to at most one row.
    pub async fn toggle(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<ReactionToggle, SyncError> {
        self.store
            .toggle_reaction(message_id, user_id, emoji)
            .await
            .map_err(SyncError::TransientFetch)
    }
}
