use std::sync::Arc;

use uuid::Uuid;

use cove_types::{Message, Store};

use crate::error::SyncError;

/// Outbound message submission. Purely a producer: the new message reaches
/// any open view through the change feed only. Nothing is appended to
/// local view state here, so display state cannot diverge from the store.
pub struct Composer {
    store: Arc<dyn Store>,
}

impl Composer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Validate and submit one message. Empty-after-trim bodies are
    /// rejected without a round trip. On failure the caller still holds
    /// the input and can resubmit as-is.
    pub async fn send(
        &self,
        channel_id: Uuid,
        author_id: Uuid,
        body: &str,
    ) -> Result<Message, SyncError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(SyncError::Validation("message body is empty"));
        }

        self.store
            .insert_message(channel_id, author_id, body)
            .await
            .map_err(SyncError::TransientFetch)
    }
}
