use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Channel, Message, Reaction};

/// Kind of row-level change carried by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level change. Inserts carry `after`, deletes carry `before`;
/// updates would carry both, though no table in scope produces them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowChange<T> {
    pub kind: ChangeKind,
    pub before: Option<T>,
    pub after: Option<T>,
}

impl<T> RowChange<T> {
    pub fn insert(row: T) -> Self {
        Self {
            kind: ChangeKind::Insert,
            before: None,
            after: Some(row),
        }
    }

    pub fn delete(row: T) -> Self {
        Self {
            kind: ChangeKind::Delete,
            before: Some(row),
            after: None,
        }
    }
}

/// Events published on the change feed, one variant per table in scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "table", content = "change")]
pub enum FeedEvent {
    Message(RowChange<Message>),
    Reaction(RowChange<Reaction>),
    Channel(RowChange<Channel>),
}

impl FeedEvent {
    /// The channel a message change belongs to, for scoped delivery.
    /// Reaction and channel changes are not channel-scoped.
    pub fn channel_id(&self) -> Option<Uuid> {
        match self {
            Self::Message(change) => change
                .after
                .as_ref()
                .or(change.before.as_ref())
                .map(|m| m.channel_id),
            _ => None,
        }
    }
}
