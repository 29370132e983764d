//! In-process change feed: row-level events published by the store,
//! consumed through scoped subscriptions.

use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use cove_types::FeedEvent;

/// Which slice of the feed a subscription receives. Filtering happens on
/// the subscriber side; the hub itself fans every event out to everyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedScope {
    /// Message rows belonging to one channel.
    ChannelMessages(Uuid),
    /// Reaction rows for any message. Reaction rows carry no channel id,
    /// so consumers narrow further by the message ids they know about.
    Reactions,
    /// Channel rows.
    Channels,
}

impl FeedScope {
    fn matches(&self, event: &FeedEvent) -> bool {
        match (self, event) {
            (Self::ChannelMessages(channel_id), FeedEvent::Message(_)) => {
                event.channel_id() == Some(*channel_id)
            }
            (Self::Reactions, FeedEvent::Reaction(_)) => true,
            (Self::Channels, FeedEvent::Channel(_)) => true,
            _ => false,
        }
    }
}

/// Clonable handle to the feed. The store publishes; views subscribe.
#[derive(Clone)]
pub struct FeedHub {
    tx: broadcast::Sender<FeedEvent>,
}

impl FeedHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Publish an event to every live subscription. Never blocks; an event
    /// with no subscribers is simply dropped.
    pub fn publish(&self, event: FeedEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self, scope: FeedScope) -> FeedSubscription {
        FeedSubscription {
            rx: self.tx.subscribe(),
            scope,
        }
    }

    /// Number of live subscriptions.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for FeedHub {
    fn default() -> Self {
        Self::new()
    }
}

/// A live, scoped view of the feed. Dropping it releases the subscription.
pub struct FeedSubscription {
    rx: broadcast::Receiver<FeedEvent>,
    scope: FeedScope,
}

impl FeedSubscription {
    /// Next event matching this subscription's scope, in publish order.
    /// Returns `None` once the hub is gone. A slow consumer that falls off
    /// the end of the broadcast buffer skips the lost events and keeps
    /// going; the caller reconciles via refetch, not via the backlog.
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.scope.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, scope = ?self.scope, "change feed lagged, events lost");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Stop delivery and release the feed resources for this subscription.
    pub fn unsubscribe(self) {}
}
