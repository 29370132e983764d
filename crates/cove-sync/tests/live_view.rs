//! Synchronizer behavior against a scripted store double: interleavings of
//! snapshot and feed delivery, lookup failures, retry, and teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

use cove_feed::FeedHub;
use cove_sync::{LiveView, LiveViewState, SyncError, UNKNOWN_AUTHOR, ViewPhase};
use cove_types::{
    AuthorProfile, Channel, FeedEvent, Message, MessageRecord, Profile, Reaction, ReactionToggle,
    RowChange, Store,
};

/// Store double with programmable snapshot contents, failure injection,
/// and a gate that holds the snapshot open so events can be interleaved.
struct StubStore {
    records: Mutex<Vec<MessageRecord>>,
    reactions: Mutex<Vec<Reaction>>,
    profiles: Mutex<HashMap<Uuid, Profile>>,
    /// Number of upcoming snapshot reads that fail before one succeeds.
    failing_snapshots: AtomicUsize,
    fail_profile_lookups: AtomicBool,
    /// When set, snapshot reads block until a permit is added.
    gate: Option<Semaphore>,
    snapshot_started: Notify,
}

impl StubStore {
    fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            reactions: Mutex::new(Vec::new()),
            profiles: Mutex::new(HashMap::new()),
            failing_snapshots: AtomicUsize::new(0),
            fail_profile_lookups: AtomicBool::new(false),
            gate: None,
            snapshot_started: Notify::new(),
        }
    }

    fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    fn with_record(self, message: Message, author: &str) -> Self {
        self.records.lock().unwrap().push(MessageRecord {
            message,
            author: Some(AuthorProfile {
                display_name: author.into(),
                avatar_url: None,
            }),
        });
        self
    }

    fn with_reaction(self, reaction: Reaction) -> Self {
        self.reactions.lock().unwrap().push(reaction);
        self
    }

    fn with_profile(self, profile: Profile) -> Self {
        self.profiles.lock().unwrap().insert(profile.id, profile);
        self
    }

    fn release_snapshot(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }
}

#[async_trait]
impl Store for StubStore {
    async fn ensure_profile(
        &self,
        id: Uuid,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> Result<Profile> {
        let profile = Profile {
            id,
            display_name: display_name.into(),
            avatar_url: avatar_url.map(str::to_string),
            created_at: Utc::now(),
        };
        self.profiles.lock().unwrap().insert(id, profile.clone());
        Ok(profile)
    }

    async fn profile(&self, id: Uuid) -> Result<Option<Profile>> {
        if self.fail_profile_lookups.load(Ordering::SeqCst) {
            bail!("profile lookup unavailable");
        }
        Ok(self.profiles.lock().unwrap().get(&id).cloned())
    }

    async fn list_channels(&self) -> Result<Vec<Channel>> {
        Ok(Vec::new())
    }

    async fn create_channel(&self, _: &str, _: Option<&str>, _: Uuid) -> Result<Channel> {
        bail!("not used by this double");
    }

    async fn is_member(&self, _: Uuid, _: Uuid) -> Result<bool> {
        Ok(true)
    }

    async fn add_member(&self, _: Uuid, _: Uuid) -> Result<bool> {
        Ok(false)
    }

    async fn channel_messages(&self, channel_id: Uuid) -> Result<Vec<MessageRecord>> {
        self.snapshot_started.notify_one();
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if self
            .failing_snapshots
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            bail!("snapshot read refused");
        }
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|r| r.message.channel_id == channel_id)
            .cloned()
            .collect())
    }

    async fn insert_message(&self, _: Uuid, _: Uuid, _: &str) -> Result<Message> {
        bail!("not used by this double");
    }

    async fn reactions_for_messages(&self, message_ids: &[Uuid]) -> Result<Vec<Reaction>> {
        let reactions = self.reactions.lock().unwrap();
        Ok(reactions
            .iter()
            .filter(|r| message_ids.contains(&r.message_id))
            .cloned()
            .collect())
    }

    async fn toggle_reaction(&self, _: Uuid, _: Uuid, _: &str) -> Result<ReactionToggle> {
        bail!("not used by this double");
    }
}

fn ts(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
}

fn message(id: u128, channel_id: Uuid, at: i64, body: &str) -> Message {
    Message {
        id: Uuid::from_u128(id),
        channel_id,
        author_id: Uuid::from_u128(900 + id),
        body: body.into(),
        created_at: ts(at),
    }
}

fn reaction(id: u128, message_id: Uuid, user_id: Uuid, emoji: &str) -> Reaction {
    Reaction {
        id: Uuid::from_u128(id),
        message_id,
        user_id,
        emoji: emoji.into(),
        created_at: Utc::now(),
    }
}

fn insert_event(message: Message) -> FeedEvent {
    FeedEvent::Message(RowChange::insert(message))
}

async fn wait_for<F>(view: &LiveView, mut pred: F) -> LiveViewState
where
    F: FnMut(&LiveViewState) -> bool,
{
    let mut state = view.watch();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            {
                let current = state.borrow_and_update();
                if pred(&current) {
                    return current.clone();
                }
            }
            state.changed().await.expect("view task ended");
        }
    })
    .await
    .expect("condition not reached in time")
}

fn body_order(state: &LiveViewState) -> Vec<&str> {
    state.messages.iter().map(|m| m.message.body.as_str()).collect()
}

#[tokio::test]
async fn older_insert_lands_before_snapshot_tail() {
    let channel = Uuid::new_v4();
    let store = Arc::new(StubStore::new().with_record(message(1, channel, 10, "hi"), "Ada"));
    let hub = FeedHub::new();

    let view = LiveView::open(store, hub.clone(), channel);
    view.ready().await.unwrap();

    hub.publish(insert_event(message(2, channel, 5, "earlier")));

    let state = wait_for(&view, |s| s.messages.len() == 2).await;
    assert_eq!(body_order(&state), ["earlier", "hi"]);
}

#[tokio::test]
async fn duplicate_insert_events_merge_once() {
    let channel = Uuid::new_v4();
    let store = Arc::new(StubStore::new().with_record(message(1, channel, 10, "hi"), "Ada"));
    let hub = FeedHub::new();

    let view = LiveView::open(store, hub.clone(), channel);
    view.ready().await.unwrap();

    // Replays of the snapshot row and of a fresh row, then a marker.
    hub.publish(insert_event(message(1, channel, 10, "hi")));
    hub.publish(insert_event(message(2, channel, 20, "new")));
    hub.publish(insert_event(message(2, channel, 20, "new")));
    hub.publish(insert_event(message(3, channel, 30, "marker")));

    let state = wait_for(&view, |s| body_order(s).contains(&"marker")).await;
    assert_eq!(body_order(&state), ["hi", "new", "marker"]);
}

#[tokio::test]
async fn events_during_snapshot_are_buffered_and_replayed() {
    let channel = Uuid::new_v4();
    let store = Arc::new(StubStore::gated().with_record(message(1, channel, 10, "hi"), "Ada"));
    let hub = FeedHub::new();

    let view = LiveView::open(store.clone(), hub.clone(), channel);

    // The snapshot read has begun, so the subscriptions exist but nothing
    // is applied yet. These must be buffered, not dropped.
    store.snapshot_started.notified().await;
    hub.publish(insert_event(message(1, channel, 10, "hi"))); // overlaps snapshot
    hub.publish(insert_event(message(2, channel, 5, "earlier")));
    assert_eq!(view.phase(), ViewPhase::Loading);

    store.release_snapshot();
    view.ready().await.unwrap();

    let state = wait_for(&view, |s| s.messages.len() == 2).await;
    assert_eq!(body_order(&state), ["earlier", "hi"]);
}

#[tokio::test]
async fn missing_profile_falls_back_to_placeholder() {
    let channel = Uuid::new_v4();
    let store = Arc::new(StubStore::new());
    let hub = FeedHub::new();

    let view = LiveView::open(store, hub.clone(), channel);
    view.ready().await.unwrap();

    hub.publish(insert_event(message(1, channel, 10, "who said this")));

    let state = wait_for(&view, |s| s.messages.len() == 1).await;
    assert_eq!(state.messages[0].author.name, UNKNOWN_AUTHOR);
    assert_eq!(state.messages[0].message.body, "who said this");
}

#[tokio::test]
async fn failed_profile_lookup_falls_back_to_placeholder() {
    let channel = Uuid::new_v4();
    let store = Arc::new(StubStore::new());
    store.fail_profile_lookups.store(true, Ordering::SeqCst);
    let hub = FeedHub::new();

    let view = LiveView::open(store, hub.clone(), channel);
    view.ready().await.unwrap();

    hub.publish(insert_event(message(1, channel, 10, "still here")));

    let state = wait_for(&view, |s| s.messages.len() == 1).await;
    assert_eq!(state.messages[0].author.name, UNKNOWN_AUTHOR);
}

#[tokio::test]
async fn resolved_profile_is_displayed() {
    let channel = Uuid::new_v4();
    let incoming = message(1, channel, 10, "hello");
    let store = Arc::new(StubStore::new().with_profile(Profile {
        id: incoming.author_id,
        display_name: "Grace".into(),
        avatar_url: Some("http://x/g.png".into()),
        created_at: Utc::now(),
    }));
    let hub = FeedHub::new();

    let view = LiveView::open(store, hub.clone(), channel);
    view.ready().await.unwrap();

    hub.publish(insert_event(incoming));

    let state = wait_for(&view, |s| s.messages.len() == 1).await;
    assert_eq!(state.messages[0].author.name, "Grace");
    assert_eq!(
        state.messages[0].author.avatar_url.as_deref(),
        Some("http://x/g.png")
    );
}

#[tokio::test]
async fn snapshot_failure_is_recoverable_with_retry() {
    let channel = Uuid::new_v4();
    let store = Arc::new(StubStore::new().with_record(message(1, channel, 10, "hi"), "Ada"));
    store.failing_snapshots.store(1, Ordering::SeqCst);
    let hub = FeedHub::new();

    let view = LiveView::open(store, hub.clone(), channel);

    match view.ready().await {
        Err(SyncError::TransientFetch(_)) => {}
        other => panic!("expected transient failure, got {other:?}"),
    }
    assert!(matches!(view.phase(), ViewPhase::Failed(_)));

    view.retry();
    let state = wait_for(&view, |s| s.phase == ViewPhase::Ready).await;
    assert_eq!(body_order(&state), ["hi"]);
}

#[tokio::test]
async fn retry_does_not_leak_subscriptions() {
    let channel = Uuid::new_v4();
    let store = Arc::new(StubStore::new());
    store.failing_snapshots.store(2, Ordering::SeqCst);
    let hub = FeedHub::new();

    let view = LiveView::open(store, hub.clone(), channel);
    assert!(view.ready().await.is_err());

    view.retry(); // second attempt, fails again
    tokio::time::sleep(Duration::from_millis(50)).await;
    view.retry(); // third attempt succeeds
    wait_for(&view, |s| s.phase == ViewPhase::Ready).await;

    // One message-scope and one reaction-scope subscription, regardless of
    // how many times the open sequence ran.
    assert_eq!(hub.receiver_count(), 2);
}

#[tokio::test]
async fn close_then_event_mutates_nothing() {
    let channel = Uuid::new_v4();
    let store = Arc::new(StubStore::new().with_record(message(1, channel, 10, "hi"), "Ada"));
    let hub = FeedHub::new();

    let view = LiveView::open(store, hub.clone(), channel);
    view.ready().await.unwrap();

    view.close();
    view.close(); // idempotent

    // Give the task time to wind down, then deliver into the void.
    tokio::time::sleep(Duration::from_millis(50)).await;
    hub.publish(insert_event(message(2, channel, 20, "late")));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(view.current_messages().len(), 1);
}

#[tokio::test]
async fn close_before_snapshot_resolves_is_safe() {
    let channel = Uuid::new_v4();
    let store = Arc::new(StubStore::gated());
    let hub = FeedHub::new();

    let view = LiveView::open(store.clone(), hub.clone(), channel);
    store.snapshot_started.notified().await;

    view.close();
    store.release_snapshot();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(view.phase(), ViewPhase::Loading);
    assert!(view.current_messages().is_empty());
}

#[tokio::test]
async fn reaction_events_regroup_per_message() {
    let channel = Uuid::new_v4();
    let snapshot_message = message(1, channel, 10, "hi");
    let message_id = snapshot_message.id;
    let (ada, brian) = (Uuid::from_u128(501), Uuid::from_u128(502));
    let store = Arc::new(
        StubStore::new()
            .with_record(snapshot_message, "Ada")
            .with_reaction(reaction(31, message_id, ada, "👍")),
    );
    let hub = FeedHub::new();

    let view = LiveView::open(store, hub.clone(), channel);
    view.ready().await.unwrap();
    let state = wait_for(&view, |s| s.messages.len() == 1).await;
    assert_eq!(state.messages[0].reactions["👍"].len(), 1);

    hub.publish(FeedEvent::Reaction(RowChange::insert(reaction(
        32, message_id, brian, "👍",
    ))));
    let state = wait_for(&view, |s| {
        s.messages[0].reactions.get("👍").is_some_and(|u| u.len() == 2)
    })
    .await;
    assert!(state.messages[0].reactions["👍"].contains(&ada));

    hub.publish(FeedEvent::Reaction(RowChange::delete(reaction(
        31, message_id, ada, "👍",
    ))));
    let state = wait_for(&view, |s| {
        s.messages[0].reactions.get("👍").is_some_and(|u| u.len() == 1)
    })
    .await;
    assert!(state.messages[0].reactions["👍"].contains(&brian));

    hub.publish(FeedEvent::Reaction(RowChange::delete(reaction(
        32, message_id, brian, "👍",
    ))));
    wait_for(&view, |s| s.messages[0].reactions.is_empty()).await;
}

#[tokio::test]
async fn reactions_present_before_message_insert_are_backfilled() {
    let channel = Uuid::new_v4();
    let incoming = message(1, channel, 10, "hi");
    let user = Uuid::from_u128(501);
    // The reaction row already exists in the store, and its feed event was
    // delivered before the message itself — to a view that didn't know the
    // message yet.
    let store = Arc::new(StubStore::new().with_reaction(reaction(31, incoming.id, user, "🎉")));
    let hub = FeedHub::new();

    let view = LiveView::open(store, hub.clone(), channel);
    view.ready().await.unwrap();

    hub.publish(FeedEvent::Reaction(RowChange::insert(reaction(
        31,
        incoming.id,
        user,
        "🎉",
    ))));
    hub.publish(insert_event(incoming));

    let state = wait_for(&view, |s| s.messages.len() == 1).await;
    assert_eq!(state.messages[0].reactions["🎉"].len(), 1);
}

#[tokio::test]
async fn unsupported_message_changes_are_ignored() {
    let channel = Uuid::new_v4();
    let existing = message(1, channel, 10, "hi");
    let store = Arc::new(StubStore::new().with_record(existing.clone(), "Ada"));
    let hub = FeedHub::new();

    let view = LiveView::open(store, hub.clone(), channel);
    view.ready().await.unwrap();

    hub.publish(FeedEvent::Message(RowChange {
        kind: cove_types::ChangeKind::Delete,
        before: Some(existing),
        after: None,
    }));
    hub.publish(insert_event(message(2, channel, 20, "marker")));

    let state = wait_for(&view, |s| body_order(s).contains(&"marker")).await;
    assert_eq!(body_order(&state), ["hi", "marker"]);
}
