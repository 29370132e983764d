//! The live view synchronizer: one task per open channel owns an ordered,
//! reaction-annotated message list and reconciles it against the snapshot
//! read and the change feed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use cove_feed::{FeedHub, FeedScope, FeedSubscription};
use cove_types::{
    ChangeKind, FeedEvent, Message, MessageRecord, Profile, Reaction, RowChange, Store,
};

use crate::error::SyncError;
use crate::reactions::group_by_emoji;

/// Placeholder author name when the profile lookup fails or finds nothing.
pub const UNKNOWN_AUTHOR: &str = "Unknown User";

/// Author attributes as displayed, with the placeholder already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorDisplay {
    pub name: String,
    pub avatar_url: Option<String>,
}

impl AuthorDisplay {
    pub fn unknown() -> Self {
        Self {
            name: UNKNOWN_AUTHOR.to_string(),
            avatar_url: None,
        }
    }

    fn from_profile(profile: &Profile) -> Self {
        Self {
            name: profile.display_name.clone(),
            avatar_url: profile.avatar_url.clone(),
        }
    }
}

/// One message as the renderer sees it: the row, the author display
/// attributes, and the emoji → reacting-users groups.
#[derive(Debug, Clone)]
pub struct MessageView {
    pub message: Message,
    pub author: AuthorDisplay,
    pub reactions: BTreeMap<String, BTreeSet<Uuid>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewPhase {
    /// Snapshot not applied yet; feed events are being buffered.
    Loading,
    /// Snapshot applied, buffered events replayed, live merging active.
    Ready,
    /// Snapshot fetch failed. Recoverable via [`LiveView::retry`].
    Failed(String),
}

/// The continuously reconciled state of one open channel.
#[derive(Debug, Clone)]
pub struct LiveViewState {
    pub phase: ViewPhase,
    pub messages: Vec<MessageView>,
}

enum ViewCommand {
    Refresh,
}

/// Handle to an open channel view. The state itself lives in a dedicated
/// task; this handle observes it and controls its lifecycle. Dropping the
/// handle closes the view.
pub struct LiveView {
    channel_id: Uuid,
    state: watch::Receiver<LiveViewState>,
    commands: mpsc::UnboundedSender<ViewCommand>,
    cancel: CancellationToken,
}

impl LiveView {
    /// Open a live view of `channel_id`. Subscribes to the change feed
    /// before fetching the snapshot, so nothing delivered in between is
    /// lost; events that arrive while the snapshot is pending are buffered
    /// and replayed in arrival order once it lands.
    pub fn open(store: Arc<dyn Store>, feed: FeedHub, channel_id: Uuid) -> Self {
        let (state_tx, state_rx) = watch::channel(LiveViewState {
            phase: ViewPhase::Loading,
            messages: Vec::new(),
        });
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = ViewTask {
            store,
            feed,
            channel_id,
            state: state_tx,
            commands: command_rx,
            cancel: cancel.clone(),
            phase: ViewPhase::Loading,
            messages: Vec::new(),
            reaction_rows: HashMap::new(),
        };
        tokio::spawn(task.run());

        Self {
            channel_id,
            state: state_rx,
            commands: command_tx,
            cancel,
        }
    }

    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    /// The observer contract: a receiver that is notified after every
    /// merge. `borrow()` on it is always the latest consistent state.
    pub fn watch(&self) -> watch::Receiver<LiveViewState> {
        self.state.clone()
    }

    /// The current ordered sequence of messages with reaction groups.
    pub fn current_messages(&self) -> Vec<MessageView> {
        self.state.borrow().messages.clone()
    }

    pub fn phase(&self) -> ViewPhase {
        self.state.borrow().phase.clone()
    }

    /// Wait until the snapshot is applied. Returns the error text when the
    /// view ends up Failed instead; the view stays open for [`Self::retry`].
    pub async fn ready(&self) -> Result<(), SyncError> {
        let mut state = self.state.clone();
        loop {
            let phase = state.borrow_and_update().phase.clone();
            match phase {
                ViewPhase::Ready => return Ok(()),
                ViewPhase::Failed(reason) => {
                    return Err(SyncError::TransientFetch(anyhow::anyhow!(reason)));
                }
                ViewPhase::Loading => {}
            }
            if state.changed().await.is_err() {
                return Err(SyncError::Subscription("view task ended".into()));
            }
        }
    }

    /// Re-run the open sequence: drop the current subscriptions, subscribe
    /// afresh, refetch the snapshot. Recovers a Failed view; on a Ready
    /// view it acts as a manual refetch against the store.
    pub fn retry(&self) {
        let _ = self.commands.send(ViewCommand::Refresh);
    }

    /// Stop the view. Idempotent, safe to call before the snapshot has
    /// resolved, and safe to call any number of times; the feed
    /// subscriptions are released exactly once when the task exits.
    /// Events published after close never mutate this view's state.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for LiveView {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Flow {
    Closed,
    Reopen,
}

struct ViewTask {
    store: Arc<dyn Store>,
    feed: FeedHub,
    channel_id: Uuid,
    state: watch::Sender<LiveViewState>,
    commands: mpsc::UnboundedReceiver<ViewCommand>,
    cancel: CancellationToken,
    phase: ViewPhase,
    messages: Vec<MessageView>,
    reaction_rows: HashMap<Uuid, Vec<Reaction>>,
}

struct Snapshot {
    records: Vec<MessageRecord>,
    reactions: Vec<Reaction>,
}

async fn load_snapshot(store: Arc<dyn Store>, channel_id: Uuid) -> anyhow::Result<Snapshot> {
    let records = store.channel_messages(channel_id).await?;
    let ids: Vec<Uuid> = records.iter().map(|r| r.message.id).collect();
    let reactions = store.reactions_for_messages(&ids).await?;
    Ok(Snapshot { records, reactions })
}

fn sort_key(message: &Message) -> (DateTime<Utc>, Uuid) {
    (message.created_at, message.id)
}

impl ViewTask {
    async fn run(mut self) {
        loop {
            // Fresh subscriptions on every (re)open. The previous
            // iteration's were dropped before reaching this point, so a
            // retry never stacks a duplicate subscription.
            let mut messages = self.feed.subscribe(FeedScope::ChannelMessages(self.channel_id));
            let mut reactions = self.feed.subscribe(FeedScope::Reactions);

            match self.serve(&mut messages, &mut reactions).await {
                Flow::Closed => return,
                Flow::Reopen => continue,
            }
        }
    }

    /// One open sequence: snapshot with buffering, replay, then live
    /// merging until the view is closed or asked to reopen.
    async fn serve(
        &mut self,
        messages: &mut FeedSubscription,
        reactions: &mut FeedSubscription,
    ) -> Flow {
        self.set_phase(ViewPhase::Loading);

        let mut buffered: Vec<FeedEvent> = Vec::new();
        let mut feed_open = true;

        let load = load_snapshot(self.store.clone(), self.channel_id);
        tokio::pin!(load);
        let seeded = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Flow::Closed,
                command = self.commands.recv() => match command {
                    Some(ViewCommand::Refresh) => return Flow::Reopen,
                    None => return Flow::Closed,
                },
                result = &mut load => break result,
                event = messages.recv(), if feed_open => match event {
                    Some(event) => buffered.push(event),
                    None => feed_open = false,
                },
                event = reactions.recv(), if feed_open => match event {
                    Some(event) => buffered.push(event),
                    None => feed_open = false,
                },
            }
        };

        match seeded {
            Ok(snapshot) => self.seed(snapshot),
            Err(err) => {
                warn!(channel = %self.channel_id, error = %err, "snapshot fetch failed");
                self.set_phase(ViewPhase::Failed(err.to_string()));
                // Recoverable: hold state until the caller retries or closes.
                loop {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Flow::Closed,
                        command = self.commands.recv() => match command {
                            Some(ViewCommand::Refresh) => return Flow::Reopen,
                            None => return Flow::Closed,
                        },
                    }
                }
            }
        }

        // Replay what arrived while the snapshot was pending, in arrival
        // order. The merge is idempotent, so overlap with the snapshot
        // deduplicates instead of appending twice.
        for event in buffered {
            self.apply(event).await;
        }

        self.set_phase(ViewPhase::Ready);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Flow::Closed,
                command = self.commands.recv() => match command {
                    Some(ViewCommand::Refresh) => return Flow::Reopen,
                    None => return Flow::Closed,
                },
                event = messages.recv(), if feed_open => match event {
                    Some(event) => self.apply(event).await,
                    None => {
                        warn!(channel = %self.channel_id, "change feed closed, live updates stopped");
                        feed_open = false;
                    }
                },
                event = reactions.recv(), if feed_open => match event {
                    Some(event) => self.apply(event).await,
                    None => feed_open = false,
                },
            }
        }
    }

    fn seed(&mut self, snapshot: Snapshot) {
        let mut rows: HashMap<Uuid, Vec<Reaction>> = HashMap::new();
        for reaction in snapshot.reactions {
            rows.entry(reaction.message_id).or_default().push(reaction);
        }

        let mut views: Vec<MessageView> = snapshot
            .records
            .into_iter()
            .map(|record| {
                let author = record
                    .author
                    .as_ref()
                    .map(|a| AuthorDisplay {
                        name: a.display_name.clone(),
                        avatar_url: a.avatar_url.clone(),
                    })
                    .unwrap_or_else(AuthorDisplay::unknown);
                let groups = group_by_emoji(
                    rows.get(&record.message.id).map(Vec::as_slice).unwrap_or(&[]),
                );
                MessageView {
                    message: record.message,
                    author,
                    reactions: groups,
                }
            })
            .collect();

        // The store orders ascending already; enforce (created_at, id) here
        // too so the invariant never depends on the backend.
        views.sort_by(|a, b| sort_key(&a.message).cmp(&sort_key(&b.message)));

        self.reaction_rows = rows;
        self.messages = views;
        self.push_state();
    }

    async fn apply(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Message(change) => self.apply_message(change).await,
            FeedEvent::Reaction(change) => self.apply_reaction(change),
            FeedEvent::Channel(_) => {
                debug!("channel event delivered to a message view, ignored");
            }
        }
        self.push_state();
    }

    async fn apply_message(&mut self, change: RowChange<Message>) {
        match change.kind {
            ChangeKind::Insert => {
                let Some(message) = change.after else {
                    debug!("message insert without a row, ignored");
                    return;
                };
                if self.contains(message.id) {
                    return;
                }

                // Secondary author lookup. A failed or missing lookup falls
                // back to the placeholder author; the message itself is
                // never dropped.
                let author = match self.store.profile(message.author_id).await {
                    Ok(Some(profile)) => AuthorDisplay::from_profile(&profile),
                    Ok(None) => AuthorDisplay::unknown(),
                    Err(err) => {
                        warn!(author = %message.author_id, error = %err, "author lookup failed");
                        AuthorDisplay::unknown()
                    }
                };

                // Reaction events for this message may have been delivered
                // before the message itself; backfill from the store. The
                // reaction stream carries no ordering relative to this one.
                let rows = match self.store.reactions_for_messages(&[message.id]).await {
                    Ok(rows) => rows,
                    Err(err) => {
                        warn!(message = %message.id, error = %err, "reaction backfill failed");
                        Vec::new()
                    }
                };
                let groups = group_by_emoji(&rows);
                self.reaction_rows.insert(message.id, rows);

                // A late event for an older message patches into its sorted
                // slot; everything already displayed keeps its position.
                let key = sort_key(&message);
                let at = self
                    .messages
                    .partition_point(|existing| sort_key(&existing.message) <= key);
                self.messages.insert(
                    at,
                    MessageView {
                        message,
                        author,
                        reactions: groups,
                    },
                );
            }
            ChangeKind::Update | ChangeKind::Delete => {
                // No producer in scope emits these. Ignoring beats guessing
                // at reorder or removal semantics.
                debug!(kind = ?change.kind, "unsupported message change ignored");
            }
        }
    }

    fn apply_reaction(&mut self, change: RowChange<Reaction>) {
        match change.kind {
            ChangeKind::Insert => {
                let Some(reaction) = change.after else {
                    debug!("reaction insert without a row, ignored");
                    return;
                };
                let message_id = reaction.message_id;
                let Some(rows) = self.reaction_rows.get_mut(&message_id) else {
                    // Another channel's message, or one whose insert is
                    // still in flight; that insert backfills reactions.
                    debug!(message = %message_id, "reaction for unknown message ignored");
                    return;
                };
                if rows.iter().any(|r| r.id == reaction.id) {
                    return;
                }
                // The triple is unique in the store; drop any stale row
                // for it before adding the fresh one.
                rows.retain(|r| !(r.user_id == reaction.user_id && r.emoji == reaction.emoji));
                rows.push(reaction);
                self.regroup(message_id);
            }
            ChangeKind::Delete => {
                let Some(reaction) = change.before else {
                    debug!("reaction delete without a row, ignored");
                    return;
                };
                let message_id = reaction.message_id;
                let Some(rows) = self.reaction_rows.get_mut(&message_id) else {
                    return;
                };
                rows.retain(|r| r.id != reaction.id);
                self.regroup(message_id);
            }
            ChangeKind::Update => {
                // Reaction rows are created and destroyed, never updated.
                debug!("unsupported reaction update ignored");
            }
        }
    }

    fn contains(&self, message_id: Uuid) -> bool {
        self.messages.iter().any(|v| v.message.id == message_id)
    }

    fn regroup(&mut self, message_id: Uuid) {
        let rows = self
            .reaction_rows
            .get(&message_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let groups = group_by_emoji(rows);
        if let Some(view) = self.messages.iter_mut().find(|v| v.message.id == message_id) {
            view.reactions = groups;
        }
    }

    fn set_phase(&mut self, phase: ViewPhase) {
        self.phase = phase;
        self.push_state();
    }

    fn push_state(&self) {
        let _ = self.state.send(LiveViewState {
            phase: self.phase.clone(),
            messages: self.messages.clone(),
        });
    }
}
