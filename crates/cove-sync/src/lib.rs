//! Client core for cove: keeps an ordered, reaction-annotated live view of
//! each open channel reconciled against the store's snapshot reads and its
//! change feed, and provides the channel directory and message composer
//! that feed the same pipeline.

pub mod composer;
pub mod directory;
pub mod error;
pub mod live_view;
pub mod reactions;

pub use composer::Composer;
pub use directory::ChannelDirectory;
pub use error::SyncError;
pub use live_view::{
    AuthorDisplay, LiveView, LiveViewState, MessageView, UNKNOWN_AUTHOR, ViewPhase,
};
pub use reactions::{Reactions, group_by_emoji};
