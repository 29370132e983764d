pub mod contract;
pub mod events;
pub mod models;

pub use contract::{ReactionToggle, Store};
pub use events::{ChangeKind, FeedEvent, RowChange};
pub use models::{
    AuthorProfile, Channel, Membership, Message, MessageRecord, Profile, Reaction,
};
