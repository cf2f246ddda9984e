pub mod api;
pub mod events;
pub mod ids;
pub mod models;

pub use ids::{AccountId, AccountKind, ChannelId, ChannelKind, ParseIdError};
pub use models::{Message, MessageSummary, MessageType, Participant};
