use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, ChannelId};

/// Number of characters kept in a participant's message preview.
pub const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Event,
}

impl MessageType {
    pub fn code(self) -> i64 {
        match self {
            Self::Text => 0,
            Self::Event => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Text),
            1 => Some(Self::Event),
            _ => None,
        }
    }
}

/// A message in a channel's timeline. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub ordinal: i64,
    pub uuid: String,
    pub channel_id: ChannelId,
    pub sender: AccountId,
    pub kind: MessageType,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn summary(&self) -> MessageSummary {
        MessageSummary {
            sender: self.sender.clone(),
            preview: self.body.chars().take(PREVIEW_CHARS).collect(),
            message_uuid: self.uuid.clone(),
            sent_at: self.created_at,
        }
    }
}

/// Denormalized view of the latest message in a channel, as seen from one
/// participant's inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub sender: AccountId,
    pub preview: String,
    pub message_uuid: String,
    pub sent_at: DateTime<Utc>,
}

/// One account's inbox state for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: i64,
    pub account_id: AccountId,
    pub channel_id: ChannelId,
    pub last_message_ordinal: i64,
    pub last_read_ordinal: i64,
    pub summary: Option<MessageSummary>,
    pub is_deleted: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Participant {
    pub fn unread_count(&self) -> i64 {
        (self.last_message_ordinal - self.last_read_ordinal).max(0)
    }
}
