use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, ChannelId};
use crate::models::{Message, MessageType, Participant};

// -- JWT Claims --

/// Bearer-token claims. Tokens are issued elsewhere; this service only
/// validates them. `sub` is the caller's account id string (`UA:<name>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

// -- Accounts and channels --

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub account_id: AccountId,
    pub partition: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateDirectChannelRequest {
    pub peer: AccountId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelResponse {
    pub channel_id: ChannelId,
    pub members: Vec<AccountId>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostMessageRequest {
    /// Client-chosen idempotency key. Generated server-side when absent,
    /// which makes the post non-idempotent.
    pub uuid: Option<String>,
    pub body: String,
    #[serde(default)]
    pub kind: MessageType,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    #[serde(default)]
    pub since: i64,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub uuid: String,
    pub ordinal: i64,
    pub channel_id: ChannelId,
    pub sender: AccountId,
    pub kind: MessageType,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

impl From<Message> for MessageResponse {
    fn from(m: Message) -> Self {
        Self {
            uuid: m.uuid,
            ordinal: m.ordinal,
            channel_id: m.channel_id,
            sender: m.sender,
            kind: m.kind,
            body: m.body,
            sent_at: m.created_at,
        }
    }
}

// -- Participants --

#[derive(Debug, Deserialize)]
pub struct ParticipantQuery {
    /// Unix milliseconds of the newest `updated_at` the client has seen.
    pub since: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ParticipantResponse {
    pub channel_id: ChannelId,
    pub last_ordinal: i64,
    pub read_ordinal: i64,
    pub unread: i64,
    pub last_msg: Option<String>,
    pub last_by: Option<AccountId>,
    pub last_sent_at: Option<DateTime<Utc>>,
    /// Unix milliseconds; feed back as `since` for the next incremental sync.
    pub updated_at: i64,
}

impl From<Participant> for ParticipantResponse {
    fn from(p: Participant) -> Self {
        let unread = p.unread_count();
        let (last_msg, last_by, last_sent_at) = match p.summary {
            Some(s) => (Some(s.preview), Some(s.sender), Some(s.sent_at)),
            None => (None, None, None),
        };
        Self {
            channel_id: p.channel_id,
            last_ordinal: p.last_message_ordinal,
            read_ordinal: p.last_read_ordinal,
            unread,
            last_msg,
            last_by,
            last_sent_at,
            updated_at: p.updated_at.timestamp_millis(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub through: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub advanced: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LinkResponse {
    pub participant_id: i64,
}

// -- Internal --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnqueueSendMessageRequest {
    pub uuid: String,
    pub channel_id: ChannelId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub queue_depth: i64,
}
