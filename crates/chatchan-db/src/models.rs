//! Database row types. These map directly to SQLite rows; conversion into the
//! chatchan-types domain models happens here so a malformed row surfaces as
//! `StoreError::Corrupt` at the boundary.

use chatchan_types::{AccountId, ChannelId, Message, MessageSummary, MessageType, Participant};

use crate::{StoreError, from_millis};

pub struct MessageRow {
    pub id: i64,
    pub uuid: String,
    pub kind: i64,
    pub channel_id: String,
    pub sender_id: String,
    pub ordinal: i64,
    pub body: String,
    pub created_at: i64,
}

pub struct ParticipantRow {
    pub id: i64,
    pub account_id: String,
    pub channel_id: String,
    pub last_message_ordinal: i64,
    pub last_read_ordinal: i64,
    pub message_info: Option<String>,
    pub is_deleted: bool,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

pub struct QueueRow {
    pub id: i64,
    pub payload: String,
    pub version: i64,
    pub updated_at: i64,
}

pub struct ChannelRow {
    pub id: i64,
    pub kind: String,
    pub partition: i64,
    pub owner_id: String,
    pub member_list: String,
    pub is_deleted: bool,
    pub version: i64,
    pub created_at: i64,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let kind = MessageType::from_code(row.kind).ok_or_else(|| {
            StoreError::Corrupt(format!("message {} has unknown kind {}", row.id, row.kind))
        })?;

        Ok(Message {
            id: row.id,
            ordinal: row.ordinal,
            channel_id: parse_channel(&row.channel_id, row.id)?,
            sender: parse_account(&row.sender_id, row.id)?,
            kind,
            body: row.body,
            created_at: from_millis(row.created_at)?,
            uuid: row.uuid,
        })
    }
}

impl TryFrom<ParticipantRow> for Participant {
    type Error = StoreError;

    fn try_from(row: ParticipantRow) -> Result<Self, Self::Error> {
        let summary = match row.message_info.as_deref() {
            Some(json) => Some(serde_json::from_str::<MessageSummary>(json)?),
            None => None,
        };

        Ok(Participant {
            id: row.id,
            account_id: parse_account(&row.account_id, row.id)?,
            channel_id: parse_channel(&row.channel_id, row.id)?,
            last_message_ordinal: row.last_message_ordinal,
            last_read_ordinal: row.last_read_ordinal,
            summary,
            is_deleted: row.is_deleted,
            version: row.version,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}

fn parse_channel(raw: &str, row_id: i64) -> Result<ChannelId, StoreError> {
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("row {}: channel id '{}': {}", row_id, raw, e)))
}

fn parse_account(raw: &str, row_id: i64) -> Result<AccountId, StoreError> {
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("row {}: account id '{}': {}", row_id, raw, e)))
}
