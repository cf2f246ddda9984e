use serde::{Deserialize, Serialize};

use crate::ids::ChannelId;

/// Work items carried by the durable queue. The variant tag is stored inside
/// the payload, so adding a variant never requires a schema change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WorkEvent {
    /// A message was stored and must be fanned out to the other members.
    SendMessage(SendMessageEvent),

    /// No-op event. Acknowledged as soon as it is popped.
    Ignore,
}

impl WorkEvent {
    pub fn send_message(uuid: impl Into<String>, channel_id: ChannelId) -> Self {
        Self::SendMessage(SendMessageEvent {
            uuid: uuid.into(),
            channel_id,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage(_) => "send_message",
            Self::Ignore => "ignore",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageEvent {
    pub uuid: String,
    pub channel_id: ChannelId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ChannelKind;

    #[test]
    fn payload_carries_its_tag() {
        let event = WorkEvent::send_message("abc", ChannelId::new(ChannelKind::Gr, 5, 2));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "SendMessage");
        assert_eq!(json["data"]["channel_id"], "GR:5:2");
        assert_eq!(json["data"]["uuid"], "abc");

        let ignore = serde_json::to_string(&WorkEvent::Ignore).unwrap();
        assert_eq!(ignore, r#"{"type":"Ignore"}"#);
    }

    #[test]
    fn unknown_tag_fails_to_decode() {
        let result = serde_json::from_str::<WorkEvent>(r#"{"type":"Resize","data":{}}"#);
        assert!(result.is_err());
    }
}
