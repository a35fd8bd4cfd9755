use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{
    EVENT_ERROR, EVENT_RECEIVE_CHANNEL_MESSAGE, EVENT_RECEIVE_MESSAGE,
    EVENT_SEND_CHANNEL_MESSAGE, EVENT_SEND_MESSAGE,
};
use crate::error::ProtocolError;
use crate::types::{ChannelMessage, MessageType, ResolvedMessage, UserRef};

/// Events a client sends over its real-time connection.
///
/// Frames are JSON objects of the form `{"event": <name>, "data": <payload>}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// A direct message to a single user.
    #[serde(rename = "sendMessage")]
    SendMessage(SendMessage),

    /// A message to every member of a channel.
    #[serde(rename = "send-channel-message", alias = "sendChannelMessage")]
    SendChannelMessage(SendChannelMessage),
}

impl ClientEvent {
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::SendMessage(_) => EVENT_SEND_MESSAGE,
            ClientEvent::SendChannelMessage(_) => EVENT_SEND_CHANNEL_MESSAGE,
        }
    }
}

/// Direct message payload. Field presence is validated by the message store,
/// not at decode time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    /// If present, must match the identity the connection was opened with.
    #[serde(default)]
    pub sender: Option<UserRef>,
    pub recipient: UserRef,
    pub message_type: MessageType,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendChannelMessage {
    pub channel_id: Uuid,
    #[serde(default)]
    pub sender: Option<UserRef>,
    pub message_type: MessageType,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
}

/// Events the server pushes to a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "receiveMessage")]
    ReceiveMessage(ResolvedMessage),

    #[serde(rename = "receive-channel-message")]
    ReceiveChannelMessage(ChannelMessage),

    /// Sent only to the connection whose event was rejected.
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ReceiveMessage(_) => EVENT_RECEIVE_MESSAGE,
            ServerEvent::ReceiveChannelMessage(_) => EVENT_RECEIVE_CHANNEL_MESSAGE,
            ServerEvent::Error { .. } => EVENT_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessageBody, UserKind, UserSummary};
    use chrono::Utc;

    fn resolved() -> ResolvedMessage {
        ResolvedMessage {
            id: Uuid::new_v4(),
            sender: UserSummary {
                kind: UserKind::Supplier,
                id: Uuid::new_v4(),
                email: "sales@example.com".into(),
                first_name: "Sam".into(),
                last_name: "Seller".into(),
                company_name: "Seller & Co".into(),
            },
            recipient: None,
            body: MessageBody::Text {
                content: "restocked".into(),
            },
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn decode_send_message() {
        let recipient = Uuid::new_v4();
        let frame = format!(
            r#"{{"event":"sendMessage","data":{{"recipient":{{"kind":"supplier","id":"{recipient}"}},"messageType":"text","content":"hello"}}}}"#
        );

        let event = ClientEvent::decode(&frame).unwrap();
        let ClientEvent::SendMessage(msg) = event else {
            panic!("expected sendMessage");
        };
        assert_eq!(msg.recipient, UserRef::supplier(recipient));
        assert_eq!(msg.message_type, MessageType::Text);
        assert_eq!(msg.content.as_deref(), Some("hello"));
        assert!(msg.sender.is_none());
        assert!(msg.file_url.is_none());
    }

    #[test]
    fn decode_channel_message_under_both_names() {
        let channel_id = Uuid::new_v4();
        for name in [EVENT_SEND_CHANNEL_MESSAGE, "sendChannelMessage"] {
            let frame = format!(
                r#"{{"event":"{name}","data":{{"channelId":"{channel_id}","messageType":"file","fileUrl":"uploads/x.png"}}}}"#
            );
            match ClientEvent::decode(&frame).unwrap() {
                ClientEvent::SendChannelMessage(msg) => {
                    assert_eq!(msg.channel_id, channel_id);
                    assert_eq!(msg.file_url.as_deref(), Some("uploads/x.png"));
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn event_names_match_constants() {
        let direct = ServerEvent::ReceiveMessage(resolved()).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&direct).unwrap();
        assert_eq!(value["event"], EVENT_RECEIVE_MESSAGE);
        assert_eq!(value["data"]["content"], "restocked");
        assert_eq!(ServerEvent::ReceiveMessage(resolved()).name(), EVENT_RECEIVE_MESSAGE);

        let channel_id = Uuid::new_v4();
        let event = ServerEvent::ReceiveChannelMessage(ChannelMessage {
            message: resolved(),
            channel_id,
        });
        let value: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
        assert_eq!(value["event"], event.name());
        assert_eq!(value["data"]["channelId"], channel_id.to_string());

        let outbound = ClientEvent::SendMessage(SendMessage {
            sender: None,
            recipient: UserRef::reseller(Uuid::new_v4()),
            message_type: MessageType::Text,
            content: Some("hi".into()),
            file_url: None,
        });
        let value = serde_json::to_value(&outbound).unwrap();
        assert_eq!(value["event"], EVENT_SEND_MESSAGE);
        assert_eq!(outbound.name(), EVENT_SEND_MESSAGE);
    }

    #[test]
    fn decode_rejects_unknown_event() {
        assert!(ClientEvent::decode(r#"{"event":"typing","data":{}}"#).is_err());
        assert!(ClientEvent::decode("not json").is_err());
    }

    #[test]
    fn encode_error_event() {
        let event = ServerEvent::error("nope");
        assert_eq!(event.name(), EVENT_ERROR);
        let json = event.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], EVENT_ERROR);
        assert_eq!(value["data"]["message"], "nope");
    }
}
