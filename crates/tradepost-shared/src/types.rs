use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;

/// Which user collection a reference points into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum UserKind {
    Reseller,
    Supplier,
}

impl UserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserKind::Reseller => "reseller",
            UserKind::Supplier => "supplier",
        }
    }
}

impl fmt::Display for UserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reseller" => Ok(UserKind::Reseller),
            "supplier" => Ok(UserKind::Supplier),
            _ => Err(ProtocolError::UnknownUserKind(s.to_string())),
        }
    }
}

/// A reference to a reseller or a supplier.
///
/// Sender and recipient of a message carry their own kind, so a reseller can
/// message a supplier and vice versa. Serialized as `{"kind", "id"}`; also
/// accepted in the string forms understood by [`FromStr`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "UserRefRepr")]
pub struct UserRef {
    pub kind: UserKind,
    pub id: Uuid,
}

impl UserRef {
    pub fn new(kind: UserKind, id: Uuid) -> Self {
        Self { kind, id }
    }

    pub fn reseller(id: Uuid) -> Self {
        Self::new(UserKind::Reseller, id)
    }

    pub fn supplier(id: Uuid) -> Self {
        Self::new(UserKind::Supplier, id)
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Parses `reseller:<uuid>`, `supplier:<uuid>` or a bare `<uuid>`, which
/// names a reseller.
impl FromStr for UserRef {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (kind, id) = match s.split_once(':') {
            Some((kind, id)) => (kind.parse()?, id),
            None => (UserKind::Reseller, s),
        };
        let id = Uuid::parse_str(id).map_err(|_| ProtocolError::InvalidUserRef(s.to_string()))?;
        Ok(Self { kind, id })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UserRefRepr {
    Tagged { kind: UserKind, id: Uuid },
    Text(String),
}

impl TryFrom<UserRefRepr> for UserRef {
    type Error = ProtocolError;

    fn try_from(repr: UserRefRepr) -> Result<Self, Self::Error> {
        match repr {
            UserRefRepr::Tagged { kind, id } => Ok(Self { kind, id }),
            UserRefRepr::Text(s) => s.parse(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    File,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::File => "file",
        }
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "file" => Ok(MessageType::File),
            other => Err(ProtocolError::UnknownMessageType(other.to_string())),
        }
    }
}

/// The payload of a message. The variant decides which field is required.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "messageType", rename_all = "lowercase")]
pub enum MessageBody {
    Text {
        content: String,
    },
    File {
        #[serde(rename = "fileUrl")]
        file_url: String,
    },
}

impl MessageBody {
    /// Build a body from the loose fields a client sends.
    ///
    /// `content` is required for text messages and `file_url` for file
    /// messages; an empty string counts as missing. The field that does not
    /// belong to the type is ignored.
    pub fn from_parts(
        message_type: MessageType,
        content: Option<String>,
        file_url: Option<String>,
    ) -> Result<Self, ProtocolError> {
        match message_type {
            MessageType::Text => match content {
                Some(content) if !content.is_empty() => Ok(MessageBody::Text { content }),
                _ => Err(ProtocolError::MissingField("content is required for text messages")),
            },
            MessageType::File => match file_url {
                Some(file_url) if !file_url.is_empty() => Ok(MessageBody::File { file_url }),
                _ => Err(ProtocolError::MissingField("fileUrl is required for file messages")),
            },
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            MessageBody::Text { .. } => MessageType::Text,
            MessageBody::File { .. } => MessageType::File,
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            MessageBody::Text { content } => Some(content),
            MessageBody::File { .. } => None,
        }
    }

    pub fn file_url(&self) -> Option<&str> {
        match self {
            MessageBody::Text { .. } => None,
            MessageBody::File { file_url } => Some(file_url),
        }
    }
}

/// Display fields of a user, joined in when a message is read back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub kind: UserKind,
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub company_name: String,
}

impl UserSummary {
    pub fn user_ref(&self) -> UserRef {
        UserRef::new(self.kind, self.id)
    }
}

/// A stored message with sender and recipient resolved to display fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMessage {
    pub id: Uuid,
    pub sender: UserSummary,
    /// `None` for channel messages.
    pub recipient: Option<UserSummary>,
    #[serde(flatten)]
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,
}

/// A resolved channel message as pushed to channel members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    #[serde(flatten)]
    pub message: ResolvedMessage,
    pub channel_id: Uuid,
}
