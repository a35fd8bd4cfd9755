//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be returned
//! directly from the HTTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tradepost_shared::{MessageBody, UserKind, UserRef, UserSummary};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A directory entry for a reseller or supplier.
///
/// Only the fields the messaging core needs for display are kept here; the
/// full account record lives with the registration workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub kind: UserKind,
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub company_name: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn user_ref(&self) -> UserRef {
        UserRef::new(self.kind, self.id)
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            kind: self.kind,
            id: self.id,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            company_name: self.company_name.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A stored message with unresolved sender and recipient references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender: UserRef,
    /// `None` for channel messages.
    pub recipient: Option<UserRef>,
    #[serde(flatten)]
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A named group with one admin, a member set and a message history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    pub admin: UserRef,
    /// Unique, in the order they were added.
    pub members: Vec<UserRef>,
    /// Ids of the channel's messages, oldest first.
    pub messages: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Contacts
// ---------------------------------------------------------------------------

/// A direct-message counterpart and the time of the latest exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DmContact {
    #[serde(flatten)]
    pub user: UserSummary,
    pub last_message_time: DateTime<Utc>,
}

/// A selectable entry for pickers: a display label and the user it names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactOption {
    pub label: String,
    pub value: UserRef,
}
