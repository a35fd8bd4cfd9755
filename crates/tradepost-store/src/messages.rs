//! Direct and channel message persistence.

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use tradepost_shared::{MessageBody, MessageType, ProtocolError, ResolvedMessage, UserRef};

use crate::database::{
    format_timestamp, parse_timestamp, parse_uuid, read_optional_user_ref, read_user_ref, Database,
};
use crate::error::{Result, StoreError};
use crate::models::Message;
use crate::users::read_summary;

const MESSAGE_COLUMNS: &str = "m.id, m.sender_kind, m.sender_id, m.recipient_kind, \
     m.recipient_id, m.message_type, m.content, m.file_url, m.timestamp";

/// Message columns followed by the sender's and recipient's summary columns.
pub(crate) const RESOLVED_SELECT: &str = "SELECT m.id, m.message_type, m.content, m.file_url, m.timestamp, \
        s.kind, s.id, s.email, s.first_name, s.last_name, s.company_name, \
        r.kind, r.id, r.email, r.first_name, r.last_name, r.company_name \
     FROM messages m \
     JOIN users s ON s.kind = m.sender_kind AND s.id = m.sender_id \
     LEFT JOIN users r ON r.kind = m.recipient_kind AND r.id = m.recipient_id";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Persist a direct message and return it with display fields resolved.
    ///
    /// Fails with `Validation` if the field required by `message_type` is
    /// missing and with `NotFound` if either user is unknown. Nothing is
    /// written on failure.
    pub fn create_direct_message(
        &self,
        sender: UserRef,
        recipient: UserRef,
        message_type: MessageType,
        content: Option<String>,
        file_url: Option<String>,
    ) -> Result<ResolvedMessage> {
        let body = validate_body(message_type, content, file_url)?;
        self.require_user(sender)?;
        self.require_user(recipient)?;

        let id = insert_message(self.conn(), self, sender, Some(recipient), &body)?;

        tracing::debug!(message_id = %id, %sender, %recipient, "stored direct message");
        self.resolved_or_integrity(id)
    }

    /// Persist a message that belongs to a channel (recipient is NULL).
    ///
    /// This does not link the message to any channel; see
    /// [`Database::post_channel_message`] for the combined operation.
    pub fn create_channel_message(
        &self,
        sender: UserRef,
        message_type: MessageType,
        content: Option<String>,
        file_url: Option<String>,
    ) -> Result<ResolvedMessage> {
        let body = validate_body(message_type, content, file_url)?;
        self.require_user(sender)?;

        let id = insert_message(self.conn(), self, sender, None, &body)?;
        self.resolved_or_integrity(id)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// All direct messages between `a` and `b` in either direction, oldest
    /// first. Symmetric in its arguments.
    pub fn find_conversation(&self, a: UserRef, b: UserRef) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages m
             WHERE (m.sender_kind = ?1 AND m.sender_id = ?2
                    AND m.recipient_kind = ?3 AND m.recipient_id = ?4)
                OR (m.sender_kind = ?3 AND m.sender_id = ?4
                    AND m.recipient_kind = ?1 AND m.recipient_id = ?2)
             ORDER BY m.timestamp ASC, m.seq ASC"
        ))?;

        let rows = stmt.query_map(
            params![
                a.kind.as_str(),
                a.id.to_string(),
                b.kind.as_str(),
                b.id.to_string()
            ],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// A single message without display fields.
    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found(format!("message {id}")))
    }

    /// A single message with sender and recipient resolved.
    pub fn find_message(&self, id: Uuid) -> Result<Option<ResolvedMessage>> {
        Ok(self
            .conn()
            .query_row(
                &format!("{RESOLVED_SELECT} WHERE m.id = ?1"),
                params![id.to_string()],
                row_to_resolved,
            )
            .optional()?)
    }

    pub(crate) fn resolved_or_integrity(&self, id: Uuid) -> Result<ResolvedMessage> {
        self.find_message(id)?
            .ok_or_else(|| StoreError::Integrity(format!("message {id} vanished after insert")))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn validate_body(
    message_type: MessageType,
    content: Option<String>,
    file_url: Option<String>,
) -> Result<MessageBody> {
    MessageBody::from_parts(message_type, content, file_url)
        .map_err(|e| StoreError::Validation(e.to_string()))
}

/// Insert one message row through `conn`, which may be an open transaction.
/// Id and timestamp are assigned here.
pub(crate) fn insert_message(
    conn: &Connection,
    db: &Database,
    sender: UserRef,
    recipient: Option<UserRef>,
    body: &MessageBody,
) -> Result<Uuid> {
    let id = Uuid::now_v7();
    let timestamp = db.next_timestamp();

    conn.execute(
        "INSERT INTO messages (id, sender_kind, sender_id, recipient_kind, recipient_id,
                               message_type, content, file_url, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id.to_string(),
            sender.kind.as_str(),
            sender.id.to_string(),
            recipient.map(|r| r.kind.as_str()),
            recipient.map(|r| r.id.to_string()),
            body.message_type().as_str(),
            body.content(),
            body.file_url(),
            format_timestamp(&timestamp),
        ],
    )?;
    Ok(id)
}

fn read_body(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<MessageBody> {
    let message_type: String = row.get(idx)?;
    let content: Option<String> = row.get(idx + 1)?;
    let file_url: Option<String> = row.get(idx + 2)?;

    let conversion = |e: ProtocolError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    };
    let message_type: MessageType = message_type.parse().map_err(conversion)?;
    MessageBody::from_parts(message_type, content, file_url).map_err(conversion)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let ts: String = row.get(8)?;

    Ok(Message {
        id: parse_uuid(0, &id)?,
        sender: read_user_ref(row, 1)?,
        recipient: read_optional_user_ref(row, 3)?,
        body: read_body(row, 5)?,
        timestamp: parse_timestamp(8, &ts)?,
    })
}

/// Map a row selected with [`RESOLVED_SELECT`].
pub(crate) fn row_to_resolved(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResolvedMessage> {
    let id: String = row.get(0)?;
    let ts: String = row.get(4)?;

    let sender = read_summary(row, 5)?.ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(5, "sender kind".into(), rusqlite::types::Type::Null)
    })?;

    Ok(ResolvedMessage {
        id: parse_uuid(0, &id)?,
        sender,
        recipient: read_summary(row, 11)?,
        body: read_body(row, 1)?,
        timestamp: parse_timestamp(4, &ts)?,
    })
}
