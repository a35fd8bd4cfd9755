//! Channel registry: group definitions, membership and message history.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use tradepost_shared::{MessageType, ResolvedMessage, UserRef};

use crate::database::{format_timestamp, parse_timestamp, parse_uuid, read_user_ref, Database};
use crate::error::{Result, StoreError};
use crate::messages::{insert_message, row_to_resolved, validate_body, RESOLVED_SELECT};
use crate::models::Channel;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create a channel owned by `admin`.
    ///
    /// Fails with `Validation` if the name is blank or if the admin or any
    /// member is not in the user directory. Repeated members are stored
    /// once. The admin does not have to be listed as a member.
    pub fn create_channel(
        &self,
        name: &str,
        admin: UserRef,
        members: &[UserRef],
    ) -> Result<Channel> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Validation("channel name is required".into()));
        }
        if !self.user_exists(admin)? {
            return Err(StoreError::Validation(format!("admin user {admin} not found")));
        }

        let mut unique: Vec<UserRef> = Vec::with_capacity(members.len());
        for member in members {
            if !unique.contains(member) {
                unique.push(*member);
            }
        }

        let mut unknown = Vec::new();
        for member in &unique {
            if !self.user_exists(*member)? {
                unknown.push(member.to_string());
            }
        }
        if !unknown.is_empty() {
            return Err(StoreError::Validation(format!(
                "some members are not valid users: {}",
                unknown.join(", ")
            )));
        }

        let now = self.next_timestamp();
        let channel = Channel {
            id: Uuid::new_v4(),
            name: name.to_string(),
            admin,
            members: unique,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO channels (id, name, admin_kind, admin_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                channel.id.to_string(),
                channel.name,
                admin.kind.as_str(),
                admin.id.to_string(),
                format_timestamp(&now),
            ],
        )?;
        for (position, member) in channel.members.iter().enumerate() {
            tx.execute(
                "INSERT INTO channel_members (channel_id, member_kind, member_id, position)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    channel.id.to_string(),
                    member.kind.as_str(),
                    member.id.to_string(),
                    position as i64,
                ],
            )?;
        }
        tx.commit()?;

        info!(
            channel_id = %channel.id,
            name = %channel.name,
            %admin,
            members = channel.members.len(),
            "channel created"
        );
        Ok(channel)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_channel(&self, id: Uuid) -> Result<Channel> {
        load_channel(self.conn(), id)?.ok_or_else(|| StoreError::not_found(format!("channel {id}")))
    }

    /// Channels where `user` is the admin or a member, most recently active
    /// first.
    pub fn find_channels_for_user(&self, user: UserRef) -> Result<Vec<Channel>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id
             FROM channels c
             WHERE (c.admin_kind = ?1 AND c.admin_id = ?2)
                OR EXISTS (SELECT 1 FROM channel_members cm
                           WHERE cm.channel_id = c.id
                             AND cm.member_kind = ?1 AND cm.member_id = ?2)
             ORDER BY c.updated_at DESC",
        )?;

        let ids = stmt.query_map(params![user.kind.as_str(), user.id.to_string()], |row| {
            let id: String = row.get(0)?;
            parse_uuid(0, &id)
        })?;

        let mut channels = Vec::new();
        for id in ids {
            channels.push(self.get_channel(id?)?);
        }
        Ok(channels)
    }

    /// Everyone a channel message is delivered to: the members plus the
    /// admin, each once.
    pub fn members_and_admin(&self, channel_id: Uuid) -> Result<Vec<UserRef>> {
        let channel = self.get_channel(channel_id)?;
        let mut targets = channel.members;
        if !targets.contains(&channel.admin) {
            targets.push(channel.admin);
        }
        Ok(targets)
    }

    /// The channel's messages in the order they were appended, with senders
    /// resolved.
    pub fn channel_messages(&self, channel_id: Uuid) -> Result<Vec<ResolvedMessage>> {
        require_channel(self.conn(), channel_id)?;

        let mut stmt = self.conn().prepare(&format!(
            "{RESOLVED_SELECT}
             JOIN channel_messages cm ON cm.message_id = m.id
             WHERE cm.channel_id = ?1
             ORDER BY cm.seq ASC"
        ))?;

        let rows = stmt.query_map(params![channel_id.to_string()], row_to_resolved)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Append an existing channel message to a channel and refresh
    /// `updated_at`, atomically.
    pub fn append_message(&self, channel_id: Uuid, message_id: Uuid) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        append_in(&tx, self, channel_id, message_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Create a channel message and append it to `channel_id` in one
    /// transaction. An unknown channel leaves no message behind.
    pub fn post_channel_message(
        &self,
        channel_id: Uuid,
        sender: UserRef,
        message_type: MessageType,
        content: Option<String>,
        file_url: Option<String>,
    ) -> Result<ResolvedMessage> {
        let body = validate_body(message_type, content, file_url)?;
        self.require_user(sender)?;

        let tx = self.conn().unchecked_transaction()?;
        let id = insert_message(&tx, self, sender, None, &body)?;
        append_in(&tx, self, channel_id, id)?;
        tx.commit()?;

        tracing::debug!(message_id = %id, %channel_id, %sender, "stored channel message");
        self.resolved_or_integrity(id)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn require_channel(conn: &Connection, channel_id: Uuid) -> Result<()> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM channels WHERE id = ?1",
            params![channel_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match found {
        Some(_) => Ok(()),
        None => Err(StoreError::not_found(format!("channel {channel_id}"))),
    }
}

fn append_in(conn: &Connection, db: &Database, channel_id: Uuid, message_id: Uuid) -> Result<()> {
    require_channel(conn, channel_id)?;

    let recipient: Option<Option<String>> = conn
        .query_row(
            "SELECT recipient_id FROM messages WHERE id = ?1",
            params![message_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match recipient {
        None => return Err(StoreError::not_found(format!("message {message_id}"))),
        Some(Some(_)) => {
            return Err(StoreError::Validation(format!(
                "message {message_id} is a direct message"
            )))
        }
        Some(None) => {}
    }

    let linked: Option<String> = conn
        .query_row(
            "SELECT channel_id FROM channel_messages WHERE message_id = ?1",
            params![message_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    if linked.is_some() {
        return Err(StoreError::Validation(format!(
            "message {message_id} already belongs to a channel"
        )));
    }

    conn.execute(
        "INSERT INTO channel_messages (channel_id, message_id) VALUES (?1, ?2)",
        params![channel_id.to_string(), message_id.to_string()],
    )?;
    conn.execute(
        "UPDATE channels SET updated_at = ?2 WHERE id = ?1",
        params![channel_id.to_string(), format_timestamp(&db.next_timestamp())],
    )?;
    Ok(())
}

fn load_channel(conn: &Connection, id: Uuid) -> Result<Option<Channel>> {
    let head = conn
        .query_row(
            "SELECT id, name, admin_kind, admin_id, created_at, updated_at
             FROM channels WHERE id = ?1",
            params![id.to_string()],
            |row| {
                let id: String = row.get(0)?;
                let created: String = row.get(4)?;
                let updated: String = row.get(5)?;
                Ok(Channel {
                    id: parse_uuid(0, &id)?,
                    name: row.get(1)?,
                    admin: read_user_ref(row, 2)?,
                    members: Vec::new(),
                    messages: Vec::new(),
                    created_at: parse_timestamp(4, &created)?,
                    updated_at: parse_timestamp(5, &updated)?,
                })
            },
        )
        .optional()?;

    let Some(mut channel) = head else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT member_kind, member_id FROM channel_members
         WHERE channel_id = ?1 ORDER BY position ASC",
    )?;
    let members = stmt.query_map(params![id.to_string()], |row| read_user_ref(row, 0))?;
    for member in members {
        channel.members.push(member?);
    }

    let mut stmt = conn.prepare(
        "SELECT message_id FROM channel_messages WHERE channel_id = ?1 ORDER BY seq ASC",
    )?;
    let messages = stmt.query_map(params![id.to_string()], |row| {
        let id: String = row.get(0)?;
        parse_uuid(0, &id)
    })?;
    for message in messages {
        channel.messages.push(message?);
    }

    Ok(Some(channel))
}
