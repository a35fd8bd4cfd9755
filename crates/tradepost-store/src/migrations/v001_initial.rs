//! v001 -- Initial schema creation.
//!
//! Creates the user directory, messages, channels and the two channel link
//! tables (`channel_members`, `channel_messages`).

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- User directory (resellers and suppliers share one table)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    kind         TEXT NOT NULL CHECK (kind IN ('reseller', 'supplier')),
    id           TEXT NOT NULL,               -- UUID
    email        TEXT NOT NULL,
    first_name   TEXT NOT NULL DEFAULT '',
    last_name    TEXT NOT NULL DEFAULT '',
    company_name TEXT NOT NULL DEFAULT '',
    created_at   TEXT NOT NULL,               -- RFC-3339

    PRIMARY KEY (kind, id)
);

-- ----------------------------------------------------------------
-- Messages. recipient NULL => channel message.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq            INTEGER PRIMARY KEY AUTOINCREMENT,  -- insertion order
    id             TEXT NOT NULL UNIQUE,               -- UUID v7
    sender_kind    TEXT NOT NULL,
    sender_id      TEXT NOT NULL,
    recipient_kind TEXT,
    recipient_id   TEXT,
    message_type   TEXT NOT NULL CHECK (message_type IN ('text', 'file')),
    content        TEXT,
    file_url       TEXT,
    timestamp      TEXT NOT NULL,                      -- assigned on insert

    FOREIGN KEY (sender_kind, sender_id) REFERENCES users(kind, id),
    FOREIGN KEY (recipient_kind, recipient_id) REFERENCES users(kind, id),
    CHECK ((recipient_kind IS NULL) = (recipient_id IS NULL)),
    CHECK (
        (message_type = 'text' AND content IS NOT NULL AND content <> '')
        OR (message_type = 'file' AND file_url IS NOT NULL AND file_url <> '')
    )
);

CREATE INDEX IF NOT EXISTS idx_messages_pair
    ON messages(sender_kind, sender_id, recipient_kind, recipient_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_messages_recipient
    ON messages(recipient_kind, recipient_id, timestamp);

-- ----------------------------------------------------------------
-- Channels
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS channels (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    name       TEXT NOT NULL,
    admin_kind TEXT NOT NULL,
    admin_id   TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (admin_kind, admin_id) REFERENCES users(kind, id)
);

CREATE INDEX IF NOT EXISTS idx_channels_admin ON channels(admin_kind, admin_id);

CREATE TABLE IF NOT EXISTS channel_members (
    channel_id  TEXT NOT NULL,
    member_kind TEXT NOT NULL,
    member_id   TEXT NOT NULL,
    position    INTEGER NOT NULL,             -- display order

    PRIMARY KEY (channel_id, member_kind, member_id),
    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE,
    FOREIGN KEY (member_kind, member_id) REFERENCES users(kind, id)
);

CREATE INDEX IF NOT EXISTS idx_channel_members_member
    ON channel_members(member_kind, member_id);

CREATE TABLE IF NOT EXISTS channel_messages (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id TEXT NOT NULL,
    message_id TEXT NOT NULL UNIQUE,

    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE,
    FOREIGN KEY (message_id) REFERENCES messages(id)
);

CREATE INDEX IF NOT EXISTS idx_channel_messages_channel
    ON channel_messages(channel_id, seq);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
