//! Contact lists built from the user directory and direct-message history.

use rusqlite::params;

use tradepost_shared::{UserRef, UserSummary};

use crate::database::{parse_timestamp, Database};
use crate::error::Result;
use crate::models::{ContactOption, DmContact};
use crate::users::{read_summary, row_to_profile, PROFILE_COLUMNS};

impl Database {
    /// Users other than `caller` whose first name, last name or email
    /// contains `term`, ignoring ASCII case. An empty term matches everyone.
    pub fn search_contacts(&self, caller: UserRef, term: &str) -> Result<Vec<UserSummary>> {
        let pattern = format!("%{}%", escape_like(term));

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PROFILE_COLUMNS}
             FROM users
             WHERE NOT (kind = ?1 AND id = ?2)
               AND (first_name LIKE ?3 ESCAPE '\\'
                    OR last_name LIKE ?3 ESCAPE '\\'
                    OR email LIKE ?3 ESCAPE '\\')
             ORDER BY first_name, last_name, email"
        ))?;

        let rows = stmt.query_map(
            params![caller.kind.as_str(), caller.id.to_string(), pattern],
            row_to_profile,
        )?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?.summary());
        }
        Ok(contacts)
    }

    /// Everyone `user` has exchanged direct messages with, most recent
    /// exchange first.
    pub fn dm_contacts(&self, user: UserRef) -> Result<Vec<DmContact>> {
        let mut stmt = self.conn().prepare(
            "WITH counterparts AS (
                 SELECT CASE WHEN sender_kind = ?1 AND sender_id = ?2
                             THEN recipient_kind ELSE sender_kind END AS kind,
                        CASE WHEN sender_kind = ?1 AND sender_id = ?2
                             THEN recipient_id ELSE sender_id END AS id,
                        timestamp
                 FROM messages
                 WHERE recipient_id IS NOT NULL
                   AND ((sender_kind = ?1 AND sender_id = ?2)
                        OR (recipient_kind = ?1 AND recipient_id = ?2))
             )
             SELECT u.kind, u.id, u.email, u.first_name, u.last_name, u.company_name,
                    MAX(c.timestamp) AS last_message_time
             FROM counterparts c
             JOIN users u ON u.kind = c.kind AND u.id = c.id
             GROUP BY u.kind, u.id
             ORDER BY last_message_time DESC",
        )?;

        let rows = stmt.query_map(params![user.kind.as_str(), user.id.to_string()], |row| {
            let summary = read_summary(row, 0)?.ok_or_else(|| {
                rusqlite::Error::InvalidColumnType(0, "kind".into(), rusqlite::types::Type::Null)
            })?;
            let last: String = row.get(6)?;
            Ok(DmContact {
                user: summary,
                last_message_time: parse_timestamp(6, &last)?,
            })
        })?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }

    /// Every user except `caller`, labelled for a picker.
    pub fn all_contacts(&self, caller: UserRef) -> Result<Vec<ContactOption>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PROFILE_COLUMNS}
             FROM users
             WHERE NOT (kind = ?1 AND id = ?2)
             ORDER BY first_name, last_name, email"
        ))?;

        let rows = stmt.query_map(
            params![caller.kind.as_str(), caller.id.to_string()],
            row_to_profile,
        )?;

        let mut contacts = Vec::new();
        for row in rows {
            let profile = row?;
            let label = if profile.first_name.is_empty() {
                profile.email.clone()
            } else {
                format!("{} {}", profile.first_name, profile.last_name)
            };
            contacts.push(ContactOption {
                label,
                value: profile.user_ref(),
            });
        }
        Ok(contacts)
    }
}

/// Escape `LIKE` wildcards so the term is matched literally.
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
