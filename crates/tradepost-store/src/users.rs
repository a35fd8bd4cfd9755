//! The user directory: display fields for resellers and suppliers.
//!
//! Rows are written by the registration workflow (through the admin API) and
//! read here to validate references and resolve display fields.

use rusqlite::{params, OptionalExtension};

use tradepost_shared::{UserRef, UserSummary};

use crate::database::{format_timestamp, parse_kind, parse_timestamp, parse_uuid, Database};
use crate::error::{Result, StoreError};
use crate::models::UserProfile;

pub(crate) const PROFILE_COLUMNS: &str =
    "kind, id, email, first_name, last_name, company_name, created_at";

impl Database {
    /// Insert a profile, or refresh its display fields if it already exists.
    pub fn upsert_user(&self, user: &UserProfile) -> Result<()> {
        if user.email.trim().is_empty() {
            return Err(StoreError::Validation("email is required".into()));
        }

        self.conn().execute(
            "INSERT INTO users (kind, id, email, first_name, last_name, company_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (kind, id) DO UPDATE SET
                 email = excluded.email,
                 first_name = excluded.first_name,
                 last_name = excluded.last_name,
                 company_name = excluded.company_name",
            params![
                user.kind.as_str(),
                user.id.to_string(),
                user.email,
                user.first_name,
                user.last_name,
                user.company_name,
                format_timestamp(&user.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, user: UserRef) -> Result<UserProfile> {
        self.conn()
            .query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM users WHERE kind = ?1 AND id = ?2"),
                params![user.kind.as_str(), user.id.to_string()],
                row_to_profile,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found(format!("user {user}")))
    }

    pub fn get_user_summary(&self, user: UserRef) -> Result<UserSummary> {
        Ok(self.get_user(user)?.summary())
    }

    pub fn user_exists(&self, user: UserRef) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM users WHERE kind = ?1 AND id = ?2",
                params![user.kind.as_str(), user.id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Fail with `NotFound` unless `user` is in the directory.
    pub(crate) fn require_user(&self, user: UserRef) -> Result<()> {
        if self.user_exists(user)? {
            Ok(())
        } else {
            Err(StoreError::not_found(format!("user {user}")))
        }
    }
}

/// Map a row selected with [`PROFILE_COLUMNS`] (starting at column 0).
pub(crate) fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserProfile> {
    let kind: String = row.get(0)?;
    let id: String = row.get(1)?;
    let created_at: String = row.get(6)?;

    Ok(UserProfile {
        kind: parse_kind(0, &kind)?,
        id: parse_uuid(1, &id)?,
        email: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        company_name: row.get(5)?,
        created_at: parse_timestamp(6, &created_at)?,
    })
}

/// Map the six summary columns `kind, id, email, first_name, last_name,
/// company_name` starting at `idx`. Returns `None` when the kind is NULL,
/// which is how a LEFT JOIN miss shows up.
pub(crate) fn read_summary(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<UserSummary>> {
    let kind: Option<String> = row.get(idx)?;
    let Some(kind) = kind else {
        return Ok(None);
    };
    let id: String = row.get(idx + 1)?;

    Ok(Some(UserSummary {
        kind: parse_kind(idx, &kind)?,
        id: parse_uuid(idx + 1, &id)?,
        email: row.get(idx + 2)?,
        first_name: row.get(idx + 3)?,
        last_name: row.get(idx + 4)?,
        company_name: row.get(idx + 5)?,
    }))
}
