//! Fixtures shared by the store's unit tests.

use chrono::Utc;
use uuid::Uuid;

use tradepost_shared::{UserKind, UserRef};

use crate::database::Database;
use crate::models::UserProfile;

pub(crate) fn profile(kind: UserKind, first_name: &str) -> UserProfile {
    UserProfile {
        kind,
        id: Uuid::new_v4(),
        email: format!("{}@example.com", first_name.to_lowercase()),
        first_name: first_name.to_string(),
        last_name: "Tester".to_string(),
        company_name: format!("{first_name} Trading"),
        created_at: Utc::now(),
    }
}

pub(crate) fn seed_user(db: &Database, kind: UserKind, first_name: &str) -> UserRef {
    let p = profile(kind, first_name);
    db.upsert_user(&p).expect("seed user");
    p.user_ref()
}
