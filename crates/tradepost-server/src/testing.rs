//! Fixtures shared by the server's unit tests.

use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

use tradepost_shared::{UserKind, UserRef};
use tradepost_store::{Database, UserProfile};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::store::Store;
use crate::uploads::UploadStore;

pub(crate) const ADMIN_TOKEN: &str = "test-admin-token";

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

pub(crate) async fn seed_user(store: &Store, kind: UserKind, first_name: &str) -> UserRef {
    let p = profile(kind, first_name);
    let user = p.user_ref();
    store
        .call(move |db| db.upsert_user(&p))
        .await
        .expect("seed user");
    user
}

pub(crate) fn memory_store() -> Store {
    Store::new(Database::open_in_memory().expect("in-memory database"))
}

/// App state over an in-memory database and a temporary upload directory.
pub(crate) async fn test_state() -> (AppState, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let config = ServerConfig {
        upload_dir: dir.path().to_path_buf(),
        admin_token: Some(ADMIN_TOKEN.to_string()),
        max_upload_size: 1024,
        ..ServerConfig::default()
    };
    let uploads = UploadStore::new(config.upload_dir.clone(), config.max_upload_size)
        .await
        .expect("upload store");
    let state = AppState::new(config, memory_store(), uploads);
    (state, dir)
}
