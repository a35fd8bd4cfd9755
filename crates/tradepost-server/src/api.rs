use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use tradepost_shared::{ResolvedMessage, UserRef, UserSummary};
use tradepost_store::{Channel, ContactOption, DmContact, Message, UserProfile};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::fanout::FanOut;
use crate::identity::{bearer_token, Caller, DirectIdResolver, IdentityResolver};
use crate::presence::PresenceRegistry;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::store::Store;
use crate::uploads::{UploadStore, PUBLIC_PREFIX};
use crate::ws::ws_handler;

/// Room for multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub presence: PresenceRegistry,
    pub fanout: FanOut,
    pub uploads: Arc<UploadStore>,
    pub identity: Arc<dyn IdentityResolver>,
    pub rate_limiter: RateLimiter<IpAddr>,
    pub event_limiter: RateLimiter<UserRef>,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig, store: Store, uploads: UploadStore) -> Self {
        let presence = PresenceRegistry::new();
        Self {
            fanout: FanOut::new(store.clone(), presence.clone()),
            store,
            presence,
            uploads: Arc::new(uploads),
            identity: Arc::new(DirectIdResolver),
            rate_limiter: RateLimiter::default(),
            event_limiter: RateLimiter::new(config.event_rate, config.event_burst),
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(state.config.cors_origin.as_deref());
    let uploads = ServeDir::new(state.uploads.base_path());

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws_handler))
        .route("/api/messages/get-messages", post(get_messages))
        .route("/api/messages/upload-file", post(upload_file))
        .route("/api/channel/create-channel", post(create_channel))
        .route("/api/channel/get-user-channels", get(get_user_channels))
        .route(
            "/api/channel/get-channel-messages/:channel_id",
            get(get_channel_messages),
        )
        .route("/api/contacts/search", post(search_contacts))
        .route("/api/contacts/get-contacts-for-dm", get(get_contacts_for_dm))
        .route("/api/contacts/get-all-contacts", get(get_all_contacts))
        .route("/admin/status", get(admin_status))
        .route("/admin/users", post(admin_upsert_user))
        .nest_service(&format!("/{PUBLIC_PREFIX}"), uploads)
        .layer(DefaultBodyLimit::max(
            state.config.max_upload_size + MULTIPART_OVERHEAD,
        ))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new().allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

    // Cookie auth needs an explicit origin; a wildcard cannot carry credentials.
    match origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => base
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        Some(Err(_)) => {
            warn!("Invalid CORS_ORIGIN, allowing any origin");
            base.allow_origin(Any).allow_headers(Any)
        }
        None => base.allow_origin(Any).allow_headers(Any),
    }
}

// ─── Responses and requests ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
}

#[derive(Serialize)]
struct AdminStatusResponse {
    name: String,
    version: &'static str,
    online_users: usize,
    uptime_secs: u64,
}

#[derive(Deserialize)]
struct GetMessagesRequest {
    id: Option<UserRef>,
}

#[derive(Serialize)]
struct MessagesResponse<T> {
    messages: Vec<T>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    file_path: String,
}

#[derive(Deserialize)]
struct CreateChannelRequest {
    name: Option<String>,
    #[serde(default)]
    members: Vec<UserRef>,
}

#[derive(Serialize)]
struct ChannelResponse {
    channel: Channel,
}

#[derive(Serialize)]
struct ChannelsResponse {
    channels: Vec<Channel>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    search_term: Option<String>,
}

#[derive(Serialize)]
struct ContactsResponse<T> {
    contacts: Vec<T>,
}

#[derive(Serialize)]
struct UserResponse {
    user: UserSummary,
}

// ─── Public endpoints ───

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Messages ───

async fn get_messages(
    Caller(caller): Caller,
    State(state): State<AppState>,
    Json(req): Json<GetMessagesRequest>,
) -> Result<Json<MessagesResponse<Message>>, ServerError> {
    let other = req
        .id
        .ok_or_else(|| ServerError::BadRequest("Both user IDs are required".into()))?;

    let messages = state
        .store
        .call(move |db| db.find_conversation(caller, other))
        .await?;

    Ok(Json(MessagesResponse { messages }))
}

async fn upload_file(
    Caller(caller): Caller,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;

        let file_path = state.uploads.store_file(&file_name, &data).await?;

        info!(user = %caller, path = %file_path, size = data.len(), "File uploaded");
        return Ok(Json(UploadResponse { file_path }));
    }

    Err(ServerError::BadRequest("File is required".to_string()))
}

// ─── Channels ───

async fn create_channel(
    Caller(caller): Caller,
    State(state): State<AppState>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<(StatusCode, Json<ChannelResponse>), ServerError> {
    let name = req.name.unwrap_or_default();
    let members = req.members;

    let channel = state
        .store
        .call(move |db| db.create_channel(&name, caller, &members))
        .await?;

    Ok((StatusCode::CREATED, Json(ChannelResponse { channel })))
}

async fn get_user_channels(
    Caller(caller): Caller,
    State(state): State<AppState>,
) -> Result<Json<ChannelsResponse>, ServerError> {
    let channels = state
        .store
        .call(move |db| db.find_channels_for_user(caller))
        .await?;
    Ok(Json(ChannelsResponse { channels }))
}

async fn get_channel_messages(
    Caller(_caller): Caller,
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
) -> Result<Json<MessagesResponse<ResolvedMessage>>, ServerError> {
    let messages = state
        .store
        .call(move |db| db.channel_messages(channel_id))
        .await?;
    Ok(Json(MessagesResponse { messages }))
}

// ─── Contacts ───

async fn search_contacts(
    Caller(caller): Caller,
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<ContactsResponse<UserSummary>>, ServerError> {
    let term = req
        .search_term
        .ok_or_else(|| ServerError::BadRequest("searchTerm is required".into()))?;

    let contacts = state
        .store
        .call(move |db| db.search_contacts(caller, &term))
        .await?;
    Ok(Json(ContactsResponse { contacts }))
}

async fn get_contacts_for_dm(
    Caller(caller): Caller,
    State(state): State<AppState>,
) -> Result<Json<ContactsResponse<DmContact>>, ServerError> {
    let contacts = state.store.call(move |db| db.dm_contacts(caller)).await?;
    Ok(Json(ContactsResponse { contacts }))
}

async fn get_all_contacts(
    Caller(caller): Caller,
    State(state): State<AppState>,
) -> Result<Json<ContactsResponse<ContactOption>>, ServerError> {
    let contacts = state.store.call(move |db| db.all_contacts(caller)).await?;
    Ok(Json(ContactsResponse { contacts }))
}

// ─── Admin ───

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let token = bearer_token(headers).unwrap_or("");

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

async fn admin_status(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<AdminStatusResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    Ok(Json(AdminStatusResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        online_users: state.presence.online_count().await,
        uptime_secs: state.started_at.elapsed().as_secs(),
    }))
}

/// Directory sync from the registration workflow.
async fn admin_upsert_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(profile): Json<UserProfile>,
) -> Result<Json<UserResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let user = profile.summary();
    state.store.call(move |db| db.upsert_user(&profile)).await?;

    info!(user = %user.user_ref(), "Directory entry updated");
    Ok(Json(UserResponse { user }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{profile, seed_user, test_state, ADMIN_TOKEN};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use tradepost_shared::{MessageType, UserKind};

    fn bearer(user: UserRef) -> String {
        format!("Bearer {user}")
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }

    fn post_json(uri: &str, auth: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::AUTHORIZATION, auth)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_with(uri: &str, auth: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::AUTHORIZATION, auth)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _dir) = test_state().await;
        let app = build_router(state);

        let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_api_requires_identity() {
        let (state, _dir) = test_state().await;
        let app = build_router(state);

        let req = Request::get("/api/channel/get-user-channels")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, _) = send(&app, get_with("/api/contacts/get-all-contacts", "Bearer nope")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_get_messages_uses_cookie_and_validates_id() {
        let (state, _dir) = test_state().await;
        let alice = seed_user(&state.store, UserKind::Reseller, "Alice").await;
        let bob = seed_user(&state.store, UserKind::Supplier, "Bob").await;
        state
            .fanout
            .send_direct(bob, alice, MessageType::Text, Some("hello".into()), None)
            .await
            .unwrap();
        let app = build_router(state);

        let req = Request::post("/api/messages/get-messages")
            .header(header::COOKIE, format!("jwt={alice}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "id": bob.to_string() }).to_string()))
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["content"], "hello");

        let (status, body) =
            send(&app, post_json("/api/messages/get-messages", &bearer(alice), json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("required"));
    }

    #[tokio::test]
    async fn test_channel_lifecycle() {
        let (state, _dir) = test_state().await;
        let admin = seed_user(&state.store, UserKind::Supplier, "Admin").await;
        let member = seed_user(&state.store, UserKind::Reseller, "Member").await;
        let app = build_router(state.clone());

        let (status, body) = send(
            &app,
            post_json(
                "/api/channel/create-channel",
                &bearer(admin),
                json!({ "name": "ops", "members": [member] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["channel"]["name"], "ops");
        let channel_id: Uuid = body["channel"]["id"].as_str().unwrap().parse().unwrap();

        state
            .fanout
            .send_channel(channel_id, member, MessageType::Text, Some("hi".into()), None)
            .await
            .unwrap();

        let (status, body) =
            send(&app, get_with("/api/channel/get-user-channels", &bearer(member))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["channels"][0]["id"], channel_id.to_string());

        let uri = format!("/api/channel/get-channel-messages/{channel_id}");
        let (status, body) = send(&app, get_with(&uri, &bearer(admin))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"][0]["sender"]["firstName"], "Member");
        assert!(body["messages"][0]["recipient"].is_null());

        let uri = format!("/api/channel/get-channel-messages/{}", Uuid::new_v4());
        let (status, _) = send(&app, get_with(&uri, &bearer(admin))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_channel_rejects_unknown_members() {
        let (state, _dir) = test_state().await;
        let admin = seed_user(&state.store, UserKind::Supplier, "Admin").await;
        let app = build_router(state);

        let stranger = UserRef::reseller(Uuid::new_v4());
        let (status, body) = send(
            &app,
            post_json(
                "/api/channel/create-channel",
                &bearer(admin),
                json!({ "name": "ops", "members": [stranger] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_contacts_endpoints() {
        let (state, _dir) = test_state().await;
        let me = seed_user(&state.store, UserKind::Reseller, "Me").await;
        let ada = seed_user(&state.store, UserKind::Supplier, "Ada").await;
        seed_user(&state.store, UserKind::Supplier, "Grace").await;
        state
            .fanout
            .send_direct(me, ada, MessageType::Text, Some("hi".into()), None)
            .await
            .unwrap();
        let app = build_router(state);

        let (status, body) = send(
            &app,
            post_json("/api/contacts/search", &bearer(me), json!({ "searchTerm": "ada" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["contacts"].as_array().unwrap().len(), 1);
        assert_eq!(body["contacts"][0]["email"], "ada@example.com");

        let (status, _) =
            send(&app, post_json("/api/contacts/search", &bearer(me), json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = send(&app, get_with("/api/contacts/get-contacts-for-dm", &bearer(me))).await;
        assert_eq!(body["contacts"].as_array().unwrap().len(), 1);
        assert!(body["contacts"][0]["lastMessageTime"].is_string());

        let (_, body) = send(&app, get_with("/api/contacts/get-all-contacts", &bearer(me))).await;
        let contacts = body["contacts"].as_array().unwrap();
        assert_eq!(contacts.len(), 2);
        assert!(contacts.iter().any(|c| c["label"] == "Grace Tester"));
    }

    #[tokio::test]
    async fn test_upload_file() {
        let (state, dir) = test_state().await;
        let me = seed_user(&state.store, UserKind::Reseller, "Me").await;
        let app = build_router(state);

        let boundary = "tradepost-boundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"prices.csv\"\r\n\
             Content-Type: text/csv\r\n\r\n\
             sku,price\r\n\
             --{boundary}--\r\n"
        );
        let req = Request::post("/api/messages/upload-file")
            .header(header::AUTHORIZATION, bearer(me))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();

        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        let path = body["filePath"].as_str().unwrap();
        assert!(path.starts_with("uploads/files/"));
        assert!(path.ends_with("/prices.csv"));

        let on_disk = dir.path().join(path.trim_start_matches("uploads/"));
        assert_eq!(std::fs::read_to_string(on_disk).unwrap(), "sku,price");

        let (status, _) = send(&app, get_with(&format!("/{path}"), &bearer(me))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_endpoints() {
        let (state, _dir) = test_state().await;
        let app = build_router(state.clone());

        let (status, _) = send(&app, get_with("/admin/status", "Bearer wrong")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin_auth = format!("Bearer {ADMIN_TOKEN}");
        let new_user = profile(UserKind::Supplier, "Linus");
        let user_ref = new_user.user_ref();
        let (status, body) = send(
            &app,
            post_json(
                "/admin/users",
                &admin_auth,
                serde_json::to_value(&new_user).unwrap(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["firstName"], "Linus");
        assert!(state
            .store
            .call(move |db| db.user_exists(user_ref))
            .await
            .unwrap());

        let (status, _) = send(
            &app,
            post_json("/admin/users", "Bearer wrong", serde_json::to_value(&new_user).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&app, get_with("/admin/status", &admin_auth)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["online_users"], 0);
    }
}
