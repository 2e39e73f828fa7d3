// src/web/mod.rs - JSON dashboard API over the moderation store

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::bot::moderation::ModerationEngine;
use crate::bot::rules::ModerationStep;
use crate::platforms::BanUntil;
use crate::store::{Stores, ViolationFilter};
use crate::types::{
    ModerationError, ModerationSettings, StorageError, UserRecord, Violation, ViolationKind, MAX_TEMP_BAN_HOURS,
};

const DEFAULT_LISTING_LIMIT: usize = 50;
const MAX_LISTING_LIMIT: usize = 500;

#[derive(Clone)]
pub struct DashboardState {
    pub engine: Arc<ModerationEngine>,
    pub stores: Stores,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(engine: Arc<ModerationEngine>, stores: Stores) -> Self {
        Self {
            engine,
            stores,
            started_at: Utc::now(),
        }
    }
}

pub struct WebDashboard {
    state: DashboardState,
}

impl WebDashboard {
    pub fn new(state: DashboardState) -> Self {
        Self { state }
    }

    pub fn get_state(&self) -> DashboardState {
        self.state.clone()
    }

    pub async fn start_server(&self, port: u16) -> anyhow::Result<()> {
        let app = self.create_routes();

        info!("Binding to 0.0.0.0:{}...", port);
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
        info!("Dashboard API available at http://localhost:{}/api/status", port);

        axum::serve(listener, app).await?;
        Ok(())
    }

    pub fn create_routes(&self) -> Router {
        Router::new()
            .route("/api/status", get(get_status))
            .route("/api/moderation/violations", get(list_violations))
            .route("/api/moderation/violations/:id", delete(deactivate_violation))
            .route("/api/moderation/bans", get(list_bans))
            .route("/api/moderation/ban", post(ban_user))
            .route("/api/moderation/unban", post(unban_user))
            .route("/api/moderation/settings/:chat_id", get(get_settings).put(update_settings))
            .route("/api/forbidden-words", get(list_forbidden_words).post(add_forbidden_word))
            .route("/api/forbidden-words/:id", put(update_forbidden_word).delete(remove_forbidden_word))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }
}

/// Error body in the `{"success": false, "error": ...}` shape
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        let status = match &e {
            StorageError::NotFound(_) => StatusCode::NOT_FOUND,
            StorageError::Conflict(_) => StatusCode::CONFLICT,
            StorageError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            StorageError::Io(_) | StorageError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.message
        }));
        (self.status, body).into_response()
    }
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

fn success(data: impl serde::Serialize) -> ApiResult {
    let data = serde_json::to_value(data).map_err(|e| ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: e.to_string(),
    })?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": data
    })))
}

async fn get_status(State(state): State<DashboardState>) -> ApiResult {
    let active = state
        .stores
        .ledger
        .query(&ViolationFilter {
            active_only: true,
            ..ViolationFilter::default()
        })
        .await?
        .len();

    success(serde_json::json!({
        "status": "running",
        "timestamp": Utc::now(),
        "started_at": state.started_at,
        "version": env!("CARGO_PKG_VERSION"),
        "platform": state.engine.gateway().platform_name(),
        "active_violations": active
    }))
}

#[derive(Debug, Deserialize)]
pub struct ViolationQuery {
    pub chat_id: Option<i64>,
    pub limit: Option<usize>,
}

async fn list_violations(State(state): State<DashboardState>, Query(query): Query<ViolationQuery>) -> ApiResult {
    let violations = state
        .stores
        .ledger
        .query(&ViolationFilter {
            chat_id: query.chat_id,
            active_only: true,
            limit: Some(query.limit.unwrap_or(DEFAULT_LISTING_LIMIT).min(MAX_LISTING_LIMIT)),
            ..ViolationFilter::default()
        })
        .await?;
    success(with_users(&state, violations).await)
}

async fn list_bans(State(state): State<DashboardState>) -> ApiResult {
    let bans = state
        .stores
        .ledger
        .query(&ViolationFilter {
            kinds: vec![ViolationKind::TempBan, ViolationKind::PermanentBan],
            active_only: true,
            ..ViolationFilter::default()
        })
        .await?;
    success(with_users(&state, bans).await)
}

/// Ledger row joined with the sanctioned user's chat identity
#[derive(Debug, Serialize)]
pub struct ViolationView {
    #[serde(flatten)]
    pub violation: Violation,
    pub chat_user_id: Option<i64>,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

async fn with_users(state: &DashboardState, violations: Vec<Violation>) -> Vec<ViolationView> {
    let mut users: HashMap<i64, Option<UserRecord>> = HashMap::new();
    let mut views = Vec::with_capacity(violations.len());

    for violation in violations {
        if !users.contains_key(&violation.user_id) {
            let user = ModerationStep::SenderLookup
                .degrade(state.stores.users.find_by_id(violation.user_id).await, || None);
            users.insert(violation.user_id, user);
        }
        let user = users.get(&violation.user_id).and_then(Option::as_ref);

        views.push(ViolationView {
            chat_user_id: user.map(|u| u.chat_user_id),
            username: user.and_then(|u| u.username.clone()),
            first_name: user.map(|u| u.first_name.clone()),
            violation,
        });
    }
    views
}

async fn deactivate_violation(State(state): State<DashboardState>, Path(id): Path<Uuid>) -> ApiResult {
    state.stores.ledger.deactivate(id).await?;
    info!("Violation {} deactivated from dashboard", id);
    success(serde_json::json!({ "id": id }))
}

#[derive(Debug, Deserialize)]
pub struct BanRequest {
    pub chat_id: i64,
    /// Chat platform user id
    pub user_id: i64,
    #[serde(default)]
    pub permanent: bool,
    /// Ban length for temporary bans
    pub hours: Option<u32>,
}

async fn ban_user(State(state): State<DashboardState>, Json(request): Json<BanRequest>) -> ApiResult {
    let until = if request.permanent {
        BanUntil::Never
    } else {
        let hours = match request.hours {
            Some(hours) if (1..=MAX_TEMP_BAN_HOURS).contains(&hours) => hours,
            Some(hours) => {
                return Err(ApiError::bad_request(format!(
                    "hours must be between 1 and {}, got {}",
                    MAX_TEMP_BAN_HOURS, hours
                )))
            }
            None => return Err(ApiError::bad_request("hours is required for a temporary ban")),
        };
        let expires_at = Utc::now()
            .checked_add_signed(Duration::hours(i64::from(hours)))
            .ok_or_else(|| ApiError::bad_request(format!("ban of {} hours is out of range", hours)))?;
        BanUntil::Until(expires_at)
    };

    if let Err(e) = state.engine.impose_ban(request.chat_id, request.user_id, until).await {
        warn!(
            "Dashboard ban of user {} in chat {} failed: {}",
            request.user_id, request.chat_id, e
        );
        let status = match e {
            ModerationError::Transport(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        return Err(ApiError {
            status,
            message: e.to_string(),
        });
    }

    info!("Dashboard ban of user {} in chat {}", request.user_id, request.chat_id);
    let until = match until {
        BanUntil::Never => None,
        BanUntil::Until(at) => Some(at),
    };
    success(serde_json::json!({
        "chat_id": request.chat_id,
        "user_id": request.user_id,
        "permanent": request.permanent,
        "until": until
    }))
}

#[derive(Debug, Deserialize)]
pub struct UnbanRequest {
    pub chat_id: i64,
    /// Chat platform user id
    pub user_id: i64,
}

async fn unban_user(State(state): State<DashboardState>, Json(request): Json<UnbanRequest>) -> ApiResult {
    let cleared = state
        .engine
        .clear_violations(request.chat_id, request.user_id)
        .await
        .map_err(|e| ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: e.to_string(),
        })?;

    let unbanned = ModerationStep::Enforcement.degrade(
        state
            .engine
            .gateway()
            .unban_member(request.chat_id, request.user_id)
            .await
            .map(|_| true)
            .map_err(|e| format!("unban user {} in chat {}: {}", request.user_id, request.chat_id, e)),
        || false,
    );

    info!(
        "Dashboard unban of user {} in chat {}: {} violations cleared",
        request.user_id, request.chat_id, cleared
    );
    success(serde_json::json!({
        "cleared": cleared,
        "unbanned": unbanned
    }))
}

async fn get_settings(State(state): State<DashboardState>, Path(chat_id): Path<i64>) -> ApiResult {
    success(state.engine.rules().settings_for(chat_id).await)
}

async fn update_settings(
    State(state): State<DashboardState>,
    Path(chat_id): Path<i64>,
    Json(settings): Json<ModerationSettings>,
) -> ApiResult {
    if let Err(e) = settings.validate() {
        warn!("Rejected settings for chat {}: {}", chat_id, e);
        return Err(ApiError::bad_request(e.to_string()));
    }

    state.stores.rules.upsert_settings(chat_id, settings.clone()).await?;
    info!("Updated moderation settings for chat {}", chat_id);
    success(settings)
}

async fn list_forbidden_words(State(state): State<DashboardState>) -> ApiResult {
    success(state.stores.rules.list_forbidden_words().await?)
}

#[derive(Debug, Deserialize)]
pub struct WordRequest {
    pub word: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

async fn add_forbidden_word(State(state): State<DashboardState>, Json(request): Json<WordRequest>) -> ApiResult {
    let mut word = state.stores.rules.add_forbidden_word(&request.word).await?;
    if !request.active {
        word = state.stores.rules.update_forbidden_word(word.id, &word.word, false).await?;
    }
    info!("Forbidden word '{}' added", word.word);
    success(word)
}

async fn update_forbidden_word(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
    Json(request): Json<WordRequest>,
) -> ApiResult {
    success(
        state
            .stores
            .rules
            .update_forbidden_word(id, &request.word, request.active)
            .await?,
    )
}

async fn remove_forbidden_word(State(state): State<DashboardState>, Path(id): Path<Uuid>) -> ApiResult {
    state.stores.rules.remove_forbidden_word(id).await?;
    success(serde_json::json!({ "id": id }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::moderation::EngineOptions;
    use crate::platforms::console::ConsoleGateway;
    use crate::platforms::EnforcementGateway;
    use crate::store::{MemoryStore, RuleStore};
    use crate::types::{ChatMessage, ChatType, EnforcementError};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Gateway that keeps issued bans and can refuse them
    #[derive(Default)]
    struct BanLog {
        bans: Mutex<Vec<(i64, i64, BanUntil)>>,
        refuse: AtomicBool,
    }

    #[async_trait]
    impl EnforcementGateway for BanLog {
        async fn ban_member(&self, chat_id: i64, user_id: i64, until: BanUntil) -> Result<(), EnforcementError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(EnforcementError::Rejected {
                    operation: "ban_member",
                    reason: "not enough rights".to_string(),
                });
            }
            self.bans.lock().unwrap().push((chat_id, user_id, until));
            Ok(())
        }

        async fn unban_member(&self, _chat_id: i64, _user_id: i64) -> Result<(), EnforcementError> {
            Ok(())
        }

        async fn delete_message(&self, _chat_id: i64, _message_id: i64) -> Result<(), EnforcementError> {
            Ok(())
        }

        async fn send_message(&self, _chat_id: i64, _text: &str, _formatted: bool) -> Result<(), EnforcementError> {
            Ok(())
        }

        fn platform_name(&self) -> &str {
            "ban-log"
        }
    }

    fn dashboard_with(gateway: Arc<dyn EnforcementGateway>) -> (Router, DashboardState) {
        let stores = Stores::from_memory(MemoryStore::new());
        let engine = Arc::new(ModerationEngine::new(stores.clone(), gateway, EngineOptions::default()));
        let dashboard = WebDashboard::new(DashboardState::new(engine, stores));
        (dashboard.create_routes(), dashboard.get_state())
    }

    fn dashboard() -> (Router, DashboardState) {
        dashboard_with(Arc::new(ConsoleGateway::new()))
    }

    fn casino_message(message_id: i64) -> ChatMessage {
        ChatMessage {
            chat_id: -100,
            chat_type: ChatType::Group,
            message_id,
            sender_id: 42,
            sender_username: Some("mallory".to_string()),
            sender_first_name: "Mallory".to_string(),
            content: "casino link".to_string(),
            timestamp: Utc::now(),
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_status() {
        let (app, _) = dashboard();
        let response = app
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["platform"], "console");
        assert_eq!(body["data"]["active_violations"], 0);
    }

    #[tokio::test]
    async fn test_settings_validation() {
        let (app, _) = dashboard();

        let invalid = serde_json::json!({
            "auto_ban_enabled": true,
            "warning_threshold": 5,
            "temp_ban_duration_hours": 24,
            "permanent_ban_threshold": 5
        });
        let response = app
            .clone()
            .oneshot(json_request("PUT", "/api/moderation/settings/-100", invalid))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["success"], false);

        let valid = serde_json::json!({
            "auto_ban_enabled": false,
            "warning_threshold": 2,
            "temp_ban_duration_hours": 6,
            "permanent_ban_threshold": 4
        });
        let response = app
            .clone()
            .oneshot(json_request("PUT", "/api/moderation/settings/-100", valid))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/api/moderation/settings/-100").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"]["warning_threshold"], 2);
        assert_eq!(body["data"]["auto_ban_enabled"], false);
    }

    #[tokio::test]
    async fn test_forbidden_word_lifecycle() {
        let (app, _) = dashboard();

        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/forbidden-words", serde_json::json!({ "word": " Casino " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created = body_json(response).await;
        assert_eq!(created["data"]["word"], "casino");
        let id = created["data"]["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/forbidden-words", serde_json::json!({ "word": "casino" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/forbidden-words/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/api/forbidden-words").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["data"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_bans_and_unban() {
        let (app, state) = dashboard();
        state.stores.rules.add_forbidden_word("casino").await.unwrap();

        for message_id in 0..3 {
            state.engine.evaluate(&casino_message(message_id)).await.unwrap();
        }

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/moderation/bans").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bans = body_json(response).await;
        assert_eq!(bans["data"].as_array().unwrap().len(), 1);
        assert_eq!(bans["data"][0]["kind"], "temp_ban");
        assert_eq!(bans["data"][0]["username"], "mallory");
        assert_eq!(bans["data"][0]["chat_user_id"], 42);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/moderation/unban",
                serde_json::json!({ "chat_id": -100, "user_id": 42 }),
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"]["cleared"], 3);
        assert_eq!(body["data"]["unbanned"], true);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/moderation/violations?chat_id=-100")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["data"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_unknown_violation_is_not_found() {
        let (app, _) = dashboard();
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/moderation/violations/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_listing_names_the_sanctioned_user() {
        let (app, state) = dashboard();
        state.stores.rules.add_forbidden_word("casino").await.unwrap();
        state.engine.evaluate(&casino_message(1)).await.unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/moderation/violations?chat_id=-100")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        let row = &body["data"][0];
        assert_eq!(row["kind"], "warning");
        assert_eq!(row["username"], "mallory");
        assert_eq!(row["first_name"], "Mallory");
        assert_eq!(row["chat_user_id"], 42);
        assert!(row["user_id"].is_i64());
    }

    #[tokio::test]
    async fn test_manual_ban() {
        let gateway = Arc::new(BanLog::default());
        let (app, _) = dashboard_with(gateway.clone());

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/moderation/ban",
                serde_json::json!({ "chat_id": -100, "user_id": 42, "permanent": true }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert!(body["data"]["until"].is_null());

        let before = Utc::now();
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/moderation/ban",
                serde_json::json!({ "chat_id": -100, "user_id": 43, "hours": 12 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bans = gateway.bans.lock().unwrap().clone();
        assert_eq!(bans.len(), 2);
        assert_eq!(bans[0], (-100, 42, BanUntil::Never));
        match bans[1] {
            (-100, 43, BanUntil::Until(at)) => {
                assert!(at >= before + Duration::hours(12));
                assert!(at <= Utc::now() + Duration::hours(12));
            }
            other => panic!("unexpected ban {:?}", other),
        }

        for bad in [
            serde_json::json!({ "chat_id": -100, "user_id": 44 }),
            serde_json::json!({ "chat_id": -100, "user_id": 44, "hours": 0 }),
            serde_json::json!({ "chat_id": -100, "user_id": 44, "hours": u32::MAX }),
        ] {
            let response = app
                .clone()
                .oneshot(json_request("POST", "/api/moderation/ban", bad))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
        assert_eq!(gateway.bans.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_refused_manual_ban_is_an_error() {
        let gateway = Arc::new(BanLog::default());
        gateway.refuse.store(true, Ordering::SeqCst);
        let (app, _) = dashboard_with(gateway.clone());

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/moderation/ban",
                serde_json::json!({ "chat_id": -100, "user_id": 42, "permanent": true }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(response).await["success"], false);
        assert!(gateway.bans.lock().unwrap().is_empty());
    }
}
