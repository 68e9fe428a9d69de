//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::app::{AppState, SessionInfo};
use crate::game::SignalEnvelope;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::{ClientSignal, CoinFace, MatchReport, MatchStatus, Team};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CLIENT_ORIGIN may hold several origins, comma-separated
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/report", get(report_handler))
        .route("/admin/sessions", get(admin_sessions_handler))
        .route("/admin/start", post(admin_start_handler))
        .route("/admin/reset", post(admin_reset_handler))
        .route("/admin/ball-reset", post(admin_ball_reset_handler))
        .route("/admin/coin-toss", post(admin_coin_toss_handler))
        .route("/admin/bot", post(admin_bot_handler))
        .route("/admin/bot/retire", post(admin_bot_retire_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Queue a signal on the engine as if an operator sent it
async fn inject_signal(state: &AppState, signal: ClientSignal) -> Result<(), AppError> {
    state
        .engine
        .signal_tx
        .send(SignalEnvelope::admin(signal))
        .await
        .map_err(|_| AppError::Internal("Engine is not running".to_string()))
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    match_status: MatchStatus,
    sessions: usize,
    roster: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        match_status: state.engine.status(),
        sessions: state.sessions.len(),
        roster: state.engine.roster_count(),
    })
}

// ============================================================================
// Match report endpoint
// ============================================================================

async fn report_handler(State(state): State<AppState>) -> Result<Json<MatchReport>, AppError> {
    let report = state.last_report.read().clone();
    report
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No finished match yet".to_string()))
}

// ============================================================================
// Admin endpoints
// ============================================================================

#[derive(Serialize)]
struct SessionRow {
    session_id: Uuid,
    #[serde(flatten)]
    info: SessionInfo,
}

async fn admin_sessions_handler(State(state): State<AppState>) -> Json<Vec<SessionRow>> {
    let mut rows: Vec<SessionRow> = state
        .sessions
        .iter()
        .map(|entry| SessionRow {
            session_id: *entry.key(),
            info: entry.value().clone(),
        })
        .collect();
    rows.sort_by_key(|row| row.info.connected_at);
    Json(rows)
}

#[derive(Serialize)]
struct AdminResponse {
    status: &'static str,
    message: String,
}

fn accepted(message: &str) -> Json<AdminResponse> {
    Json(AdminResponse {
        status: "accepted",
        message: message.to_string(),
    })
}

async fn admin_start_handler(
    State(state): State<AppState>,
) -> Result<Json<AdminResponse>, AppError> {
    inject_signal(&state, ClientSignal::StartMatch).await?;
    Ok(accepted("Start requested"))
}

async fn admin_reset_handler(
    State(state): State<AppState>,
) -> Result<Json<AdminResponse>, AppError> {
    inject_signal(&state, ClientSignal::ResetMatch).await?;
    Ok(accepted("Reset requested"))
}

#[derive(Deserialize)]
struct BallResetRequest {
    reason: Option<String>,
}

async fn admin_ball_reset_handler(
    State(state): State<AppState>,
    body: Option<Json<BallResetRequest>>,
) -> Result<Json<AdminResponse>, AppError> {
    let reason = body.and_then(|Json(req)| req.reason);
    inject_signal(&state, ClientSignal::BallReset { reason }).await?;
    Ok(accepted("Ball reset requested"))
}

#[derive(Deserialize)]
struct CoinTossRequest {
    choice: Option<CoinFace>,
}

async fn admin_coin_toss_handler(
    State(state): State<AppState>,
    body: Option<Json<CoinTossRequest>>,
) -> Result<Json<AdminResponse>, AppError> {
    let choice = body.and_then(|Json(req)| req.choice);
    inject_signal(&state, ClientSignal::CoinToss { choice }).await?;
    Ok(accepted("Coin toss requested"))
}

#[derive(Deserialize)]
struct RegisterBotRequest {
    name: String,
    team: Team,
}

async fn admin_bot_handler(
    State(state): State<AppState>,
    Json(req): Json<RegisterBotRequest>,
) -> Result<Json<AdminResponse>, AppError> {
    if req.name.trim().is_empty() {
        return Err(AppError::BadRequest("Bot name cannot be empty".to_string()));
    }

    inject_signal(
        &state,
        ClientSignal::RegisterAutomated {
            name: req.name,
            team: req.team,
        },
    )
    .await?;
    Ok(accepted("Bot registration requested"))
}

#[derive(Deserialize)]
struct RetireBotRequest {
    actor_id: Uuid,
}

async fn admin_bot_retire_handler(
    State(state): State<AppState>,
    Json(req): Json<RetireBotRequest>,
) -> Result<Json<AdminResponse>, AppError> {
    inject_signal(
        &state,
        ClientSignal::RetireActor {
            actor_id: req.actor_id,
        },
    )
    .await?;
    Ok(accepted("Bot retirement requested"))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
