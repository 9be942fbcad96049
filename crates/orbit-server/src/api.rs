use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, Method, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use orbit_shared::constants::MAX_FRAME_SIZE;
use orbit_shared::types::{CommunityId, UserId};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, EventRateLimiter, IpRateLimiter};
use crate::realtime::Realtime;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub realtime: Realtime,
    pub rate_limiter: IpRateLimiter,
    pub event_limiter: EventRateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    // Public routes are throttled per client IP.  The internal routes are
    // token-guarded and called by a few collaborators sharing one address.
    let public = Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws::ws_handler))
        .route_layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ));

    let internal = Router::new()
        .route("/internal/users/{user_id}/events", post(internal_user_event))
        .route(
            "/internal/communities/{community_id}/events",
            post(internal_community_event),
        );

    public
        .merge(internal)
        .layer(DefaultBodyLimit::max(MAX_FRAME_SIZE))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    online_users: usize,
    active_calls: usize,
}

/// Body of both internal delivery endpoints.  `data` is forwarded verbatim.
#[derive(Deserialize)]
struct InternalEvent {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Serialize)]
struct AcceptedResponse {
    accepted: bool,
}

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
        online_users: state.realtime.online_users().await,
        active_calls: state.realtime.active_calls().await,
    })
}

fn verify_internal_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.internal_token else {
        return Err(ServerError::Forbidden(
            "Internal API is disabled (no INTERNAL_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid internal token".into()));
    }

    Ok(())
}

fn validate_event(req: &InternalEvent) -> Result<(), ServerError> {
    if req.event.trim().is_empty() {
        return Err(ServerError::BadRequest("Event name must not be empty".into()));
    }
    Ok(())
}

/// A collaborator committed a record for one user; push it live if the
/// user is online.  Accepted whether or not anyone received it.
async fn internal_user_event(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<InternalEvent>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ServerError> {
    verify_internal_token(&headers, &state.config)?;
    validate_event(&req)?;

    let user = UserId::new(user_id);
    let outcome = state
        .realtime
        .deliver_to_user(&user, &req.event, req.data)
        .await;
    debug!(to = %user.short(), event = %req.event, outcome = ?outcome, "Internal delivery");

    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { accepted: true })))
}

/// Fan-out runs in the background; the caller never waits on the roster
/// lookup or learns who received the event.
async fn internal_community_event(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(community_id): Path<String>,
    Json(req): Json<InternalEvent>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ServerError> {
    verify_internal_token(&headers, &state.config)?;
    validate_event(&req)?;

    let community = CommunityId::new(community_id);
    let realtime = state.realtime.clone();
    tokio::spawn(async move {
        realtime
            .broadcast_to_community(&community, &req.event, req.data)
            .await;
    });

    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { accepted: true })))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_listener(state, listener).await
}

pub async fn serve_listener(state: AppState, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %listener.local_addr()?, "Starting HTTP + WebSocket server");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
