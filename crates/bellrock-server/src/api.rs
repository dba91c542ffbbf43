//! HTTP ingest surface.
//!
//! A thin JSON mapping over [`BellrockServer`]; parsing aside, handlers do
//! no work of their own. Timestamps travel as epoch milliseconds, UIDs,
//! AIDs and keys as hex strings.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::Method,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use bellrock_shared::celltower::{CellTower, CoarseLocation};
use bellrock_shared::{Aid, Uid};
use bellrock_store::{Location, Observation, ObservationBatch, UserLocation};

use crate::error::ServerError;
use crate::server::BellrockServer;

#[derive(Clone)]
pub struct AppState {
    pub server: Arc<BellrockServer>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/users", post(register_user))
        .route("/users/batch", post(register_users))
        .route("/users/{uid}", delete(delete_user))
        .route("/users/{uid}/renew-key", post(renew_key))
        .route("/users/{uid}/peers", get(list_peers))
        .route("/users/{uid}/locations", post(add_locations))
        .route("/users/{uid}/observations", get(list_observations))
        .route("/peers", post(add_peer).delete(delete_peer))
        .route("/observations", post(submit_observations))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    users: usize,
}

#[derive(Serialize)]
struct RegisteredUser {
    uid: String,
    key: String,
}

#[derive(Deserialize)]
struct BatchRegisterRequest {
    count: usize,
}

#[derive(Deserialize)]
struct PeerRequest {
    user: String,
    peer: String,
}

#[derive(Deserialize)]
struct UserLocationDto {
    start_ms: i64,
    end_ms: i64,
    lat: Option<f32>,
    lon: Option<f32>,
    cell_tower: u64,
}

#[derive(Deserialize)]
struct ObservationDto {
    aid: String,
    ts_ms: i64,
    lat: f64,
    lon: f64,
    name: Option<String>,
}

#[derive(Deserialize)]
struct SubmitRequest {
    observer: String,
    observations: Vec<ObservationDto>,
}

#[derive(Serialize)]
struct SubmitResponse {
    resolved: usize,
}

#[derive(Serialize)]
struct ObservationView {
    observer: String,
    aid: String,
    resolved: Option<String>,
    ts_ms: i64,
    lat: f64,
    lon: f64,
    name: Option<String>,
}

impl From<Observation> for ObservationView {
    fn from(obs: Observation) -> Self {
        Self {
            observer: obs.observer.to_hex(),
            aid: obs.aid.to_hex(),
            resolved: obs.resolved.as_ref().map(Uid::to_hex),
            ts_ms: obs.time.timestamp_millis(),
            lat: obs.location.lat,
            lon: obs.location.lon,
            name: obs.location.name,
        }
    }
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        users: state.server.user_count(),
    })
}

async fn register_user(
    State(state): State<AppState>,
) -> Result<Json<RegisteredUser>, ServerError> {
    let (uid, key) = state.server.register_user()?;
    info!(uid = %uid, "registered user");
    Ok(Json(RegisteredUser {
        uid: uid.to_hex(),
        key: hex::encode(key),
    }))
}

async fn register_users(
    State(state): State<AppState>,
    Json(request): Json<BatchRegisterRequest>,
) -> Result<Json<Vec<RegisteredUser>>, ServerError> {
    let users = state.server.register_users(request.count)?;
    info!(count = users.len(), "registered users in bulk");
    Ok(Json(
        users
            .into_iter()
            .map(|(uid, key)| RegisteredUser {
                uid: uid.to_hex(),
                key: hex::encode(key),
            })
            .collect(),
    ))
}

async fn renew_key(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<RegisteredUser>, ServerError> {
    let uid = parse_uid(&uid)?;
    let key = state.server.renew_key(&uid)?;
    info!(uid = %uid, "renewed user key");
    Ok(Json(RegisteredUser {
        uid: uid.to_hex(),
        key: hex::encode(key),
    }))
}

async fn delete_user(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let uid = parse_uid(&uid)?;
    state.server.delete_user(&uid)?;
    info!(uid = %uid, "deleted user");
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn add_peer(
    State(state): State<AppState>,
    Json(request): Json<PeerRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let (user, peer) = (parse_uid(&request.user)?, parse_uid(&request.peer)?);
    state.server.add_peer(&user, &peer)?;
    Ok(Json(serde_json::json!({ "added": true })))
}

async fn delete_peer(
    State(state): State<AppState>,
    Json(request): Json<PeerRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let (user, peer) = (parse_uid(&request.user)?, parse_uid(&request.peer)?);
    state.server.delete_peer(&user, &peer)?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn list_peers(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<Vec<String>>, ServerError> {
    let uid = parse_uid(&uid)?;
    let peers = state.server.peers(&uid)?;
    Ok(Json(peers.iter().map(Uid::to_hex).collect()))
}

async fn add_locations(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(locations): Json<Vec<UserLocationDto>>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let uid = parse_uid(&uid)?;
    let locations = locations
        .into_iter()
        .map(location_from_dto)
        .collect::<Result<Vec<_>, _>>()?;
    let count = locations.len();
    state.server.add_locations(&uid, locations)?;
    Ok(Json(serde_json::json!({ "added": count })))
}

async fn submit_observations(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ServerError> {
    let observer = parse_uid(&request.observer)?;
    let observations = request
        .observations
        .into_iter()
        .map(|dto| observation_from_dto(observer, dto))
        .collect::<Result<Vec<_>, _>>()?;
    let batch = ObservationBatch::new(observer, observations);

    // The trial-decryption fan-out is CPU-bound; keep it off the runtime.
    let server = state.server.clone();
    let resolved = tokio::task::spawn_blocking(move || server.submit_observations(batch))
        .await
        .map_err(|e| ServerError::Internal(format!("resolver task failed: {e}")))??;

    Ok(Json(SubmitResponse { resolved }))
}

async fn list_observations(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<Vec<ObservationView>>, ServerError> {
    let uid = parse_uid(&uid)?;
    let observations = state.server.observations(&uid)?;
    Ok(Json(observations.into_iter().map(Into::into).collect()))
}

fn parse_uid(hex_uid: &str) -> Result<Uid, ServerError> {
    Uid::from_hex(hex_uid).map_err(|e| ServerError::BadRequest(format!("invalid UID: {e}")))
}

fn location_from_dto(dto: UserLocationDto) -> Result<UserLocation, ServerError> {
    let start = timestamp_ms(dto.start_ms)?;
    let end = timestamp_ms(dto.end_ms)?;
    let location = match (dto.lat, dto.lon) {
        (Some(lat), Some(lon)) => Some(CoarseLocation::new(lat, lon)),
        _ => None,
    };
    Ok(UserLocation::new(
        start,
        end,
        location,
        CellTower::unpack(dto.cell_tower),
    ))
}

fn observation_from_dto(observer: Uid, dto: ObservationDto) -> Result<Observation, ServerError> {
    let aid = Aid::from_hex(&dto.aid)
        .map_err(|e| ServerError::BadRequest(format!("invalid AID: {e}")))?;
    let time = timestamp_ms(dto.ts_ms)?;
    let location = match dto.name {
        Some(name) => Location::named(dto.lat, dto.lon, name),
        None => Location::new(dto.lat, dto.lon),
    };
    Ok(Observation::new(observer, aid, time, location))
}

fn timestamp_ms(ms: i64) -> Result<DateTime<Utc>, ServerError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| ServerError::BadRequest(format!("timestamp out of range: {ms}")))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
