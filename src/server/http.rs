//! HTTP administrative API

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::relay_server::AppState;
use super::worker_pool::PoolStats;
use crate::agents::AgentInfo;
use crate::error::{ChatError, Result};
use crate::protocol::RoomId;
use crate::store::{MessageRecord, RoomRecord};

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub agent_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    #[serde(rename = "roomId")]
    pub room_id: RoomId,
}

/// Room record with its agent embedded
#[derive(Debug, Serialize)]
pub struct RoomView {
    pub id: RoomId,
    pub agent_type: String,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    pub agent: Option<AgentInfo>,
}

#[derive(Debug, Serialize)]
pub struct StatsView {
    pub rooms: usize,
    pub connections: usize,
    pub pool: PoolStats,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "message": "service is running" }))
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsView> {
    Json(StatsView {
        rooms: state.registry.room_count().await,
        connections: state.registry.connection_count().await,
        pool: state.pool.stats(),
    })
}

pub async fn create_room(
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<CreateRoomResponse>)> {
    let agent_type = req
        .agent_type
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ChatError::protocol("Missing agent type"))?;
    let agent = state
        .agents
        .get(&agent_type)
        .ok_or_else(|| ChatError::protocol(format!("Unknown agent type: {}", agent_type)))?;

    let room = state
        .store
        .create_room(RoomRecord::new(agent_type, agent.id.clone()))
        .await?;
    info!(room_id = %room.id, agent = %room.agent_type, "room created");

    Ok((
        StatusCode::CREATED,
        Json(CreateRoomResponse { room_id: room.id }),
    ))
}

async fn require_room(state: &AppState, room_id: &str) -> Result<RoomRecord> {
    state
        .store
        .get_room(room_id)
        .await?
        .ok_or_else(|| ChatError::room_not_found(room_id))
}

pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomView>> {
    let room = require_room(&state, &room_id).await?;
    let agent = state.agents.get(&room.agent_type).cloned();
    Ok(Json(RoomView {
        id: room.id,
        agent_type: room.agent_type,
        agent_id: room.agent_id,
        created_at: room.created_at,
        agent,
    }))
}

/// Tear down live connections, then delete messages and the room
pub async fn delete_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let room = require_room(&state, &room_id).await?;

    let closed = state.registry.close_room(&room.id).await;
    let messages = state.store.delete_messages(&room.id).await?;
    state.store.delete_room(&room.id).await?;
    info!(room_id = %room.id, closed, messages, "room deleted");

    Ok(Json(json!({ "success": true })))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<MessageRecord>>> {
    let room = require_room(&state, &room_id).await?;
    Ok(Json(state.store.list_messages(&room.id).await?))
}

pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentInfo>> {
    Json(state.agents.list())
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(agent_type): Path<String>,
) -> Response {
    match state.agents.get(&agent_type) {
        Some(info) => Json(info.clone()).into_response(),
        None => {
            let err = ChatError::agent_not_found(format!("Unknown agent type: {}", agent_type));
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": err.message(), "code": err.code() })),
            )
                .into_response()
        }
    }
}

/// Start shutdown in the background and acknowledge immediately
pub async fn admin_shutdown(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    info!("shutdown requested over http");
    tokio::spawn(async move { state.shutdown().await });
    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "shutting down" })),
    )
}
