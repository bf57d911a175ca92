//! Relay server: shared state, router and lifecycle
//!
//! One `AppState` is shared by every HTTP handler and WebSocket session. The
//! shutdown entry point runs once, no matter whether a signal or the admin
//! endpoint asked for it.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::{StreamExt, future};
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use super::connection_handler::{SessionHandler, SessionServices};
use super::http;
use super::room_manager::ConnectionRegistry;
use super::worker_pool::WorkerPool;
use crate::RelayConfig;
use crate::agents::AgentRegistry;
use crate::error::{ChatError, Result};
use crate::store::MessageStore;
use crate::transport::{Connection, WsConnection};

/// State shared by handlers and sessions
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub store: Arc<dyn MessageStore>,
    pub agents: Arc<AgentRegistry>,
    pub registry: Arc<ConnectionRegistry>,
    pub pool: Arc<WorkerPool>,
    /// Live WebSocket sessions
    sessions: TaskTracker,
    /// Tells sessions to enter CLOSING
    session_cancel: CancellationToken,
    /// Fires once shutdown has completed
    stopped: CancellationToken,
    shutdown_once: Arc<OnceCell<()>>,
}

impl AppState {
    pub fn new(config: RelayConfig, store: Arc<dyn MessageStore>, agents: AgentRegistry) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let pool = Arc::new(WorkerPool::new(config.max_workers, Arc::clone(&registry)));
        Self {
            config: Arc::new(config),
            store,
            agents: Arc::new(agents),
            registry,
            pool,
            sessions: TaskTracker::new(),
            session_cancel: CancellationToken::new(),
            stopped: CancellationToken::new(),
            shutdown_once: Arc::new(OnceCell::new()),
        }
    }

    fn session_services(&self) -> SessionServices {
        SessionServices {
            store: Arc::clone(&self.store),
            agents: Arc::clone(&self.agents),
            registry: Arc::clone(&self.registry),
            pool: Arc::clone(&self.pool),
            poll_interval: self.config.stream_poll_interval(),
            grace: self.config.session_grace(),
        }
    }

    pub fn shutdown_requested(&self) -> bool {
        !self.pool.is_accepting() || self.session_cancel.is_cancelled()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Resolves once shutdown has completed
    pub async fn stopped(&self) {
        self.stopped.cancelled().await
    }

    /// Stop the relay.
    ///
    /// Drains the worker pool, moves every session to CLOSING, waits a bounded
    /// time for sessions to finish, then releases the HTTP server. Concurrent
    /// and repeated calls wait for the same single run.
    pub async fn shutdown(&self) {
        self.shutdown_once
            .get_or_init(|| async {
                info!("relay shutting down");
                self.pool.shutdown(self.config.shutdown_timeout()).await;

                self.session_cancel.cancel();
                self.sessions.close();
                let wait = self.config.session_grace() * 2;
                if tokio::time::timeout(wait, self.sessions.wait()).await.is_err() {
                    warn!(
                        remaining = self.sessions.len(),
                        "sessions still open after shutdown grace period"
                    );
                }

                self.stopped.cancel();
                info!("relay stopped");
            })
            .await;
    }
}

/// Build the router with every route
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(http::health))
        .route("/api/stats", get(http::stats))
        .route("/api/chat/rooms", post(http::create_room))
        .route(
            "/api/chat/rooms/{room_id}",
            get(http::get_room).delete(http::delete_room),
        )
        .route("/api/chat/rooms/{room_id}/messages", get(http::list_messages))
        .route("/api/chat/agents", get(http::list_agents))
        .route("/api/chat/agents/{agent_type}", get(http::get_agent))
        .route("/api/admin/shutdown", post(http::admin_shutdown))
        .route("/chat/{room_id}", get(chat_socket))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// WebSocket upgrade into a chat session
async fn chat_socket(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown_requested() {
        return ChatError::capacity("Server is shutting down").into_response();
    }
    ws.on_upgrade(move |socket| run_socket(state, room_id, socket))
}

async fn run_socket(state: AppState, room_id: String, socket: WebSocket) {
    let sessions = state.sessions.clone();
    sessions
        .track_future(async move {
            let (sink, stream) = socket.split();
            let (conn, writer) = WsConnection::spawn(sink);
            debug!(room_id = %room_id, conn_id = %conn.id(), "websocket connected");

            // Text frames until the peer closes or the socket errors
            let inbound = stream
                .take_while(|msg| future::ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_)))))
                .filter_map(|msg| {
                    future::ready(match msg {
                        Ok(Message::Text(text)) => Some(text.to_string()),
                        _ => None,
                    })
                });

            let handler = SessionHandler::new(
                room_id,
                conn,
                state.session_services(),
                state.session_cancel.clone(),
            );
            handler.run(Box::pin(inbound)).await;

            if let Err(e) = writer.await {
                error!(error = %e, "websocket writer task failed");
            }
        })
        .await;
}

/// The relay server
pub struct RelayServer {
    state: AppState,
}

impl RelayServer {
    pub fn new(config: RelayConfig, store: Arc<dyn MessageStore>, agents: AgentRegistry) -> Self {
        Self {
            state: AppState::new(config, store, agents),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Bind the configured address and serve in the background.
    ///
    /// Returns the bound address and the server task, which ends after
    /// [`shutdown`](Self::shutdown) completes.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.state.config.bind_addr).await?;
        let addr = listener.local_addr()?;
        info!(addr = %addr, "relay listening");

        let router = self.router();
        let stopped = self.state.stopped.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(stopped.cancelled_owned())
                .await
            {
                error!(error = %e, "http server failed");
            }
        });
        Ok((addr, handle))
    }

    /// Serve until shutdown completes
    pub async fn serve(&self) -> Result<()> {
        let (_, handle) = self.listen().await?;
        handle.await?;
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.state.shutdown().await
    }
}
