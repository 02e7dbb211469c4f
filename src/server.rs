//! HTTP and WebSocket front end.
//!
//! Serves the bundled page, upgrades `/ws` requests and runs one
//! [`Session`] per upgraded connection on its own task. Sessions share
//! nothing except the connection limit and the shutdown token.

use crate::config::{Config, SessionConfig};
use crate::page;
use crate::session::{CloseReason, Session, SessionError};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Shared handler state
#[derive(Clone)]
struct AppState {
    session: Arc<SessionConfig>,
    page: Arc<str>,
    connection_limit: Arc<Semaphore>,
    shutdown: CancellationToken,
    sessions: TaskTracker,
    next_session_id: Arc<AtomicU64>,
}

/// Server instance
pub struct Server {
    config: Config,
    connection_limit: Arc<Semaphore>,
    shutdown: CancellationToken,
    sessions: TaskTracker,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));
        Server {
            config,
            connection_limit,
            shutdown: CancellationToken::new(),
            sessions: TaskTracker::new(),
        }
    }

    /// Token that stops the server and every session when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Routes: `/` page, `/ws` stream, `/health` probe.
    pub fn router(&self) -> Router {
        let state = AppState {
            session: Arc::new(self.config.session.clone()),
            page: page::render(&self.config.session).into(),
            connection_limit: Arc::clone(&self.connection_limit),
            shutdown: self.shutdown.clone(),
            sessions: self.sessions.clone(),
            next_session_id: Arc::new(AtomicU64::new(1)),
        };

        Router::new()
            .route("/", get(home_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.listen).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown, then wait for
    /// every session to close.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        info!(
            address = %listener.local_addr()?,
            policy = %self.config.session.policy,
            group_width = self.config.session.group_width,
            "Server listening"
        );

        let shutdown = self.shutdown.clone();
        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Server shutting down");
        })
        .await?;

        self.sessions.close();
        if !self.sessions.is_empty() {
            info!(sessions = self.sessions.len(), "Waiting for sessions to close");
        }
        self.sessions.wait().await;
        Ok(())
    }
}

async fn home_handler(State(state): State<AppState>) -> Html<String> {
    Html(state.page.to_string())
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    // Wait-free: over the limit is refused, not queued
    let permit = match Arc::clone(&state.connection_limit).try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            warn!(peer = %peer, "Connection limit reached");
            return (StatusCode::SERVICE_UNAVAILABLE, "too many sessions").into_response();
        }
    };

    let id = state.next_session_id.fetch_add(1, Ordering::Relaxed);
    let cancel = state.shutdown.child_token();
    let config = Arc::clone(&state.session);
    let sessions = state.sessions.clone();
    debug!(peer = %peer, session = id, "Upgrading connection");

    ws.on_upgrade(move |socket| {
        sessions.track_future(handle_socket(socket, id, peer, config, cancel, permit))
    })
}

/// Run one session to completion on an upgraded connection.
async fn handle_socket(
    mut socket: WebSocket,
    id: u64,
    peer: SocketAddr,
    config: Arc<SessionConfig>,
    cancel: CancellationToken,
    permit: OwnedSemaphorePermit,
) {
    info!(peer = %peer, session = id, "New session");

    let mut session = Session::new(id, &config);
    let outcome = session.run(&mut socket, cancel).await;

    // Best effort close frame unless the connection is already gone
    let peer_gone = matches!(
        outcome,
        Ok(CloseReason::PeerClosed) | Err(SessionError::Transport(_))
    );
    if !peer_gone {
        let _ = socket.send(Message::Close(None)).await;
    }

    drop(permit);
}
