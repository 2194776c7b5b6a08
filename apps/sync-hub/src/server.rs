//! # Realtime Endpoint
//!
//! axum server exposing the `/sync` WebSocket and a health check.
//!
//! ## Per-Connection Tasks
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  socket ──split──► sink ◄── outgoing task ◄── frame_tx ◄─┬─ ping task   │
//! │                                                           └─ forwarder  │
//! │                                                               ▲         │
//! │                                         TenantHub member_tx ──┘         │
//! │                                                                         │
//! │  stream ──► receive loop ──► TenantHub::dispatch (UploadTrigger, ...)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use boxsync_core::{HubMessage, SessionClaims};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{authenticate, ACCESS_TOKEN_PARAM};
use crate::config::HubConfig;
use crate::error::HubError;
use crate::hub::TenantHub;

/// Ping interval to keep connections alive.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Per-connection queue depth.
const MEMBER_QUEUE: usize = 64;

/// Shared application state.
pub struct AppState {
    pub hub: Arc<TenantHub>,
    pub config: HubConfig,
}

impl AppState {
    pub fn new(config: HubConfig) -> Self {
        AppState {
            hub: Arc::new(TenantHub::new()),
            config,
        }
    }
}

/// Builds the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sync", get(sync_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Binds the configured address and serves until `shutdown` resolves.
pub async fn run(
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), HubError> {
    let bind_addr = state.config.bind_address();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| HubError::Bind {
            addr: bind_addr.clone(),
            reason: e.to_string(),
        })?;

    info!(addr = %bind_addr, "Sync hub listening");
    serve(listener, state, shutdown).await
}

/// Serves on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), HubError> {
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| HubError::Server(e.to_string()))
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    "OK"
}

/// WebSocket upgrade handler. Rejects with 401 before upgrading.
async fn sync_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Result<Response, HubError> {
    let query_token = params.get(ACCESS_TOKEN_PARAM).map(String::as_str);
    let claims = match authenticate(&state.config, &headers, query_token) {
        Ok(claims) => claims,
        Err(e) => {
            warn!(addr = %addr, error = %e, "Rejected /sync connection");
            return Err(e);
        }
    };

    info!(addr = %addr, sub = %claims.sub, "New sync connection");
    Ok(ws
        .max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, claims, addr)))
}

/// Handles one authenticated WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, claims: SessionClaims, addr: SocketAddr) {
    let connection_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    let (member_tx, mut member_rx) = mpsc::channel::<HubMessage>(MEMBER_QUEUE);
    let tenant = state.hub.join(connection_id, &claims, member_tx.clone()).await;

    let (frame_tx, mut frame_rx) = mpsc::channel::<Message>(MEMBER_QUEUE);

    // Outgoing frame task
    let outgoing_handle = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if sender.send(frame).await.is_err() {
                break;
            }
        }
    });

    // Group message forwarding task
    let frame_tx_forward = frame_tx.clone();
    let forward_handle = tokio::spawn(async move {
        while let Some(msg) = member_rx.recv().await {
            match msg.to_json() {
                Ok(json) => {
                    if frame_tx_forward.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(?e, "Failed to encode group message"),
            }
        }
    });

    // Ping task
    let frame_tx_ping = frame_tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_interval = interval(PING_INTERVAL);
        loop {
            ping_interval.tick().await;
            if frame_tx_ping
                .send(Message::Ping(axum::body::Bytes::new()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Main receive loop
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => match HubMessage::from_json(text.as_str()) {
                Ok(msg) => {
                    debug!(connection_id = %connection_id, msg_type = %msg.type_name(), "Received client message");
                    if let Some(reply) = state.hub.dispatch(connection_id, msg).await {
                        let _ = member_tx.send(reply).await;
                    }
                }
                Err(e) => {
                    debug!(connection_id = %connection_id, ?e, "Invalid message format");
                    let _ = member_tx
                        .send(HubMessage::error("INVALID_MESSAGE", &e.to_string()))
                        .await;
                }
            },
            Some(Ok(Message::Ping(data))) => {
                let _ = frame_tx.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Close(_))) => {
                info!(connection_id = %connection_id, "Client requested close");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(connection_id = %connection_id, ?e, "WebSocket error");
                break;
            }
            None => {
                info!(connection_id = %connection_id, addr = %addr, "Client disconnected");
                break;
            }
        }
    }

    // Cleanup
    state.hub.leave(connection_id, tenant.as_deref()).await;
    ping_handle.abort();
    forward_handle.abort();
    outgoing_handle.abort();
}
