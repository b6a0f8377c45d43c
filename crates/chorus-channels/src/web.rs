use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chorus_config::GatewayConfig;
use chorus_core::{InboundMessage, Relay};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use crate::base::Channel;
use crate::hub::ViewerHub;

/// WebSocket gateway for viewers, plus read-only JSON endpoints.
///
/// Every connection gets a fresh id. On connect the viewer is sent the
/// recent history; afterwards it receives whatever the relay broadcasts
/// through the shared [`ViewerHub`].
pub struct WebChannel {
    gateway_config: GatewayConfig,
    relay: Relay,
    hub: Arc<ViewerHub>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

#[derive(Clone)]
struct AppState {
    relay: Relay,
    hub: Arc<ViewerHub>,
    inbound_tx: mpsc::Sender<InboundMessage>,
}

#[derive(Deserialize)]
struct WsInMsg {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    content: String,
}

impl WebChannel {
    pub fn new(gateway_config: GatewayConfig, relay: Relay, hub: Arc<ViewerHub>) -> Self {
        Self {
            gateway_config,
            relay,
            hub,
            shutdown_tx: Mutex::new(None),
        }
    }

    fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.gateway_config.host, self.gateway_config.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid gateway listen address: {e}"))
    }
}

#[async_trait]
impl Channel for WebChannel {
    fn name(&self) -> &str {
        "web"
    }

    async fn start(&self, inbound_tx: mpsc::Sender<InboundMessage>) -> Result<()> {
        let state = AppState {
            relay: self.relay.clone(),
            hub: self.hub.clone(),
            inbound_tx,
        };
        let router = Router::new()
            .route("/ws", get(ws_upgrade))
            .route("/api/messages", get(api_messages))
            .route("/api/status", get(api_status))
            .with_state(state);

        let addr = self.listen_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Web channel listening on http://{addr}");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        let hub = self.hub.clone();
        tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                error!("Web server error: {e}");
            }
            hub.clear();
        });

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }
        self.hub.clear();
        Ok(())
    }
}

// --- Axum Handlers ---

async fn api_messages(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.relay.snapshot().await)
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.relay.status().await)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
        .into_response()
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let short_conn = conn_id[..8].to_string();
    info!("Viewer connected: conn={short_conn}");

    let (ws_write, mut ws_read) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let write_handle = tokio::spawn(ws_write_loop(ws_write, rx, short_conn.clone()));

    let hub = state.hub.clone();
    state
        .relay
        .on_viewer_connect(&conn_id, || hub.insert(&conn_id, tx))
        .await;

    while let Some(result) = ws_read.next().await {
        let msg = match result {
            Ok(m) => m,
            Err(e) => {
                warn!("WebSocket read error for conn={short_conn}: {e}");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                let Some(inbound) = parse_inbound(&conn_id, text.as_str()) else {
                    continue;
                };
                if let Err(e) = state.inbound_tx.send(inbound).await {
                    error!("Failed to forward viewer input: {e}");
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.hub.remove(&conn_id);
    write_handle.abort();
    info!("Viewer disconnected: conn={short_conn}");
}

/// Decode a client frame. Only `message` frames with content are forwarded.
fn parse_inbound(conn_id: &str, text: &str) -> Option<InboundMessage> {
    let parsed: WsInMsg = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!("Ignoring unparseable frame from conn={conn_id}: {e}");
            return None;
        }
    };
    if parsed.msg_type != "message" || parsed.content.trim().is_empty() {
        return None;
    }
    Some(InboundMessage {
        viewer_id: conn_id.to_string(),
        content: parsed.content,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn ws_write_loop(
    mut ws_write: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    conn_id: String,
) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = ws_write.send(msg).await {
            warn!("WebSocket write error for conn={conn_id}: {e}");
            break;
        }
    }
}
