//! # WebSocket Connector
//!
//! Opens the `/sync` channel to the hub with the session bearer token.
//!
//! ## Link Anatomy
//! ```text
//! ┌────────────────────┐  outgoing mpsc   ┌──────────────────────────────┐
//! │ ConnectionManager  │ ───────────────► │ connection_loop (task)       │
//! │                    │                  │                              │
//! │  HubLink           │ ◄─── watch ───── │  • writes outgoing messages  │
//! │   closed: bool     │   (true on exit) │  • forwards hub messages ──► inbound
//! └────────────────────┘                  │  • answers pings, sends pings│
//!                                         └──────────────────────────────┘
//! ```
//!
//! Dropping the `HubLink` closes the outgoing channel, which makes the loop
//! send a close frame and exit.

use async_trait::async_trait;
use boxsync_core::HubMessage;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::EdgeConfig;
use crate::connection::{HubConnector, HubLink};
use crate::error::{SyncError, SyncResult};
use crate::token::SessionToken;

/// Keepalive ping interval on the hub channel.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

// =============================================================================
// Connector
// =============================================================================

/// [`HubConnector`] over tokio-tungstenite.
pub struct WsConnector {
    url: Url,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: Url, connect_timeout: Duration) -> Self {
        WsConnector {
            url,
            connect_timeout,
        }
    }

    pub fn from_config(config: &EdgeConfig) -> SyncResult<Self> {
        Ok(Self::new(config.sync_url()?, config.connect_timeout()))
    }
}

#[async_trait]
impl HubConnector for WsConnector {
    async fn connect(
        &self,
        token: &SessionToken,
        inbound: mpsc::Sender<HubMessage>,
    ) -> SyncResult<HubLink> {
        let mut request = self.url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&token.bearer())
            .map_err(|e| SyncError::TokenUnavailable(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let ws = match timeout(self.connect_timeout, connect_async(request)).await {
            Ok(Ok((ws, response))) => {
                debug!(status = ?response.status(), url = %self.url, "WebSocket handshake complete");
                ws
            }
            Ok(Err(e)) => return Err(SyncError::from(e)),
            Err(_) => return Err(SyncError::Timeout(self.connect_timeout.as_secs())),
        };

        let (outgoing_tx, outgoing_rx) = mpsc::channel(100);
        let (closed_tx, closed_rx) = watch::channel(false);

        tokio::spawn(connection_loop(
            ws,
            outgoing_rx,
            inbound,
            closed_tx,
            PING_INTERVAL,
        ));

        Ok(HubLink::new(outgoing_tx, closed_rx))
    }
}

// =============================================================================
// Connection Loop
// =============================================================================

async fn connection_loop(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outgoing_rx: mpsc::Receiver<HubMessage>,
    inbound: mpsc::Sender<HubMessage>,
    closed_tx: watch::Sender<bool>,
    ping_interval: Duration,
) {
    let (mut write, mut read) = ws.split();

    let mut ping = tokio::time::interval(ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.tick().await;

    let reason: SyncError = loop {
        tokio::select! {
            outgoing = outgoing_rx.recv() => match outgoing {
                Some(msg) => {
                    let json = match msg.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(?e, "Failed to encode message");
                            continue;
                        }
                    };
                    debug!(msg_type = %msg.type_name(), "Sending message");
                    if let Err(e) = write.send(WsMessage::Text(json.into())).await {
                        break e.into();
                    }
                }
                None => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    break SyncError::Disconnected;
                }
            },

            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match HubMessage::from_json(&text) {
                    Ok(HubMessage::Ping { timestamp }) => {
                        let pong = HubMessage::pong(&timestamp);
                        if let Ok(json) = pong.to_json() {
                            if let Err(e) = write.send(WsMessage::Text(json.into())).await {
                                break e.into();
                            }
                        }
                    }
                    Ok(msg) => {
                        debug!(msg_type = %msg.type_name(), "Received message");
                        if inbound.send(msg).await.is_err() {
                            break SyncError::ChannelError("Inbound receiver dropped".into());
                        }
                    }
                    Err(e) => warn!(?e, "Failed to parse message"),
                },
                Some(Ok(WsMessage::Ping(data))) => {
                    if let Err(e) = write.send(WsMessage::Pong(data)).await {
                        break e.into();
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    info!(?frame, "Received close frame");
                    break SyncError::Disconnected;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break e.into(),
                None => break SyncError::Disconnected,
            },

            _ = ping.tick() => {
                if let Err(e) = write.send(WsMessage::Ping(vec![].into())).await {
                    break e.into();
                }
            }
        }
    };

    debug!(reason = %reason, "Connection loop ended");
    let _ = closed_tx.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::wait_closed;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    #[tokio::test]
    async fn test_connector_sends_bearer_and_relays_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut auth = None;
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
                auth = req
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok::<_, ErrorResponse>(resp)
            })
            .await
            .unwrap();

            let push = HubMessage::change_detect("P1").to_json().unwrap();
            ws.send(WsMessage::Text(push.into())).await.unwrap();

            let mut received = None;
            while let Some(Ok(frame)) = ws.next().await {
                if let WsMessage::Text(text) = frame {
                    received = Some(HubMessage::from_json(&text).unwrap());
                    break;
                }
            }

            ws.close(None).await.unwrap();
            (auth, received)
        });

        let url = Url::parse(&format!("ws://{}/sync", addr)).unwrap();
        let connector = WsConnector::new(url, Duration::from_secs(5));
        let token = SessionToken::new("tok-123", chrono::Utc::now() + chrono::Duration::hours(1));
        let (inbound_tx, mut inbound_rx) = mpsc::channel(8);

        let link = connector.connect(&token, inbound_tx).await.unwrap();
        assert!(!link.is_closed());

        let pushed = inbound_rx.recv().await.unwrap();
        assert_eq!(pushed, HubMessage::change_detect("P1"));

        link.invoke(HubMessage::upload_trigger("P1")).await.unwrap();

        let (auth, received) = server.await.unwrap();
        assert_eq!(auth.as_deref(), Some("Bearer tok-123"));
        assert_eq!(received, Some(HubMessage::upload_trigger("P1")));

        let mut closed = link.close_signal();
        timeout(Duration::from_secs(5), wait_closed(&mut closed))
            .await
            .unwrap();
        assert!(link.is_closed());
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("ws://{}/sync", addr)).unwrap();
        let connector = WsConnector::new(url, Duration::from_secs(5));
        let token = SessionToken::new("tok", chrono::Utc::now() + chrono::Duration::hours(1));
        let (inbound_tx, _inbound_rx) = mpsc::channel(8);

        let err = connector.connect(&token, inbound_tx).await.err().unwrap();
        assert!(err.is_retryable());
    }
}
