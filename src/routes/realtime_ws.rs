//! Realtime WebSocket feed
//!
//! Connect: `ws://host/ws?token=<jwt>` (or send the token as a bearer
//! `Authorization` header). The token is checked before the upgrade.
//!
//! Server → client: every [`RealtimeEvent`] visible to the caller's tenant,
//! plus `welcome` on connect and `heartbeat` every 30 s.
//!
//! Client → server: `ping` (plain text or `{"type":"ping"}`), answered with
//! a `pong` event.

use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{header, Request, Response};
use hyper_tungstenite::tungstenite::Message as WsMessage;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::auth::{authenticate_token, extract_token_from_header, extract_token_from_query, AuthContext};
use crate::realtime::{EventKind, RealtimeEvent};
use crate::routes::request::error_response;
use crate::server::AppState;
use crate::types::{GrainError, Result};

/// WebSocket type after upgrade
type HyperWebSocket =
    hyper_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Ping,
}

fn is_ping(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("ping")
        || matches!(serde_json::from_str::<ClientMessage>(text), Ok(ClientMessage::Ping))
}

fn request_token(req: &Request<Incoming>) -> Option<String> {
    extract_token_from_query(req.uri().query()).or_else(|| {
        let header = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        extract_token_from_header(header).map(str::to_string)
    })
}

/// Handle WebSocket upgrade for the realtime feed
pub async fn handle_ws(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let Some(token) = request_token(&req) else {
        return error_response(&GrainError::Unauthorized("Missing token".into()));
    };
    let ctx = match authenticate_token(&state, &token).await {
        Ok(ctx) => ctx,
        Err(e) => return error_response(&e),
    };

    if !hyper_tungstenite::is_upgrade_request(&req) {
        return error_response(&GrainError::BadRequest("WebSocket upgrade required".into()));
    }

    let (response, websocket) = match hyper_tungstenite::upgrade(req, None) {
        Ok(upgrade) => upgrade,
        Err(e) => {
            error!("WebSocket upgrade failed: {}", e);
            return error_response(&GrainError::WebSocket(e.to_string()));
        }
    };

    tokio::spawn(async move {
        match websocket.await {
            Ok(ws) => {
                if let Err(e) = handle_connection(ws, state, ctx).await {
                    warn!("Realtime WebSocket error: {}", e);
                }
            }
            Err(e) => {
                error!("WebSocket connection failed: {}", e);
            }
        }
    });

    let (parts, _body) = response.into_parts();
    Response::from_parts(parts, Full::new(Bytes::new()))
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<HyperWebSocket, WsMessage>,
    event: &RealtimeEvent,
) -> Result<()> {
    let text = serde_json::to_string(event)?;
    sender
        .send(WsMessage::Text(text))
        .await
        .map_err(|e| GrainError::WebSocket(e.to_string()))
}

async fn handle_connection(ws: HyperWebSocket, state: Arc<AppState>, ctx: AuthContext) -> Result<()> {
    let (mut sender, mut receiver) = ws.split();
    let _guard = state.realtime.connection_guard();

    // Super admins without a tenant see every tenant's events
    let scope = ctx.tenant_scope(None);
    info!(user_id = %ctx.user_id, tenant_id = ?scope, "Realtime client connected");

    let mut rx = state.realtime.subscribe();

    let welcome = RealtimeEvent::new(
        EventKind::Welcome,
        None,
        json!({ "user_id": ctx.user_id, "tenant_id": scope, "role": ctx.role }),
    );
    send_event(&mut sender, &welcome).await?;

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Ok(event) => {
                        if !event.visible_to(scope.as_deref()) {
                            continue;
                        }
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(user_id = %ctx.user_id, skipped, "Realtime client lagged, events dropped");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if is_ping(&text) {
                            let pong = RealtimeEvent::new(EventKind::Pong, None, json!({}));
                            send_event(&mut sender, &pong).await?;
                        } else {
                            debug!("Ignoring client message: {}", text);
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = sender.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Realtime WebSocket receive error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    info!(user_id = %ctx.user_id, "Realtime client disconnected");
    Ok(())
}
