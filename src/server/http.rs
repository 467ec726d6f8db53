//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Bodies are buffered
//! (with a size cap) before dispatch; `/ws` is handed over unbuffered so it
//! can be upgraded.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::auth::JwtValidator;
use crate::config::Args;
use crate::db::Database;
use crate::nats::NatsClient;
use crate::realtime::RealtimeHub;
use crate::routes::{self, error_response, ApiRequest};
use crate::services::prediction::SpoilagePredictor;
use crate::types::{GrainError, Result};

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub db: Database,
    pub jwt: JwtValidator,
    /// Broadcast hub for WebSocket clients
    pub realtime: Arc<RealtimeHub>,
    /// Spoilage model client
    pub predictor: Arc<dyn SpoilagePredictor>,
    /// Present when the telemetry bridge is connected
    pub nats: Option<NatsClient>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        args: Args,
        db: Database,
        jwt: JwtValidator,
        predictor: Arc<dyn SpoilagePredictor>,
    ) -> Self {
        Self {
            args,
            db,
            jwt,
            realtime: Arc::new(RealtimeHub::new()),
            predictor,
            nats: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_nats(mut self, nats: NatsClient) -> Self {
        self.nats = Some(nats);
        self
    }
}

/// Accept connections until the listener fails
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "GrainHero listening on {} (store: {}, predictor: {})",
        state.args.listen,
        state.db.kind(),
        state.predictor.mode()
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - do not use in production");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    // WebSocket upgrades need the untouched request
    let response = if path == "/ws" {
        routes::realtime_ws::handle_ws(Arc::clone(&state), req).await
    } else {
        match collect_request(req, state.args.max_body_bytes).await {
            Ok(api_request) => routes::dispatch(Arc::clone(&state), api_request).await,
            Err(e) => error_response(&e),
        }
    };

    info!(
        %addr,
        %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );

    Ok(response)
}

/// Buffer the request body, refusing anything over `max_bytes`
async fn collect_request(req: Request<Incoming>, max_bytes: usize) -> Result<ApiRequest> {
    let (parts, body) = req.into_parts();

    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > max_bytes) {
        return Err(too_large(max_bytes));
    }

    let body = Limited::new(body, max_bytes)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                too_large(max_bytes)
            } else {
                GrainError::BadRequest(format!("Failed to read request body: {}", e))
            }
        })?
        .to_bytes();

    Ok(ApiRequest::new(
        parts.method,
        parts.uri.path(),
        parts.uri.query(),
        parts.headers,
        body,
    ))
}

fn too_large(max_bytes: usize) -> GrainError {
    GrainError::PayloadTooLarge(format!("Request body exceeds {} bytes", max_bytes))
}
