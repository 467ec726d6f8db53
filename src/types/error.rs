//! Error types for GrainHero
//!
//! Every handler returns `Result<_, GrainError>`; the HTTP layer turns the
//! error into a JSON body with the matching status code.

use hyper::StatusCode;

/// Main error type for GrainHero operations
#[derive(Debug, thiserror::Error)]
pub enum GrainError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Plan limit reached: {0}")]
    LimitReached(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Prediction error: {0}")]
    Prediction(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),
}

impl GrainError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::LimitReached(_) => StatusCode::FORBIDDEN,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Prediction(_) => StatusCode::BAD_GATEWAY,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Nats(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::WebSocket(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
        }
    }

    /// Stable machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) | Self::Auth(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::Conflict(_) => "CONFLICT",
            Self::LimitReached(_) => "PLAN_LIMIT_REACHED",
            Self::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            Self::Database(_) => "DB_ERROR",
            Self::Prediction(_) => "PREDICTION_FAILED",
            Self::Unavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Nats(_) => "NATS_ERROR",
            Self::WebSocket(_) => "WEBSOCKET_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether this error is the server's fault (logged at error level)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Client-facing message without the variant prefix
    pub fn message(&self) -> String {
        match self {
            Self::MethodNotAllowed => "Method not allowed".to_string(),
            Self::BadRequest(m)
            | Self::Unauthorized(m)
            | Self::Forbidden(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::LimitReached(m)
            | Self::PayloadTooLarge(m)
            | Self::Prediction(m)
            | Self::Unavailable(m)
            | Self::Auth(m) => m.clone(),
            // Store and transport internals stay in the logs
            Self::Database(_) => "Database unavailable".to_string(),
            Self::Nats(_) | Self::WebSocket(_) | Self::Internal(_) | Self::Config(_) => {
                "Internal server error".to_string()
            }
        }
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for GrainError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for GrainError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for GrainError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<hyper_tungstenite::tungstenite::Error> for GrainError {
    fn from(err: hyper_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<mongodb::error::Error> for GrainError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for GrainError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Internal(format!("BSON encode error: {}", err))
    }
}

impl From<bson::de::Error> for GrainError {
    fn from(err: bson::de::Error) -> Self {
        Self::Database(format!("BSON decode error: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for GrainError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthorized(format!("JWT error: {}", err))
    }
}

/// Result type alias for GrainHero operations
pub type Result<T> = std::result::Result<T, GrainError>;
