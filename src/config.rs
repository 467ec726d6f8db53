//! Configuration for GrainHero
//!
//! CLI arguments and environment variable handling using clap.
//! A `.env` file is loaded by `main` before parsing.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

/// GrainHero - grain storage management backend
#[derive(Parser, Debug, Clone)]
#[command(name = "grainhero")]
#[command(about = "Multi-tenant grain storage management backend")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:5000")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory store fallback, dev JWT secret)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "grainhero")]
    pub mongodb_db: String,

    /// JWT secret for token signing (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// JWT token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "86400")]
    pub jwt_expiry_seconds: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Maximum accepted request body size in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value = "1048576")]
    pub max_body_bytes: usize,

    /// NATS configuration (device telemetry bridge)
    #[command(flatten)]
    pub nats: NatsArgs,

    /// Spoilage prediction service configuration
    #[command(flatten)]
    pub ml: MlArgs,

    /// Percentage of a plan limit at which a usage warning is sent
    #[arg(long, env = "LIMIT_WARNING_THRESHOLD", default_value = "80")]
    pub limit_warning_threshold: u8,

    /// Seconds between plan usage checks
    #[arg(long, env = "LIMIT_CHECK_INTERVAL_SECS", default_value = "300")]
    pub limit_check_interval_secs: u64,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// Subscribe to device telemetry over NATS
    #[arg(long, env = "TELEMETRY_ENABLED", default_value = "false")]
    pub telemetry_enabled: bool,

    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,

    /// Subject devices publish readings on
    #[arg(long, env = "TELEMETRY_SUBJECT", default_value = "grainhero.telemetry.>")]
    pub telemetry_subject: String,
}

/// How spoilage predictions are obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MlMode {
    /// Spawn a local process per prediction (JSON on stdin/stdout)
    Subprocess,
    /// POST to a prediction HTTP service
    Http,
    /// Predictions are turned off
    Disabled,
}

/// Spoilage prediction configuration
#[derive(Parser, Debug, Clone)]
pub struct MlArgs {
    /// Prediction backend
    #[arg(long, env = "ML_MODE", value_enum, default_value = "subprocess")]
    pub ml_mode: MlMode,

    /// Interpreter or executable used in subprocess mode
    #[arg(long, env = "ML_COMMAND", default_value = "python3")]
    pub ml_command: String,

    /// Script passed to the interpreter in subprocess mode
    #[arg(long, env = "ML_SCRIPT", default_value = "ml/predict.py")]
    pub ml_script: String,

    /// Prediction service URL (http mode)
    #[arg(long, env = "ML_SERVICE_URL")]
    pub ml_service_url: Option<String>,

    /// Prediction timeout in milliseconds
    #[arg(long, env = "ML_TIMEOUT_MS", default_value = "15000")]
    pub ml_timeout_ms: u64,
}

impl MlArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.ml_timeout_ms)
    }
}

impl Args {
    /// Get effective JWT secret (uses default in dev mode)
    pub fn jwt_secret(&self) -> Option<String> {
        match &self.jwt_secret {
            Some(secret) => Some(secret.clone()),
            None if self.dev_mode => Some("dev-only-insecure-secret-not-for-production".to_string()),
            None => None,
        }
    }

    pub fn limit_check_interval(&self) -> Duration {
        Duration::from_secs(self.limit_check_interval_secs.max(1))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if let Some(secret) = &self.jwt_secret {
            if secret.len() < 32 {
                return Err("JWT_SECRET must be at least 32 characters".to_string());
            }
        }

        if self.limit_warning_threshold == 0 || self.limit_warning_threshold > 100 {
            return Err("LIMIT_WARNING_THRESHOLD must be between 1 and 100".to_string());
        }

        if self.ml.ml_mode == MlMode::Http && self.ml.ml_service_url.is_none() {
            return Err("ML_SERVICE_URL is required when ML_MODE=http".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["grainhero"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_dev_mode_needs_no_secret() {
        let args = parse(&["--dev-mode"]);
        assert!(args.validate().is_ok());
        assert!(args.jwt_secret().is_some());
    }

    #[test]
    fn test_production_requires_secret() {
        let args = parse(&[]);
        assert!(args.validate().is_err());

        let args = parse(&["--jwt-secret", "this-secret-is-at-least-32-chars-long"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_short_secret_rejected() {
        let args = parse(&["--dev-mode", "--jwt-secret", "short"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_threshold_bounds() {
        let args = parse(&["--dev-mode", "--limit-warning-threshold", "0"]);
        assert!(args.validate().is_err());
        let args = parse(&["--dev-mode", "--limit-warning-threshold", "100"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_http_mode_requires_url() {
        let args = parse(&["--dev-mode", "--ml-mode", "http"]);
        assert!(args.validate().is_err());

        let args = parse(&[
            "--dev-mode",
            "--ml-mode",
            "http",
            "--ml-service-url",
            "http://localhost:8000/predict",
        ]);
        assert!(args.validate().is_ok());
    }
}
