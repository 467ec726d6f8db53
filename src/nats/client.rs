//! NATS client wrapper
//!
//! Connection management for the device telemetry bridge.

use async_nats::{Client, ConnectOptions};
use std::time::Duration;
use tracing::info;

use crate::config::NatsArgs;
use crate::types::{GrainError, Result};

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// NATS client wrapper
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
    /// Client name for logging
    name: String,
}

impl NatsClient {
    /// Create a new NATS client
    pub async fn new(args: &NatsArgs, name: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", args.nats_url);

        // Don't use retry_on_initial_connect() - we want fast failure if NATS isn't available
        // Reconnection will still work after initial successful connection
        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| GrainError::Nats(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", args.nats_url);

        Ok(Self {
            client,
            name: name.to_string(),
        })
    }

    /// Subscribe to a subject (wildcards allowed)
    pub async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber> {
        self.client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| GrainError::Nats(format!("Subscribe failed: {}", e)))
    }

    /// Whether the connection is currently up
    pub fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    /// Get the client name
    pub fn name(&self) -> &str {
        &self.name
    }
}
