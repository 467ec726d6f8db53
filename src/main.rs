//! GrainHero - grain storage management backend

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use grainhero::{
    auth::JwtValidator,
    config::{Args, LogFormat},
    db::{Database, MemoryDb, MongoClient},
    nats::{spawn_telemetry_bridge, NatsClient},
    server::{self, AppState},
    services::{limit_warning, prediction},
};

fn init_tracing(args: &Args) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("grainhero={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);

    match args.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(&args);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  GrainHero - grain storage backend");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {} (db: {})", args.mongodb_uri, args.mongodb_db);
    info!("Prediction: {:?}", args.ml.ml_mode);
    if args.nats.telemetry_enabled {
        info!("Telemetry: {} on {}", args.nats.telemetry_subject, args.nats.nats_url);
    } else {
        info!("Telemetry: disabled");
    }
    info!("======================================");

    // Connect to MongoDB (in-memory fallback in dev mode)
    let db = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            Database::Mongo(client)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory store): {}", e);
                Database::Memory(MemoryDb::new())
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };
    db.ensure_indexes().await?;

    let jwt = JwtValidator::new(args.jwt_secret().unwrap_or_default(), args.jwt_expiry_seconds)?;
    let predictor = prediction::from_args(&args.ml)?;

    let mut state = AppState::new(args.clone(), db, jwt, predictor);

    // Connect to NATS only when the telemetry bridge is wanted
    if args.nats.telemetry_enabled {
        match NatsClient::new(&args.nats, "grainhero").await {
            Ok(client) => {
                info!("NATS connected successfully");
                state = state.with_nats(client);
            }
            Err(e) => {
                if args.dev_mode {
                    warn!("NATS connection failed (dev mode, continuing without telemetry): {}", e);
                } else {
                    error!("NATS connection failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    let state = Arc::new(state);

    let _telemetry = match state.nats.as_ref() {
        Some(nats) => Some(spawn_telemetry_bridge(Arc::clone(&state), nats).await?),
        None => None,
    };

    Arc::clone(&state.realtime).start_heartbeat_task();
    let _limit_job = limit_warning::spawn(Arc::clone(&state));

    tokio::select! {
        result = server::run(state) => {
            if let Err(e) = result {
                error!("Server error: {:?}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    Ok(())
}
