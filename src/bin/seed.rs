//! GrainHero seeder - default plans, the platform super admin and demo data
//!
//! Safe to run repeatedly: plans and users that already exist are skipped.
//!
//! Usage:
//!   grainhero-seed --superadmin-email root@example.com --superadmin-password ...
//!   grainhero-seed --sample-data
//!
//! Environment variables:
//!   MONGODB_URI - MongoDB connection URI (default: mongodb://localhost:27017)
//!   MONGODB_DB - Database name (default: grainhero)
//!   SUPERADMIN_EMAIL / SUPERADMIN_PASSWORD - Platform super admin credentials
//!   SEED_SAMPLE_DATA - Also create a demo tenant (default: false)

use chrono::{Duration, Utc};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use grainhero::auth::{check_password_policy, hash_password, Role};
use grainhero::db::schemas::{
    normalize_email, Actuator, ActuatorKind, Plan, PlanLimits, Sensor, SensorType, Silo,
    Subscription, SubscriptionStatus, Tenant, User,
};
use grainhero::db::{new_id, Database, Filter, MongoClient};
use grainhero::Result;

#[derive(Parser, Debug)]
#[command(name = "grainhero-seed")]
#[command(about = "Seed GrainHero with plans, a super admin and demo data")]
#[command(version)]
struct Args {
    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "grainhero")]
    mongodb_db: String,

    /// Platform super admin email
    #[arg(long, env = "SUPERADMIN_EMAIL")]
    superadmin_email: Option<String>,

    /// Platform super admin password
    #[arg(long, env = "SUPERADMIN_PASSWORD")]
    superadmin_password: Option<String>,

    /// Create a demo tenant with silos, sensors and actuators
    #[arg(long, env = "SEED_SAMPLE_DATA", default_value = "false")]
    sample_data: bool,
}

/// name, price, silos, batches, sensors, users
const DEFAULT_PLANS: &[(&str, u32, u32, u32, u32, u32)] = &[
    ("Basic", 2900, 2, 20, 10, 3),
    ("Pro", 9900, 10, 200, 50, 15),
    ("Enterprise", 29900, 0, 0, 0, 0),
];

const SAMPLE_ADMIN_EMAIL: &str = "admin@demo-farm.test";
const SAMPLE_ADMIN_PASSWORD: &str = "demo-harvest-2024";

async fn seed_plans(db: &Database) -> Result<Vec<Plan>> {
    let plans = db.collection::<Plan>();
    let mut seeded = Vec::with_capacity(DEFAULT_PLANS.len());

    for &(name, price_cents, silos, grain_batches, sensors, users) in DEFAULT_PLANS {
        if let Some(existing) = plans.find_one(&Filter::new().eq("name", name)).await? {
            info!("Plan {} already exists", name);
            seeded.push(existing);
            continue;
        }

        let plan = plans
            .insert_one(Plan {
                id: new_id(),
                name: name.to_string(),
                description: format!("{} grain storage plan", name),
                price_cents,
                limits: PlanLimits {
                    silos,
                    grain_batches,
                    sensors,
                    users,
                },
                is_active: true,
                ..Default::default()
            })
            .await?;
        info!(plan_id = %plan.id, "Created plan {}", name);
        seeded.push(plan);
    }
    Ok(seeded)
}

async fn seed_user(
    db: &Database,
    tenant_id: Option<&str>,
    name: &str,
    email: &str,
    password: &str,
    role: Role,
) -> Result<User> {
    let email = normalize_email(email);
    let users = db.collection::<User>();
    if let Some(existing) = users.find_one(&Filter::new().eq("email", email.as_str())).await? {
        info!("User {} already exists", email);
        return Ok(existing);
    }

    check_password_policy(password)?;
    let user = users
        .insert_one(User {
            id: new_id(),
            tenant_id: tenant_id.map(str::to_string),
            name: name.to_string(),
            email,
            password_hash: hash_password(password)?,
            role,
            is_active: true,
            token_version: 1,
            ..Default::default()
        })
        .await?;
    info!(user_id = %user.id, role = %role, "Created user {}", user.email);
    Ok(user)
}

async fn seed_sample_tenant(db: &Database, plan: &Plan) -> Result<()> {
    let tenants = db.collection::<Tenant>();
    let email = "office@demo-farm.test";
    if tenants
        .find_one(&Filter::new().eq("email", email))
        .await?
        .is_some()
    {
        info!("Demo tenant already exists");
        return Ok(());
    }

    let tenant = tenants
        .insert_one(Tenant {
            id: new_id(),
            name: "Demo Farm".into(),
            email: email.into(),
            address: Some("1 Granary Road".into()),
            is_active: true,
            ..Default::default()
        })
        .await?;

    let now = Utc::now();
    db.collection::<Subscription>()
        .insert_one(Subscription {
            id: new_id(),
            tenant_id: tenant.id.clone(),
            plan_id: plan.id.clone(),
            status: SubscriptionStatus::Active,
            current_period_start: now,
            current_period_end: now + Duration::days(30),
            warned: Vec::new(),
            ..Default::default()
        })
        .await?;

    seed_user(
        db,
        Some(&tenant.id),
        "Demo Admin",
        SAMPLE_ADMIN_EMAIL,
        SAMPLE_ADMIN_PASSWORD,
        Role::Admin,
    )
    .await?;

    for (code, capacity) in [("SILO-A", 50_000.0), ("SILO-B", 80_000.0)] {
        let silo = db
            .collection::<Silo>()
            .insert_one(Silo {
                id: new_id(),
                tenant_id: tenant.id.clone(),
                silo_id: code.into(),
                name: format!("Silo {}", code.trim_start_matches("SILO-")),
                capacity_kg: capacity,
                ..Default::default()
            })
            .await?;

        for (suffix, sensor_type) in [("temp", SensorType::Temperature), ("hum", SensorType::Humidity)] {
            let device_id = format!("{}-{}", code.to_lowercase(), suffix);
            db.collection::<Sensor>()
                .insert_one(Sensor {
                    id: new_id(),
                    tenant_id: tenant.id.clone(),
                    silo_id: silo.id.clone(),
                    name: device_id.clone(),
                    device_id,
                    sensor_type,
                    ..Default::default()
                })
                .await?;
        }

        db.collection::<Actuator>()
            .insert_one(Actuator {
                id: new_id(),
                tenant_id: tenant.id.clone(),
                silo_id: silo.id.clone(),
                actuator_id: format!("{}-fan", code.to_lowercase()),
                name: format!("{} aeration fan", code),
                kind: ActuatorKind::Fan,
                ..Default::default()
            })
            .await?;
    }

    info!(tenant_id = %tenant.id, "Created demo tenant (login: {})", SAMPLE_ADMIN_EMAIL);
    Ok(())
}

async fn seed(args: &Args) -> Result<()> {
    let db = Database::Mongo(MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?);
    db.ensure_indexes().await?;

    let plans = seed_plans(&db).await?;

    match (&args.superadmin_email, &args.superadmin_password) {
        (Some(email), Some(password)) => {
            seed_user(&db, None, "Platform Admin", email, password, Role::SuperAdmin).await?;
        }
        _ => warn!("SUPERADMIN_EMAIL/SUPERADMIN_PASSWORD not set, skipping super admin"),
    }

    if args.sample_data {
        match plans.first() {
            Some(plan) => seed_sample_tenant(&db, plan).await?,
            None => warn!("No plans available, skipping demo tenant"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "grainhero=info,info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    match seed(&args).await {
        Ok(()) => info!("Seeding complete"),
        Err(e) => {
            error!("Seeding failed: {}", e);
            std::process::exit(1);
        }
    }
}
