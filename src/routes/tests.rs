//! Router-level tests over the in-memory store

use chrono::{Duration, Utc};
use hyper::{Method, StatusCode};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;

use crate::auth::{Claims, Role};
use crate::db::schemas::{Alert, Plan, PlanLimits, Subscription, SubscriptionStatus, User};
use crate::db::{new_id, Filter};
use crate::services::prediction::SpoilageClass;
use crate::test_support::{
    call, memory_state, memory_state_with, request, seed_sensor, seed_silo, seed_tenant,
    seed_user, FixedPredictor, TEST_PASSWORD,
};

fn silo_body(code: &str) -> serde_json::Value {
    json!({ "silo_id": code, "name": format!("Bin {}", code), "capacity_kg": 5000.0 })
}

#[tokio::test]
async fn test_public_routes_need_no_token() {
    let state = memory_state();
    let (status, body) = call(&state, request(Method::GET, "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "memory");

    let (status, _) = call(&state, request(Method::OPTIONS, "/silos", None, None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = call(&state, request(Method::GET, "/nowhere", None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_missing_malformed_and_expired_tokens_are_rejected() {
    let state = memory_state();
    let tenant = seed_tenant(&state, "North Farm").await;
    let (user, _) = seed_user(&state, Some(&tenant.id), Role::Manager, "m@north.test").await;

    let (status, _) = call(&state, request(Method::GET, "/silos", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&state, request(Method::GET, "/silos", Some("not.a.jwt"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let now = Utc::now().timestamp() as u64;
    let expired = encode(
        &Header::default(),
        &Claims {
            sub: user.id.clone(),
            tenant_id: user.tenant_id.clone(),
            email: user.email.clone(),
            role: user.role,
            token_version: user.token_version,
            iat: now - 7200,
            exp: now - 3600,
        },
        &EncodingKey::from_secret(b"dev-mode-secret-not-for-production-use-123456"),
    )
    .unwrap();
    let (status, body) = call(&state, request(Method::GET, "/silos", Some(&expired), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Token expired");
}

#[tokio::test]
async fn test_silo_code_unique_per_tenant() {
    let state = memory_state();
    let north = seed_tenant(&state, "North Farm").await;
    let south = seed_tenant(&state, "South Farm").await;
    let (_, north_token) = seed_user(&state, Some(&north.id), Role::Manager, "m@north.test").await;
    let (_, south_token) = seed_user(&state, Some(&south.id), Role::Manager, "m@south.test").await;

    let (status, created) = call(
        &state,
        request(Method::POST, "/silos", Some(&north_token), Some(silo_body("S-1"))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["tenant_id"], north.id);

    let (status, body) = call(
        &state,
        request(Method::POST, "/silos", Some(&north_token), Some(silo_body("S-1"))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");

    let (status, _) = call(
        &state,
        request(Method::POST, "/silos", Some(&south_token), Some(silo_body("S-1"))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Deleting frees the code again
    let path = format!("/silos/{}", created["id"].as_str().unwrap());
    let (status, body) = call(&state, request(Method::DELETE, &path, Some(&north_token), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let (status, _) = call(
        &state,
        request(Method::POST, "/silos", Some(&north_token), Some(silo_body("S-1"))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_cross_tenant_reads_are_not_found() {
    let state = memory_state();
    let north = seed_tenant(&state, "North Farm").await;
    let south = seed_tenant(&state, "South Farm").await;
    let (_, south_token) = seed_user(&state, Some(&south.id), Role::Admin, "a@south.test").await;
    let silo = seed_silo(&state, &north.id, "N-1").await;

    let path = format!("/silos/{}", silo.id);
    let (status, _) = call(&state, request(Method::GET, &path, Some(&south_token), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Other tenants' records never show up in lists either
    let (status, body) = call(&state, request(Method::GET, "/silos", Some(&south_token), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);

    // Super admins see across tenants
    let (_, root_token) = seed_user(&state, None, Role::SuperAdmin, "root@grainhero.test").await;
    let (status, body) = call(&state, request(Method::GET, &path, Some(&root_token), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["silo_id"], "N-1");
}

#[tokio::test]
async fn test_alert_update_is_visible_on_read() {
    let state = memory_state();
    let tenant = seed_tenant(&state, "North Farm").await;
    let (_, token) = seed_user(&state, Some(&tenant.id), Role::Manager, "m@north.test").await;
    let silo = seed_silo(&state, &tenant.id, "N-1").await;

    let (status, alert) = call(
        &state,
        request(
            Method::POST,
            "/alerts",
            Some(&token),
            Some(json!({ "silo_id": silo.id, "title": "Door left open", "severity": "low" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let path = format!("/alerts/{}", alert["id"].as_str().unwrap());

    let (status, _) = call(
        &state,
        request(
            Method::PUT,
            &path,
            Some(&token),
            Some(json!({ "severity": "high", "message": "East hatch" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&state, request(Method::GET, &path, Some(&token), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["severity"], "high");
    assert_eq!(body["message"], "East hatch");

    let ack = format!("{}/acknowledge", path);
    let (status, body) = call(&state, request(Method::POST, &ack, Some(&token), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "acknowledged");
    let (status, _) = call(&state, request(Method::POST, &ack, Some(&token), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_plan_limit_blocks_creation() {
    let state = memory_state();
    let tenant = seed_tenant(&state, "North Farm").await;
    let (_, token) = seed_user(&state, Some(&tenant.id), Role::Manager, "m@north.test").await;

    let plan = state
        .db
        .collection::<Plan>()
        .insert_one(Plan {
            id: new_id(),
            name: "Seedling".into(),
            limits: PlanLimits {
                silos: 1,
                ..Default::default()
            },
            is_active: true,
            ..Default::default()
        })
        .await
        .unwrap();
    state
        .db
        .collection::<Subscription>()
        .insert_one(Subscription {
            id: new_id(),
            tenant_id: tenant.id.clone(),
            plan_id: plan.id,
            status: SubscriptionStatus::Active,
            current_period_start: Utc::now(),
            current_period_end: Utc::now() + Duration::days(30),
            warned: Vec::new(),
            ..Default::default()
        })
        .await
        .unwrap();

    let (status, _) = call(
        &state,
        request(Method::POST, "/silos", Some(&token), Some(silo_body("S-1"))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(
        &state,
        request(Method::POST, "/silos", Some(&token), Some(silo_body("S-2"))),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "PLAN_LIMIT_REACHED");

    let (status, body) = call(
        &state,
        request(Method::GET, "/api/plan-management/usage", Some(&token), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plan"]["name"], "Seedling");
}

#[tokio::test]
async fn test_roles_gate_writes() {
    let state = memory_state();
    let tenant = seed_tenant(&state, "North Farm").await;
    let (_, tech) = seed_user(&state, Some(&tenant.id), Role::Technician, "t@north.test").await;

    let (status, _) = call(&state, request(Method::GET, "/silos", Some(&tech), None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &state,
        request(Method::POST, "/silos", Some(&tech), Some(silo_body("S-1"))),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, _) = call(&state, request(Method::GET, "/tenants", Some(&tech), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_register_login_logout() {
    let state = memory_state();

    let (status, registered) = call(
        &state,
        request(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({
                "tenant_name": "Golden Fields",
                "name": "Ada",
                "email": "Ada@GoldenFields.test",
                "password": TEST_PASSWORD,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(registered["user"]["role"], "admin");
    assert_eq!(registered["user"]["email"], "ada@goldenfields.test");
    assert!(registered["user"].get("password_hash").is_none());
    assert_eq!(registered["tenant"]["name"], "Golden Fields");

    let (status, _) = call(
        &state,
        request(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({
                "tenant_name": "Copycat",
                "name": "Eve",
                "email": "ada@goldenfields.test",
                "password": TEST_PASSWORD,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(
        &state,
        request(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "ada@goldenfields.test", "password": "wrong-password" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid credentials");

    let (status, login) = call(
        &state,
        request(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "ada@goldenfields.test", "password": TEST_PASSWORD })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = login["token"].as_str().unwrap().to_string();
    assert!(login["user"]["last_login_at"].is_string());

    let (status, me) = call(&state, request(Method::GET, "/auth/me", Some(&token), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["name"], "Ada");

    let (status, _) = call(&state, request(Method::POST, "/auth/logout", Some(&token), None)).await;
    assert_eq!(status, StatusCode::OK);

    // Every token issued before logout is now revoked
    let (status, body) = call(&state, request(Method::GET, "/auth/me", Some(&token), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Token has been revoked");
    let registered_token = registered["token"].as_str().unwrap();
    let (status, _) = call(&state, request(Method::GET, "/silos", Some(registered_token), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_subscribes_to_cheapest_plan() {
    let state = memory_state();
    for (name, price) in [("Pro", 4900), ("Basic", 900)] {
        state
            .db
            .collection::<Plan>()
            .insert_one(Plan {
                id: new_id(),
                name: name.into(),
                price_cents: price,
                is_active: true,
                ..Default::default()
            })
            .await
            .unwrap();
    }

    let (status, registered) = call(
        &state,
        request(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({
                "tenant_name": "Golden Fields",
                "name": "Ada",
                "email": "ada@goldenfields.test",
                "password": TEST_PASSWORD,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = registered["token"].as_str().unwrap();

    let (status, body) = call(
        &state,
        request(Method::GET, "/api/plan-management/subscription", Some(token), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plan"]["name"], "Basic");
    assert_eq!(body["subscription"]["status"], "active");
}

#[tokio::test]
async fn test_inactive_tenant_is_locked_out() {
    let state = memory_state();
    let tenant = seed_tenant(&state, "North Farm").await;
    let (_, token) = seed_user(&state, Some(&tenant.id), Role::Admin, "a@north.test").await;
    let (_, root) = seed_user(&state, None, Role::SuperAdmin, "root@grainhero.test").await;

    let path = format!("/tenants/{}", tenant.id);
    let (status, _) = call(
        &state,
        request(Method::PUT, &path, Some(&root), Some(json!({ "is_active": false }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&state, request(Method::GET, "/silos", Some(&token), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &state,
        request(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "a@north.test", "password": TEST_PASSWORD })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_batch_prediction_raises_alert() {
    let state = memory_state_with(FixedPredictor {
        class: SpoilageClass::Spoiled,
        risk_score: 91.0,
    });
    let tenant = seed_tenant(&state, "North Farm").await;
    let (_, token) = seed_user(&state, Some(&tenant.id), Role::Manager, "m@north.test").await;
    let silo = seed_silo(&state, &tenant.id, "N-1").await;

    let (status, batch) = call(
        &state,
        request(
            Method::POST,
            "/grain-batches",
            Some(&token),
            Some(json!({
                "batch_id": "B-100",
                "silo_id": silo.id,
                "grain_type": "wheat",
                "quantity_kg": 1200.0,
                "moisture_content": 13.5,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let mut rx = state.realtime.subscribe();
    let path = format!("/grain-batches/{}/predict", batch["id"].as_str().unwrap());
    let (status, body) = call(&state, request(Method::POST, &path, Some(&token), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"]["prediction"], "Spoiled");
    assert_eq!(body["batch"]["risk"]["risk_score"], 91.0);
    assert_eq!(body["alert"]["severity"], "critical");

    let alerts = state
        .db
        .collection::<Alert>()
        .count(&Filter::tenant(&tenant.id))
        .await
        .unwrap();
    assert_eq!(alerts, 1);

    // Silo level follows the stored batch
    let (_, silo_json) = call(
        &state,
        request(Method::GET, &format!("/silos/{}", silo.id), Some(&token), None),
    )
    .await;
    assert_eq!(silo_json["current_level_kg"], 1200.0);

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(serde_json::to_value(event.event).unwrap());
    }
    assert!(kinds.contains(&json!("batch_risk")));
    assert!(kinds.contains(&json!("alert")));

    let (status, _) = call(&state, request(Method::GET, &path, Some(&token), None)).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_adhoc_prediction_requires_manager() {
    let state = memory_state();
    let tenant = seed_tenant(&state, "North Farm").await;
    let (_, tech) = seed_user(&state, Some(&tenant.id), Role::Technician, "t@north.test").await;
    let (_, manager) = seed_user(&state, Some(&tenant.id), Role::Manager, "m@north.test").await;

    let input = json!({
        "temperature": 28.0, "humidity": 72.0, "grain_moisture": 15.0,
        "dew_point": 20.0, "storage_days": 40.0, "airflow": 0.4,
        "ambient_light": 10.0, "pest_presence": 0.0, "rainfall": 3.0,
        // Not a model feature; accepted and dropped
        "device_serial": "D-881",
    });

    let (status, _) = call(
        &state,
        request(Method::POST, "/ai/predict", Some(&tech), Some(input.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &state,
        request(Method::POST, "/ai/predict", Some(&manager), Some(input)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], "Risky");
    assert!(body["confidence"].is_number());
    assert!(body["risk_score"].is_number());
}

#[tokio::test]
async fn test_dashboard_scopes() {
    let state = memory_state();
    let tenant = seed_tenant(&state, "North Farm").await;
    let (_, token) = seed_user(&state, Some(&tenant.id), Role::Technician, "t@north.test").await;
    seed_silo(&state, &tenant.id, "N-1").await;

    let (status, body) = call(&state, request(Method::GET, "/dashboard", Some(&token), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["capacity"]["silos"], 1);
    assert_eq!(body["latest_readings"][0]["silo_code"], "N-1");

    let (_, root) = seed_user(&state, None, Role::SuperAdmin, "root@grainhero.test").await;
    let (status, body) = call(&state, request(Method::GET, "/dashboard", Some(&root), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["platform"]["tenants"], 1);
    assert_eq!(body["platform"]["users"], 2);
}

#[tokio::test]
async fn test_password_change_revokes_sessions() {
    let state = memory_state();
    let tenant = seed_tenant(&state, "North Farm").await;
    let (_, admin) = seed_user(&state, Some(&tenant.id), Role::Admin, "a@north.test").await;
    let (tech, tech_token) =
        seed_user(&state, Some(&tenant.id), Role::Technician, "t@north.test").await;

    let path = format!("/users/{}", tech.id);
    let (status, body) = call(
        &state,
        request(Method::PUT, &path, Some(&admin), Some(json!({ "password": "new-harvest-pass" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("password_hash").is_none());

    let (status, _) = call(&state, request(Method::GET, "/silos", Some(&tech_token), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let stored = state
        .db
        .collection::<User>()
        .find_one(&Filter::by_id(&tech.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.token_version, 2);
}

#[tokio::test]
async fn test_page_far_past_the_end_is_empty() {
    let state = memory_state();
    let tenant = seed_tenant(&state, "North Farm").await;
    let (_, token) = seed_user(&state, Some(&tenant.id), Role::Admin, "a@north.test").await;
    seed_silo(&state, &tenant.id, "N-1").await;

    let (status, body) = call(
        &state,
        request(
            Method::GET,
            "/silos?page=18446744073709551615&limit=100",
            Some(&token),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().map(Vec::len), Some(0));
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn test_register_and_user_create_share_email_rules() {
    let state = memory_state();
    let tenant = seed_tenant(&state, "North Farm").await;
    let (_, admin) = seed_user(&state, Some(&tenant.id), Role::Admin, "a@north.test").await;

    // No dotted domain: rejected on both paths
    let (status, _) = call(
        &state,
        request(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({
                "tenant_name": "Hilltop",
                "name": "Bo",
                "email": "bo@localhost",
                "password": TEST_PASSWORD,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &state,
        request(
            Method::POST,
            "/users",
            Some(&admin),
            Some(json!({
                "name": "Bo",
                "email": "bo@localhost",
                "password": TEST_PASSWORD,
                "role": "technician",
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reading_history_window() {
    let state = memory_state();
    let tenant = seed_tenant(&state, "North Farm").await;
    let (_, tech) = seed_user(&state, Some(&tenant.id), Role::Technician, "t@north.test").await;
    let silo = seed_silo(&state, &tenant.id, "N-1").await;
    let sensor = seed_sensor(&state, &tenant.id, &silo.id, "probe-1").await;

    let path = format!("/sensors/{}/readings", sensor.id);
    for (day, temperature) in [("01", 20.0), ("02", 21.0), ("03", 22.0)] {
        let (status, _) = call(
            &state,
            request(
                Method::POST,
                &path,
                Some(&tech),
                Some(json!({
                    "recorded_at": format!("2026-01-{}T06:00:00Z", day),
                    "temperature": temperature,
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let window = format!(
        "{}?since=2026-01-02T00:00:00Z&until=2026-01-02T23:59:59Z",
        path
    );
    let (status, body) = call(&state, request(Method::GET, &window, Some(&tech), None)).await;
    assert_eq!(status, StatusCode::OK);
    let items = body["items"].as_array().cloned().unwrap_or_default();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["temperature"], 21.0);

    let (status, _) = call(
        &state,
        request(Method::GET, &format!("{}?until=yesterday", path), Some(&tech), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_batches_cannot_overfill_a_silo() {
    let state = memory_state();
    let tenant = seed_tenant(&state, "North Farm").await;
    let (_, admin) = seed_user(&state, Some(&tenant.id), Role::Admin, "a@north.test").await;
    let silo = seed_silo(&state, &tenant.id, "N-1").await;

    let batch = |code: &str, quantity_kg: f64| {
        json!({
            "batch_id": code,
            "silo_id": silo.id,
            "grain_type": "wheat",
            "quantity_kg": quantity_kg,
        })
    };

    let (status, _) = call(
        &state,
        request(Method::POST, "/grain-batches", Some(&admin), Some(batch("B-1", 8000.0))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(
        &state,
        request(Method::POST, "/grain-batches", Some(&admin), Some(batch("B-2", 3000.0))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap_or_default().contains("2000 kg free"));

    // Filling to the brim is allowed
    let (status, _) = call(
        &state,
        request(Method::POST, "/grain-batches", Some(&admin), Some(batch("B-2", 2000.0))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}
