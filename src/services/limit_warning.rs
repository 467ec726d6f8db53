//! Plan usage warning job
//!
//! Periodically compares each subscribed tenant's usage with its plan
//! limits. A warning fires once when a resource crosses the threshold and
//! re-arms only after usage drops back below it.

use bson::doc;
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::db::schemas::{
    Notification, NotificationKind, Plan, Subscription, SubscriptionStatus, UsageKind,
};
use crate::db::{new_id, Filter, FindOptions};
use crate::realtime::EventKind;
use crate::server::AppState;
use crate::services::usage::{count_usage, percent};
use crate::types::Result;

/// What to do for one resource on this pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningAction {
    /// Crossed the threshold: notify and mark warned
    Fire,
    /// Still over and already warned
    Hold,
    /// Dropped below: clear the mark so the next crossing fires again
    Rearm,
    /// Below and not warned
    Idle,
}

pub fn over_threshold(used: u64, limit: u32, threshold_pct: u8) -> bool {
    limit > 0 && used * 100 >= u64::from(limit) * u64::from(threshold_pct)
}

pub fn evaluate(used: u64, limit: u32, threshold_pct: u8, warned: bool) -> WarningAction {
    match (over_threshold(used, limit, threshold_pct), warned) {
        (true, false) => WarningAction::Fire,
        (true, true) => WarningAction::Hold,
        (false, true) => WarningAction::Rearm,
        (false, false) => WarningAction::Idle,
    }
}

/// Check one tenant. Returns the resources that fired a warning.
pub async fn check_subscription(
    state: &AppState,
    mut subscription: Subscription,
    plan: &Plan,
) -> Result<Vec<UsageKind>> {
    let threshold = state.args.limit_warning_threshold;
    let tenant_id = subscription.tenant_id.clone();
    let mut fired = Vec::new();
    let mut changed = false;

    for kind in UsageKind::ALL {
        let limit = plan.limits.get(kind);
        let used = count_usage(&state.db, &tenant_id, kind).await?;
        let warned = subscription.warned.contains(&kind);

        match evaluate(used, limit, threshold, warned) {
            WarningAction::Fire => {
                notify(state, &tenant_id, plan, kind, used, limit).await?;
                subscription.warned.push(kind);
                fired.push(kind);
                changed = true;
            }
            WarningAction::Rearm => {
                debug!(tenant_id = %tenant_id, resource = kind.as_str(), "Usage warning re-armed");
                subscription.warned.retain(|k| *k != kind);
                changed = true;
            }
            WarningAction::Hold | WarningAction::Idle => {}
        }
    }

    // Only `warned` is ours; a plan switch may have landed since the read
    if changed {
        state
            .db
            .collection::<Subscription>()
            .set_fields(&subscription.id, doc! { "warned": bson::to_bson(&subscription.warned)? })
            .await?;
    }
    Ok(fired)
}

async fn notify(
    state: &AppState,
    tenant_id: &str,
    plan: &Plan,
    kind: UsageKind,
    used: u64,
    limit: u32,
) -> Result<()> {
    let pct = percent(used, limit).unwrap_or(0.0);
    let data = json!({
        "resource": kind,
        "used": used,
        "limit": limit,
        "percent": pct,
        "threshold": state.args.limit_warning_threshold,
        "plan_id": plan.id,
    });

    let notification = Notification {
        id: new_id(),
        tenant_id: tenant_id.to_string(),
        kind: NotificationKind::LimitWarning,
        title: format!("Approaching your {} limit", kind.label()),
        message: format!(
            "You are using {} of {} {} allowed by the {} plan ({}%).",
            used,
            limit,
            kind.label(),
            plan.name,
            pct
        ),
        read: false,
        data: data.clone(),
        ..Default::default()
    };
    state
        .db
        .collection::<Notification>()
        .insert_one(notification)
        .await?;

    state.realtime.emit(EventKind::LimitWarning, tenant_id, data);
    info!(tenant_id, resource = kind.as_str(), used, limit, "Plan usage warning sent");
    Ok(())
}

/// One pass over all current subscriptions. Returns the number of warnings sent.
pub async fn run_once(state: &AppState) -> Result<usize> {
    let subscriptions = state
        .db
        .collection::<Subscription>()
        .find_many(
            &Filter::new().any_of(
                "status",
                [
                    SubscriptionStatus::Active.as_str(),
                    SubscriptionStatus::Trialing.as_str(),
                ],
            ),
            &FindOptions::default(),
        )
        .await?;

    let plans = state.db.collection::<Plan>();
    let mut sent = 0;

    for subscription in subscriptions {
        let tenant_id = subscription.tenant_id.clone();
        let plan = match plans.find_one(&Filter::by_id(&subscription.plan_id)).await {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                warn!(tenant_id = %tenant_id, plan_id = %subscription.plan_id, "Subscription references a missing plan");
                continue;
            }
            Err(e) => {
                warn!(tenant_id = %tenant_id, "Failed to load plan: {}", e);
                continue;
            }
        };

        match check_subscription(state, subscription, &plan).await {
            Ok(fired) => sent += fired.len(),
            Err(e) => warn!(tenant_id = %tenant_id, "Usage check failed: {}", e),
        }
    }

    Ok(sent)
}

/// Start the periodic job
pub fn spawn(state: Arc<AppState>) -> JoinHandle<()> {
    let period = state.args.limit_check_interval();
    info!(
        "Plan usage warnings every {}s at {}% of limits",
        period.as_secs(),
        state.args.limit_warning_threshold
    );

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match run_once(&state).await {
                Ok(0) => debug!("Usage check complete"),
                Ok(sent) => info!(sent, "Usage check complete"),
                Err(e) => warn!("Usage check failed: {}", e),
            }
        }
    })
}
