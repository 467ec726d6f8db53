//! Plan usage accounting and limit enforcement
//!
//! Tenants without a current subscription are unrestricted. A plan limit of
//! zero means unlimited.

use serde::Serialize;

use crate::db::schemas::{GrainBatch, Plan, Sensor, Silo, Subscription, User};
pub use crate::db::schemas::UsageKind;
use crate::db::{Database, Filter};
use crate::types::{GrainError, Result};

/// Usage of one resource against its limit
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UsageEntry {
    pub resource: UsageKind,
    pub used: u64,
    /// 0 = unlimited
    pub limit: u32,
    /// None when unlimited
    pub percent: Option<f64>,
}

/// Live records of `kind` owned by the tenant
pub async fn count_usage(db: &Database, tenant_id: &str, kind: UsageKind) -> Result<u64> {
    let filter = Filter::tenant(tenant_id);
    match kind {
        UsageKind::Users => db.collection::<User>().count(&filter).await,
        UsageKind::Silos => db.collection::<Silo>().count(&filter).await,
        UsageKind::GrainBatches => db.collection::<GrainBatch>().count(&filter).await,
        UsageKind::Sensors => db.collection::<Sensor>().count(&filter).await,
    }
}

/// Percentage of the limit used, rounded to one decimal
pub fn percent(used: u64, limit: u32) -> Option<f64> {
    if limit == 0 {
        return None;
    }
    let pct = used as f64 * 100.0 / f64::from(limit);
    Some((pct * 10.0).round() / 10.0)
}

/// The tenant's subscription record, whatever its status
pub async fn subscription_for(db: &Database, tenant_id: &str) -> Result<Option<Subscription>> {
    db.collection::<Subscription>()
        .find_one(&Filter::tenant(tenant_id))
        .await
}

/// Subscription and plan whose limits currently apply
pub async fn active_plan(db: &Database, tenant_id: &str) -> Result<Option<(Subscription, Plan)>> {
    let Some(subscription) = subscription_for(db, tenant_id).await? else {
        return Ok(None);
    };
    if !subscription.status.is_current() {
        return Ok(None);
    }

    let plan = db
        .collection::<Plan>()
        .find_one(&Filter::by_id(&subscription.plan_id))
        .await?;
    Ok(plan.map(|plan| (subscription, plan)))
}

/// Fail with `PLAN_LIMIT_REACHED` when one more `kind` would exceed the plan
pub async fn enforce_limit(db: &Database, tenant_id: &str, kind: UsageKind) -> Result<()> {
    let Some((_, plan)) = active_plan(db, tenant_id).await? else {
        return Ok(());
    };

    let limit = plan.limits.get(kind);
    if limit == 0 {
        return Ok(());
    }

    let used = count_usage(db, tenant_id, kind).await?;
    if used >= u64::from(limit) {
        return Err(GrainError::LimitReached(format!(
            "The {} plan allows {} {}; upgrade to add more",
            plan.name,
            limit,
            kind.label()
        )));
    }
    Ok(())
}

/// Usage of every limited resource under `plan` (unlimited when None)
pub async fn usage_report(
    db: &Database,
    tenant_id: &str,
    plan: Option<&Plan>,
) -> Result<Vec<UsageEntry>> {
    let mut entries = Vec::with_capacity(UsageKind::ALL.len());
    for kind in UsageKind::ALL {
        let used = count_usage(db, tenant_id, kind).await?;
        let limit = plan.map(|p| p.limits.get(kind)).unwrap_or(0);
        entries.push(UsageEntry {
            resource: kind,
            used,
            limit,
            percent: percent(used, limit),
        });
    }
    Ok(entries)
}

/// Resources whose current usage would not fit into `plan`
pub fn exceeded_by(usage: &[UsageEntry], plan: &Plan) -> Vec<UsageKind> {
    usage
        .iter()
        .filter(|entry| {
            let limit = plan.limits.get(entry.resource);
            limit > 0 && entry.used > u64::from(limit)
        })
        .map(|entry| entry.resource)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{PlanLimits, SubscriptionStatus};
    use crate::db::{new_id, MemoryDb};
    use chrono::{Duration, Utc};

    fn plan(silos: u32) -> Plan {
        Plan {
            id: new_id(),
            name: "Basic".into(),
            limits: PlanLimits {
                users: 0,
                silos,
                grain_batches: 0,
                sensors: 0,
            },
            is_active: true,
            ..Default::default()
        }
    }

    async fn subscribe(db: &Database, tenant: &str, plan: &Plan, status: SubscriptionStatus) {
        db.collection::<Plan>().insert_one(plan.clone()).await.unwrap();
        db.collection::<Subscription>()
            .insert_one(Subscription {
                id: new_id(),
                tenant_id: tenant.into(),
                plan_id: plan.id.clone(),
                status,
                current_period_start: Utc::now(),
                current_period_end: Utc::now() + Duration::days(30),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    async fn add_silo(db: &Database, tenant: &str, code: &str) {
        db.collection::<Silo>()
            .insert_one(Silo {
                id: new_id(),
                tenant_id: tenant.into(),
                silo_id: code.into(),
                name: code.into(),
                capacity_kg: 1000.0,
                ..Default::default()
            })
            .await
            .unwrap();
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(4, 5), Some(80.0));
        assert_eq!(percent(1, 3), Some(33.3));
        assert_eq!(percent(10, 0), None);
    }

    #[tokio::test]
    async fn test_enforce_limit() {
        let db = Database::Memory(MemoryDb::new());
        subscribe(&db, "t1", &plan(2), SubscriptionStatus::Active).await;

        add_silo(&db, "t1", "A").await;
        assert!(enforce_limit(&db, "t1", UsageKind::Silos).await.is_ok());
        add_silo(&db, "t1", "B").await;

        let err = enforce_limit(&db, "t1", UsageKind::Silos).await.unwrap_err();
        assert_eq!(err.code(), "PLAN_LIMIT_REACHED");

        // Unlimited resource and other tenants are unaffected
        assert!(enforce_limit(&db, "t1", UsageKind::Sensors).await.is_ok());
        assert!(enforce_limit(&db, "t2", UsageKind::Silos).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_subscription_is_unrestricted() {
        let db = Database::Memory(MemoryDb::new());
        subscribe(&db, "t1", &plan(1), SubscriptionStatus::Cancelled).await;
        add_silo(&db, "t1", "A").await;
        assert!(enforce_limit(&db, "t1", UsageKind::Silos).await.is_ok());
    }

    #[tokio::test]
    async fn test_usage_report_and_downgrade_check() {
        let db = Database::Memory(MemoryDb::new());
        add_silo(&db, "t1", "A").await;
        add_silo(&db, "t1", "B").await;

        let basic = plan(5);
        let report = usage_report(&db, "t1", Some(&basic)).await.unwrap();
        let silos = report
            .iter()
            .find(|e| e.resource == UsageKind::Silos)
            .unwrap();
        assert_eq!(silos.used, 2);
        assert_eq!(silos.percent, Some(40.0));

        assert!(exceeded_by(&report, &basic).is_empty());
        assert_eq!(exceeded_by(&report, &plan(1)), vec![UsageKind::Silos]);
    }
}
