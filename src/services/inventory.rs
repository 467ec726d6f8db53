//! Silo fill levels derived from stored batches

use tracing::debug;

use crate::db::schemas::{BatchStatus, GrainBatch, Silo};
use crate::db::{Database, Filter, FindOptions};
use crate::types::Result;

/// Total quantity of batches currently stored in a silo
pub async fn stored_quantity(db: &Database, tenant_id: &str, silo_id: &str) -> Result<f64> {
    let batches = db
        .collection::<GrainBatch>()
        .find_many(
            &Filter::tenant(tenant_id)
                .eq("silo_id", silo_id)
                .eq("status", BatchStatus::Stored.as_str()),
            &FindOptions::default(),
        )
        .await?;
    Ok(batches.iter().map(|b| b.quantity_kg).sum())
}

/// Recompute `current_level_kg` for a silo. Missing silos are ignored.
pub async fn refresh_silo_level(db: &Database, tenant_id: &str, silo_id: &str) -> Result<()> {
    let silos = db.collection::<Silo>();
    let Some(mut silo) = silos
        .find_one(&Filter::by_id(silo_id).eq("tenant_id", tenant_id))
        .await?
    else {
        return Ok(());
    };

    let level = stored_quantity(db, tenant_id, silo_id).await?;
    if (silo.current_level_kg - level).abs() > f64::EPSILON {
        debug!(silo_id, from = silo.current_level_kg, to = level, "Silo level changed");
        silo.current_level_kg = level;
        silos.replace_one(silo).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{new_id, MemoryDb};
    use chrono::Utc;

    #[tokio::test]
    async fn test_level_counts_only_stored_batches() {
        let db = Database::Memory(MemoryDb::new());
        let silo = db
            .collection::<Silo>()
            .insert_one(Silo {
                id: new_id(),
                tenant_id: "t1".into(),
                silo_id: "A".into(),
                name: "A".into(),
                capacity_kg: 10_000.0,
                ..Default::default()
            })
            .await
            .unwrap();

        for (code, qty, status) in [
            ("B1", 1200.0, BatchStatus::Stored),
            ("B2", 800.0, BatchStatus::Stored),
            ("B3", 500.0, BatchStatus::Sold),
        ] {
            db.collection::<GrainBatch>()
                .insert_one(GrainBatch {
                    id: new_id(),
                    tenant_id: "t1".into(),
                    batch_id: code.into(),
                    silo_id: silo.id.clone(),
                    grain_type: "wheat".into(),
                    quantity_kg: qty,
                    intake_date: Utc::now(),
                    status,
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        refresh_silo_level(&db, "t1", &silo.id).await.unwrap();
        let refreshed = db
            .collection::<Silo>()
            .find_one(&Filter::by_id(&silo.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refreshed.current_level_kg, 2000.0);
    }
}
