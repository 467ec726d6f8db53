//! Sensor reading ingestion and threshold evaluation
//!
//! Readings arrive over HTTP or the NATS telemetry bridge and take the same
//! path: store, mark the sensor online, broadcast, then compare against the
//! silo's thresholds.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, warn};

use crate::db::schemas::{
    Alert, AlertSource, ReadingValues, Sensor, SensorReading, SensorStatus, Severity, Silo,
    SiloThresholds,
};
use crate::db::{new_id, Filter};
use crate::realtime::EventKind;
use crate::server::AppState;
use crate::services::alerting::{open_alert_for, raise_alert, NewAlert};
use crate::types::{GrainError, Result};

/// A metric over its silo threshold
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub metric: &'static str,
    pub value: f64,
    pub threshold: f64,
    pub severity: Severity,
}

/// Severity grows with the relative overshoot: up to 10% over is medium,
/// up to 25% is high, anything beyond is critical.
pub fn severity_for(value: f64, threshold: f64) -> Severity {
    let base = threshold.abs().max(f64::EPSILON);
    let over = (value - threshold) / base;
    if over <= 0.10 {
        Severity::Medium
    } else if over <= 0.25 {
        Severity::High
    } else {
        Severity::Critical
    }
}

/// Every metric in `values` strictly above its threshold
pub fn evaluate_thresholds(thresholds: &SiloThresholds, values: &ReadingValues) -> Vec<Breach> {
    let checks = [
        ("temperature", values.temperature, Some(thresholds.max_temperature)),
        ("humidity", values.humidity, Some(thresholds.max_humidity)),
        ("grain_moisture", values.grain_moisture, Some(thresholds.max_grain_moisture)),
        ("co2", values.co2, thresholds.max_co2),
    ];

    checks
        .into_iter()
        .filter_map(|(metric, value, threshold)| {
            let (value, threshold) = (value?, threshold?);
            (value > threshold).then(|| Breach {
                metric,
                value,
                threshold,
                severity: severity_for(value, threshold),
            })
        })
        .collect()
}

fn metric_label(metric: &str) -> &str {
    match metric {
        "temperature" => "Temperature",
        "humidity" => "Humidity",
        "grain_moisture" => "Grain moisture",
        "co2" => "CO2",
        other => other,
    }
}

/// Result of ingesting one reading
#[derive(Debug)]
pub struct Ingested {
    pub reading: SensorReading,
    pub alerts: Vec<Alert>,
}

/// Store a reading from `sensor` and run threshold checks
pub async fn ingest_reading(
    state: &AppState,
    sensor: &Sensor,
    values: ReadingValues,
    recorded_at: Option<DateTime<Utc>>,
) -> Result<Ingested> {
    if values.is_empty() {
        return Err(GrainError::BadRequest(
            "Reading must contain at least one metric".into(),
        ));
    }
    if !values.all_finite() {
        return Err(GrainError::BadRequest(
            "Reading values must be finite numbers".into(),
        ));
    }

    let recorded_at = recorded_at.unwrap_or_else(Utc::now);
    let reading = SensorReading {
        id: new_id(),
        tenant_id: sensor.tenant_id.clone(),
        silo_id: sensor.silo_id.clone(),
        sensor_id: sensor.id.clone(),
        recorded_at,
        values,
        ..Default::default()
    };
    let reading = state
        .db
        .collection::<SensorReading>()
        .insert_one(reading)
        .await?;

    let mut updated = sensor.clone();
    updated.last_reading_at = Some(
        sensor
            .last_reading_at
            .map_or(recorded_at, |last| last.max(recorded_at)),
    );
    if updated.status == SensorStatus::Offline {
        updated.status = SensorStatus::Online;
    }
    if let Err(e) = state.db.collection::<Sensor>().replace_one(updated).await {
        // The sensor may have been deleted concurrently; the reading stands
        warn!(sensor_id = %sensor.id, "Failed to update sensor after reading: {}", e);
    }

    let mut event = serde_json::to_value(&reading)?;
    if let Some(object) = event.as_object_mut() {
        object.insert("device_id".into(), json!(sensor.device_id));
    }
    state
        .realtime
        .emit(EventKind::SensorReading, &reading.tenant_id, event);

    let alerts = check_thresholds(state, sensor, &reading).await?;
    Ok(Ingested { reading, alerts })
}

async fn check_thresholds(
    state: &AppState,
    sensor: &Sensor,
    reading: &SensorReading,
) -> Result<Vec<Alert>> {
    let silo = state
        .db
        .collection::<Silo>()
        .find_one(&Filter::by_id(&sensor.silo_id).eq("tenant_id", sensor.tenant_id.as_str()))
        .await?;
    let Some(silo) = silo else {
        debug!(sensor_id = %sensor.id, "Sensor silo missing, skipping threshold checks");
        return Ok(Vec::new());
    };

    let mut raised = Vec::new();
    for breach in evaluate_thresholds(&silo.thresholds, &reading.values) {
        if open_alert_for(state, &sensor.id, breach.metric).await?.is_some() {
            debug!(sensor_id = %sensor.id, metric = breach.metric, "Open alert exists");
            continue;
        }

        let label = metric_label(breach.metric);
        let alert = raise_alert(
            state,
            &sensor.tenant_id,
            NewAlert {
                silo_id: silo.id.clone(),
                sensor_id: Some(sensor.id.clone()),
                metric: Some(breach.metric.to_string()),
                value: Some(breach.value),
                threshold: Some(breach.threshold),
                title: format!("{} above threshold in {}", label, silo.name),
                message: format!(
                    "{} reading {:.1} exceeds the limit of {:.1} (sensor {})",
                    label, breach.value, breach.threshold, sensor.device_id
                ),
                severity: breach.severity,
                source: AlertSource::Sensor,
                ..Default::default()
            },
        )
        .await?;
        raised.push(alert);
    }
    Ok(raised)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_bands() {
        assert_eq!(severity_for(31.0, 30.0), Severity::Medium);
        assert_eq!(severity_for(33.0, 30.0), Severity::Medium);
        assert_eq!(severity_for(37.5, 30.0), Severity::High);
        assert_eq!(severity_for(40.0, 30.0), Severity::Critical);
    }

    #[test]
    fn test_evaluate_thresholds() {
        let thresholds = SiloThresholds::default();
        let values = ReadingValues {
            temperature: Some(28.0),
            humidity: Some(90.0),
            grain_moisture: Some(15.0),
            co2: Some(5000.0),
            ..Default::default()
        };

        let breaches = evaluate_thresholds(&thresholds, &values);
        let metrics: Vec<&str> = breaches.iter().map(|b| b.metric).collect();
        // co2 has no default limit, temperature is under
        assert_eq!(metrics, vec!["humidity", "grain_moisture"]);
        assert_eq!(breaches[0].severity, Severity::Critical);
        assert_eq!(breaches[1].severity, Severity::Medium);
    }

    #[test]
    fn test_equal_to_threshold_is_not_a_breach() {
        let values = ReadingValues {
            temperature: Some(30.0),
            ..Default::default()
        };
        assert!(evaluate_thresholds(&SiloThresholds::default(), &values).is_empty());
    }
}
