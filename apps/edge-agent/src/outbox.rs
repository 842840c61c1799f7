use crate::alerts::AlertEvent;
use crate::telemetry::TelemetryRecord;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Unit of delivery and of durable storage. Serialized as
/// `{"_kind": "telemetry"|"alert", "payload": {...}}`, one per buffer line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_kind", content = "payload", rename_all = "snake_case")]
pub enum OutboxEntry {
    Telemetry(TelemetryRecord),
    Alert(AlertEvent),
}

impl OutboxEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboxEntry::Telemetry(_) => "telemetry",
            OutboxEntry::Alert(_) => "alert",
        }
    }

    pub fn vehicle_code(&self) -> &str {
        match self {
            OutboxEntry::Telemetry(record) => &record.vehicle_code,
            OutboxEntry::Alert(alert) => &alert.vehicle_code,
        }
    }

    /// Single-line JSON, without the trailing newline.
    pub fn encode_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertKind;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    #[test]
    fn telemetry_line_shape() {
        let entry = OutboxEntry::Telemetry(TelemetryRecord {
            vehicle_code: "V1".to_string(),
            ts: "2026-01-11T00:00:00Z".to_string(),
            lat: None,
            lon: None,
            speed_kmh: Some(120.0),
            fuel_rate: None,
            engine_temp: None,
            raw: json!({"vehicle_code": "V1", "speed_kmh": 120}),
        });
        let line = entry.encode_line().unwrap();
        assert!(!line.contains('\n'));

        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["_kind"], "telemetry");
        assert_eq!(value["payload"]["vehicle_code"], "V1");
        assert_eq!(value["payload"]["lat"], Value::Null);
        assert_eq!(value["payload"]["raw"]["speed_kmh"], 120);

        assert_eq!(OutboxEntry::decode_line(&line).unwrap(), entry);
    }

    #[test]
    fn alert_line_shape() {
        let entry = OutboxEntry::Alert(AlertEvent {
            vehicle_code: "V2".to_string(),
            ts: "2026-01-11T00:00:00Z".to_string(),
            kind: AlertKind::FuelAnomaly,
            severity: 4,
            message: "Abnormal fuel usage detected at the edge".to_string(),
            details: BTreeMap::from([("fuel_rate".to_string(), 31.0)]),
        });
        let value: Value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["_kind"], "alert");
        assert_eq!(value["payload"]["type"], "FUEL_ANOMALY");
        assert_eq!(entry.kind(), "alert");
        assert_eq!(entry.vehicle_code(), "V2");
    }

    #[test]
    fn rejects_unknown_kind_and_garbage() {
        assert!(OutboxEntry::decode_line(r#"{"_kind":"metric","payload":{}}"#).is_err());
        assert!(OutboxEntry::decode_line(r#"{"_kind":"alert"}"#).is_err());
        assert!(OutboxEntry::decode_line("{\"_kind\":\"telem").is_err());
    }
}
