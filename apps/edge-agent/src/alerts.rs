use crate::features::FeatureSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    DriverBehaviorSpeeding,
    FuelAnomaly,
    MaintenanceRiskOverheat,
}

impl AlertKind {
    pub fn severity(self) -> u8 {
        match self {
            AlertKind::DriverBehaviorSpeeding => 3,
            AlertKind::FuelAnomaly | AlertKind::MaintenanceRiskOverheat => 4,
        }
    }

    fn message(self) -> &'static str {
        match self {
            AlertKind::DriverBehaviorSpeeding => "Overspeeding detected at the edge",
            AlertKind::FuelAnomaly => "Abnormal fuel usage detected at the edge",
            AlertKind::MaintenanceRiskOverheat => "Engine overheating risk detected at the edge",
        }
    }

    fn details_key(self) -> &'static str {
        match self {
            AlertKind::DriverBehaviorSpeeding => "speed_kmh",
            AlertKind::FuelAnomaly => "fuel_rate",
            AlertKind::MaintenanceRiskOverheat => "engine_temp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub vehicle_code: String,
    pub ts: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: u8,
    pub message: String,
    pub details: BTreeMap<String, f64>,
}

impl AlertEvent {
    fn new(vehicle_code: &str, ts: &str, kind: AlertKind, measurement: f64) -> Self {
        Self {
            vehicle_code: vehicle_code.to_string(),
            ts: ts.to_string(),
            kind,
            severity: kind.severity(),
            message: kind.message().to_string(),
            details: BTreeMap::from([(kind.details_key().to_string(), measurement)]),
        }
    }
}

/// Applies the fixed threshold rules. Rules are independent; any subset may
/// fire. No state is kept between calls.
pub fn evaluate(vehicle_code: &str, ts: &str, features: &FeatureSet) -> Vec<AlertEvent> {
    let rules = [
        (features.is_speeding, AlertKind::DriverBehaviorSpeeding, features.speed_kmh),
        (features.fuel_spike, AlertKind::FuelAnomaly, features.fuel_rate),
        (features.is_overheat, AlertKind::MaintenanceRiskOverheat, features.engine_temp),
    ];

    rules
        .into_iter()
        .filter(|(fired, _, _)| *fired)
        .filter_map(|(_, kind, value)| value.map(|v| AlertEvent::new(vehicle_code, ts, kind, v)))
        .collect()
}
