use crate::telemetry::TelemetryRecord;

pub const SPEEDING_KMH: f64 = 100.0;
pub const OVERHEAT_TEMP: f64 = 105.0;
pub const FUEL_SPIKE_RATE: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FeatureSet {
    pub speed_kmh: Option<f64>,
    pub fuel_rate: Option<f64>,
    pub engine_temp: Option<f64>,
    pub is_speeding: bool,
    pub is_overheat: bool,
    pub fuel_spike: bool,
}

pub fn extract(record: &TelemetryRecord) -> FeatureSet {
    FeatureSet {
        speed_kmh: record.speed_kmh,
        fuel_rate: record.fuel_rate,
        engine_temp: record.engine_temp,
        is_speeding: exceeds(record.speed_kmh, SPEEDING_KMH),
        is_overheat: exceeds(record.engine_temp, OVERHEAT_TEMP),
        fuel_spike: exceeds(record.fuel_rate, FUEL_SPIKE_RATE),
    }
}

fn exceeds(value: Option<f64>, threshold: f64) -> bool {
    value.is_some_and(|v| v > threshold)
}
