use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

const VEHICLE_ID_KEYS: [&str; 3] = ["vehicle_code", "vehicleId", "vehicle_id"];
const TIMESTAMP_KEYS: [&str; 2] = ["ts", "timestamp"];

/// Why an inbound message was dropped without producing any entry.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("payload is not valid JSON")]
    InvalidJson,
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload has no vehicle identifier")]
    MissingVehicleId,
}

/// One vehicle sample, as forwarded to the telemetry ingest endpoint.
///
/// `raw` is the decoded inbound object, kept untouched for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub vehicle_code: String,
    pub ts: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub fuel_rate: Option<f64>,
    pub engine_temp: Option<f64>,
    pub raw: Value,
}

pub fn parse_message(payload: &[u8], now: DateTime<Utc>) -> Result<TelemetryRecord, ParseError> {
    let decoded: Value = serde_json::from_slice(payload).map_err(|_| ParseError::InvalidJson)?;
    let Value::Object(fields) = &decoded else {
        return Err(ParseError::NotAnObject);
    };

    let vehicle_code = vehicle_id(fields).ok_or(ParseError::MissingVehicleId)?;
    let ts = timestamp(fields).unwrap_or_else(|| now.to_rfc3339_opts(SecondsFormat::Millis, true));

    Ok(TelemetryRecord {
        vehicle_code,
        ts,
        lat: coerce_f64(fields.get("lat")),
        lon: coerce_f64(fields.get("lon")),
        speed_kmh: coerce_f64(fields.get("speed_kmh")),
        fuel_rate: coerce_f64(fields.get("fuel_rate")),
        engine_temp: coerce_f64(fields.get("engine_temp")),
        raw: decoded,
    })
}

/// Best-effort numeric coercion: numbers and numeric strings become `f64`,
/// everything else (including non-finite results) becomes `None`.
pub fn coerce_f64(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

fn vehicle_id(fields: &Map<String, Value>) -> Option<String> {
    VEHICLE_ID_KEYS
        .iter()
        .find_map(|key| match fields.get(*key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
            _ => None,
        })
}

fn timestamp(fields: &Map<String, Value>) -> Option<String> {
    TIMESTAMP_KEYS.iter().find_map(|key| match fields.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => {
            let dt = match n.as_i64() {
                Some(ms) => millis_to_dt(ms)?,
                None => millis_to_dt((n.as_f64()? * 1000.0) as i64)?,
            };
            Some(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        _ => None,
    })
}

fn millis_to_dt(ms: i64) -> Option<DateTime<Utc>> {
    let secs = ms.div_euclid(1000);
    let nanos = (ms.rem_euclid(1000) * 1_000_000) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}
