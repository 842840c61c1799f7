use crate::config::Config;
use crate::outbox::OutboxEntry;
use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Pushes one entry to the remote sink. Implementations make exactly one
/// attempt and report the outcome as a boolean; retrying is the buffer's job.
pub trait Deliver {
    fn deliver(&self, entry: &OutboxEntry) -> impl Future<Output = bool> + Send;
}

#[derive(Debug, Error)]
enum DeliveryError {
    #[error("remote returned status {0}")]
    Status(StatusCode),
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(reqwest::Error),
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeliveryError::Timeout
        } else if err.is_connect() {
            DeliveryError::Connect(err)
        } else {
            DeliveryError::Transport(err)
        }
    }
}

#[derive(Clone)]
pub struct CloudClient {
    client: Client,
    token: String,
    telemetry_url: Url,
    alert_url: Url,
}

impl CloudClient {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_endpoints(
            config.telemetry_endpoint()?,
            config.alert_endpoint()?,
            config.cloud_token.clone(),
            config.delivery_timeout,
        )
    }

    pub fn with_endpoints(
        telemetry_url: Url,
        alert_url: Url,
        token: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            token,
            telemetry_url,
            alert_url,
        })
    }

    fn endpoint(&self, entry: &OutboxEntry) -> &Url {
        match entry {
            OutboxEntry::Telemetry(_) => &self.telemetry_url,
            OutboxEntry::Alert(_) => &self.alert_url,
        }
    }

    async fn post(&self, entry: &OutboxEntry) -> Result<(), DeliveryError> {
        let request = self
            .client
            .post(self.endpoint(entry).clone())
            .bearer_auth(&self.token);
        let request = match entry {
            OutboxEntry::Telemetry(record) => request.json(record),
            OutboxEntry::Alert(alert) => request.json(alert),
        };

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(status))
        }
    }
}

impl Deliver for CloudClient {
    async fn deliver(&self, entry: &OutboxEntry) -> bool {
        match self.post(entry).await {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(
                    error=%err,
                    kind = entry.kind(),
                    vehicle = entry.vehicle_code(),
                    "delivery attempt failed"
                );
                false
            }
        }
    }
}



#[cfg(test)]
mod tests {
    use super::sink::{self, RecordingSink};
    use super::*;
    use crate::alerts::{AlertEvent, AlertKind};
    use crate::telemetry::TelemetryRecord;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn client_for(base: &Url, timeout: Duration) -> CloudClient {
        CloudClient::with_endpoints(
            base.join("api/telemetry/ingest").unwrap(),
            base.join("api/alerts/ingest").unwrap(),
            "secret".to_string(),
            timeout,
        )
        .unwrap()
    }

    fn telemetry_entry() -> OutboxEntry {
        OutboxEntry::Telemetry(TelemetryRecord {
            vehicle_code: "V1".to_string(),
            ts: "2026-01-11T00:00:00Z".to_string(),
            lat: Some(6.9),
            lon: Some(79.8),
            speed_kmh: Some(64.0),
            fuel_rate: None,
            engine_temp: None,
            raw: json!({"vehicle_code": "V1"}),
        })
    }

    fn alert_entry() -> OutboxEntry {
        OutboxEntry::Alert(AlertEvent {
            vehicle_code: "V1".to_string(),
            ts: "2026-01-11T00:00:00Z".to_string(),
            kind: AlertKind::MaintenanceRiskOverheat,
            severity: 4,
            message: "Engine overheating risk detected at the edge".to_string(),
            details: BTreeMap::from([("engine_temp".to_string(), 110.0)]),
        })
    }

    #[tokio::test]
    async fn routes_entries_by_kind_with_bearer_token() {
        let sink = RecordingSink::default();
        let base = sink::spawn(sink.clone()).await;
        let client = client_for(&base, Duration::from_secs(5));

        assert!(client.deliver(&telemetry_entry()).await);
        assert!(client.deliver(&alert_entry()).await);

        let telemetry = sink.telemetry.lock().unwrap().clone();
        let alerts = sink.alerts.lock().unwrap().clone();
        assert_eq!(telemetry.len(), 1);
        assert_eq!(telemetry[0]["vehicle_code"], "V1");
        assert_eq!(telemetry[0]["fuel_rate"], serde_json::Value::Null);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0]["type"], "MAINTENANCE_RISK_OVERHEAT");
        assert!(sink
            .auth
            .lock()
            .unwrap()
            .iter()
            .all(|value| value == "Bearer secret"));
    }

    #[tokio::test]
    async fn non_success_status_is_a_failure() {
        let sink = RecordingSink::default();
        sink.set_status(StatusCode::BAD_REQUEST);
        let base = sink::spawn(sink.clone()).await;
        let client = client_for(&base, Duration::from_secs(5));

        assert!(!client.deliver(&telemetry_entry()).await);
        sink.set_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!client.deliver(&alert_entry()).await);
    }

    #[tokio::test]
    async fn unreachable_sink_is_a_failure_not_an_error() {
        let base = sink::unreachable().await;
        let client = client_for(&base, Duration::from_millis(500));
        assert!(!client.deliver(&telemetry_entry()).await);
    }

    #[tokio::test]
    async fn hung_sink_times_out() {
        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hold = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let base = Url::parse(&format!("http://{addr}/")).unwrap();
        let client = client_for(&base, Duration::from_millis(200));
        let started = std::time::Instant::now();
        assert!(!client.deliver(&alert_entry()).await);
        assert!(started.elapsed() < Duration::from_secs(5));
        hold.abort();
    }
}
