use anyhow::{anyhow, bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const TELEMETRY_INGEST_PATH: &str = "api/telemetry/ingest";
const ALERT_INGEST_PATH: &str = "api/alerts/ingest";

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic: String,
    pub mqtt_client_id: String,
    pub mqtt_keepalive_secs: u64,

    pub cloud_base_url: Url,
    pub cloud_token: String,
    pub delivery_timeout: Duration,

    pub buffer_path: PathBuf,
    pub drain_after_message: bool,
    pub drain_interval: Option<Duration>,
    pub inbound_queue: usize,

    pub http_bind: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let mqtt_host = vars.string("MQTT_HOST", "localhost");
        let mqtt_port = vars.parsed::<u16>("MQTT_PORT", 1883)?;
        let mqtt_username = vars.optional("MQTT_USERNAME");
        let mqtt_password = vars.optional("MQTT_PASSWORD");
        let mqtt_topic = vars.string("MQTT_TOPIC", "telemetry/raw");
        let mqtt_client_id = vars.string(
            "EDGE_MQTT_CLIENT_ID",
            &format!("fleet-edge-agent-{}", std::process::id()),
        );
        let mqtt_keepalive_secs = vars.parsed::<u64>("EDGE_MQTT_KEEPALIVE_SECS", 60)?;

        let raw_base = vars.string("CLOUD_BASE_URL", "http://localhost:8080");
        let cloud_base_url = parse_base_url(&raw_base)?;
        let cloud_token = vars.optional("CLOUD_TOKEN").ok_or_else(|| {
            anyhow!("CLOUD_TOKEN missing; log in to the backend and put the token in the agent's .env")
        })?;
        let delivery_timeout =
            Duration::from_millis(vars.parsed::<u64>("EDGE_DELIVERY_TIMEOUT_MS", 5000)?);

        let buffer_path = PathBuf::from(vars.string("EDGE_BUFFER_FILE", "edge_buffer.jsonl"));
        let drain_after_message = vars.flag("EDGE_DRAIN_AFTER_MESSAGE", true)?;
        let drain_interval = match vars.optional("EDGE_DRAIN_INTERVAL_SECS") {
            Some(raw) => {
                let secs = raw
                    .parse::<u64>()
                    .context("invalid EDGE_DRAIN_INTERVAL_SECS")?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };
        if !drain_after_message && drain_interval.is_none() {
            bail!("EDGE_DRAIN_AFTER_MESSAGE=false requires EDGE_DRAIN_INTERVAL_SECS, otherwise the buffer never drains");
        }
        let inbound_queue = vars.parsed::<usize>("EDGE_INBOUND_QUEUE", 1024)?.max(1);

        let http_bind = vars.optional("EDGE_HTTP_BIND");

        Ok(Self {
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_topic,
            mqtt_client_id,
            mqtt_keepalive_secs,
            cloud_base_url,
            cloud_token,
            delivery_timeout,
            buffer_path,
            drain_after_message,
            drain_interval,
            inbound_queue,
            http_bind,
        })
    }

    pub fn mqtt_keepalive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keepalive_secs)
    }

    pub fn telemetry_endpoint(&self) -> Result<Url> {
        self.cloud_base_url
            .join(TELEMETRY_INGEST_PATH)
            .context("build telemetry ingest url")
    }

    pub fn alert_endpoint(&self) -> Result<Url> {
        self.cloud_base_url
            .join(ALERT_INGEST_PATH)
            .context("build alert ingest url")
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    // Url::join drops the last path segment unless the base ends with '/'.
    let normalized = format!("{}/", raw.trim_end_matches('/'));
    let url = Url::parse(&normalized).context("invalid CLOUD_BASE_URL")?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(anyhow!("CLOUD_BASE_URL must be http or https, got {other}")),
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.optional(key) {
            Some(raw) => raw.parse::<T>().with_context(|| format!("invalid {key}")),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.optional(key) {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(anyhow!("invalid {key}: expected true/false, got {raw}")),
            },
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_token_is_set() {
        let config = Config::from_lookup(lookup(&[("CLOUD_TOKEN", "tok")])).unwrap();
        assert_eq!(config.mqtt_host, "localhost");
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.mqtt_topic, "telemetry/raw");
        assert_eq!(config.buffer_path, PathBuf::from("edge_buffer.jsonl"));
        assert_eq!(config.delivery_timeout, Duration::from_secs(5));
        assert!(config.drain_after_message);
        assert!(config.drain_interval.is_none());
        assert!(config.http_bind.is_none());
        assert_eq!(
            config.telemetry_endpoint().unwrap().as_str(),
            "http://localhost:8080/api/telemetry/ingest"
        );
        assert_eq!(
            config.alert_endpoint().unwrap().as_str(),
            "http://localhost:8080/api/alerts/ingest"
        );
    }

    #[test]
    fn missing_or_blank_token_is_fatal() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(Config::from_lookup(lookup(&[("CLOUD_TOKEN", "   ")])).is_err());
    }

    #[test]
    fn base_url_keeps_its_path_prefix() {
        let config = Config::from_lookup(lookup(&[
            ("CLOUD_TOKEN", "tok"),
            ("CLOUD_BASE_URL", "https://cloud.example.com/fleet/"),
        ]))
        .unwrap();
        assert_eq!(
            config.telemetry_endpoint().unwrap().as_str(),
            "https://cloud.example.com/fleet/api/telemetry/ingest"
        );
    }

    #[test]
    fn rejects_non_http_base_url() {
        let err = Config::from_lookup(lookup(&[
            ("CLOUD_TOKEN", "tok"),
            ("CLOUD_BASE_URL", "ftp://cloud.example.com"),
        ]));
        assert!(err.is_err());
    }

    #[test]
    fn disabling_per_message_drain_requires_interval() {
        let err = Config::from_lookup(lookup(&[
            ("CLOUD_TOKEN", "tok"),
            ("EDGE_DRAIN_AFTER_MESSAGE", "false"),
        ]));
        assert!(err.is_err());

        let config = Config::from_lookup(lookup(&[
            ("CLOUD_TOKEN", "tok"),
            ("EDGE_DRAIN_AFTER_MESSAGE", "false"),
            ("EDGE_DRAIN_INTERVAL_SECS", "30"),
        ]))
        .unwrap();
        assert!(!config.drain_after_message);
        assert_eq!(config.drain_interval, Some(Duration::from_secs(30)));
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = Config::from_lookup(lookup(&[("CLOUD_TOKEN", "tok"), ("MQTT_PORT", "abc")]))
            .unwrap_err();
        assert!(err.to_string().contains("MQTT_PORT"));
    }
}
