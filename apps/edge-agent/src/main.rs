mod alerts;
mod buffer;
mod config;
mod coordinator;
mod delivery;
mod features;
mod http;
mod mqtt;
mod outbox;
mod stats;
mod telemetry;

use crate::buffer::DurableBuffer;
use crate::config::Config;
use crate::coordinator::{InboundMessage, IngestCoordinator};
use crate::delivery::CloudClient;
use crate::stats::AgentStats;
use anyhow::Result;
use futures::future;
use std::sync::Arc;
use tokio::sync::mpsc;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,fleet_edge_agent=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let stats = Arc::new(AgentStats::new());
    let delivery = CloudClient::new(&config)?;
    let buffer = DurableBuffer::open(&config.buffer_path)?;
    tracing::info!(
        buffer=%buffer.path().display(),
        cloud=%config.cloud_base_url,
        "edge agent starting"
    );

    let coordinator = IngestCoordinator::new(
        delivery,
        buffer,
        stats.clone(),
        config.drain_after_message,
    );

    // Retry whatever a previous run left behind before taking new traffic.
    match coordinator.drain().await {
        Ok(report) => tracing::info!(
            delivered = report.delivered,
            remaining = report.remaining,
            malformed = report.malformed,
            "startup drain complete"
        ),
        Err(err) => tracing::error!(error=%err, "startup drain failed"),
    }

    let (tx, rx) = mpsc::channel::<InboundMessage>(config.inbound_queue);
    let mqtt_handle = mqtt::spawn_subscriber(config.clone(), stats.clone(), tx);

    let drain_interval = config.drain_interval;
    let worker_handle = tokio::spawn(async move { coordinator.run(rx, drain_interval).await });

    let http_handle = match config.http_bind.as_deref() {
        Some(bind) => {
            let app = http::router(http::HttpState {
                stats: stats.clone(),
            });
            let listener = tokio::net::TcpListener::bind(bind).await?;
            tracing::info!(bind=%bind, "status endpoint listening");
            Some(tokio::spawn(async move {
                axum::serve(listener, app).await.ok();
            }))
        }
        None => None,
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        res = mqtt_handle => {
            if let Err(err) = res { tracing::error!(error=%err, "MQTT task failed"); }
        }
        res = worker_handle => {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::error!(error=%err, "coordinator exited"),
                Err(err) => tracing::error!(error=%err, "coordinator task failed"),
            }
        }
        _ = async {
            if let Some(handle) = http_handle {
                let _ = handle.await;
            } else {
                future::pending::<()>().await;
            }
        } => {}
    }

    Ok(())
}
