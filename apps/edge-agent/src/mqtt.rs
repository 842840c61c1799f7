use crate::config::Config;
use crate::coordinator::InboundMessage;
use crate::stats::AgentStats;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS, SubscribeReasonCode};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

/// Subscribes to the telemetry topic and hands every publish to the worker
/// queue. Waiting on a full queue stalls the event loop, which is the
/// backpressure the bus sees from a slow sink.
pub fn spawn_subscriber(
    config: Config,
    stats: Arc<AgentStats>,
    tx: mpsc::Sender<InboundMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move { run_subscriber(config, stats, tx).await })
}

async fn run_subscriber(config: Config, stats: Arc<AgentStats>, tx: mpsc::Sender<InboundMessage>) {
    loop {
        let (client, mut eventloop) = AsyncClient::new(mqtt_options(&config), 32);

        if let Err(err) = client
            .subscribe(config.mqtt_topic.clone(), QoS::AtLeastOnce)
            .await
        {
            tracing::warn!(error=%err, "failed to subscribe to MQTT; retrying");
            sleep(Duration::from_secs(2)).await;
            continue;
        }

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(incoming)) => {
                    let Some(message) = on_incoming(incoming, &config, &stats) else {
                        continue;
                    };
                    if tx.send(message).await.is_err() {
                        tracing::info!("coordinator gone; stopping MQTT subscriber");
                        return;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    stats.set_mqtt_connected(false);
                    tracing::warn!(error=%err, "MQTT connection dropped; reconnecting");
                    break;
                }
            }
        }

        sleep(Duration::from_secs(1)).await;
    }
}

/// Tracks connection state from broker packets and lifts publishes into
/// worker messages.
fn on_incoming(incoming: Incoming, config: &Config, stats: &AgentStats) -> Option<InboundMessage> {
    match incoming {
        Incoming::ConnAck(_) => {
            stats.set_mqtt_connected(true);
            tracing::info!(
                host=%config.mqtt_host,
                port=config.mqtt_port,
                "connected to MQTT broker"
            );
            None
        }
        Incoming::SubAck(ack) => {
            if ack
                .return_codes
                .iter()
                .any(|code| matches!(code, SubscribeReasonCode::Failure))
            {
                tracing::warn!(topic=%config.mqtt_topic, "broker rejected telemetry subscription");
            } else {
                tracing::info!(topic=%config.mqtt_topic, "subscribed to telemetry feed");
            }
            None
        }
        Incoming::Publish(publish) => Some(InboundMessage {
            topic: publish.topic,
            payload: publish.payload,
        }),
        _ => None,
    }
}

fn mqtt_options(config: &Config) -> MqttOptions {
    let mut options = MqttOptions::new(
        config.mqtt_client_id.clone(),
        config.mqtt_host.clone(),
        config.mqtt_port,
    );
    options.set_keep_alive(config.mqtt_keepalive());
    if let Some(username) = &config.mqtt_username {
        options.set_credentials(
            username.clone(),
            config.mqtt_password.clone().unwrap_or_default(),
        );
    }
    options
}
