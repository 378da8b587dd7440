use crate::config::Config;
use crate::ingest::SensorIngestor;
use crate::telemetry::parse_mqtt_payload;
use anyhow::Result;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::time::{sleep, Duration};

/// Subscribes to `{prefix}/+/readings` and feeds every decoded batch to the ingestor. Broker
/// disconnects are retried forever.
pub async fn run_listener(config: Config, ingestor: SensorIngestor) -> Result<()> {
    let readings_filter = format!("{}/+/readings", config.mqtt_topic_prefix);
    loop {
        let mut mqttoptions = MqttOptions::new(
            config.mqtt_client_id.clone(),
            config.mqtt_host.clone(),
            config.mqtt_port,
        );
        mqttoptions.set_keep_alive(config.mqtt_keepalive());
        if let Some(username) = &config.mqtt_username {
            mqttoptions.set_credentials(
                username.clone(),
                config.mqtt_password.clone().unwrap_or_default(),
            );
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 32);
        let stats = ingestor.stats();

        if let Err(err) = client
            .subscribe(readings_filter.clone(), QoS::AtLeastOnce)
            .await
        {
            tracing::warn!(error=%err, "failed to subscribe to MQTT; retrying");
            stats.set_mqtt_connected(false);
            sleep(Duration::from_secs(2)).await;
            continue;
        }
        tracing::info!(topic=%readings_filter, host=%config.mqtt_host, "subscribed to sensor readings");

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    stats.set_mqtt_connected(true);
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    let mut payload = publish.payload.to_vec();
                    match parse_mqtt_payload(
                        &config.mqtt_topic_prefix,
                        &publish.topic,
                        &mut payload,
                    ) {
                        Ok(Some(batch)) => {
                            let emitted = ingestor.record(batch.reading);
                            tracing::debug!(
                                device = %batch.device,
                                samples = emitted.len(),
                                "ingested MQTT reading"
                            );
                        }
                        Ok(None) => {}
                        Err(err) => {
                            tracing::warn!(error=%err, topic=%publish.topic, "failed to decode MQTT payload")
                        }
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
