//! Publishes flows to an MQTT topic via the pure-Rust `rumqttc` client.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, MqttOptions, QoS};

use crate::base::{parse_optional, BaseSegment, Segment, SegmentConfig, SegmentError};

const DEFAULT_PORT: u16 = 1883;
const DEFAULT_CLIENT_ID: &str = "flowpipeline";

/// MQTT exporter. Publishes every flow JSON-encoded to `topic` on `broker`
/// (`host` or `host:port`), with optional `qos` (0–2, default 0) and
/// `clientid`. Records are forwarded downstream whether or not the broker is
/// reachable; delivery problems are logged.
pub struct Mqtt {
    base: BaseSegment,
    host: String,
    port: u16,
    topic: String,
    qos: QoS,
    client_id: String,
}

impl Mqtt {
    pub fn from_config(config: &SegmentConfig) -> Result<Self, SegmentError> {
        let broker = config
            .get("broker")
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .ok_or(SegmentError::MissingConfig {
                segment: "mqtt",
                key: "broker",
            })?;
        let (host, port) = match broker.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| SegmentError::InvalidConfig {
                    segment: "mqtt",
                    key: "broker",
                    value: broker.clone(),
                    reason: "port is not a number".into(),
                })?;
                (host.to_string(), port)
            }
            None => (broker, DEFAULT_PORT),
        };
        let topic = config
            .get("topic")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(SegmentError::MissingConfig {
                segment: "mqtt",
                key: "topic",
            })?;
        let qos = match parse_optional::<u8>(config, "mqtt", "qos")?.unwrap_or(0) {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            other => {
                return Err(SegmentError::InvalidConfig {
                    segment: "mqtt",
                    key: "qos",
                    value: other.to_string(),
                    reason: "must be 0, 1 or 2".into(),
                })
            }
        };
        let client_id = config
            .get("clientid")
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());
        Ok(Self {
            base: BaseSegment::default(),
            host,
            port,
            topic,
            qos,
            client_id,
        })
    }
}

#[async_trait]
impl Segment for Mqtt {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn base(&self) -> &BaseSegment {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseSegment {
        &mut self.base
    }

    async fn run(&mut self) {
        let (mut input, output) = self.base.take_wiring();
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, mut event_loop) = AsyncClient::new(options, 32);

        // The event loop must be polled for the client to make progress;
        // connection errors surface here and are only logged, records keep
        // flowing downstream.
        let driver = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(_) => {}
                    Err(rumqttc::ConnectionError::RequestsDone) => break,
                    Err(err) => {
                        tracing::warn!(segment = "mqtt", error = %err, "broker connection problem");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        tracing::info!(
            segment = "mqtt",
            broker = %self.host,
            port = self.port,
            topic = %self.topic,
            "publishing flows"
        );
        while let Some(flow) = input.recv().await {
            match serde_json::to_vec(flow.as_ref()) {
                Ok(payload) => {
                    if let Err(err) = client
                        .publish(&self.topic, self.qos, false, payload)
                        .await
                    {
                        tracing::warn!(segment = "mqtt", error = %err, "publish failed, dropping record");
                    }
                }
                Err(err) => {
                    tracing::warn!(segment = "mqtt", error = %err, "could not encode flow");
                }
            }
            if output.send(flow).await.is_err() {
                break;
            }
        }
        let _ = client.disconnect().await;
        driver.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::config;

    #[test]
    fn broker_and_topic_are_required() {
        assert!(Mqtt::from_config(&config(&[("topic", "flows")])).is_err());
        assert!(Mqtt::from_config(&config(&[("broker", "localhost")])).is_err());
    }

    #[test]
    fn broker_port_is_parsed() {
        let segment = Mqtt::from_config(&config(&[
            ("broker", "broker.example:8883"),
            ("topic", "flows"),
            ("qos", "1"),
        ]))
        .expect("config");
        assert_eq!(segment.port, 8883);
        assert_eq!(segment.qos, QoS::AtLeastOnce);
    }

    #[test]
    fn bad_qos_aborts_build() {
        let result = Mqtt::from_config(&config(&[
            ("broker", "localhost"),
            ("topic", "flows"),
            ("qos", "3"),
        ]));
        assert!(result.is_err());
    }
}
