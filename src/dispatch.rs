//! Delivery of sampled values to a target.
//!
//! The target is a closed enum; anything outside screen/mqtt/zabbix is
//! rejected when the CLI or the session file is parsed, never at dispatch
//! time. One dispatch call refreshes and delivers every measurand of one
//! sensor. Delivery failures are logged and the run continues; only a
//! catalog failure (an address that no longer resolves) is surfaced to the
//! caller.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, CatalogError, Measurand};
use crate::config::AppConfig;
use crate::transport::{MqttTransport, ZabbixSender};

/// Delivery destination for sampled values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Write to standard output.
    Screen,
    /// Publish to the MQTT broker.
    Mqtt,
    /// Submit to the Zabbix server.
    Zabbix,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Screen => "screen",
            Self::Mqtt => "mqtt",
            Self::Zabbix => "zabbix",
        };
        f.write_str(name)
    }
}

/// One scheduled unit of work: the sensor a firing samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub instrument_id: String,
    pub component_idx: usize,
    pub sensor_idx: usize,
}

/// Fans freshly sampled measurands out to the configured target.
pub struct Dispatcher {
    target: Target,
    client_id: String,
    zabbix_host: String,
    mqtt: Option<MqttTransport>,
    zabbix: Option<ZabbixSender>,
}

impl Dispatcher {
    /// Build a dispatcher for `target`. The MQTT transport is attached
    /// separately once connected; the Zabbix sender is connectionless and
    /// created here when needed.
    pub fn new(target: Target, config: &AppConfig) -> Self {
        let zabbix = match target {
            Target::Zabbix => Some(ZabbixSender::new(
                config.zabbix.server.clone(),
                config.zabbix.port,
            )),
            _ => None,
        };
        Self {
            target,
            client_id: config.mqtt.client_id.clone(),
            zabbix_host: config.zabbix.host.clone(),
            mqtt: None,
            zabbix,
        }
    }

    /// Hand over the connected broker transport.
    pub fn attach_mqtt(&mut self, transport: MqttTransport) {
        self.mqtt = Some(transport);
    }

    /// Take the broker transport back for disconnection at shutdown.
    pub fn take_mqtt(&mut self) -> Option<MqttTransport> {
        self.mqtt.take()
    }

    /// Refresh every measurand of the job's sensor and deliver each one.
    ///
    /// # Errors
    /// Returns `CatalogError` if the job's address does not resolve;
    /// transport failures are logged and swallowed so the run continues.
    pub async fn dispatch(
        &mut self,
        catalog: &mut dyn Catalog,
        job: &JobSpec,
    ) -> Result<(), CatalogError> {
        let (sensor_name, measurand_count) = {
            let instrument = catalog
                .instrument(&job.instrument_id)
                .ok_or_else(|| CatalogError::UnknownInstrument(job.instrument_id.clone()))?;
            let component = instrument.components().get(job.component_idx).ok_or(
                CatalogError::IndexOutOfRange {
                    kind: "component",
                    index: job.component_idx,
                },
            )?;
            let sensor =
                component
                    .sensors()
                    .get(job.sensor_idx)
                    .ok_or(CatalogError::IndexOutOfRange {
                        kind: "sensor",
                        index: job.sensor_idx,
                    })?;
            (sensor.name().to_string(), sensor.measurands().len())
        };

        for measurand_idx in 0..measurand_count {
            tracing::debug!(
                component_idx = job.component_idx,
                sensor_idx = job.sensor_idx,
                measurand_idx,
                "Trying to get value"
            );
            let measurand = catalog
                .refresh_value(
                    &job.instrument_id,
                    job.component_idx,
                    job.sensor_idx,
                    measurand_idx,
                )
                .await?;
            self.deliver(&job.instrument_id, &sensor_name, &measurand).await;
        }
        Ok(())
    }

    async fn deliver(&self, instrument_id: &str, sensor_name: &str, measurand: &Measurand) {
        match self.target {
            Target::Screen => println!("{}", measurand),
            Target::Mqtt => {
                let Some(payload) = mqtt_payload(measurand) else {
                    tracing::debug!(sensor = sensor_name, "No value yet, skipping publish");
                    return;
                };
                let topic = mqtt_topic(&self.client_id, instrument_id, sensor_name, measurand.name());
                match &self.mqtt {
                    Some(transport) => match transport.publish(&topic, payload).await {
                        Ok(()) => {
                            tracing::debug!(sensor = sensor_name, "MQTT message published.")
                        }
                        Err(e) => {
                            tracing::warn!(topic = %topic, error = %e, "MQTT publish failed")
                        }
                    },
                    None => tracing::warn!("MQTT transport not connected, dropping message"),
                }
            }
            Target::Zabbix => {
                let Some(value) = measurand.value() else {
                    tracing::debug!(sensor = sensor_name, "No value yet, skipping metric");
                    return;
                };
                let key = zabbix_key(sensor_name, measurand.name());
                if let Some(sender) = &self.zabbix {
                    if let Err(e) = sender.send(&self.zabbix_host, &key, value).await {
                        tracing::warn!(key = %key, error = %e, "Zabbix send failed");
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("target", &self.target)
            .field("mqtt_connected", &self.mqtt.is_some())
            .finish_non_exhaustive()
    }
}

/// `{client_id}/status/{instrument_id}/{sensor_name}/{measurand_name}`
fn mqtt_topic(client_id: &str, instrument_id: &str, sensor_name: &str, measurand_name: &str) -> String {
    format!("{client_id}/status/{instrument_id}/{sensor_name}/{measurand_name}")
}

/// `{"val": <number>, "ts": <unix seconds>}`, or None without a value yet.
fn mqtt_payload(measurand: &Measurand) -> Option<String> {
    let value = measurand.value()?;
    let ts = measurand.timestamp()?.timestamp();
    Some(serde_json::json!({ "val": value, "ts": ts }).to_string())
}

/// `{sensor_name}-{measurand_name}`
fn zabbix_key(sensor_name: &str, measurand_name: &str) -> String {
    format!("{sensor_name}-{measurand_name}")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::catalog::{Component, Instrument, Sensor, SimCatalog};

    /// A trapper double that accepts any number of submissions and records
    /// every received key.
    async fn counting_trapper() -> (std::net::SocketAddr, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let keys = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&keys);
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut header = [0u8; 13];
                socket.read_exact(&mut header).await.unwrap();
                let mut len_bytes = [0u8; 8];
                len_bytes.copy_from_slice(&header[5..13]);
                let mut body = vec![0u8; u64::from_le_bytes(len_bytes) as usize];
                socket.read_exact(&mut body).await.unwrap();

                let request: serde_json::Value = serde_json::from_slice(&body).unwrap();
                for item in request["data"].as_array().unwrap() {
                    recorded
                        .lock()
                        .unwrap()
                        .push(item["key"].as_str().unwrap().to_string());
                }

                let response = br#"{"response":"success","info":"processed: 1; failed: 0"}"#;
                let mut frame = Vec::new();
                frame.extend_from_slice(b"ZBXD\x01");
                frame.extend_from_slice(&(response.len() as u64).to_le_bytes());
                frame.extend_from_slice(response);
                socket.write_all(&frame).await.unwrap();
            }
        });
        (addr, keys)
    }

    /// Catalog that never produces values, so delivery sees unset
    /// measurands.
    struct StaleCatalog {
        instruments: Vec<Instrument>,
    }

    impl StaleCatalog {
        fn new() -> Self {
            let measurands = vec![Measurand::new(0, "recent").unwrap()];
            let sensor = Sensor::new(0, "radon", std::time::Duration::from_secs(10), measurands)
                .unwrap();
            let component = Component::new(0, vec![sensor]).unwrap();
            let instrument = Instrument::new("stale", vec![component]).unwrap();
            Self {
                instruments: vec![instrument],
            }
        }
    }

    #[async_trait::async_trait]
    impl Catalog for StaleCatalog {
        fn instruments(&self) -> &[Instrument] {
            &self.instruments
        }

        fn synchronize(&mut self, _overrides: &HashMap<String, u64>) {}

        async fn refresh_value(
            &mut self,
            instrument_id: &str,
            component_idx: usize,
            sensor_idx: usize,
            measurand_idx: usize,
        ) -> Result<Measurand, CatalogError> {
            let instrument = self
                .instruments
                .iter()
                .find(|i| i.id() == instrument_id)
                .ok_or_else(|| CatalogError::UnknownInstrument(instrument_id.to_string()))?;
            let measurand = instrument.components()[component_idx].sensors()[sensor_idx]
                .measurands()
                .get(measurand_idx)
                .ok_or(CatalogError::IndexOutOfRange {
                    kind: "measurand",
                    index: measurand_idx,
                })?;
            Ok(measurand.clone())
        }

        async fn start_cycle(&mut self, _instrument_id: &str) -> Result<(), CatalogError> {
            Ok(())
        }

        async fn stop_cycle(&mut self, _instrument_id: &str) -> Result<(), CatalogError> {
            Ok(())
        }
    }

    #[test]
    fn test_target_display_and_serde() {
        assert_eq!(Target::Screen.to_string(), "screen");
        assert_eq!(Target::Mqtt.to_string(), "mqtt");
        assert_eq!(Target::Zabbix.to_string(), "zabbix");

        let json = serde_json::to_string(&Target::Zabbix).unwrap();
        assert_eq!(json, "\"zabbix\"");
        let back: Target = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Target::Zabbix);
        assert!(serde_json::from_str::<Target>("\"carrier-pigeon\"").is_err());
    }

    #[test]
    fn test_mqtt_topic_format() {
        assert_eq!(
            mqtt_topic("host1", "j2hRuRDy", "radon", "recent"),
            "host1/status/j2hRuRDy/radon/recent"
        );
    }

    #[test]
    fn test_mqtt_payload_format() {
        let mut measurand = Measurand::new(0, "recent").unwrap();
        assert_eq!(mqtt_payload(&measurand), None);

        let ts = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        measurand.record(42.5, ts);
        let payload = mqtt_payload(&measurand).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed["val"], 42.5);
        assert_eq!(parsed["ts"], 1_700_000_000i64);
    }

    #[test]
    fn test_zabbix_key_format() {
        assert_eq!(zabbix_key("radon", "recent"), "radon-recent");
    }

    #[tokio::test]
    async fn test_dispatch_refreshes_every_measurand_of_the_sensor() {
        let mut catalog = SimCatalog::with_demo_cluster();
        let mut dispatcher = Dispatcher::new(Target::Screen, &AppConfig::default());
        let job = JobSpec {
            instrument_id: "j2hRuRDy".to_string(),
            component_idx: 0,
            sensor_idx: 0,
        };

        dispatcher.dispatch(&mut catalog, &job).await.unwrap();

        let sensor = &catalog.instrument("j2hRuRDy").unwrap().components()[0].sensors()[0];
        assert!(sensor.measurands().iter().all(|m| m.value().is_some()));
        // The neighbouring sensor was not touched.
        let other = &catalog.instrument("j2hRuRDy").unwrap().components()[0].sensors()[1];
        assert!(other.measurands().iter().all(|m| m.value().is_none()));
    }

    #[tokio::test]
    async fn test_dispatch_surfaces_bad_address() {
        let mut catalog = SimCatalog::with_demo_cluster();
        let mut dispatcher = Dispatcher::new(Target::Screen, &AppConfig::default());
        let job = JobSpec {
            instrument_id: "missing".to_string(),
            component_idx: 0,
            sensor_idx: 0,
        };
        let err = dispatcher.dispatch(&mut catalog, &job).await.unwrap_err();
        assert!(matches!(err, CatalogError::UnknownInstrument(_)));
    }

    #[tokio::test]
    async fn test_zabbix_dispatch_submits_one_metric_per_measurand() {
        let (addr, keys) = counting_trapper().await;
        let mut config = AppConfig::default();
        config.zabbix.server = addr.ip().to_string();
        config.zabbix.port = addr.port();
        config.zabbix.host = "monitor-host".to_string();

        let mut catalog = SimCatalog::with_demo_cluster();
        let mut dispatcher = Dispatcher::new(Target::Zabbix, &config);
        let job = JobSpec {
            instrument_id: "j2hRuRDy".to_string(),
            component_idx: 0,
            sensor_idx: 0,
        };

        // The radon sensor carries two measurands; one firing must submit
        // exactly one metric per measurand.
        dispatcher.dispatch(&mut catalog, &job).await.unwrap();
        assert_eq!(
            *keys.lock().unwrap(),
            vec!["radon-recent".to_string(), "radon-average".to_string()]
        );

        // A second firing submits the same pair again, nothing more.
        dispatcher.dispatch(&mut catalog, &job).await.unwrap();
        assert_eq!(keys.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_mqtt_dispatch_without_transport_still_samples() {
        let mut catalog = SimCatalog::with_demo_cluster();
        let mut dispatcher = Dispatcher::new(Target::Mqtt, &AppConfig::default());
        let job = JobSpec {
            instrument_id: "j2hRuRDy".to_string(),
            component_idx: 1,
            sensor_idx: 0,
        };

        // No transport attached: the message is dropped with a warning but
        // the firing still refreshes every measurand of the sensor.
        dispatcher.dispatch(&mut catalog, &job).await.unwrap();
        let sensor = &catalog.instrument("j2hRuRDy").unwrap().components()[1].sensors()[0];
        assert!(sensor.measurands().iter().all(|m| m.value().is_some()));
    }

    #[tokio::test]
    async fn test_dispatch_skips_measurands_without_a_value() {
        let (addr, keys) = counting_trapper().await;
        let mut config = AppConfig::default();
        config.zabbix.server = addr.ip().to_string();
        config.zabbix.port = addr.port();

        let mut catalog = StaleCatalog::new();
        let mut dispatcher = Dispatcher::new(Target::Zabbix, &config);
        let job = JobSpec {
            instrument_id: "stale".to_string(),
            component_idx: 0,
            sensor_idx: 0,
        };

        dispatcher.dispatch(&mut catalog, &job).await.unwrap();
        assert!(keys.lock().unwrap().is_empty());

        // Same skip for the broker path: no value means no payload and no
        // publish attempt.
        let mut mqtt_dispatcher = Dispatcher::new(Target::Mqtt, &AppConfig::default());
        mqtt_dispatcher.dispatch(&mut catalog, &job).await.unwrap();
    }
}
