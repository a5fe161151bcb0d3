//! MQTT broker transport.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;

use super::TransportError;

/// Channel capacity for client requests.
const REQUEST_CAPACITY: usize = 16;

/// Keep-alive interval for the broker connection.
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Backoff after a connection error before the event loop retries.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// A connected MQTT client with a background delivery loop.
///
/// The event loop runs in its own task from `connect` until `disconnect`;
/// it drives the network connection, logs connection state changes, and
/// retries after connection errors.
pub struct MqttTransport {
    client: AsyncClient,
    delivery_loop: JoinHandle<()>,
}

impl MqttTransport {
    /// Connect to the broker and start the background delivery loop.
    pub async fn connect(broker: &str, port: u16, client_id: &str) -> Result<Self, TransportError> {
        let mut options = MqttOptions::new(client_id, broker, port);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let broker = broker.to_string();
        let delivery_loop = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!(broker = %broker, "Connected with MQTT broker.");
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        tracing::info!("Gracefully disconnected from MQTT broker.");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "MQTT connection error, retrying");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            delivery_loop,
        })
    }

    /// Publish one payload at QoS 0.
    pub async fn publish(&self, topic: &str, payload: String) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await?;
        Ok(())
    }

    /// Disconnect from the broker and stop the delivery loop.
    pub async fn disconnect(self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::warn!(error = %e, "MQTT disconnect failed");
        }
        self.delivery_loop.abort();
        tracing::info!("MQTT delivery loop stopped.");
    }
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport").finish_non_exhaustive()
    }
}
