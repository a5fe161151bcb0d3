//! Transport clients for the broker and monitoring-server targets.
//!
//! - [`MqttTransport`]: rumqttc client with its own background delivery
//!   loop, connected at run start and disconnected at shutdown
//! - [`ZabbixSender`]: one sender-protocol submission per metric
//!
//! Reconnect and retry policy stays inside the clients; the engine only
//! logs delivery failures and keeps running.

mod mqtt;
mod zabbix;

use thiserror::Error;

pub use mqtt::MqttTransport;
pub use zabbix::ZabbixSender;

/// Errors that can occur in the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The MQTT client rejected a request (publish, disconnect).
    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// TCP connection or read/write failure.
    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The monitoring server answered with a malformed or failed response.
    #[error("zabbix protocol error: {0}")]
    Protocol(String),

    /// Wire body serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
