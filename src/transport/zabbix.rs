//! Zabbix sender-protocol transport.
//!
//! Implements the trapper "sender data" request: a `ZBXD\x01` header, a
//! little-endian body length, and a JSON body. One metric per request; the
//! engine submits immediately on every firing, no batching across sensors.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::TransportError;

/// Protocol magic: "ZBXD" + flags byte 0x01.
const ZBX_HEADER: &[u8; 5] = b"ZBXD\x01";

/// Upper bound on an accepted response body.
const MAX_RESPONSE_LEN: usize = 16 * 1024;

#[derive(Debug, Serialize)]
struct SenderRequest<'a> {
    request: &'static str,
    data: [SenderItem<'a>; 1],
}

#[derive(Debug, Serialize)]
struct SenderItem<'a> {
    host: &'a str,
    key: &'a str,
    value: String,
}

#[derive(Debug, Deserialize)]
struct SenderResponse {
    response: String,
    #[serde(default)]
    info: Option<String>,
}

/// Client for one Zabbix trapper endpoint.
#[derive(Debug, Clone)]
pub struct ZabbixSender {
    server: String,
    port: u16,
}

impl ZabbixSender {
    pub fn new(server: impl Into<String>, port: u16) -> Self {
        Self {
            server: server.into(),
            port,
        }
    }

    /// Submit one metric.
    ///
    /// # Errors
    /// `Io` on connect/read/write failure, `Protocol` if the server rejects
    /// the metric or answers with a malformed frame.
    pub async fn send(&self, host: &str, key: &str, value: f64) -> Result<(), TransportError> {
        let request = SenderRequest {
            request: "sender data",
            data: [SenderItem {
                host,
                key,
                value: value.to_string(),
            }],
        };
        let body = serde_json::to_vec(&request)?;

        let mut frame = Vec::with_capacity(ZBX_HEADER.len() + 8 + body.len());
        frame.extend_from_slice(ZBX_HEADER);
        frame.extend_from_slice(&(body.len() as u64).to_le_bytes());
        frame.extend_from_slice(&body);

        let mut stream = TcpStream::connect((self.server.as_str(), self.port)).await?;
        stream.write_all(&frame).await?;

        let mut header = [0u8; 13];
        stream.read_exact(&mut header).await?;
        if &header[..5] != ZBX_HEADER {
            return Err(TransportError::Protocol(
                "response does not start with ZBXD header".to_string(),
            ));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&header[5..13]);
        let len = u64::from_le_bytes(len_bytes) as usize;
        if len > MAX_RESPONSE_LEN {
            return Err(TransportError::Protocol(format!(
                "response body of {} bytes exceeds limit",
                len
            )));
        }

        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await?;
        let response: SenderResponse = serde_json::from_slice(&buf)?;
        if response.response != "success" {
            return Err(TransportError::Protocol(format!(
                "server answered '{}'",
                response.response
            )));
        }
        tracing::debug!(key, info = response.info.as_deref().unwrap_or(""), "Zabbix metric accepted");
        Ok(())
    }
}
