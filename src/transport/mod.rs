//! Delivery transport for decoded payloads.
//!
//! Consumers sit behind the [`Connection`] trait; the service opens one
//! connection per payload and drops it after the send, so a consumer that
//! dies between swipes never holds a stale socket in the process.

use crate::config::DeliveryConfig;
use crate::error::{BridgeError, Result};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

/// One delivery channel to a downstream consumer.
pub trait Connection: Send {
    /// Deliver a payload and return the consumer's acknowledgment, which
    /// may be empty for fire-and-forget consumers.
    fn send(&mut self, payload: &str) -> Result<String>;
}

/// TCP delivery to a local agent or gateway process.
pub struct TcpConnection {
    stream: TcpStream,
}

impl TcpConnection {
    pub fn connect(endpoint: &str, connect_timeout: Duration, ack_timeout: Duration) -> Result<Self> {
        let addr = endpoint
            .to_socket_addrs()
            .map_err(|e| BridgeError::Transport(format!("resolve {endpoint}: {e}")))?
            .next()
            .ok_or_else(|| BridgeError::Transport(format!("no address for {endpoint}")))?;

        let stream = TcpStream::connect_timeout(&addr, connect_timeout)
            .map_err(|e| BridgeError::Transport(format!("connect {endpoint}: {e}")))?;
        stream
            .set_read_timeout(Some(ack_timeout))
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        stream
            .set_write_timeout(Some(ack_timeout))
            .map_err(|e| BridgeError::Transport(e.to_string()))?;

        debug!(endpoint, "delivery connection opened");
        Ok(Self { stream })
    }
}

impl Connection for TcpConnection {
    fn send(&mut self, payload: &str) -> Result<String> {
        self.stream
            .write_all(payload.as_bytes())
            .and_then(|_| self.stream.flush())
            .map_err(|e| BridgeError::Transport(format!("write: {e}")))?;

        let mut ack = [0u8; 256];
        match self.stream.read(&mut ack) {
            Ok(n) => Ok(String::from_utf8_lossy(&ack[..n]).trim().to_string()),
            // Consumers that never acknowledge are valid.
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(String::new())
            }
            Err(e) => Err(BridgeError::Transport(format!("read ack: {e}"))),
        }
    }
}

/// Open a fresh connection to the configured consumer.
pub fn create_connection(config: &DeliveryConfig) -> Result<Box<dyn Connection>> {
    let connection = TcpConnection::connect(
        &config.endpoint,
        Duration::from_millis(config.connect_timeout_ms),
        Duration::from_millis(config.ack_timeout_ms),
    )?;
    Ok(Box::new(connection))
}
